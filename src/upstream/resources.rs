//! JSON:API documents and endpoint paths
//!
//! Upstream responses are `{ "data": ..., "included": [...], "links": {...} }`
//! documents. Resources are kept loosely typed (attributes as a JSON map) and
//! read through the accessors below so that missing or renamed attributes
//! degrade to `None` instead of failing a whole page.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: Map<String, Value>,
}

impl Resource {
    /// Non-empty string attribute.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn attr_string(&self, name: &str) -> Option<String> {
        self.attr_str(name).map(str::to_string)
    }

    /// Integer attribute; numeric strings are accepted too.
    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attributes.get(name).and_then(Value::as_bool)
    }

    pub fn attr_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        self.attr_str(name)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Date attribute; full timestamps are truncated to their date.
    pub fn attr_date(&self, name: &str) -> Option<NaiveDate> {
        let raw = self.attr_str(name)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
    }

    /// Attribute rendered as text, joining arrays with ", ".
    pub fn attr_text(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        }
    }

    /// Id of a to-one relationship: `relationships.<name>.data.id`.
    pub fn relationship_id(&self, name: &str) -> Option<&str> {
        self.relationships
            .get(name)?
            .get("data")?
            .get("id")?
            .as_str()
    }
}

/// Parse a `data` or `included` member. Unparseable entries are skipped.
pub fn parse_resources(member: Option<&Value>) -> Vec<Resource> {
    match member {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        Some(item @ Value::Object(_)) => serde_json::from_value(item.clone())
            .map(|resource| vec![resource])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn next_link(document: &Value) -> Option<String> {
    document
        .get("links")?
        .get("next")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Lookup over the `included` member by `(type, id)`.
#[derive(Debug, Default)]
pub struct Included {
    by_key: HashMap<(String, String), Resource>,
}

impl Included {
    pub fn new(resources: &[Resource]) -> Self {
        let by_key = resources
            .iter()
            .map(|r| ((r.kind.clone(), r.id.clone()), r.clone()))
            .collect();
        Self { by_key }
    }

    pub fn get(&self, kind: &str, id: &str) -> Option<&Resource> {
        self.by_key.get(&(kind.to_string(), id.to_string()))
    }

    /// Follow a relationship of `resource` into the included set.
    pub fn related(&self, resource: &Resource, relationship: &str, kind: &str) -> Option<&Resource> {
        resource
            .relationship_id(relationship)
            .and_then(|id| self.get(kind, id))
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.by_key.values().filter(move |r| r.kind == kind)
    }
}

/// Endpoint paths, relative to the API base.
pub mod paths {
    use chrono::{Duration, NaiveDate};

    const PER_PAGE: u32 = 100;

    pub fn service_types() -> String {
        format!("/services/v2/service_types?per_page={PER_PAGE}&order=id")
    }

    /// Plans sorting on or after `after` and, when given, before `before`.
    pub fn plans_in_window(service_type_id: &str, after: NaiveDate, before: Option<NaiveDate>) -> String {
        match before {
            Some(before) => format!(
                "/services/v2/service_types/{service_type_id}/plans?filter=after,before&after={after}&before={before}&order=sort_date&per_page={PER_PAGE}"
            ),
            None => format!(
                "/services/v2/service_types/{service_type_id}/plans?filter=after&after={after}&order=sort_date&per_page={PER_PAGE}"
            ),
        }
    }

    /// Plans whose service falls on `date`.
    pub fn plans_on_date(service_type_id: &str, date: NaiveDate) -> String {
        plans_in_window(service_type_id, date, Some(date + Duration::days(1)))
    }

    pub fn plan_items(service_type_id: &str, plan_id: &str) -> String {
        format!(
            "/services/v2/service_types/{service_type_id}/plans/{plan_id}/items?include=song,key&per_page={PER_PAGE}"
        )
    }

    pub fn plan_team_members(service_type_id: &str, plan_id: &str) -> String {
        format!(
            "/services/v2/service_types/{service_type_id}/plans/{plan_id}/team_members?include=team&per_page={PER_PAGE}"
        )
    }

    pub fn teams(service_type_id: &str) -> String {
        format!("/services/v2/service_types/{service_type_id}/teams?per_page={PER_PAGE}")
    }

    pub fn team_position_assignments(team_id: &str) -> String {
        format!(
            "/services/v2/teams/{team_id}/person_team_position_assignments?include=person,team_position&per_page={PER_PAGE}"
        )
    }

    pub fn person(person_id: &str) -> String {
        format!("/people/v2/people/{person_id}?include=emails,phone_numbers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> Resource {
        serde_json::from_value(json!({
            "type": "Plan",
            "id": "77",
            "attributes": {
                "title": "  Easter Sunday ",
                "series_title": "",
                "items_count": "12",
                "sort_date": "2015-04-05T09:00:00Z",
                "themes": ["Hope", "Resurrection"]
            },
            "relationships": {
                "service_type": { "data": { "type": "ServiceType", "id": "3" } },
                "next_plan": { "data": null }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_attribute_accessors() {
        let plan = plan();
        assert_eq!(plan.attr_str("title"), Some("Easter Sunday"));
        assert_eq!(plan.attr_str("series_title"), None);
        assert_eq!(plan.attr_i64("items_count"), Some(12));
        assert_eq!(
            plan.attr_date("sort_date"),
            NaiveDate::from_ymd_opt(2015, 4, 5)
        );
        assert_eq!(plan.attr_text("themes").as_deref(), Some("Hope, Resurrection"));
        assert_eq!(plan.attr_str("missing"), None);
    }

    #[test]
    fn test_relationship_id() {
        let plan = plan();
        assert_eq!(plan.relationship_id("service_type"), Some("3"));
        assert_eq!(plan.relationship_id("next_plan"), None);
        assert_eq!(plan.relationship_id("unknown"), None);
    }

    #[test]
    fn test_parse_resources_accepts_object_or_array() {
        let doc = json!({
            "data": [{ "type": "Song", "id": "1" }, { "bogus": true }],
            "included": { "type": "Key", "id": "9" }
        });
        assert_eq!(parse_resources(doc.get("data")).len(), 1);
        assert_eq!(parse_resources(doc.get("included"))[0].id, "9");
        assert!(parse_resources(doc.get("links")).is_empty());
    }

    #[test]
    fn test_next_link() {
        assert_eq!(
            next_link(&json!({ "links": { "next": "https://x.test/p?offset=100" } })).as_deref(),
            Some("https://x.test/p?offset=100")
        );
        assert_eq!(next_link(&json!({ "links": { "self": "x" } })), None);
        assert_eq!(next_link(&json!({})), None);
    }

    #[test]
    fn test_paths() {
        let day = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        assert_eq!(
            paths::plans_in_window("3", day, None),
            "/services/v2/service_types/3/plans?filter=after&after=2015-01-01&order=sort_date&per_page=100"
        );
        assert!(paths::plans_on_date("3", day).contains("before=2015-01-02"));
        assert!(paths::plan_items("3", "77").ends_with("include=song,key&per_page=100"));
    }
}
