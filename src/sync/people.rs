//! Person lookups for roster and schedule sync
//!
//! Contact details live on the people endpoint rather than on assignments,
//! so each person is fetched once per run and cached.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::upstream::resources::{parse_resources, paths};
use crate::upstream::{FetchError, Included, RateLimitedFetcher, Resource};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonDetails {
    pub upstream_id: String,
    pub name: Option<String>,
    /// Lowercased primary address, falling back to the first one listed.
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub status: Option<String>,
}

impl PersonDetails {
    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|status| status.eq_ignore_ascii_case("active"))
    }

    /// Builds details from a person resource and its included contacts.
    pub fn from_resource(person: &Resource, included: &Included) -> Self {
        let name = person.attr_string("name").or_else(|| {
            let joined = [person.attr_str("first_name"), person.attr_str("last_name")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        });

        let email = pick_primary(included, "Email", "address").map(|e| e.to_lowercase());
        let phone_number = pick_primary(included, "PhoneNumber", "number");

        Self {
            upstream_id: person.id.clone(),
            name,
            email,
            phone_number,
            birthday: person.attr_date("birthdate"),
            status: person.attr_string("status"),
        }
    }
}

fn pick_primary(included: &Included, kind: &str, attribute: &str) -> Option<String> {
    let mut candidates: Vec<&Resource> = included
        .of_kind(kind)
        .filter(|r| r.attr_str(attribute).is_some())
        .collect();
    candidates.sort_by(|a, b| {
        b.attr_bool("primary")
            .unwrap_or(false)
            .cmp(&a.attr_bool("primary").unwrap_or(false))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
        .first()
        .and_then(|r| r.attr_string(attribute))
}

/// Per-run cache of person lookups.
#[derive(Debug)]
pub struct PersonDirectory<'a> {
    fetcher: &'a RateLimitedFetcher,
    token: &'a str,
    cache: HashMap<String, Option<PersonDetails>>,
}

impl<'a> PersonDirectory<'a> {
    pub fn new(fetcher: &'a RateLimitedFetcher, token: &'a str) -> Self {
        Self {
            fetcher,
            token,
            cache: HashMap::new(),
        }
    }

    /// Returns the person, `Ok(None)` if the upstream no longer has them.
    pub async fn get(&mut self, person_id: &str) -> Result<Option<PersonDetails>, FetchError> {
        if let Some(cached) = self.cache.get(person_id) {
            return Ok(cached.clone());
        }

        let details = match self.fetcher.fetch_one(self.token, &paths::person(person_id)).await {
            Ok(document) => {
                let included = Included::new(&parse_resources(document.get("included")));
                parse_resources(document.get("data"))
                    .first()
                    .map(|person| PersonDetails::from_resource(person, &included))
            }
            Err(FetchError::Status { status: 404, .. }) => None,
            Err(e) => return Err(e),
        };

        self.cache.insert(person_id.to_string(), details.clone());
        Ok(details)
    }
}
