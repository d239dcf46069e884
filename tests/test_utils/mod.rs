//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, a config
//! pointed at a wiremock server, seed helpers, and builders for the JSON:API
//! documents the upstream returns.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use migration::{Migrator, MigratorTrait};
use plansync::config::{AppConfig, FetchPolicyConfig, SyncConfig, UpstreamConfig};
use plansync::models::{campus, connection, profile};
use plansync::repositories::{NewConnection, SyncToggles};
use plansync::sync::{RunDeadline, SyncServices, WorkPosition};
use sea_orm::{Database, DatabaseConnection, EntityTrait, Set};
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const ACCESS_TOKEN: &str = "stored-access-token";
pub const REFRESH_TOKEN: &str = "stored-refresh-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

/// Configuration pointed at `upstream_uri` with near-zero backoff.
#[allow(dead_code)]
pub fn test_config(upstream_uri: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        token_encryption_key: Some("integration-test-secret".to_string()),
        upstream: UpstreamConfig {
            api_base: upstream_uri.to_string(),
            token_url: format!("{upstream_uri}/oauth/token"),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            request_timeout_seconds: 5,
        },
        fetch: FetchPolicyConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            max_retry_after_seconds: 5,
            page_delay_ms: 0,
            max_pages: 50,
        },
        sync: SyncConfig {
            flush_threshold: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn build_services(db: Arc<DatabaseConnection>, config: &AppConfig) -> SyncServices {
    SyncServices::from_config(config, db).expect("services build from test config")
}

/// Stores a connection whose access token expires in `expires_in`.
#[allow(dead_code)]
pub async fn seed_connection(
    services: &SyncServices,
    tenant_id: Uuid,
    expires_in: Duration,
    toggles: SyncToggles,
) -> connection::Model {
    services
        .connections()
        .upsert_with_tokens(NewConnection {
            tenant_id,
            organization_name: Some("Test Church".to_string()),
            access_token: ACCESS_TOKEN.to_string(),
            refresh_token: REFRESH_TOKEN.to_string(),
            expires_at: Some(Utc::now() + expires_in),
            default_campus_id: None,
            toggles,
        })
        .await
        .expect("connection seeds")
}

#[allow(dead_code)]
pub async fn seed_campus(db: &DatabaseConnection, tenant_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    campus::Entity::insert(campus::ActiveModel {
        id: Set(id),
        tenant_id: Set(tenant_id),
        name: Set(name.to_string()),
    })
    .exec_without_returning(db)
    .await
    .expect("campus seeds");
    id
}

#[allow(dead_code)]
pub async fn seed_profile(db: &DatabaseConnection, tenant_id: Uuid, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    profile::Entity::insert(profile::ActiveModel {
        id: Set(id),
        tenant_id: Set(tenant_id),
        email: Set(email.to_string()),
    })
    .exec_without_returning(db)
    .await
    .expect("profile seeds");
    id
}

/// JSON:API resource object.
#[allow(dead_code)]
pub fn resource(kind: &str, id: &str, attributes: Value, relationships: Value) -> Value {
    json!({
        "type": kind,
        "id": id,
        "attributes": attributes,
        "relationships": relationships,
    })
}

/// To-one relationship linkage.
#[allow(dead_code)]
pub fn to_one(kind: &str, id: &str) -> Value {
    json!({ "data": { "type": kind, "id": id } })
}

#[allow(dead_code)]
pub fn document(data: Vec<Value>, included: Vec<Value>, next: Option<String>) -> Value {
    json!({
        "data": data,
        "included": included,
        "links": { "next": next },
    })
}

#[allow(dead_code)]
pub async fn mount_service_types(server: &MockServer, service_types: &[(&str, &str)]) {
    let data = service_types
        .iter()
        .map(|(id, name)| resource("ServiceType", id, json!({ "name": name }), json!({})))
        .collect();

    Mock::given(method("GET"))
        .and(path("/services/v2/service_types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(data, vec![], None)))
        .mount(server)
        .await;
}

/// A plan sorting on `2014-01-05 + index weeks`.
#[allow(dead_code)]
pub fn plan(id: &str, index: i64) -> Value {
    let sort_date = NaiveDate::from_ymd_opt(2014, 1, 5).expect("valid date") + Duration::weeks(index);
    resource(
        "Plan",
        id,
        json!({
            "title": format!("Sunday {id}"),
            "sort_date": format!("{sort_date}T09:00:00Z"),
            "items_count": 1,
        }),
        json!({}),
    )
}

/// Serves `plans` for a service type regardless of the window filter.
#[allow(dead_code)]
pub async fn mount_plans(server: &MockServer, service_type_id: &str, plans: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/services/v2/service_types/{service_type_id}/plans")))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(plans, vec![], None)))
        .mount(server)
        .await;
}

/// Song items for one plan, in the given order.
#[allow(dead_code)]
pub async fn mount_plan_items(
    server: &MockServer,
    service_type_id: &str,
    plan_id: &str,
    songs: &[(&str, &str)],
) {
    let data = songs
        .iter()
        .enumerate()
        .map(|(i, (song_id, _))| {
            resource(
                "Item",
                &format!("{plan_id}-item-{i}"),
                json!({ "sequence": i + 1, "item_type": "song" }),
                json!({ "song": to_one("Song", song_id) }),
            )
        })
        .collect();
    let included = songs
        .iter()
        .map(|(song_id, title)| resource("Song", song_id, json!({ "title": title }), json!({})))
        .collect();

    Mock::given(method("GET"))
        .and(path(format!(
            "/services/v2/service_types/{service_type_id}/plans/{plan_id}/items"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(data, included, None)))
        .mount(server)
        .await;
}

/// Deadline that never expires.
#[allow(dead_code)]
pub struct NoDeadline;

impl RunDeadline for NoDeadline {
    fn is_expired(&self, _position: WorkPosition) -> bool {
        false
    }
}

/// Deadline that expires exactly when the run reaches `position`.
#[allow(dead_code)]
pub struct ExpireAt(pub WorkPosition);

impl RunDeadline for ExpireAt {
    fn is_expired(&self, position: WorkPosition) -> bool {
        position == self.0
    }
}
