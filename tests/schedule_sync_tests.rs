mod test_utils;

use chrono::{Duration, NaiveDate};
use plansync::classification::TeamType;
use plansync::models::schedule_assignment;
use plansync::sync::{ScheduleSync, ScheduleSyncRequest};
use sea_orm::{EntityTrait, QueryOrder};
use serde_json::{Value, json};
use test_utils::*;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEMBERS_PATH: &str = "/services/v2/service_types/1/plans/900/team_members";

fn service_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, 5).unwrap()
}

fn scheduled(id: &str, team_id: &str, role: &str, person_id: &str) -> Value {
    resource(
        "PlanPerson",
        id,
        json!({ "team_position_name": role, "status": "C" }),
        json!({
            "team": to_one("Team", team_id),
            "person": to_one("Person", person_id),
        }),
    )
}

fn teams() -> Vec<Value> {
    vec![
        resource("Team", "t1", json!({ "name": "Worship Team" }), json!({})),
        resource("Team", "t2", json!({ "name": "Production" }), json!({})),
    ]
}

fn full_schedule() -> Vec<Value> {
    vec![
        scheduled("m1", "t1", "Vocals", "p1"),
        scheduled("m2", "t2", "Lighting", "p2"),
        scheduled("m3", "t1", "Hospitality", "p1"),
    ]
}

async fn mount_person(server: &MockServer, id: &str, name: &str, email: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/people/v2/people/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": resource("Person", id, json!({ "name": name }), json!({})),
            "included": [resource("Email", &format!("{id}-email"), json!({ "address": email }), json!({}))],
        })))
        .mount(server)
        .await;
}

/// Serves `first` for the first team-member listing and `rest` afterwards.
async fn mount_schedule(server: &MockServer, first: Vec<Value>, rest: Vec<Value>) {
    mount_service_types(server, &[("1", "North Sunday")]).await;
    mount_plans(server, "1", vec![plan("900", 0)]).await;

    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(first, teams(), None)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(rest, teams(), None)))
        .mount(server)
        .await;

    mount_person(server, "p1", "Ada Lovelace", "ada@example.com").await;
    mount_person(server, "p2", "Grace Hopper", "grace@example.com").await;
}

async fn setup(server: &MockServer) -> (ScheduleSync, std::sync::Arc<sea_orm::DatabaseConnection>, Uuid, Uuid) {
    let db = setup_test_db().await.unwrap();
    let services = build_services(db.clone(), &test_config(&server.uri()));
    let tenant = Uuid::new_v4();
    let north = seed_campus(&db, tenant, "North").await;
    seed_connection(&services, tenant, Duration::hours(1), Default::default()).await;
    (ScheduleSync::new(services), db, tenant, north)
}

fn request(team_type: Option<TeamType>) -> ScheduleSyncRequest {
    ScheduleSyncRequest {
        date: service_date(),
        team_type,
        team_id: None,
    }
}

async fn stored(db: &sea_orm::DatabaseConnection) -> Vec<schedule_assignment::Model> {
    schedule_assignment::Entity::find()
        .order_by_asc(schedule_assignment::Column::UpstreamId)
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn schedule_is_upserted_and_stale_rows_removed() {
    let server = MockServer::start().await;
    mount_schedule(&server, full_schedule(), vec![scheduled("m1", "t1", "Vocals", "p1")]).await;
    let (sync, db, tenant, north) = setup(&server).await;

    let first = sync.run(tenant, &request(None)).await.unwrap();
    assert!(first.errors.is_empty(), "{:?}", first.errors);
    assert_eq!(first.results.date, Some(service_date()));
    assert_eq!(first.results.plans_found, 1);
    assert_eq!(first.results.assignments_upserted, 2);
    assert_eq!(first.results.skipped_unmapped_position, 1);
    assert_eq!(first.results.stale_removed, 0);

    let rows = stored(&db).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].upstream_id, "m1");
    assert_eq!(rows[0].team_type, "worship");
    assert_eq!(rows[0].position, "vocals");
    assert_eq!(rows[0].email.as_deref(), Some("ada@example.com"));
    assert_eq!(rows[0].person_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(rows[0].campus_id, Some(north));
    assert_eq!(rows[1].team_type, "production");
    assert_eq!(rows[1].position, "lights");

    let second = sync.run(tenant, &request(None)).await.unwrap();
    assert_eq!(second.results.assignments_upserted, 1);
    assert_eq!(second.results.stale_removed, 1);

    let rows = stored(&db).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upstream_id, "m1");
}

#[tokio::test]
async fn team_type_filter_limits_writes_and_cleanup() {
    let server = MockServer::start().await;
    // The second listing drops everyone; only worship rows may be cleaned up
    mount_schedule(&server, full_schedule(), vec![]).await;
    let (sync, db, tenant, _) = setup(&server).await;

    sync.run(tenant, &request(None)).await.unwrap();
    assert_eq!(stored(&db).await.len(), 2);

    let outcome = sync
        .run(tenant, &request(Some(TeamType::Worship)))
        .await
        .unwrap();
    assert_eq!(outcome.results.assignments_upserted, 0);
    assert_eq!(outcome.results.stale_removed, 1);

    let rows = stored(&db).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upstream_id, "m2");
}

#[tokio::test]
async fn filtered_members_are_counted() {
    let server = MockServer::start().await;
    mount_schedule(&server, full_schedule(), full_schedule()).await;
    let (sync, db, tenant, _) = setup(&server).await;

    let outcome = sync
        .run(tenant, &request(Some(TeamType::Production)))
        .await
        .unwrap();

    assert_eq!(outcome.results.skipped_filtered, 2);
    assert_eq!(outcome.results.assignments_upserted, 1);
    assert_eq!(stored(&db).await[0].upstream_id, "m2");
}

#[tokio::test]
async fn incomplete_member_listing_keeps_existing_rows() {
    let server = MockServer::start().await;
    mount_service_types(&server, &[("1", "North Sunday")]).await;
    mount_plans(&server, "1", vec![plan("900", 0)]).await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(full_schedule(), teams(), None)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(MEMBERS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_person(&server, "p1", "Ada Lovelace", "ada@example.com").await;
    mount_person(&server, "p2", "Grace Hopper", "grace@example.com").await;
    let (sync, db, tenant, _) = setup(&server).await;

    sync.run(tenant, &request(None)).await.unwrap();
    let outcome = sync.run(tenant, &request(None)).await.unwrap();

    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("plan 900"));
    assert_eq!(outcome.results.stale_removed, 0);
    assert_eq!(stored(&db).await.len(), 2);
}

#[tokio::test]
async fn blank_team_id_is_rejected() {
    let server = MockServer::start().await;
    let (sync, _, tenant, _) = setup(&server).await;

    let err = sync
        .run(
            tenant,
            &ScheduleSyncRequest {
                date: service_date(),
                team_type: None,
                team_id: Some("  ".to_string()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, plansync::sync::SyncError::InvalidRequest(_)));
}
