mod test_utils;

use chrono::{Duration, TimeZone, Utc};
use plansync::models::{connection, plan, plan_song, sync_progress};
use plansync::sync::coordinator::CheckpointPosition;
use plansync::sync::{PlanSyncCoordinator, PlanSyncRequest, SyncError, SyncServices, WorkPosition};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use test_utils::*;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STUDENT_PLANS: i64 = 40;

/// Two campus collections with two plans each, a student ministry
/// collection with forty plans and one collection outside the allow-list.
async fn mount_catalog(server: &MockServer) {
    mount_service_types(
        server,
        &[
            ("1", "North Sunday"),
            ("2", "South Sunday"),
            ("3", "Student Ministry"),
            ("4", "Staff Rehearsal"),
        ],
    )
    .await;

    for (service_type, ids) in [("1", ["101", "102"]), ("2", ["201", "202"])] {
        let plans = ids.iter().enumerate().map(|(i, id)| plan(id, i as i64)).collect();
        mount_plans(server, service_type, plans).await;
        for (i, id) in ids.iter().enumerate() {
            let song_id = format!("s{i}");
            mount_plan_items(server, service_type, id, &[(song_id.as_str(), "Shared Song")]).await;
        }
    }

    let student_ids: Vec<String> = (0..STUDENT_PLANS).map(|i| format!("{}", 3000 + i)).collect();
    let plans = student_ids
        .iter()
        .enumerate()
        .map(|(i, id)| plan(id, i as i64))
        .collect();
    mount_plans(server, "3", plans).await;
    for (i, id) in student_ids.iter().enumerate() {
        let song_id = format!("s{}", i % 5);
        mount_plan_items(server, "3", id, &[(song_id.as_str(), "Shared Song")]).await;
    }

    Mock::given(method("GET"))
        .and(path("/services/v2/service_types/4/plans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document(vec![], vec![], None)))
        .expect(0)
        .mount(server)
        .await;
}

async fn setup(server: &MockServer) -> (SyncServices, Uuid) {
    let db = setup_test_db().await.unwrap();
    let services = build_services(db, &test_config(&server.uri()));
    let tenant = Uuid::new_v4();
    seed_campus(&services.db, tenant, "North").await;
    seed_campus(&services.db, tenant, "South").await;
    seed_connection(&services, tenant, Duration::hours(1), Default::default()).await;
    (services, tenant)
}

fn backfill(resume: bool) -> PlanSyncRequest {
    PlanSyncRequest {
        sync_start_year: Some(2014),
        sync_end_year: Some(2015),
        resume,
        ..Default::default()
    }
}

async fn progress_records(services: &SyncServices) -> Vec<sync_progress::Model> {
    sync_progress::Entity::find().all(&*services.db).await.unwrap()
}

async fn stored_connection(services: &SyncServices, tenant: Uuid) -> connection::Model {
    services.connections().find_by_tenant(&tenant).await.unwrap().unwrap()
}

/// `after=` date of the most recent plan listing request.
async fn last_window_start(server: &MockServer) -> String {
    let requests = server.received_requests().await.unwrap_or_default();
    let listing = requests
        .iter()
        .rev()
        .find(|r| r.url.path() == "/services/v2/service_types/1/plans")
        .expect("plans were listed");
    listing
        .url
        .query_pairs()
        .find(|(k, _)| k == "after")
        .map(|(_, v)| v.into_owned())
        .expect("window start is sent")
}

#[tokio::test]
async fn historical_backfill_checkpoints_and_resumes() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (services, tenant) = setup(&server).await;
    let coordinator = PlanSyncCoordinator::new(services.clone());

    let first = coordinator
        .run(tenant, &backfill(false), &ExpireAt(WorkPosition::item(2, 37)))
        .await
        .unwrap();

    assert!(first.errors.is_empty(), "{:?}", first.errors);
    assert!(first.results.timed_out);
    assert!(!first.results.completed);
    assert_eq!(first.results.range_key, "2014-2015");
    assert_eq!(first.results.collections_total, 3);
    assert_eq!(first.results.plans_processed, 41);
    assert_eq!(
        first.results.checkpoint,
        Some(CheckpointPosition {
            collection_index: 2,
            item_index: 37,
        })
    );

    let records = progress_records(&services).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, sync_progress::STATUS_IN_PROGRESS);
    assert_eq!(records[0].range_key, "2014-2015");
    assert_eq!(records[0].start_year, Some(2014));
    assert_eq!(records[0].end_year, Some(2015));
    assert_eq!(records[0].current_collection_index, 2);
    assert_eq!(records[0].current_item_index, 37);
    assert_eq!(records[0].plans_processed, 41);

    let second = coordinator
        .run(tenant, &backfill(true), &NoDeadline)
        .await
        .unwrap();

    assert!(second.results.resumed);
    assert!(second.results.completed);
    assert!(!second.results.timed_out);
    assert_eq!(second.results.plans_processed, 3);
    assert_eq!(second.results.total_plans_processed, 44);

    assert_eq!(plan::Entity::find().count(&*services.db).await.unwrap(), 44);
    assert_eq!(plan_song::Entity::find().count(&*services.db).await.unwrap(), 44);

    let records = progress_records(&services).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, sync_progress::STATUS_COMPLETED);
    assert!(records[0].completed_at.is_some());

    // Backfills never move the incremental watermark
    assert!(stored_connection(&services, tenant).await.last_synced_at.is_none());
}

#[tokio::test]
async fn out_of_bounds_checkpoint_restarts_the_window() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (services, tenant) = setup(&server).await;
    let coordinator = PlanSyncCoordinator::new(services.clone());

    coordinator
        .run(tenant, &backfill(false), &ExpireAt(WorkPosition::item(1, 1)))
        .await
        .unwrap();

    let record = progress_records(&services).await.remove(0);
    let mut active: sync_progress::ActiveModel = record.into();
    active.current_collection_index = Set(7);
    active.update(&*services.db).await.unwrap();

    let outcome = coordinator
        .run(tenant, &backfill(true), &NoDeadline)
        .await
        .unwrap();

    assert!(!outcome.results.resumed);
    assert!(outcome.results.completed);
    assert_eq!(outcome.results.plans_processed, 44);
    assert_eq!(outcome.results.total_plans_processed, 44);
}

#[tokio::test]
async fn resume_without_checkpoint_starts_fresh() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (services, tenant) = setup(&server).await;

    let outcome = PlanSyncCoordinator::new(services)
        .run(tenant, &backfill(true), &NoDeadline)
        .await
        .unwrap();

    assert!(!outcome.results.resumed);
    assert!(outcome.results.completed);
    assert_eq!(outcome.results.plans_processed, 44);
    assert_eq!(outcome.results.collections.len(), 3);
    assert_eq!(outcome.results.collections[2].plans, 40);
}

#[tokio::test]
async fn incremental_runs_advance_and_force_full_resets_the_watermark() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (services, tenant) = setup(&server).await;
    let coordinator = PlanSyncCoordinator::new(services.clone());
    let started = Utc::now();

    let first = coordinator
        .run(tenant, &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap();
    assert!(first.results.completed);
    assert_eq!(first.results.range_key, "incremental");
    assert_eq!(
        last_window_start(&server).await,
        (started - Duration::days(730)).date_naive().to_string()
    );

    let watermark = stored_connection(&services, tenant)
        .await
        .last_synced_at
        .expect("incremental run sets the watermark")
        .with_timezone(&Utc);
    assert!(watermark >= started - Duration::seconds(1));

    coordinator
        .run(tenant, &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap();
    assert_eq!(
        last_window_start(&server).await,
        (started - Duration::days(30)).date_naive().to_string()
    );

    coordinator
        .run(
            tenant,
            &PlanSyncRequest {
                force_full_sync: true,
                ..Default::default()
            },
            &NoDeadline,
        )
        .await
        .unwrap();
    assert_eq!(
        last_window_start(&server).await,
        (started - Duration::days(730)).date_naive().to_string()
    );
}

#[tokio::test]
async fn resumed_incremental_run_keeps_the_stored_window_start() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (services, tenant) = setup(&server).await;
    let coordinator = PlanSyncCoordinator::new(services.clone());
    let started = Utc::now();

    let first = coordinator
        .run(tenant, &PlanSyncRequest::default(), &ExpireAt(WorkPosition::item(0, 1)))
        .await
        .unwrap();
    assert!(first.results.timed_out);

    let record = progress_records(&services).await.remove(0);
    assert_eq!(record.range_key, "incremental");
    let stored = record
        .window_start
        .expect("incremental pass stores its window start")
        .with_timezone(&Utc);
    assert_eq!(stored.date_naive(), (started - Duration::days(730)).date_naive());

    // Pin a start the resumed pass could not have recomputed
    let pinned = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
    let mut active: sync_progress::ActiveModel = record.into();
    active.window_start = Set(Some(pinned.into()));
    active.update(&*services.db).await.unwrap();

    let resumed = coordinator
        .run(
            tenant,
            &PlanSyncRequest {
                resume: true,
                ..Default::default()
            },
            &NoDeadline,
        )
        .await
        .unwrap();

    assert!(resumed.results.resumed);
    assert!(resumed.results.completed);
    assert_eq!(last_window_start(&server).await, "2020-03-01");

    // A fresh pass recomputes and stores its own start
    coordinator
        .run(tenant, &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap();
    assert_eq!(
        last_window_start(&server).await,
        (started - Duration::days(30)).date_naive().to_string()
    );
    let record = progress_records(&services).await.remove(0);
    assert_ne!(record.window_start.map(|start| start.with_timezone(&Utc)), Some(pinned));
}

#[tokio::test]
async fn failed_item_listing_is_reported_and_the_run_continues() {
    let server = MockServer::start().await;
    mount_service_types(&server, &[("1", "North Sunday")]).await;
    mount_plans(&server, "1", vec![plan("101", 0), plan("102", 1)]).await;
    mount_plan_items(&server, "1", "101", &[("s1", "Amazing Grace")]).await;
    Mock::given(method("GET"))
        .and(path("/services/v2/service_types/1/plans/102/items"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let (services, tenant) = setup(&server).await;

    let outcome = PlanSyncCoordinator::new(services.clone())
        .run(tenant, &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap();

    assert!(outcome.results.completed);
    assert_eq!(outcome.results.plans_processed, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("plan 102"));
    assert_eq!(plan_song::Entity::find().count(&*services.db).await.unwrap(), 1);

    let record = progress_records(&services).await.remove(0);
    assert_eq!(record.error_count, 1);
    assert!(record.error_message.is_some());
}

#[tokio::test]
async fn collection_listing_failure_aborts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/v2/service_types"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (services, tenant) = setup(&server).await;

    let err = PlanSyncCoordinator::new(services)
        .run(tenant, &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Upstream(_)));
}

#[tokio::test]
async fn missing_connection_is_reported() {
    let server = MockServer::start().await;
    let db = setup_test_db().await.unwrap();
    let services = build_services(db, &test_config(&server.uri()));

    let err = PlanSyncCoordinator::new(services)
        .run(Uuid::new_v4(), &PlanSyncRequest::default(), &NoDeadline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConnectionNotFound));
}

#[tokio::test]
async fn half_open_year_range_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let (services, tenant) = setup(&server).await;

    let err = PlanSyncCoordinator::new(services)
        .run(
            tenant,
            &PlanSyncRequest {
                sync_start_year: Some(2020),
                ..Default::default()
            },
            &NoDeadline,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
