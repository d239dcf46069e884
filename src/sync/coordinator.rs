//! # Plan sync coordinator
//!
//! Runs one resumable plan sync for a tenant: choose the window, walk the
//! allowed collections in upstream-id order, fetch each plan's items,
//! accumulate, flush to the reconciler and persist a checkpoint after every
//! flush. When the deadline is reached the position of the first unprocessed
//! plan is saved and the run returns with `timed_out = true`.
//!
//! A run assumes it is the only writer for its progress key.

use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::classification::map_collection_to_campus;
use crate::models::sync_progress;
use crate::repositories::{Checkpoint, SyncProgressRepository};
use crate::sync::accumulator::{PlanItems, PlanRecord, SyncAccumulator};
use crate::sync::deadline::{RunDeadline, WorkPosition};
use crate::sync::reconcile::Reconciler;
use crate::sync::window::{SyncWindow, WindowRequest, select_window};
use crate::sync::{Collection, SyncError, SyncOutcome, SyncServices};
use crate::upstream::Resource;
use crate::upstream::resources::paths;

/// Plan sync request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PlanSyncRequest {
    /// Clear the incremental watermark before selecting the window.
    pub force_full_sync: bool,
    /// First year of a historical backfill (requires `sync_end_year`).
    pub sync_start_year: Option<i32>,
    /// Last year of a historical backfill, inclusive.
    pub sync_end_year: Option<i32>,
    /// Continue an `in_progress` checkpoint instead of starting over.
    pub resume: bool,
    /// Explicit lookback in days; used by the sweep.
    pub lookback_days: Option<i64>,
}

impl PlanSyncRequest {
    fn window_request(&self) -> WindowRequest {
        WindowRequest {
            start_year: self.sync_start_year,
            end_year: self.sync_end_year,
            lookback_days: self.lookback_days,
        }
    }
}

/// Plans synced from one collection during this invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CollectionCount {
    pub service_type_id: String,
    pub name: String,
    pub plans: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlanSyncResults {
    pub range_key: String,
    pub collections_total: usize,
    /// Plans, songs and links written during this invocation.
    pub plans_processed: usize,
    pub songs_processed: usize,
    pub links_written: usize,
    pub collections: Vec<CollectionCount>,
    /// Cumulative counters of the progress record.
    pub total_plans_processed: i32,
    pub total_songs_processed: i32,
    pub total_links_written: i32,
    pub resumed: bool,
    pub completed: bool,
    pub timed_out: bool,
    /// Position saved at timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckpointPosition {
    pub collection_index: i32,
    pub item_index: i32,
}

struct RunState {
    progress_id: Uuid,
    checkpoint: Checkpoint,
    accumulator: SyncAccumulator,
    results: PlanSyncResults,
    errors: Vec<String>,
}

impl RunState {
    fn record_error(&mut self, message: String) {
        self.checkpoint.error_count = self.checkpoint.error_count.saturating_add(1);
        self.checkpoint.error_message = Some(message.clone());
        self.errors.push(message);
    }
}

#[derive(Debug, Clone)]
pub struct PlanSyncCoordinator {
    services: SyncServices,
    progress: SyncProgressRepository,
    reconciler: Reconciler,
}

impl PlanSyncCoordinator {
    pub fn new(services: SyncServices) -> Self {
        let progress = SyncProgressRepository::new(services.db.clone());
        let reconciler = Reconciler::new(services.db.clone());
        Self {
            services,
            progress,
            reconciler,
        }
    }

    pub fn services(&self) -> &SyncServices {
        &self.services
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, resume = request.resume))]
    pub async fn run(
        &self,
        tenant_id: Uuid,
        request: &PlanSyncRequest,
        deadline: &dyn RunDeadline,
    ) -> Result<SyncOutcome<PlanSyncResults>, SyncError> {
        let started = Instant::now();
        let run_started_at = Utc::now();
        let window_request = request.window_request();
        window_request.validate()?;

        let mut connection = self.services.load_connection(tenant_id).await?;
        if request.force_full_sync {
            info!("Force full sync requested, clearing incremental watermark");
            connection = self
                .services
                .connections()
                .set_last_synced_at(&connection.id, None)
                .await?;
        }

        let token = self.services.vault.get_valid_access_token(&connection).await?;

        let last_synced_at = connection.last_synced_at.map(|dt| dt.with_timezone(&Utc));
        let mut window = select_window(
            &window_request,
            last_synced_at,
            run_started_at,
            &self.services.settings,
        )?;

        let campuses = self.services.load_campuses(tenant_id).await?;
        let collections = self.services.list_collections(&token, &campuses).await?;

        let (mut state, start_collection, start_item) = self
            .open_progress(tenant_id, &mut window, request.resume, collections.len())
            .await?;
        state.results.range_key = window.range_key();
        state.results.collections_total = collections.len();

        info!(
            range_key = %state.results.range_key,
            collections = collections.len(),
            start_collection,
            start_item,
            "Starting plan sync"
        );

        for (collection_index, collection) in collections.iter().enumerate().skip(start_collection) {
            let first_item = if collection_index == start_collection {
                start_item
            } else {
                0
            };

            if deadline.is_expired(WorkPosition::collection(collection_index)) {
                return self
                    .time_out(tenant_id, state, collection_index, first_item, started)
                    .await;
            }

            let campus_id =
                map_collection_to_campus(&collection.name, &campuses, connection.default_campus_id);
            let plans = self
                .list_plans(&token, collection, &window, &mut state)
                .await;

            let mut collection_count = CollectionCount {
                service_type_id: collection.upstream_id.clone(),
                name: collection.name.clone(),
                plans: 0,
            };

            for (item_index, plan) in plans.iter().enumerate().skip(first_item) {
                if deadline.is_expired(WorkPosition::item(collection_index, item_index)) {
                    state.results.collections.push(collection_count);
                    return self
                        .time_out(tenant_id, state, collection_index, item_index, started)
                        .await;
                }

                let items = self
                    .services
                    .fetcher
                    .fetch_all_pages(
                        &token,
                        &paths::plan_items(&collection.upstream_id, &plan.id),
                        self.services.fetcher.policy().max_pages,
                    )
                    .await;
                if let Some(error) = &items.error {
                    state.record_error(format!("plan {} items: {error}", plan.id));
                } else if !items.complete {
                    state.record_error(format!(
                        "plan {} items: more than {} pages, links left unchanged",
                        plan.id, items.pages
                    ));
                }

                let record = PlanRecord::from_resource(
                    plan,
                    &collection.upstream_id,
                    &collection.name,
                    campus_id,
                );
                state
                    .accumulator
                    .add_plan(record, PlanItems::from_documents(&items), items.complete);
                collection_count.plans += 1;

                if state.accumulator.plan_count() >= self.services.settings.flush_threshold {
                    self.flush(tenant_id, &mut state, collection_index, item_index + 1)
                        .await?;
                }
            }

            state.results.collections.push(collection_count);
            self.flush(tenant_id, &mut state, collection_index + 1, 0)
                .await?;
        }

        self.complete(&connection.id, &window, run_started_at, state, started)
            .await
    }

    /// Loads, creates or resets the progress record and returns the start position.
    ///
    /// A resumed incremental or full pass takes its window start from the
    /// record so that plan indexes line up with the interrupted pass.
    async fn open_progress(
        &self,
        tenant_id: Uuid,
        window: &mut SyncWindow,
        resume: bool,
        collection_count: usize,
    ) -> Result<(RunState, usize, usize), SyncError> {
        let key = window.progress_key(tenant_id);
        let existing = self.progress.find(&key).await?;

        let (record, resumed) = match existing {
            Some(record) if resume && record.status == sync_progress::STATUS_IN_PROGRESS => {
                let in_bounds = usize::try_from(record.current_collection_index)
                    .is_ok_and(|index| index < collection_count)
                    && record.current_item_index >= 0;
                if in_bounds {
                    (record, true)
                } else {
                    warn!(
                        range_key = %key.range_key,
                        stored_collection_index = record.current_collection_index,
                        collections = collection_count,
                        "Stored checkpoint is out of bounds, restarting window from the beginning"
                    );
                    (self.progress.restart(record, key.window_start).await?, false)
                }
            }
            Some(record) => (self.progress.restart(record, key.window_start).await?, false),
            None => (self.progress.create(&key).await?, false),
        };

        if resumed && !window.is_historical() {
            if let Some(stored) = record.window_start {
                let stored = stored.with_timezone(&Utc);
                if stored != window.start {
                    debug!(
                        stored = %stored,
                        recomputed = %window.start,
                        "Resuming with the stored window start"
                    );
                }
                window.start = stored;
            }
        }

        let start_collection = usize::try_from(record.current_collection_index).unwrap_or(0);
        let start_item = usize::try_from(record.current_item_index).unwrap_or(0);

        let state = RunState {
            progress_id: record.id,
            checkpoint: Checkpoint::from_model(&record),
            accumulator: SyncAccumulator::new(),
            results: PlanSyncResults {
                resumed,
                ..Default::default()
            },
            errors: Vec::new(),
        };

        Ok((state, start_collection, start_item))
    }

    /// Plans of one collection in the window, ordered by sort date then id.
    async fn list_plans(
        &self,
        token: &str,
        collection: &Collection,
        window: &SyncWindow,
        state: &mut RunState,
    ) -> Vec<Resource> {
        let listing = self
            .services
            .fetcher
            .fetch_all_pages(
                token,
                &paths::plans_in_window(&collection.upstream_id, window.start_date(), window.end_date()),
                self.services.fetcher.policy().max_pages,
            )
            .await;

        if let Some(error) = &listing.error {
            state.record_error(format!(
                "collection {} plans: {error}",
                collection.upstream_id
            ));
        }

        let mut plans = listing.data;
        plans.sort_by(|a, b| {
            a.attr_datetime("sort_date")
                .cmp(&b.attr_datetime("sort_date"))
                .then_with(|| super::compare_upstream_ids(&a.id, &b.id))
        });
        plans
    }

    /// Writes the accumulator and persists the checkpoint at `(collection, item)`.
    async fn flush(
        &self,
        tenant_id: Uuid,
        state: &mut RunState,
        collection_index: usize,
        item_index: usize,
    ) -> Result<(), SyncError> {
        if !state.accumulator.is_empty() {
            let report = self
                .reconciler
                .apply(tenant_id, state.accumulator.take())
                .await;

            state.results.plans_processed += report.plans_upserted;
            state.results.songs_processed += report.songs_upserted;
            state.results.links_written += report.links_written;

            let cp = &mut state.checkpoint;
            cp.plans_processed = cp.plans_processed.saturating_add(to_i32(report.plans_upserted));
            cp.songs_processed = cp.songs_processed.saturating_add(to_i32(report.songs_upserted));
            cp.links_written = cp.links_written.saturating_add(to_i32(report.links_written));
            for error in report.errors {
                state.record_error(error);
            }
        }

        state.checkpoint.collection_index = to_i32(collection_index);
        state.checkpoint.item_index = to_i32(item_index);
        self.progress
            .save_checkpoint(state.progress_id, &state.checkpoint)
            .await?;
        Ok(())
    }

    async fn time_out(
        &self,
        tenant_id: Uuid,
        mut state: RunState,
        collection_index: usize,
        item_index: usize,
        started: Instant,
    ) -> Result<SyncOutcome<PlanSyncResults>, SyncError> {
        self.flush(tenant_id, &mut state, collection_index, item_index)
            .await?;

        info!(
            collection_index,
            item_index,
            plans_processed = state.results.plans_processed,
            "Execution budget reached, checkpoint saved"
        );
        counter!("plansync_plan_sync_runs_total", "outcome" => "timed_out").increment(1);
        histogram!("plansync_plan_sync_duration_seconds").record(started.elapsed().as_secs_f64());

        state.results.timed_out = true;
        state.results.checkpoint = Some(CheckpointPosition {
            collection_index: state.checkpoint.collection_index,
            item_index: state.checkpoint.item_index,
        });
        Ok(finish(state))
    }

    async fn complete(
        &self,
        connection_id: &Uuid,
        window: &SyncWindow,
        run_started_at: chrono::DateTime<Utc>,
        mut state: RunState,
        started: Instant,
    ) -> Result<SyncOutcome<PlanSyncResults>, SyncError> {
        self.progress
            .mark_completed(state.progress_id, &state.checkpoint)
            .await?;

        if !window.is_historical() {
            self.services
                .connections()
                .set_last_synced_at(connection_id, Some(run_started_at))
                .await?;
        }

        info!(
            plans_processed = state.results.plans_processed,
            songs_processed = state.results.songs_processed,
            links_written = state.results.links_written,
            errors = state.errors.len(),
            "Plan sync completed"
        );
        counter!("plansync_plan_sync_runs_total", "outcome" => "completed").increment(1);
        histogram!("plansync_plan_sync_duration_seconds").record(started.elapsed().as_secs_f64());

        state.results.completed = true;
        Ok(finish(state))
    }
}

fn finish(state: RunState) -> SyncOutcome<PlanSyncResults> {
    let mut results = state.results;
    results.total_plans_processed = state.checkpoint.plans_processed;
    results.total_songs_processed = state.checkpoint.songs_processed;
    results.total_links_written = state.checkpoint.links_written;
    SyncOutcome {
        results,
        errors: state.errors,
    }
}

fn to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
