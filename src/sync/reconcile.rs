//! Reconciliation engine
//!
//! Writes accumulated batches idempotently. Plans and songs are upserted on
//! their `(tenant_id, upstream_id)` key, local ids are re-read after every
//! write, and each plan's song links are replaced wholesale. A failing chunk
//! is logged and reported but does not stop the chunks after it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QuerySelect, Set,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{plan, plan_song, song};
use crate::sync::accumulator::{AccumulatedBatch, PlanEntry, SongRecord};

pub const UPSERT_CHUNK_SIZE: usize = 100;
pub const LINK_DELETE_CHUNK_SIZE: usize = 500;
pub const LINK_INSERT_CHUNK_SIZE: usize = 200;

/// Rows written by one chunked operation and the chunks that failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchWrite {
    pub rows: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub plans_upserted: usize,
    pub songs_upserted: usize,
    pub plans_relinked: usize,
    pub links_written: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Arc<DatabaseConnection>,
}

impl Reconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// `INSERT .. ON CONFLICT DO UPDATE` in chunks of [`UPSERT_CHUNK_SIZE`].
    pub async fn upsert_batch<A>(&self, label: &str, rows: Vec<A>, on_conflict: OnConflict) -> BatchWrite
    where
        A: ActiveModelTrait + Clone + Send,
        <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    {
        let mut result = BatchWrite::default();

        for (index, chunk) in rows.chunks(UPSERT_CHUNK_SIZE).enumerate() {
            let written = <A::Entity as EntityTrait>::insert_many(chunk.to_vec())
                .on_conflict(on_conflict.clone())
                .exec_without_returning(&*self.db)
                .await;

            match written {
                Ok(_) => {
                    result.rows += chunk.len();
                    counter!("plansync_rows_upserted_total", "table" => label.to_string())
                        .increment(chunk.len() as u64);
                }
                Err(e) => {
                    warn!(table = label, chunk = index, rows = chunk.len(), error = %e, "Upsert chunk failed");
                    counter!("plansync_upsert_failures_total", "table" => label.to_string())
                        .increment(1);
                    result
                        .errors
                        .push(format!("{label}: chunk {index} ({} rows) failed: {e}", chunk.len()));
                }
            }
        }

        result
    }

    /// Maps upstream ids to local primary keys for a tenant.
    pub async fn resolve_ids<E>(
        &self,
        tenant_column: E::Column,
        upstream_column: E::Column,
        id_column: E::Column,
        tenant_id: Uuid,
        upstream_ids: &[String],
    ) -> Result<HashMap<String, Uuid>, DbErr>
    where
        E: EntityTrait,
    {
        let mut resolved = HashMap::with_capacity(upstream_ids.len());

        for chunk in upstream_ids.chunks(LINK_DELETE_CHUNK_SIZE) {
            let rows: Vec<(Uuid, String)> = E::find()
                .select_only()
                .column(id_column)
                .column(upstream_column)
                .filter(tenant_column.eq(tenant_id))
                .filter(upstream_column.is_in(chunk.iter().cloned()))
                .into_tuple()
                .all(&*self.db)
                .await?;

            resolved.extend(rows.into_iter().map(|(id, upstream_id)| (upstream_id, id)));
        }

        Ok(resolved)
    }

    /// Replaces the song links of `plan_ids` with `rows`.
    ///
    /// Rows belonging to a plan whose delete chunk failed are not inserted, so
    /// a plan never ends up with old and new links side by side.
    pub async fn rebuild_links(&self, plan_ids: &[Uuid], rows: Vec<plan_song::ActiveModel>) -> BatchWrite {
        let mut result = BatchWrite::default();
        let mut failed_plans: HashSet<Uuid> = HashSet::new();

        for (index, chunk) in plan_ids.chunks(LINK_DELETE_CHUNK_SIZE).enumerate() {
            let deleted = plan_song::Entity::delete_many()
                .filter(plan_song::Column::PlanId.is_in(chunk.iter().copied()))
                .exec(&*self.db)
                .await;

            if let Err(e) = deleted {
                warn!(chunk = index, plans = chunk.len(), error = %e, "Link delete chunk failed");
                failed_plans.extend(chunk.iter().copied());
                result.errors.push(format!(
                    "plan_songs: delete chunk {index} ({} plans) failed: {e}",
                    chunk.len()
                ));
            }
        }

        let rows: Vec<plan_song::ActiveModel> = rows
            .into_iter()
            .filter(|row| link_plan_id(row).is_some_and(|plan_id| !failed_plans.contains(&plan_id)))
            .collect();

        for (index, (chunk_plans, chunk)) in chunk_links_by_plan(rows, LINK_INSERT_CHUNK_SIZE)
            .into_iter()
            .enumerate()
        {
            let row_count = chunk.len();
            let inserted = plan_song::Entity::insert_many(chunk)
                .exec_without_returning(&*self.db)
                .await;

            match inserted {
                Ok(_) => result.rows += row_count,
                Err(e) => {
                    warn!(chunk = index, rows = row_count, plans = chunk_plans.len(), error = %e, "Link insert chunk failed");
                    let plans = chunk_plans
                        .iter()
                        .map(Uuid::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    result.errors.push(format!(
                        "plan_songs: insert chunk {index} ({row_count} rows) failed, plans left without links [{plans}]: {e}"
                    ));
                }
            }
        }

        counter!("plansync_links_written_total").increment(result.rows as u64);
        result
    }

    /// Writes one accumulated batch: songs, plans, then links.
    pub async fn apply(&self, tenant_id: Uuid, batch: AccumulatedBatch) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if batch.is_empty() {
            return report;
        }

        let song_ids: Vec<String> = batch.songs.iter().map(|s| s.upstream_id.clone()).collect();
        let plan_ids: Vec<String> = batch
            .plans
            .iter()
            .map(|entry| entry.plan.upstream_id.clone())
            .collect();

        let songs = self
            .upsert_batch("songs", song_rows(tenant_id, &batch.songs), song_conflict())
            .await;
        report.errors.extend(songs.errors);

        let plans = self
            .upsert_batch("plans", plan_rows(tenant_id, &batch.plans), plan_conflict())
            .await;
        report.errors.extend(plans.errors);

        let song_map = match self
            .resolve_ids::<song::Entity>(
                song::Column::TenantId,
                song::Column::UpstreamId,
                song::Column::Id,
                tenant_id,
                &song_ids,
            )
            .await
        {
            Ok(map) => map,
            Err(e) => {
                report.errors.push(format!("songs: id lookup failed: {e}"));
                HashMap::new()
            }
        };
        let plan_map = match self
            .resolve_ids::<plan::Entity>(
                plan::Column::TenantId,
                plan::Column::UpstreamId,
                plan::Column::Id,
                tenant_id,
                &plan_ids,
            )
            .await
        {
            Ok(map) => map,
            Err(e) => {
                report.errors.push(format!("plans: id lookup failed: {e}"));
                HashMap::new()
            }
        };
        report.songs_upserted = song_map.len();
        report.plans_upserted = plan_map.len();

        let now = Utc::now();
        let mut relink_plans = Vec::new();
        let mut link_rows = Vec::new();

        for entry in &batch.plans {
            if !entry.items_complete {
                debug!(plan = %entry.plan.upstream_id, "Item listing incomplete, keeping existing links");
                continue;
            }
            let Some(plan_id) = plan_map.get(&entry.plan.upstream_id).copied() else {
                continue;
            };
            match link_rows_for(plan_id, entry, &song_map, now) {
                Some(rows) => {
                    relink_plans.push(plan_id);
                    link_rows.extend(rows);
                }
                None => report.errors.push(format!(
                    "plan {}: songs missing after upsert, links left unchanged",
                    entry.plan.upstream_id
                )),
            }
        }

        let links = self.rebuild_links(&relink_plans, link_rows).await;
        report.plans_relinked = relink_plans.len();
        report.links_written = links.rows;
        report.errors.extend(links.errors);

        report
    }
}

fn song_conflict() -> OnConflict {
    OnConflict::columns([song::Column::TenantId, song::Column::UpstreamId])
        .update_columns([
            song::Column::Title,
            song::Column::Author,
            song::Column::CcliNumber,
            song::Column::Themes,
            song::Column::UpstreamUpdatedAt,
            song::Column::UpdatedAt,
        ])
        .to_owned()
}

fn plan_conflict() -> OnConflict {
    OnConflict::columns([plan::Column::TenantId, plan::Column::UpstreamId])
        .update_columns([
            plan::Column::ServiceTypeUpstreamId,
            plan::Column::ServiceTypeName,
            plan::Column::CampusId,
            plan::Column::Title,
            plan::Column::SeriesTitle,
            plan::Column::SortDate,
            plan::Column::ItemsCount,
            plan::Column::UpstreamUpdatedAt,
            plan::Column::UpdatedAt,
        ])
        .to_owned()
}

fn song_rows(tenant_id: Uuid, songs: &[SongRecord]) -> Vec<song::ActiveModel> {
    let now = Utc::now();
    songs
        .iter()
        .map(|s| song::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            upstream_id: Set(s.upstream_id.clone()),
            title: Set(s.title.clone()),
            author: Set(s.author.clone()),
            ccli_number: Set(s.ccli_number.clone()),
            themes: Set(s.themes.clone()),
            upstream_updated_at: Set(s.upstream_updated_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        })
        .collect()
}

fn plan_rows(tenant_id: Uuid, plans: &[PlanEntry]) -> Vec<plan::ActiveModel> {
    let now = Utc::now();
    plans
        .iter()
        .map(|entry| {
            let p = &entry.plan;
            plan::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                upstream_id: Set(p.upstream_id.clone()),
                service_type_upstream_id: Set(p.service_type_upstream_id.clone()),
                service_type_name: Set(p.service_type_name.clone()),
                campus_id: Set(p.campus_id),
                title: Set(p.title.clone()),
                series_title: Set(p.series_title.clone()),
                sort_date: Set(p.sort_date.map(Into::into)),
                items_count: Set(p.items_count),
                upstream_updated_at: Set(p.upstream_updated_at.map(Into::into)),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
        })
        .collect()
}

/// Link rows for one plan, or `None` if any linked song has no local id.
fn link_rows_for(
    plan_id: Uuid,
    entry: &PlanEntry,
    song_map: &HashMap<String, Uuid>,
    now: chrono::DateTime<Utc>,
) -> Option<Vec<plan_song::ActiveModel>> {
    entry
        .links
        .iter()
        .map(|link| {
            song_map
                .get(&link.song_upstream_id)
                .map(|song_id| plan_song::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    plan_id: Set(plan_id),
                    song_id: Set(*song_id),
                    position: Set(link.position),
                    key_name: Set(link.key_name.clone()),
                    created_at: Set(now.into()),
                })
        })
        .collect()
}

fn link_plan_id(row: &plan_song::ActiveModel) -> Option<Uuid> {
    match &row.plan_id {
        ActiveValue::Set(plan_id) | ActiveValue::Unchanged(plan_id) => Some(*plan_id),
        ActiveValue::NotSet => None,
    }
}

/// Splits link rows into insert chunks that never divide one plan's links.
///
/// Chunks hold whole plans up to `limit` rows; a plan with more links than
/// `limit` gets a chunk of its own.
fn chunk_links_by_plan(
    rows: Vec<plan_song::ActiveModel>,
    limit: usize,
) -> Vec<(Vec<Uuid>, Vec<plan_song::ActiveModel>)> {
    let mut grouped: Vec<(Uuid, Vec<plan_song::ActiveModel>)> = Vec::new();
    for row in rows {
        let Some(plan_id) = link_plan_id(&row) else {
            continue;
        };
        match grouped.iter_mut().find(|(id, _)| *id == plan_id) {
            Some((_, links)) => links.push(row),
            None => grouped.push((plan_id, vec![row])),
        }
    }

    let mut chunks: Vec<(Vec<Uuid>, Vec<plan_song::ActiveModel>)> = Vec::new();
    let mut plans = Vec::new();
    let mut current = Vec::new();
    for (plan_id, links) in grouped {
        if !current.is_empty() && current.len() + links.len() > limit {
            chunks.push((std::mem::take(&mut plans), std::mem::take(&mut current)));
        }
        plans.push(plan_id);
        current.extend(links);
    }
    if !current.is_empty() {
        chunks.push((plans, current));
    }
    chunks
}
