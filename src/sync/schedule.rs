//! Single-date schedule sync
//!
//! Pulls who is scheduled on the plans of one service date, optionally
//! narrowed to a team or a team type, into `schedule_assignments`. Rows of
//! the same plans that are no longer scheduled upstream are removed, but only
//! for plans whose team listing was read completely.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use metrics::counter;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::classification::{TeamType, map_collection_to_campus, map_role_to_position, map_team_type};
use crate::models::schedule_assignment;
use crate::sync::people::PersonDirectory;
use crate::sync::reconcile::Reconciler;
use crate::sync::{SyncError, SyncOutcome, SyncServices};
use crate::upstream::Included;
use crate::upstream::resources::paths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScheduleSyncRequest {
    /// Service date, `YYYY-MM-DD`.
    pub date: NaiveDate,
    #[serde(default)]
    pub team_type: Option<TeamType>,
    /// Upstream team id.
    #[serde(default)]
    pub team_id: Option<String>,
}

impl ScheduleSyncRequest {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(team_id) = &self.team_id
            && team_id.trim().is_empty()
        {
            return Err(SyncError::InvalidRequest("team_id must not be empty".to_string()));
        }
        Ok(())
    }

    fn matches(&self, team_id: Option<&str>, team_type: TeamType) -> bool {
        let team_ok = self
            .team_id
            .as_deref()
            .is_none_or(|wanted| team_id == Some(wanted.trim()));
        let type_ok = self.team_type.is_none_or(|wanted| wanted == team_type);
        team_ok && type_ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScheduleSyncResults {
    pub date: Option<NaiveDate>,
    pub plans_found: usize,
    pub assignments_upserted: usize,
    pub stale_removed: usize,
    pub skipped_filtered: usize,
    pub skipped_unmapped_position: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleSync {
    services: SyncServices,
    reconciler: Reconciler,
}

impl ScheduleSync {
    pub fn new(services: SyncServices) -> Self {
        let reconciler = Reconciler::new(services.db.clone());
        Self {
            services,
            reconciler,
        }
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, date = %request.date))]
    pub async fn run(
        &self,
        tenant_id: Uuid,
        request: &ScheduleSyncRequest,
    ) -> Result<SyncOutcome<ScheduleSyncResults>, SyncError> {
        request.validate()?;

        let connection = self.services.load_connection(tenant_id).await?;
        let token = self.services.vault.get_valid_access_token(&connection).await?;
        let campuses = self.services.load_campuses(tenant_id).await?;
        let collections = self.services.list_collections(&token, &campuses).await?;
        let max_pages = self.services.fetcher.policy().max_pages;

        let mut results = ScheduleSyncResults {
            date: Some(request.date),
            ..Default::default()
        };
        let mut errors = Vec::new();
        let mut people = PersonDirectory::new(&self.services.fetcher, &token);
        let mut rows: BTreeMap<String, schedule_assignment::ActiveModel> = BTreeMap::new();
        // Plan id -> assignment ids kept, for plans read completely
        let mut kept: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let now = Utc::now();

        for collection in &collections {
            let plans = self
                .services
                .fetcher
                .fetch_all_pages(
                    &token,
                    &paths::plans_on_date(&collection.upstream_id, request.date),
                    max_pages,
                )
                .await;
            if let Some(error) = &plans.error {
                errors.push(format!("collection {} plans: {error}", collection.upstream_id));
            }
            let campus_id =
                map_collection_to_campus(&collection.name, &campuses, connection.default_campus_id);

            for plan in &plans.data {
                results.plans_found += 1;
                let members = self
                    .services
                    .fetcher
                    .fetch_all_pages(
                        &token,
                        &paths::plan_team_members(&collection.upstream_id, &plan.id),
                        max_pages,
                    )
                    .await;
                if let Some(error) = &members.error {
                    errors.push(format!("plan {} team members: {error}", plan.id));
                }
                let included = Included::new(&members.included);
                let mut plan_kept = BTreeSet::new();

                for member in &members.data {
                    let team = included.related(member, "team", "Team");
                    let team_name = team.and_then(|t| t.attr_string("name"));
                    let team_type = map_team_type(team_name.as_deref().unwrap_or_default());
                    let team_upstream_id = member.relationship_id("team");

                    if !request.matches(team_upstream_id, team_type) {
                        results.skipped_filtered += 1;
                        continue;
                    }

                    let role = member.attr_string("team_position_name").unwrap_or_default();
                    let Some(position) = map_role_to_position(&role) else {
                        results.skipped_unmapped_position += 1;
                        continue;
                    };

                    let person = match member.relationship_id("person") {
                        Some(person_id) => match people.get(person_id).await {
                            Ok(person) => person,
                            Err(e) => {
                                errors.push(format!("person {person_id}: {e}"));
                                None
                            }
                        },
                        None => None,
                    };

                    plan_kept.insert(member.id.clone());
                    rows.insert(
                        member.id.clone(),
                        schedule_assignment::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            tenant_id: Set(tenant_id),
                            upstream_id: Set(member.id.clone()),
                            plan_upstream_id: Set(plan.id.clone()),
                            service_date: Set(request.date),
                            team_upstream_id: Set(team_upstream_id.map(str::to_string)),
                            team_name: Set(team_name.clone()),
                            team_type: Set(team_type.code().to_string()),
                            position: Set(position.code().to_string()),
                            person_name: Set(member
                                .attr_string("name")
                                .or_else(|| person.as_ref().and_then(|p| p.name.clone()))),
                            email: Set(person.as_ref().and_then(|p| p.email.clone())),
                            status: Set(member.attr_string("status")),
                            campus_id: Set(campus_id),
                            created_at: Set(now.into()),
                            updated_at: Set(now.into()),
                        },
                    );
                }

                if members.complete {
                    kept.insert(plan.id.clone(), plan_kept);
                }
            }
        }

        let write = self
            .reconciler
            .upsert_batch(
                "schedule_assignments",
                rows.into_values().collect(),
                assignment_conflict(),
            )
            .await;
        results.assignments_upserted = write.rows;
        errors.extend(write.errors);

        for (plan_id, assignment_ids) in &kept {
            match self
                .remove_stale(tenant_id, request, plan_id, assignment_ids)
                .await
            {
                Ok(removed) => results.stale_removed += removed,
                Err(e) => errors.push(format!("plan {plan_id}: stale assignment cleanup failed: {e}")),
            }
        }

        counter!("plansync_schedule_sync_runs_total").increment(1);
        info!(
            plans = results.plans_found,
            assignments = results.assignments_upserted,
            stale_removed = results.stale_removed,
            errors = errors.len(),
            "Schedule sync completed"
        );

        Ok(SyncOutcome { results, errors })
    }

    /// Deletes rows of `plan_id` on the date that were not seen this run,
    /// restricted to the request's team filters.
    async fn remove_stale(
        &self,
        tenant_id: Uuid,
        request: &ScheduleSyncRequest,
        plan_id: &str,
        kept: &BTreeSet<String>,
    ) -> Result<usize, SyncError> {
        let mut delete = schedule_assignment::Entity::delete_many()
            .filter(schedule_assignment::Column::TenantId.eq(tenant_id))
            .filter(schedule_assignment::Column::PlanUpstreamId.eq(plan_id))
            .filter(schedule_assignment::Column::ServiceDate.eq(request.date));

        if !kept.is_empty() {
            delete = delete.filter(schedule_assignment::Column::UpstreamId.is_not_in(kept.iter().cloned()));
        }
        if let Some(team_id) = &request.team_id {
            delete = delete.filter(schedule_assignment::Column::TeamUpstreamId.eq(team_id.trim()));
        }
        if let Some(team_type) = request.team_type {
            delete = delete.filter(schedule_assignment::Column::TeamType.eq(team_type.code()));
        }

        let result = delete.exec(&*self.services.db).await?;
        Ok(result.rows_affected as usize)
    }
}

fn assignment_conflict() -> OnConflict {
    OnConflict::columns([
        schedule_assignment::Column::TenantId,
        schedule_assignment::Column::UpstreamId,
    ])
    .update_columns([
        schedule_assignment::Column::PlanUpstreamId,
        schedule_assignment::Column::ServiceDate,
        schedule_assignment::Column::TeamUpstreamId,
        schedule_assignment::Column::TeamName,
        schedule_assignment::Column::TeamType,
        schedule_assignment::Column::Position,
        schedule_assignment::Column::PersonName,
        schedule_assignment::Column::Email,
        schedule_assignment::Column::Status,
        schedule_assignment::Column::CampusId,
        schedule_assignment::Column::UpdatedAt,
    ])
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(team_type: Option<TeamType>, team_id: Option<&str>) -> ScheduleSyncRequest {
        ScheduleSyncRequest {
            date: NaiveDate::from_ymd_opt(2026, 4, 5).unwrap(),
            team_type,
            team_id: team_id.map(str::to_string),
        }
    }

    #[test]
    fn test_filters() {
        assert!(request(None, None).matches(Some("1"), TeamType::Other));
        assert!(request(Some(TeamType::Worship), None).matches(None, TeamType::Worship));
        assert!(!request(Some(TeamType::Worship), None).matches(None, TeamType::Production));
        assert!(request(None, Some("7")).matches(Some("7"), TeamType::Other));
        assert!(!request(None, Some("7")).matches(Some("8"), TeamType::Other));
        assert!(!request(None, Some("7")).matches(None, TeamType::Other));
    }

    #[test]
    fn test_request_parsing() {
        let parsed: ScheduleSyncRequest =
            serde_json::from_str(r#"{"date":"2026-04-05","team_type":"production"}"#).unwrap();
        assert_eq!(parsed, request(Some(TeamType::Production), None));
        assert!(serde_json::from_str::<ScheduleSyncRequest>(r#"{"team_type":"worship"}"#).is_err());
        assert!(request(None, Some("  ")).validate().is_err());
    }
}
