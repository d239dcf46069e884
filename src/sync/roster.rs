//! Team roster sync
//!
//! Discovers the teams of every allowed collection (a few collections at a
//! time), reads each team's position assignments and upserts one
//! `team_members` row per `(team, position, email)`. Rows are then linked to
//! local profiles by email where no user is linked yet.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::classification::{Position, map_collection_to_campus, map_role_to_position};
use crate::models::{connection, profile, team_member};
use crate::sync::people::PersonDirectory;
use crate::sync::reconcile::Reconciler;
use crate::sync::{Collection, SyncError, SyncOutcome, SyncServices};
use crate::upstream::resources::paths;
use crate::upstream::{Included, PagedDocuments};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RosterSyncResults {
    /// Set when the connection has team member sync turned off.
    pub skipped: bool,
    pub collections: usize,
    pub teams_discovered: usize,
    pub assignments_seen: usize,
    pub members_upserted: usize,
    pub skipped_unmapped_position: usize,
    pub skipped_inactive: usize,
    pub skipped_without_email: usize,
    pub users_linked: usize,
}

#[derive(Debug, Clone)]
struct TeamRef {
    upstream_id: String,
    name: String,
    campus_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RosterSync {
    services: SyncServices,
    reconciler: Reconciler,
}

impl RosterSync {
    pub fn new(services: SyncServices) -> Self {
        let reconciler = Reconciler::new(services.db.clone());
        Self {
            services,
            reconciler,
        }
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn run(&self, tenant_id: Uuid) -> Result<SyncOutcome<RosterSyncResults>, SyncError> {
        let connection = self.services.load_connection(tenant_id).await?;
        if !connection.sync_team_members {
            info!("Team member sync disabled for connection, skipping");
            return Ok(SyncOutcome {
                results: RosterSyncResults {
                    skipped: true,
                    ..Default::default()
                },
                errors: Vec::new(),
            });
        }

        let token = self.services.vault.get_valid_access_token(&connection).await?;
        let campuses = self.services.load_campuses(tenant_id).await?;
        let collections = self.services.list_collections(&token, &campuses).await?;

        let mut results = RosterSyncResults {
            collections: collections.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        let teams = self
            .discover_teams(&token, &collections, &mut errors)
            .await
            .into_iter()
            .map(|(upstream_id, (name, collection_name))| TeamRef {
                campus_id: map_collection_to_campus(
                    &collection_name,
                    &campuses,
                    connection.default_campus_id,
                ),
                upstream_id,
                name,
            })
            .collect::<Vec<_>>();
        results.teams_discovered = teams.len();

        let mut people = PersonDirectory::new(&self.services.fetcher, &token);
        let mut rows: BTreeMap<(String, String, String), team_member::ActiveModel> = BTreeMap::new();

        for team in &teams {
            let assignments = self
                .services
                .fetcher
                .fetch_all_pages(
                    &token,
                    &paths::team_position_assignments(&team.upstream_id),
                    self.services.fetcher.policy().max_pages,
                )
                .await;
            if let Some(error) = &assignments.error {
                errors.push(format!("team {} assignments: {error}", team.upstream_id));
            }

            self.collect_members(
                tenant_id,
                &connection,
                team,
                &assignments,
                &mut people,
                &mut rows,
                &mut results,
                &mut errors,
            )
            .await;
        }

        let write = self
            .reconciler
            .upsert_batch(
                "team_members",
                rows.into_values().collect(),
                member_conflict(&connection),
            )
            .await;
        results.members_upserted = write.rows;
        errors.extend(write.errors);

        match self.link_profiles(tenant_id).await {
            Ok(linked) => results.users_linked = linked,
            Err(e) => errors.push(format!("profile linking failed: {e}")),
        }

        counter!("plansync_roster_sync_runs_total").increment(1);
        info!(
            teams = results.teams_discovered,
            members = results.members_upserted,
            users_linked = results.users_linked,
            errors = errors.len(),
            "Roster sync completed"
        );

        Ok(SyncOutcome { results, errors })
    }

    /// Team id → (team name, collection name), fetched in fixed-size batches.
    async fn discover_teams(
        &self,
        token: &str,
        collections: &[Collection],
        errors: &mut Vec<String>,
    ) -> BTreeMap<String, (String, String)> {
        let mut teams = BTreeMap::new();
        let batch_size = self.services.settings.roster_batch_size.max(1);
        let max_pages = self.services.fetcher.policy().max_pages;

        for batch in collections.chunks(batch_size) {
            let mut set: JoinSet<(usize, Collection, PagedDocuments)> = JoinSet::new();
            for (index, collection) in batch.iter().enumerate() {
                let fetcher = self.services.fetcher.clone();
                let token = token.to_string();
                let collection = collection.clone();
                set.spawn(async move {
                    let listing = fetcher
                        .fetch_all_pages(&token, &paths::teams(&collection.upstream_id), max_pages)
                        .await;
                    (index, collection, listing)
                });
            }

            let mut finished = Vec::with_capacity(batch.len());
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(done) => finished.push(done),
                    Err(e) => {
                        warn!(error = %e, "Team discovery task failed");
                        errors.push(format!("team discovery task failed: {e}"));
                    }
                }
            }
            // Merge in collection order so a team shared by collections keeps the first one's campus
            finished.sort_by_key(|(index, _, _)| *index);

            for (_, collection, listing) in finished {
                if let Some(error) = &listing.error {
                    errors.push(format!("collection {} teams: {error}", collection.upstream_id));
                }
                for team in listing.data {
                    let name = team
                        .attr_string("name")
                        .unwrap_or_else(|| format!("Team {}", team.id));
                    teams
                        .entry(team.id.clone())
                        .or_insert((name, collection.name.clone()));
                }
            }
        }

        teams
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_members(
        &self,
        tenant_id: Uuid,
        connection: &connection::Model,
        team: &TeamRef,
        assignments: &PagedDocuments,
        people: &mut PersonDirectory<'_>,
        rows: &mut BTreeMap<(String, String, String), team_member::ActiveModel>,
        results: &mut RosterSyncResults,
        errors: &mut Vec<String>,
    ) {
        let included = Included::new(&assignments.included);
        let now = Utc::now();

        for assignment in &assignments.data {
            results.assignments_seen += 1;

            let position = if connection.sync_positions {
                let role = included
                    .related(assignment, "team_position", "TeamPosition")
                    .and_then(|p| p.attr_string("name"))
                    .unwrap_or_default();
                match map_role_to_position(&role) {
                    Some(position) => position,
                    None => {
                        results.skipped_unmapped_position += 1;
                        continue;
                    }
                }
            } else {
                Position::Member
            };

            let Some(person_id) = assignment.relationship_id("person") else {
                continue;
            };
            let person = match people.get(person_id).await {
                Ok(Some(person)) => person,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(format!("person {person_id}: {e}"));
                    continue;
                }
            };

            if connection.active_only && !person.is_active() {
                results.skipped_inactive += 1;
                continue;
            }
            let Some(email) = person.email.clone() else {
                results.skipped_without_email += 1;
                continue;
            };

            let key = (team.name.clone(), position.code().to_string(), email.clone());
            rows.insert(
                key,
                team_member::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(tenant_id),
                    team_name: Set(team.name.clone()),
                    position: Set(position.code().to_string()),
                    email: Set(email),
                    name: Set(person.name.clone()),
                    phone_number: Set(person
                        .phone_number
                        .clone()
                        .filter(|_| connection.sync_phone_numbers)),
                    birthday: Set(person.birthday.filter(|_| connection.sync_birthdays)),
                    campus_id: Set(team.campus_id),
                    upstream_person_id: Set(Some(person.upstream_id.clone())),
                    user_id: Set(None),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                },
            );
        }
    }

    /// Sets `user_id` on unlinked rows whose email matches a profile.
    async fn link_profiles(&self, tenant_id: Uuid) -> Result<usize, SyncError> {
        let db = &*self.services.db;

        let profiles: HashMap<String, Uuid> = profile::Entity::find()
            .filter(profile::Column::TenantId.eq(tenant_id))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.email.trim().to_lowercase(), p.id))
            .collect();
        if profiles.is_empty() {
            return Ok(0);
        }

        let unlinked = team_member::Entity::find()
            .filter(team_member::Column::TenantId.eq(tenant_id))
            .filter(team_member::Column::UserId.is_null())
            .all(db)
            .await?;

        let mut linked = 0;
        for member in unlinked {
            let Some(user_id) = profiles.get(&member.email.trim().to_lowercase()) else {
                continue;
            };
            let updated = team_member::Entity::update_many()
                .col_expr(team_member::Column::UserId, Expr::value(*user_id))
                .filter(team_member::Column::Id.eq(member.id))
                .filter(team_member::Column::UserId.is_null())
                .exec(db)
                .await?;
            linked += updated.rows_affected as usize;
        }

        Ok(linked)
    }
}

/// Conflict clause for roster upserts.
///
/// `user_id` is never updated so profile links survive re-syncs. Contact
/// columns whose toggle is off are left as stored.
fn member_conflict(connection: &connection::Model) -> OnConflict {
    let mut columns = vec![
        team_member::Column::Name,
        team_member::Column::CampusId,
        team_member::Column::UpstreamPersonId,
        team_member::Column::UpdatedAt,
    ];
    if connection.sync_phone_numbers {
        columns.push(team_member::Column::PhoneNumber);
    }
    if connection.sync_birthdays {
        columns.push(team_member::Column::Birthday);
    }

    OnConflict::columns([
        team_member::Column::TenantId,
        team_member::Column::TeamName,
        team_member::Column::Position,
        team_member::Column::Email,
    ])
    .update_columns(columns)
    .to_owned()
}
