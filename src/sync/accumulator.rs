//! Sync accumulator
//!
//! Plans, songs and plan-song links gathered since the last flush. Records
//! are keyed by upstream id so a song shared by many plans in one batch is
//! written once, and a plan seen twice keeps its latest version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::upstream::{Included, PagedDocuments, Resource};

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRecord {
    pub upstream_id: String,
    pub service_type_upstream_id: String,
    pub service_type_name: String,
    pub campus_id: Option<Uuid>,
    pub title: Option<String>,
    pub series_title: Option<String>,
    pub sort_date: Option<DateTime<Utc>>,
    pub items_count: i32,
    pub upstream_updated_at: Option<DateTime<Utc>>,
}

impl PlanRecord {
    pub fn from_resource(
        resource: &Resource,
        service_type_upstream_id: &str,
        service_type_name: &str,
        campus_id: Option<Uuid>,
    ) -> Self {
        Self {
            upstream_id: resource.id.clone(),
            service_type_upstream_id: service_type_upstream_id.to_string(),
            service_type_name: service_type_name.to_string(),
            campus_id,
            title: resource.attr_string("title"),
            series_title: resource.attr_string("series_title"),
            sort_date: resource.attr_datetime("sort_date"),
            items_count: resource
                .attr_i64("items_count")
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(0),
            upstream_updated_at: resource.attr_datetime("updated_at"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongRecord {
    pub upstream_id: String,
    pub title: String,
    pub author: Option<String>,
    pub ccli_number: Option<String>,
    pub themes: Option<String>,
    pub upstream_updated_at: Option<DateTime<Utc>>,
}

/// One song's place in a plan's order of service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub song_upstream_id: String,
    pub position: i32,
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub plan: PlanRecord,
    pub links: Vec<LinkRecord>,
    /// Links are only rebuilt when every item page was fetched.
    pub items_complete: bool,
}

/// Songs and ordered links extracted from a plan's item listing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlanItems {
    pub songs: Vec<SongRecord>,
    pub links: Vec<LinkRecord>,
}

impl PlanItems {
    pub fn from_documents(items: &PagedDocuments) -> Self {
        let included = Included::new(&items.included);

        let mut song_items: Vec<&Resource> = items
            .data
            .iter()
            .filter(|item| item.relationship_id("song").is_some())
            .collect();
        song_items.sort_by_key(|item| item.attr_i64("sequence").unwrap_or(i64::MAX));

        let mut result = PlanItems::default();
        for (position, item) in song_items.into_iter().enumerate() {
            let Some(song_id) = item.relationship_id("song") else {
                continue;
            };

            let song = included.get("Song", song_id);
            let title = song
                .and_then(|s| s.attr_string("title"))
                .or_else(|| item.attr_string("title"))
                .unwrap_or_else(|| format!("Song {song_id}"));

            result.songs.push(SongRecord {
                upstream_id: song_id.to_string(),
                title,
                author: song.and_then(|s| s.attr_string("author")),
                ccli_number: song.and_then(|s| s.attr_text("ccli_number")),
                themes: song.and_then(|s| s.attr_text("themes")),
                upstream_updated_at: song.and_then(|s| s.attr_datetime("updated_at")),
            });

            let key_name = included
                .related(item, "key", "Key")
                .and_then(|key| key.attr_string("name").or_else(|| key.attr_string("starting_key")))
                .or_else(|| item.attr_string("key_name"));

            result.links.push(LinkRecord {
                song_upstream_id: song_id.to_string(),
                position: i32::try_from(position).unwrap_or(i32::MAX),
                key_name,
            });
        }

        result
    }
}

/// Everything taken from the accumulator at a flush.
#[derive(Debug, Default)]
pub struct AccumulatedBatch {
    pub plans: Vec<PlanEntry>,
    pub songs: Vec<SongRecord>,
}

impl AccumulatedBatch {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.songs.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SyncAccumulator {
    plans: BTreeMap<String, PlanEntry>,
    songs: BTreeMap<String, SongRecord>,
}

impl SyncAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plan(&mut self, plan: PlanRecord, items: PlanItems, items_complete: bool) {
        for song in items.songs {
            self.songs.insert(song.upstream_id.clone(), song);
        }
        self.plans.insert(
            plan.upstream_id.clone(),
            PlanEntry {
                plan,
                links: items.links,
                items_complete,
            },
        );
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.songs.is_empty()
    }

    /// Drains the accumulator.
    pub fn take(&mut self) -> AccumulatedBatch {
        AccumulatedBatch {
            plans: std::mem::take(&mut self.plans).into_values().collect(),
            songs: std::mem::take(&mut self.songs).into_values().collect(),
        }
    }
}
