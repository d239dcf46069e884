//! # Classification
//!
//! Deterministic lookups that map upstream naming onto local identifiers:
//! service type (collection) names onto campuses, role names onto position
//! codes, and team names onto team types. Upstream naming drift is handled by
//! editing the tables below; the matching rules stay fixed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Collection name fragments that denote a service run for the whole network.
/// Such collections are synced but never attributed to a single campus.
pub const NETWORK_WIDE_PATTERNS: &[&str] = &[
    "all campuses",
    "all-campus",
    "churchwide",
    "church-wide",
    "church wide",
    "network",
    "global",
];

/// Ministries that run across campuses and are synced regardless of campus.
pub const CROSS_CAMPUS_MINISTRY_PATTERNS: &[&str] = &[
    "student",
    "youth",
    "kids",
    "children",
    "young adult",
    "women",
    "men's",
    "mens ",
    "worship night",
    "night of worship",
    "conference",
    "special event",
    "christmas",
    "easter",
    "good friday",
    "baptism",
];

/// A campus as known to the local application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampusRef {
    pub id: Uuid,
    pub name: String,
}

/// Local position codes for team roster rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    WorshipLeader,
    Vocals,
    AcousticGuitar,
    ElectricGuitar,
    Bass,
    Drums,
    Keys,
    Sound,
    Lights,
    Camera,
    Graphics,
    Producer,
    StageManager,
    /// Used when position syncing is disabled for a connection.
    Member,
}

impl Position {
    pub fn code(self) -> &'static str {
        match self {
            Position::WorshipLeader => "worship_leader",
            Position::Vocals => "vocals",
            Position::AcousticGuitar => "acoustic_guitar",
            Position::ElectricGuitar => "electric_guitar",
            Position::Bass => "bass",
            Position::Drums => "drums",
            Position::Keys => "keys",
            Position::Sound => "sound",
            Position::Lights => "lights",
            Position::Camera => "camera",
            Position::Graphics => "graphics",
            Position::Producer => "producer",
            Position::StageManager => "stage_manager",
            Position::Member => "member",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Role name table. Matched exactly first, then by substring in this order,
/// so more specific fragments must precede the generic ones they contain
/// (`bass` before `electric`, `acoustic` before `guitar`).
pub const ROLE_TABLE: &[(&str, Position)] = &[
    ("worship leader", Position::WorshipLeader),
    ("worship lead", Position::WorshipLeader),
    ("music director", Position::WorshipLeader),
    ("band leader", Position::WorshipLeader),
    ("vocals", Position::Vocals),
    ("vocal", Position::Vocals),
    ("singer", Position::Vocals),
    ("bgv", Position::Vocals),
    ("choir", Position::Vocals),
    ("bass", Position::Bass),
    ("acoustic", Position::AcousticGuitar),
    ("electric", Position::ElectricGuitar),
    ("guitar", Position::ElectricGuitar),
    ("drums", Position::Drums),
    ("drum", Position::Drums),
    ("percussion", Position::Drums),
    ("cajon", Position::Drums),
    ("keys", Position::Keys),
    ("keyboard", Position::Keys),
    ("piano", Position::Keys),
    ("synth", Position::Keys),
    ("organ", Position::Keys),
    ("front of house", Position::Sound),
    ("foh", Position::Sound),
    ("monitor", Position::Sound),
    ("audio", Position::Sound),
    ("sound", Position::Sound),
    ("lighting", Position::Lights),
    ("lights", Position::Lights),
    ("camera", Position::Camera),
    ("propresenter", Position::Graphics),
    ("lyrics", Position::Graphics),
    ("slides", Position::Graphics),
    ("graphics", Position::Graphics),
    ("producer", Position::Producer),
    ("stage manager", Position::StageManager),
];

/// Coarse team grouping used by the single-date schedule filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TeamType {
    Worship,
    Production,
    Other,
}

impl TeamType {
    pub fn code(self) -> &'static str {
        match self {
            TeamType::Worship => "worship",
            TeamType::Production => "production",
            TeamType::Other => "other",
        }
    }
}

impl FromStr for TeamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worship" => Ok(TeamType::Worship),
            "production" => Ok(TeamType::Production),
            "other" => Ok(TeamType::Other),
            other => Err(format!("unknown team type '{other}'")),
        }
    }
}

const WORSHIP_TEAM_PATTERNS: &[&str] = &["worship", "band", "vocal", "music", "choir", "praise"];

const PRODUCTION_TEAM_PATTERNS: &[&str] = &[
    "production",
    "tech",
    "sound",
    "audio",
    "light",
    "video",
    "media",
    "camera",
    "stage",
    "propresenter",
    "broadcast",
    "stream",
];

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| haystack.contains(pattern))
}

/// Whether a collection name denotes a network-wide service.
pub fn is_network_wide(name: &str) -> bool {
    contains_any(&normalize(name), NETWORK_WIDE_PATTERNS)
}

/// Resolve the campus a collection belongs to.
///
/// Campus names are tried longest first so "North Hills" wins over "North".
pub fn map_collection_to_campus(
    name: &str,
    campuses: &[CampusRef],
    default_campus: Option<Uuid>,
) -> Option<Uuid> {
    let normalized = normalize(name);

    let mut ordered: Vec<&CampusRef> = campuses
        .iter()
        .filter(|campus| !campus.name.trim().is_empty())
        .collect();
    ordered.sort_by(|a, b| {
        b.name
            .trim()
            .len()
            .cmp(&a.name.trim().len())
            .then_with(|| a.name.cmp(&b.name))
    });

    if let Some(campus) = ordered
        .into_iter()
        .find(|campus| normalized.contains(&normalize(&campus.name)))
    {
        return Some(campus.id);
    }

    if contains_any(&normalized, NETWORK_WIDE_PATTERNS) {
        return None;
    }

    default_campus
}

/// Allow-list check applied before iterating collections.
pub fn is_collection_allowed(name: &str, campuses: &[CampusRef]) -> bool {
    let normalized = normalize(name);

    campuses
        .iter()
        .map(|campus| normalize(&campus.name))
        .filter(|campus| !campus.is_empty())
        .any(|campus| normalized.contains(&campus))
        || contains_any(&normalized, CROSS_CAMPUS_MINISTRY_PATTERNS)
        || contains_any(&normalized, NETWORK_WIDE_PATTERNS)
}

/// Map an upstream role name onto a local position.
///
/// `None` means "skip this assignment"; it is not an error.
pub fn map_role_to_position(name: &str) -> Option<Position> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return None;
    }

    ROLE_TABLE
        .iter()
        .find(|(pattern, _)| normalized == *pattern)
        .or_else(|| {
            ROLE_TABLE
                .iter()
                .find(|(pattern, _)| normalized.contains(pattern))
        })
        .map(|(_, position)| *position)
}

/// Classify an upstream team name.
pub fn map_team_type(name: &str) -> TeamType {
    let normalized = normalize(name);
    if contains_any(&normalized, WORSHIP_TEAM_PATTERNS) {
        TeamType::Worship
    } else if contains_any(&normalized, PRODUCTION_TEAM_PATTERNS) {
        TeamType::Production
    } else {
        TeamType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campuses() -> Vec<CampusRef> {
        vec![
            CampusRef {
                id: Uuid::from_u128(1),
                name: "North".to_string(),
            },
            CampusRef {
                id: Uuid::from_u128(2),
                name: "North Hills".to_string(),
            },
            CampusRef {
                id: Uuid::from_u128(3),
                name: "Downtown".to_string(),
            },
        ]
    }

    #[test]
    fn test_campus_substring_match() {
        let default = Some(Uuid::from_u128(99));
        assert_eq!(
            map_collection_to_campus("Downtown Sunday Services", &campuses(), default),
            Some(Uuid::from_u128(3))
        );
        assert_eq!(
            map_collection_to_campus("north - 9am", &campuses(), default),
            Some(Uuid::from_u128(1))
        );
    }

    #[test]
    fn test_longest_campus_name_wins() {
        assert_eq!(
            map_collection_to_campus("North Hills Weekend", &campuses(), None),
            Some(Uuid::from_u128(2))
        );
    }

    #[test]
    fn test_network_wide_collection_has_no_campus() {
        let default = Some(Uuid::from_u128(99));
        for pattern in NETWORK_WIDE_PATTERNS {
            let name = format!("Easter {pattern} Gathering");
            assert_eq!(
                map_collection_to_campus(&name, &campuses(), default),
                None,
                "{name}"
            );
            assert!(is_network_wide(&name));
        }
    }

    #[test]
    fn test_unmatched_collection_falls_back_to_default() {
        let default = Some(Uuid::from_u128(99));
        assert_eq!(
            map_collection_to_campus("Student Ministry", &campuses(), default),
            default
        );
        assert_eq!(
            map_collection_to_campus("Student Ministry", &campuses(), None),
            None
        );
    }

    #[test]
    fn test_collection_allow_list() {
        assert!(is_collection_allowed("Downtown 11am", &campuses()));
        assert!(is_collection_allowed("ALL CAMPUSES prayer", &campuses()));
        for pattern in CROSS_CAMPUS_MINISTRY_PATTERNS {
            let name = format!("X {pattern} X");
            assert!(is_collection_allowed(&name, &campuses()), "{name}");
        }
        assert!(!is_collection_allowed("Staff Meeting", &campuses()));
        assert!(!is_collection_allowed("Staff Meeting", &[]));
    }

    #[test]
    fn test_every_role_table_entry_maps_exactly() {
        for (pattern, position) in ROLE_TABLE {
            assert_eq!(
                map_role_to_position(pattern),
                Some(*position),
                "exact match for '{pattern}'"
            );
            assert_eq!(
                map_role_to_position(&pattern.to_uppercase()),
                Some(*position),
                "case-insensitive match for '{pattern}'"
            );
        }
    }

    #[test]
    fn test_role_substring_matches_follow_table_order() {
        assert_eq!(map_role_to_position("Lead Vocals"), Some(Position::Vocals));
        assert_eq!(map_role_to_position("Electric Bass"), Some(Position::Bass));
        assert_eq!(
            map_role_to_position("Acoustic Guitar 2"),
            Some(Position::AcousticGuitar)
        );
        assert_eq!(
            map_role_to_position("Electric Guitar"),
            Some(Position::ElectricGuitar)
        );
        assert_eq!(map_role_to_position("Guitar"), Some(Position::ElectricGuitar));
        assert_eq!(
            map_role_to_position("Worship Leader / Keys"),
            Some(Position::WorshipLeader)
        );
        assert_eq!(map_role_to_position("FOH Engineer"), Some(Position::Sound));
        assert_eq!(map_role_to_position("Lighting Director"), Some(Position::Lights));
    }

    #[test]
    fn test_unknown_roles_are_skipped() {
        assert_eq!(map_role_to_position("Greeter"), None);
        assert_eq!(map_role_to_position("Parking"), None);
        assert_eq!(map_role_to_position(""), None);
        assert_eq!(map_role_to_position("   "), None);
    }

    #[test]
    fn test_team_type_mapping() {
        assert_eq!(map_team_type("Worship Team"), TeamType::Worship);
        assert_eq!(map_team_type("Band"), TeamType::Worship);
        assert_eq!(map_team_type("Production"), TeamType::Production);
        assert_eq!(map_team_type("Tech Team"), TeamType::Production);
        assert_eq!(map_team_type("Lighting"), TeamType::Production);
        assert_eq!(map_team_type("Greeters"), TeamType::Other);
    }

    #[test]
    fn test_team_type_from_str() {
        assert_eq!("Worship".parse::<TeamType>(), Ok(TeamType::Worship));
        assert_eq!(" production ".parse::<TeamType>(), Ok(TeamType::Production));
        assert!("band".parse::<TeamType>().is_err());
    }

    #[test]
    fn test_position_codes_are_stable() {
        assert_eq!(Position::WorshipLeader.code(), "worship_leader");
        assert_eq!(Position::Member.to_string(), "member");
        assert_eq!(
            serde_json::to_string(&Position::StageManager).unwrap(),
            "\"stage_manager\""
        );
    }
}
