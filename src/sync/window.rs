//! Sync window selection
//!
//! Decides which plan dates a run covers. Precedence: an explicit historical
//! year range, then a sweep lookback override, then the incremental window
//! from the connection's watermark, then the full default lookback.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::config::SyncConfig;
use crate::models::sync_progress::{self, RANGE_INCREMENTAL};
use crate::repositories::ProgressKey;
use crate::sync::SyncError;

const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 2200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Historical { start_year: i32, end_year: i32 },
    Incremental,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    /// Exclusive upper bound; open-ended for incremental and full runs.
    pub end: Option<DateTime<Utc>>,
}

impl SyncWindow {
    pub fn is_historical(&self) -> bool {
        matches!(self.kind, WindowKind::Historical { .. })
    }

    pub fn range_key(&self) -> String {
        match self.kind {
            WindowKind::Historical {
                start_year,
                end_year,
            } => sync_progress::historical_range_key(start_year, end_year),
            WindowKind::Incremental | WindowKind::Full => RANGE_INCREMENTAL.to_string(),
        }
    }

    pub fn progress_key(&self, tenant_id: uuid::Uuid) -> ProgressKey {
        let (start_year, end_year, window_start) = match self.kind {
            WindowKind::Historical {
                start_year,
                end_year,
            } => (Some(start_year), Some(end_year), None),
            _ => (None, None, Some(self.start)),
        };
        ProgressKey {
            tenant_id,
            sync_type: sync_progress::SYNC_TYPE_PLANS.to_string(),
            range_key: self.range_key(),
            start_year,
            end_year,
            window_start,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end.map(|end| end.date_naive())
    }
}

/// Window inputs taken from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowRequest {
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub lookback_days: Option<i64>,
}

impl WindowRequest {
    /// Rejects malformed ranges before any side effect of the run.
    pub fn validate(&self) -> Result<(), SyncError> {
        match (self.start_year, self.end_year) {
            (None, None) => {}
            (Some(start), Some(end)) => {
                for year in [start, end] {
                    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                        return Err(SyncError::InvalidRequest(format!(
                            "year {year} is outside {MIN_YEAR}..={MAX_YEAR}"
                        )));
                    }
                }
                if start > end {
                    return Err(SyncError::InvalidRequest(format!(
                        "sync_start_year {start} is after sync_end_year {end}"
                    )));
                }
            }
            _ => {
                return Err(SyncError::InvalidRequest(
                    "sync_start_year and sync_end_year must be given together".to_string(),
                ));
            }
        }

        if let Some(days) = self.lookback_days
            && days <= 0
        {
            return Err(SyncError::InvalidRequest(
                "lookback_days must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn year_start(year: i32) -> Result<DateTime<Utc>, SyncError> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| SyncError::InvalidRequest(format!("invalid year {year}")))
}

pub fn select_window(
    request: &WindowRequest,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    settings: &SyncConfig,
) -> Result<SyncWindow, SyncError> {
    request.validate()?;

    if let (Some(start_year), Some(end_year)) = (request.start_year, request.end_year) {
        return Ok(SyncWindow {
            kind: WindowKind::Historical {
                start_year,
                end_year,
            },
            start: year_start(start_year)?,
            end: Some(year_start(end_year + 1)?),
        });
    }

    if let Some(days) = request.lookback_days {
        return Ok(SyncWindow {
            kind: WindowKind::Incremental,
            start: now - Duration::days(days),
            end: None,
        });
    }

    if let Some(last_synced_at) = last_synced_at {
        let floor = now - Duration::days(settings.incremental_floor_days);
        return Ok(SyncWindow {
            kind: WindowKind::Incremental,
            start: last_synced_at.min(floor),
            end: None,
        });
    }

    Ok(SyncWindow {
        kind: WindowKind::Full,
        start: now - Duration::days(settings.full_lookback_days),
        end: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_historical_window() {
        let request = WindowRequest {
            start_year: Some(2014),
            end_year: Some(2015),
            lookback_days: Some(5),
        };
        let window = select_window(&request, Some(now()), now(), &SyncConfig::default()).unwrap();

        assert!(window.is_historical());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Some(Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(window.range_key(), "2014-2015");
        let key = window.progress_key(uuid::Uuid::nil());
        assert_eq!(key.start_year, Some(2014));
        assert_eq!(key.sync_type, "plans");
        assert_eq!(key.window_start, None);
    }

    #[test]
    fn test_inverted_or_partial_range_is_rejected() {
        let inverted = WindowRequest {
            start_year: Some(2016),
            end_year: Some(2015),
            ..Default::default()
        };
        assert!(matches!(
            select_window(&inverted, None, now(), &SyncConfig::default()),
            Err(SyncError::InvalidRequest(_))
        ));

        let partial = WindowRequest {
            start_year: Some(2016),
            ..Default::default()
        };
        assert!(matches!(partial.validate(), Err(SyncError::InvalidRequest(_))));
    }

    #[test]
    fn test_incremental_window_keeps_thirty_day_floor() {
        let settings = SyncConfig::default();

        let recent = now() - Duration::days(2);
        let window = select_window(&WindowRequest::default(), Some(recent), now(), &settings).unwrap();
        assert_eq!(window.kind, WindowKind::Incremental);
        assert_eq!(window.start, now() - Duration::days(30));
        assert_eq!(window.end, None);
        assert_eq!(window.range_key(), "incremental");

        let stale = now() - Duration::days(90);
        let window = select_window(&WindowRequest::default(), Some(stale), now(), &settings).unwrap();
        assert_eq!(window.start, stale);
    }

    #[test]
    fn test_full_window_without_watermark() {
        let window =
            select_window(&WindowRequest::default(), None, now(), &SyncConfig::default()).unwrap();
        assert_eq!(window.kind, WindowKind::Full);
        assert_eq!(window.start, now() - Duration::days(730));
        assert_eq!(window.range_key(), "incremental");
        assert_eq!(window.progress_key(uuid::Uuid::nil()).window_start, Some(window.start));
    }

    #[test]
    fn test_lookback_override() {
        let request = WindowRequest {
            lookback_days: Some(7),
            ..Default::default()
        };
        let window = select_window(&request, None, now(), &SyncConfig::default()).unwrap();
        assert_eq!(window.kind, WindowKind::Incremental);
        assert_eq!(window.start, now() - Duration::days(7));

        let invalid = WindowRequest {
            lookback_days: Some(0),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
