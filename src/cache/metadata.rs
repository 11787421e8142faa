//! Metadata Module
//!
//! Describes when a cached result was produced and how far upstream
//! pagination had progressed when it was written.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Query-string parameters for resuming upstream pagination.
pub type NextQs = BTreeMap<String, String>;

// == Metadata ==
/// Envelope attached to every cached record.
///
/// `pages` and `next_qs` only carry meaning for set caches; detail and
/// download caches leave them at zero/`None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Time of the last successful write of the record
    pub update_time: DateTime<Utc>,
    /// Number of upstream pages merged into the record
    #[serde(default)]
    pub pages: u32,
    /// Continuation token for the next upstream page
    #[serde(default)]
    pub next_qs: Option<NextQs>,
}

impl Metadata {
    // == Constructor ==
    /// Creates metadata for a detail or download record.
    ///
    /// The timestamp is truncated to milliseconds, the precision every engine
    /// persists.
    pub fn new(update_time: DateTime<Utc>) -> Self {
        Self {
            update_time: truncate_ms(update_time),
            pages: 0,
            next_qs: None,
        }
    }

    /// Metadata stamped with the current time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Creates metadata for a set cache record.
    pub fn paged(update_time: DateTime<Utc>, pages: u32, next_qs: Option<NextQs>) -> Self {
        Self {
            update_time: truncate_ms(update_time),
            pages,
            next_qs,
        }
    }

    /// Copy with `update_time` cut to millisecond precision.
    ///
    /// The fields are public, so a struct literal can carry nanoseconds;
    /// engines store this form.
    pub fn truncated(&self) -> Self {
        Self {
            update_time: truncate_ms(self.update_time),
            ..self.clone()
        }
    }

    /// Copy with `pages` zeroed. Readers get this as the header of a set.
    pub fn without_pages(&self) -> Self {
        Self {
            pages: 0,
            ..self.clone()
        }
    }

    /// Copy that keeps only the timestamp (what detail records store).
    pub fn timestamp_only(&self) -> Self {
        Self::new(self.update_time)
    }

    /// Elapsed time since `update_time`, measured at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.update_time
    }

    /// `update_time` as unix milliseconds.
    pub fn update_time_ms(&self) -> i64 {
        self.update_time.timestamp_millis()
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "update_time={} pages={}",
            self.update_time.to_rfc3339(),
            self.pages
        )?;
        if let Some(next_qs) = &self.next_qs {
            write!(f, " next_qs={:?}", next_qs)?;
        }
        Ok(())
    }
}

// == Utility Functions ==
/// Converts unix milliseconds back into a UTC timestamp.
pub fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn truncate_ms(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(Duration::milliseconds(1)).unwrap_or(time)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_detail_metadata_has_no_pagination() {
        let metadata = Metadata::now();
        assert_eq!(metadata.pages, 0);
        assert!(metadata.next_qs.is_none());
    }

    #[test]
    fn test_without_pages_keeps_token() {
        let mut qs = NextQs::new();
        qs.insert("offset".to_string(), "30".to_string());
        let metadata = Metadata::paged(Utc::now(), 3, Some(qs.clone()));

        let header = metadata.without_pages();
        assert_eq!(header.pages, 0);
        assert_eq!(header.next_qs, Some(qs));
        assert_eq!(header.update_time, metadata.update_time);
    }

    #[test]
    fn test_timestamp_truncated_to_ms() {
        let time = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let metadata = Metadata::new(time);
        assert_eq!(metadata.update_time.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(datetime_from_ms(metadata.update_time_ms()), metadata.update_time);
    }

    #[test]
    fn test_truncated_literal_keeps_pagination() {
        let metadata = Metadata {
            update_time: Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap(),
            pages: 4,
            next_qs: None,
        };
        let stored = metadata.truncated();
        assert_eq!(stored.update_time.timestamp_subsec_nanos(), 987_000_000);
        assert_eq!(stored.pages, 4);
    }

    #[test]
    fn test_age_at() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let metadata = Metadata::new(time);
        assert_eq!(
            metadata.age_at(time + Duration::seconds(90)),
            Duration::seconds(90)
        );
    }

    #[test]
    fn test_serde_defaults() {
        let metadata: Metadata =
            serde_json::from_str(r#"{"update_time":"2024-05-01T00:00:00Z"}"#).unwrap();
        assert_eq!(metadata.pages, 0);
        assert!(metadata.next_qs.is_none());
    }
}
