//! Run interval: the expected period between configuration runs, and the
//! staleness / timestamp-consistency thresholds derived from it.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CensusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInterval(Duration);

impl RunInterval {
    /// Build from a configured number of minutes. Negative values are rejected.
    pub fn from_minutes(minutes: i64) -> Result<Self> {
        if minutes < 0 {
            return Err(CensusError::Configuration(format!(
                "run interval must not be negative (got {} minutes)",
                minutes
            )));
        }
        Duration::try_minutes(minutes)
            .ok_or_else(|| {
                CensusError::Configuration(format!(
                    "run interval of {} minutes is out of range",
                    minutes
                ))
            })
            .and_then(Self::from_duration)
    }

    pub fn from_duration(duration: Duration) -> Result<Self> {
        if duration < Duration::zero() {
            return Err(CensusError::Configuration(
                "run interval must not be negative".to_string(),
            ));
        }
        Ok(Self(duration))
    }

    /// Maximum allowed spread between a node's report, catalog and facts times.
    pub fn mismatch_tolerance(&self) -> Duration {
        self.0 / 2
    }

    /// Instant before which a report counts as stale.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.0
    }

    /// A node is stale when it never reported, or its last report is strictly
    /// older than one run interval.
    pub fn is_stale(&self, report_timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match report_timestamp {
            None => true,
            Some(ts) => now.signed_duration_since(ts) > self.0,
        }
    }

    /// Report, catalog and facts timestamps must all lie within half a run
    /// interval of each other. A missing timestamp can never be verified.
    pub fn timestamps_mismatch(
        &self,
        report: Option<DateTime<Utc>>,
        catalog: Option<DateTime<Utc>>,
        facts: Option<DateTime<Utc>>,
    ) -> bool {
        let (Some(report), Some(catalog), Some(facts)) = (report, catalog, facts) else {
            return true;
        };
        let tolerance = self.mismatch_tolerance();
        let pairs = [
            (catalog, facts),
            (facts, catalog),
            (report, facts),
            (facts, report),
            (report, catalog),
            (catalog, report),
        ];
        pairs
            .iter()
            .any(|(a, b)| a.signed_duration_since(*b) > tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_negative_minutes_rejected() {
        let err = RunInterval::from_minutes(-5).unwrap_err();
        assert!(matches!(err, CensusError::Configuration(_)));
        assert!(RunInterval::from_duration(Duration::seconds(-1)).is_err());
    }

    #[test]
    fn test_staleness_boundary_is_strict() {
        let interval = RunInterval::from_minutes(30).unwrap();
        let exactly = now() - Duration::minutes(30);
        assert!(!interval.is_stale(Some(exactly), now()));

        let older = exactly - Duration::microseconds(1);
        assert!(interval.is_stale(Some(older), now()));
    }

    #[test]
    fn test_missing_report_timestamp_is_stale() {
        let interval = RunInterval::from_minutes(30).unwrap();
        assert!(interval.is_stale(None, now()));
    }

    #[test]
    fn test_zero_interval_makes_any_past_report_stale() {
        let interval = RunInterval::from_minutes(0).unwrap();
        assert!(interval.is_stale(Some(now() - Duration::seconds(1)), now()));
    }

    #[test]
    fn test_equal_timestamps_never_mismatch() {
        let interval = RunInterval::from_minutes(30).unwrap();
        let t = Some(now());
        assert!(!interval.timestamps_mismatch(t, t, t));

        let zero = RunInterval::from_minutes(0).unwrap();
        assert!(!zero.timestamps_mismatch(t, t, t));
    }

    #[test]
    fn test_any_missing_timestamp_mismatches() {
        let interval = RunInterval::from_minutes(30).unwrap();
        let t = Some(now());
        assert!(interval.timestamps_mismatch(None, t, t));
        assert!(interval.timestamps_mismatch(t, None, t));
        assert!(interval.timestamps_mismatch(t, t, None));
    }

    #[test]
    fn test_mismatch_uses_half_interval_in_both_directions() {
        let interval = RunInterval::from_minutes(30).unwrap();
        let report = Some(now());
        let within = Some(now() - Duration::minutes(15));
        let beyond = Some(now() + Duration::minutes(16));

        assert!(!interval.timestamps_mismatch(report, within, report));
        assert!(interval.timestamps_mismatch(report, report, beyond));
        assert!(interval.timestamps_mismatch(beyond, report, report));
    }
}
