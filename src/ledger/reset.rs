//! Daily chip reset scheduling.
//!
//! The free-chip window is anchored to the first chip consumed since the last
//! grant, not to wall-clock midnight. Transitions are observation-driven:
//! there is no background job, the phase is derived whenever a balance is
//! read.

use chrono::{DateTime, Duration, Utc};

/// Hours from the anchor until the grant is due.
pub const RESET_WINDOW_HOURS: i64 = 24;

/// Chips granted when the window elapses.
pub const RESET_GRANT_CHIPS: i64 = 5;

/// Label returned while no chip has been consumed since the last grant.
pub const NOT_STARTED: &str = "not started";

/// Where an account sits in the reset cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPhase {
    /// No chip consumed since the last grant; no timer running.
    Idle,
    /// Anchor set, window still open.
    Armed { remaining: Duration },
    /// The 24-hour window has elapsed; the grant fires on this observation.
    Due,
}

pub fn phase(anchor: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ResetPhase {
    match anchor {
        None => ResetPhase::Idle,
        Some(anchor) => {
            let due_at = anchor + Duration::hours(RESET_WINDOW_HOURS);
            if now >= due_at {
                ResetPhase::Due
            } else {
                ResetPhase::Armed {
                    remaining: due_at - now,
                }
            }
        }
    }
}

/// `max(0, anchor + 24h - now)` formatted `HH:MM:SS`, or the "not started"
/// sentinel while idle.
pub fn countdown_label(anchor: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match phase(anchor, now) {
        ResetPhase::Idle => NOT_STARTED.to_string(),
        ResetPhase::Due => "00:00:00".to_string(),
        ResetPhase::Armed { remaining } => {
            let secs = remaining.num_seconds().max(0);
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn no_anchor_is_idle() {
        assert_eq!(phase(None, at(12, 0, 0)), ResetPhase::Idle);
        assert_eq!(countdown_label(None, at(12, 0, 0)), NOT_STARTED);
    }

    #[test]
    fn window_still_open_is_armed() {
        let anchor = at(12, 0, 0);
        let phase = phase(Some(anchor), anchor + Duration::hours(23));
        assert_eq!(
            phase,
            ResetPhase::Armed {
                remaining: Duration::hours(1)
            }
        );
    }

    #[test]
    fn due_exactly_at_24h() {
        let anchor = at(12, 0, 0);
        assert_eq!(
            phase(Some(anchor), anchor + Duration::hours(24)),
            ResetPhase::Due
        );
        assert_eq!(
            phase(Some(anchor), anchor + Duration::hours(24) - Duration::seconds(1)),
            ResetPhase::Armed {
                remaining: Duration::seconds(1)
            }
        );
    }

    #[test]
    fn due_long_after_24h() {
        let anchor = at(12, 0, 0);
        assert_eq!(
            phase(Some(anchor), anchor + Duration::days(3)),
            ResetPhase::Due
        );
    }

    #[test]
    fn countdown_formats_hh_mm_ss() {
        let anchor = at(12, 0, 0);
        let now = anchor + Duration::hours(10) + Duration::minutes(30) + Duration::seconds(15);
        // 13:29:45 left in the window
        assert_eq!(countdown_label(Some(anchor), now), "13:29:45");
        assert_eq!(
            countdown_label(Some(anchor), anchor + Duration::hours(25)),
            "00:00:00"
        );
    }
}
