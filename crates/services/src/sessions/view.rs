use crate::api::{Prompt, SubmitOut};

use super::runtime::RuntimePhase;

/// Presentation-agnostic copy of the runtime's displayable state.
///
/// This is intentionally **not** a UI view-model: no pre-formatted strings,
/// no layout assumptions. The front end decides how to render phases,
/// counters, and the countdown.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSnapshot {
    pub phase: RuntimePhase,
    pub seconds_left: u32,
    pub duration_secs: u32,
    pub prompt: Option<Prompt>,
    /// Optimistically recorded choice index; authoritative correctness
    /// styling comes from `last_result`.
    pub selected: Option<usize>,
    pub last_result: Option<SubmitOut>,
    pub score: i64,
    pub failures: u32,
    pub rejects: u32,
    pub answered: u32,
    pub remaining: Option<u32>,
    pub mean_comment: Option<String>,
    pub complete: bool,
}

impl RuntimeSnapshot {
    /// Fraction of the countdown still left, in `0.0..=1.0`.
    #[must_use]
    pub fn time_fraction(&self) -> f64 {
        if self.duration_secs == 0 {
            return 0.0;
        }
        f64::from(self.seconds_left) / f64::from(self.duration_secs)
    }

    /// True once the countdown is inside its final stretch.
    #[must_use]
    pub fn is_low_time(&self) -> bool {
        self.time_fraction() < 0.15
    }
}

/// Render seconds as `M:SS` for countdown display.
#[must_use]
pub fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(59), "0:59");
        assert_eq!(format_clock(60), "1:00");
        assert_eq!(format_clock(1799), "29:59");
    }

    #[test]
    fn low_time_kicks_in_under_fifteen_percent() {
        let snapshot = RuntimeSnapshot {
            phase: RuntimePhase::Loading,
            seconds_left: 270,
            duration_secs: 1800,
            prompt: None,
            selected: None,
            last_result: None,
            score: 0,
            failures: 0,
            rejects: 0,
            answered: 0,
            remaining: None,
            mean_comment: None,
            complete: false,
        };
        assert!(!snapshot.is_low_time());

        let low = RuntimeSnapshot {
            seconds_left: 269,
            ..snapshot
        };
        assert!(low.is_low_time());
    }
}
