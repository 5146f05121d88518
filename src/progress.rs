//! Monotonic per-phase progress tracking.

use thiserror::Error;

/// Rejected progress readings. Both indicate a caller bug (bad parsing or
/// out-of-order reporting), so they are surfaced rather than clamped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgressError {
    #[error("Progress value {0} is out of bounds [0, 100]")]
    Bounds(f64),

    #[error("Progress decreased from {previous} to {current}")]
    Regression { previous: f64, current: f64 },
}

/// Progress for the phase currently running.
///
/// `history` is non-decreasing and always ends with `current`.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    current: f64,
    phase: String,
    history: Vec<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            current: 0.0,
            phase: "idle".into(),
            history: vec![0.0],
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Accept a new reading; the tracker is left untouched on error.
    pub fn update(&mut self, value: f64) -> Result<(), ProgressError> {
        // NaN fails both comparisons below, so reject it explicitly.
        if !(0.0..=100.0).contains(&value) {
            return Err(ProgressError::Bounds(value));
        }
        if value < self.current {
            return Err(ProgressError::Regression {
                previous: self.current,
                current: value,
            });
        }
        self.current = value;
        self.history.push(value);
        Ok(())
    }

    /// Begin a new phase. No ordering carries over from the previous one.
    pub fn start_phase(&mut self, name: impl Into<String>) {
        self.phase = name.into();
        self.current = 0.0;
        self.history = vec![0.0];
    }

    /// Force the phase to 100%. Never lowers the value.
    pub fn complete_phase(&mut self) {
        if self.current < 100.0 {
            self.current = 100.0;
            self.history.push(100.0);
        }
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
        self.phase = "idle".into();
        self.history = vec![0.0];
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_value_is_rejected() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.update(150.0), Err(ProgressError::Bounds(150.0)));
        assert_eq!(t.current(), 0.0);
        assert!(matches!(t.update(-0.5), Err(ProgressError::Bounds(_))));
        assert!(matches!(t.update(f64::NAN), Err(ProgressError::Bounds(_))));
        assert_eq!(t.history(), &[0.0]);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut t = ProgressTracker::new();
        assert!(t.update(0.0).is_ok());
        assert!(t.update(100.0).is_ok());
        assert_eq!(t.current(), 100.0);
    }

    #[test]
    fn test_regression_is_rejected_and_state_kept() {
        let mut t = ProgressTracker::new();
        t.update(40.0).unwrap();
        let err = t.update(39.9).unwrap_err();
        assert_eq!(
            err,
            ProgressError::Regression {
                previous: 40.0,
                current: 39.9
            }
        );
        assert_eq!(t.current(), 40.0);
        assert_eq!(t.history(), &[0.0, 40.0]);
    }

    #[test]
    fn test_equal_values_are_accepted() {
        let mut t = ProgressTracker::new();
        t.update(12.5).unwrap();
        t.update(12.5).unwrap();
        assert_eq!(t.history(), &[0.0, 12.5, 12.5]);
    }

    #[test]
    fn test_history_stays_sorted_over_mixed_updates() {
        let mut t = ProgressTracker::new();
        for v in [3.0, 1.0, 7.5, 7.5, 200.0, 6.0, 55.0, -1.0, 99.9] {
            let _ = t.update(v);
        }
        let h = t.history();
        assert!(h.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*h.last().unwrap(), t.current());
        assert_eq!(t.current(), 99.9);
    }

    #[test]
    fn test_start_phase_resets_without_cross_phase_ordering() {
        let mut t = ProgressTracker::new();
        t.start_phase("downloading");
        t.update(90.0).unwrap();
        t.start_phase("converting");
        assert_eq!(t.current(), 0.0);
        assert_eq!(t.phase(), "converting");
        assert_eq!(t.history(), &[0.0]);
        assert!(t.update(25.0).is_ok());
    }

    #[test]
    fn test_complete_phase_is_idempotent() {
        let mut t = ProgressTracker::new();
        t.update(60.0).unwrap();
        t.complete_phase();
        t.complete_phase();
        assert_eq!(t.current(), 100.0);
        assert_eq!(t.history(), &[0.0, 60.0, 100.0]);
    }

    #[test]
    fn test_reset_bypasses_monotonicity() {
        let mut t = ProgressTracker::new();
        t.start_phase("uploading");
        t.update(80.0).unwrap();
        t.reset();
        assert_eq!(t.current(), 0.0);
        assert_eq!(t.phase(), "idle");
        assert_eq!(t.history(), &[0.0]);
    }
}
