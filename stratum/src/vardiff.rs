//! Vardiff Controller (C8, §4.8).
//!
//! Tracks submission timing per connection and nudges the share difficulty
//! toward a target submission rate, sampling every
//! [`crate::constants::VARDIFF_SAMPLE_EVERY`] accepted shares over a sliding
//! window of the last [`crate::constants::VARDIFF_WINDOW`] intervals.

use std::collections::VecDeque;

use crate::constants::{
    MAX_SHARE_DIFFICULTY, MIN_SHARE_DIFFICULTY, VARDIFF_HIGH_SECS, VARDIFF_LOW_SECS,
    VARDIFF_SAMPLE_EVERY, VARDIFF_WINDOW,
};

/// Per-connection vardiff state (§4.8, §5 "per-connection state").
pub struct VardiffController {
    difficulty: f64,
    submissions_since_sample: u64,
    last_submit_at: Option<f64>,
    intervals: VecDeque<f64>,
}

impl VardiffController {
    pub fn new(initial_difficulty: f64) -> Self {
        Self {
            difficulty: initial_difficulty.clamp(MIN_SHARE_DIFFICULTY, MAX_SHARE_DIFFICULTY),
            submissions_since_sample: 0,
            last_submit_at: None,
            intervals: VecDeque::with_capacity(VARDIFF_WINDOW),
        }
    }

    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Record an accepted share at `now` (seconds, monotonic clock). Returns
    /// `Some(new_difficulty)` when a retarget fires, so the caller can send
    /// `mining.set_difficulty`.
    pub fn record_accepted_share(&mut self, now: f64) -> Option<f64> {
        if let Some(prev) = self.last_submit_at {
            let interval = (now - prev).max(0.0);
            if self.intervals.len() == VARDIFF_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(interval);
        }
        self.last_submit_at = Some(now);
        self.submissions_since_sample += 1;

        if self.submissions_since_sample < VARDIFF_SAMPLE_EVERY || self.intervals.is_empty() {
            return None;
        }
        self.submissions_since_sample = 0;

        let mean: f64 = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        let next = if mean < VARDIFF_LOW_SECS {
            self.difficulty * 2.0
        } else if mean > VARDIFF_HIGH_SECS {
            self.difficulty / 2.0
        } else {
            return None;
        };

        let clamped = next.clamp(MIN_SHARE_DIFFICULTY, MAX_SHARE_DIFFICULTY);
        if clamped == self.difficulty {
            return None;
        }
        self.difficulty = clamped;
        Some(self.difficulty)
    }

    /// Apply a miner-requested `mining.suggest_difficulty`, clamped to the
    /// allowed range (§6).
    pub fn suggest(&mut self, requested: f64) -> f64 {
        self.difficulty = requested.clamp(MIN_SHARE_DIFFICULTY, MAX_SHARE_DIFFICULTY);
        self.difficulty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_submissions_double_difficulty() {
        let mut vardiff = VardiffController::new(4.0);
        let mut now = 0.0;
        let mut last = None;
        for _ in 0..VARDIFF_SAMPLE_EVERY {
            now += 1.0; // well below VARDIFF_LOW_SECS
            last = vardiff.record_accepted_share(now);
        }
        assert_eq!(last, Some(8.0));
    }

    #[test]
    fn slow_submissions_halve_difficulty() {
        let mut vardiff = VardiffController::new(4.0);
        let mut now = 0.0;
        let mut last = None;
        for _ in 0..VARDIFF_SAMPLE_EVERY {
            now += 60.0; // well above VARDIFF_HIGH_SECS
            last = vardiff.record_accepted_share(now);
        }
        assert_eq!(last, Some(2.0));
    }

    #[test]
    fn steady_rate_does_not_retarget() {
        let mut vardiff = VardiffController::new(4.0);
        let mut now = 0.0;
        let mut last = None;
        for _ in 0..VARDIFF_SAMPLE_EVERY {
            now += 15.0; // between low and high thresholds
            last = vardiff.record_accepted_share(now);
        }
        assert_eq!(last, None);
    }

    #[test]
    fn suggest_difficulty_is_clamped() {
        let mut vardiff = VardiffController::new(4.0);
        assert_eq!(vardiff.suggest(10_000_000.0), MAX_SHARE_DIFFICULTY);
        assert_eq!(vardiff.suggest(0.0001), MIN_SHARE_DIFFICULTY);
    }
}
