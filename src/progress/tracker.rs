use std::time::Instant;

const DEFAULT_AVG_TIME_PER_BLOCK: f64 = 2.0;
const DEFAULT_MIN_TIME_FOR_ADVANCE: f64 = 1.5;

/// Tracks elapsed time and the sliding window of block indices eligible
/// for matching, optionally advancing the expected position on a time
/// basis.
///
/// The evaluation controller overrides the time estimate with actual
/// recognition results via [`ProgressTracker::set_current_index`].
pub struct ProgressTracker {
    total_blocks: usize,
    window_size: usize,
    time_based_advance: bool,
    current_index: usize,
    start_time: Option<Instant>,
    last_advance_time: Option<Instant>,
    avg_time_per_block: f64,
    min_time_for_advance: f64,
}

impl ProgressTracker {
    pub fn new(total_blocks: usize, window_size: usize, time_based_advance: bool) -> Self {
        tracing::info!(total_blocks, window_size, "progress tracker created");
        Self {
            total_blocks,
            window_size,
            time_based_advance,
            current_index: 0,
            start_time: None,
            last_advance_time: None,
            avg_time_per_block: DEFAULT_AVG_TIME_PER_BLOCK,
            min_time_for_advance: DEFAULT_MIN_TIME_FOR_ADVANCE,
        }
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.start_time = Some(now);
        self.last_advance_time = Some(now);
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn elapsed(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn time_since_last_advance(&self) -> f64 {
        self.last_advance_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Contiguous index range `[max(0, current - window + 1), current]`.
    pub fn active_window(&self) -> Vec<usize> {
        if self.total_blocks == 0 {
            return Vec::new();
        }
        let start = (self.current_index + 1).saturating_sub(self.window_size);
        (start..=self.current_index).collect()
    }

    /// Block index the elapsed time suggests we should be at, capped at
    /// the final block.
    pub fn expected_block_index(&self) -> usize {
        if !self.is_started() || self.total_blocks == 0 {
            return 0;
        }
        let expected = (self.elapsed() / self.avg_time_per_block) as usize;
        expected.min(self.total_blocks - 1)
    }

    pub fn should_advance(&self) -> bool {
        if !self.time_based_advance || !self.is_started() {
            return false;
        }
        if self.total_blocks == 0 || self.current_index >= self.total_blocks - 1 {
            return false;
        }
        self.expected_block_index() > self.current_index
            && self.time_since_last_advance() >= self.min_time_for_advance
    }

    /// Moves one block forward; no-op at the final index.
    pub fn advance(&mut self) -> bool {
        if self.total_blocks == 0 || self.current_index >= self.total_blocks - 1 {
            return false;
        }
        self.current_index += 1;
        self.last_advance_time = Some(Instant::now());
        tracing::debug!(
            current = self.current_index,
            total = self.total_blocks,
            "progress advanced"
        );
        true
    }

    /// Jumps directly to `index`, used to synchronize with actual
    /// recognition results rather than elapsed-time estimates.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        if index >= self.total_blocks {
            return false;
        }
        self.current_index = index;
        self.last_advance_time = Some(Instant::now());
        true
    }

    /// Runtime recalibration of the timing constants; non-positive values
    /// are ignored.
    pub fn adjust_time_parameters(&mut self, avg_time_per_block: f64, min_time_for_advance: f64) {
        if avg_time_per_block > 0.0 {
            self.avg_time_per_block = avg_time_per_block;
        }
        if min_time_for_advance > 0.0 {
            self.min_time_for_advance = min_time_for_advance;
        }
        tracing::info!(
            avg_time_per_block = self.avg_time_per_block,
            min_time_for_advance = self.min_time_for_advance,
            "timing parameters adjusted"
        );
    }

    pub fn reset(&mut self) {
        self.current_index = 0;
        self.start_time = None;
        self.last_advance_time = None;
    }

    /// Shifts the internal clocks back as if `secs` had already passed.
    #[cfg(test)]
    pub(crate) fn backdate(&mut self, secs: f64) {
        let delta = std::time::Duration::from_secs_f64(secs);
        self.start_time = self.start_time.map(|t| t - delta);
        self.last_advance_time = self.last_advance_time.map(|t| t - delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_tracker_does_not_advance() {
        let tracker = ProgressTracker::new(5, 3, true);
        assert!(!tracker.is_started());
        assert_eq!(tracker.elapsed(), 0.0);
        assert!(!tracker.should_advance());
        assert_eq!(tracker.expected_block_index(), 0);
    }

    #[test]
    fn time_based_advance_after_simulated_elapse() {
        let mut tracker = ProgressTracker::new(5, 3, true);
        tracker.adjust_time_parameters(1.0, 0.5);
        tracker.start();

        assert!(!tracker.should_advance());
        tracker.backdate(2.5);

        assert!(tracker.should_advance());
        assert!(tracker.advance());
        assert_eq!(tracker.current_index(), 1);
        // One advance resets the rate limit; no further move yet.
        assert!(!tracker.should_advance());
    }

    #[test]
    fn advance_is_a_noop_at_the_final_index() {
        let mut tracker = ProgressTracker::new(2, 3, false);
        assert!(tracker.advance());
        assert_eq!(tracker.current_index(), 1);
        assert!(!tracker.advance());
        assert_eq!(tracker.current_index(), 1);
    }

    #[test]
    fn disabled_time_advance_never_fires() {
        let mut tracker = ProgressTracker::new(5, 3, false);
        tracker.adjust_time_parameters(0.1, 0.1);
        tracker.start();
        tracker.backdate(10.0);
        assert!(!tracker.should_advance());
    }

    #[test]
    fn set_current_index_is_bounds_checked() {
        let mut tracker = ProgressTracker::new(3, 3, false);
        assert!(tracker.set_current_index(2));
        assert_eq!(tracker.current_index(), 2);
        assert!(!tracker.set_current_index(3));
        assert_eq!(tracker.current_index(), 2);
    }

    #[test]
    fn active_window_is_trailing_and_clipped() {
        let mut tracker = ProgressTracker::new(6, 3, false);
        assert_eq!(tracker.active_window(), vec![0]);
        tracker.set_current_index(1);
        assert_eq!(tracker.active_window(), vec![0, 1]);
        tracker.set_current_index(4);
        assert_eq!(tracker.active_window(), vec![2, 3, 4]);
    }

    #[test]
    fn adjust_ignores_non_positive_values() {
        let mut tracker = ProgressTracker::new(4, 3, true);
        tracker.adjust_time_parameters(-1.0, 0.0);
        tracker.start();
        tracker.backdate(100.0);
        // Defaults (2.0 s/block) still in effect: expected index is capped
        // by total blocks, advance gate uses the default minimum.
        assert_eq!(tracker.expected_block_index(), 3);
        assert!(tracker.should_advance());
    }

    #[test]
    fn reset_returns_to_unstarted_state() {
        let mut tracker = ProgressTracker::new(4, 3, true);
        tracker.start();
        tracker.advance();
        tracker.reset();
        assert!(!tracker.is_started());
        assert_eq!(tracker.current_index(), 0);
    }
}
