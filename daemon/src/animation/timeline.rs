use std::time::{Duration, Instant};

use super::FrameTable;

/// Pure timing state of one looping animation.
///
/// The only mutable state is the current index, the time accumulated inside
/// it, the pause flag and the instant of the previous tick. Time is always
/// passed in, so the state machine can be driven deterministically.
#[derive(Debug, Clone)]
pub struct AnimationTimeline {
    durations: Vec<Duration>,
    total: Duration,
    current: usize,
    accumulated: Duration,
    paused: bool,
    last_tick: Instant,
}

impl AnimationTimeline {
    /// Start at frame 0 with `now` as the timing baseline.
    pub fn new(table: &FrameTable, now: Instant, paused: bool) -> Self {
        Self {
            durations: table.durations(),
            total: table.total_duration(),
            current: 0,
            accumulated: Duration::ZERO,
            paused,
            last_tick: now,
        }
    }

    /// Advance to `now`, returning every frame index that became current,
    /// in order.
    ///
    /// While paused the baseline still moves, so resuming never replays the
    /// paused interval.
    pub fn tick(&mut self, now: Instant) -> Vec<usize> {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        if self.paused {
            return Vec::new();
        }

        self.accumulated += delta;

        // Keep at most one pending loop; earlier ones would only be replayed.
        if !self.total.is_zero() && self.accumulated >= self.total * 2 {
            let whole_loops = self.accumulated.as_nanos() / self.total.as_nanos();
            let skip = u32::try_from(whole_loops - 1).unwrap_or(u32::MAX);
            self.accumulated = self
                .accumulated
                .saturating_sub(self.total.saturating_mul(skip));
        }

        let mut advanced = Vec::new();
        while self.accumulated >= self.durations[self.current] {
            self.accumulated -= self.durations[self.current];
            self.current = (self.current + 1) % self.durations.len();
            advanced.push(self.current);
        }
        advanced
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Re-baseline to `now`, drop the accumulator and resume.
    pub fn reset_timing_and_resume(&mut self, now: Instant) {
        self.last_tick = now;
        self.accumulated = Duration::ZERO;
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::frame_table;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_one_full_loop_returns_to_start() {
        let table = frame_table(&[30, 70, 100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);

        let advanced = timeline.tick(start + table.total_duration());
        assert_eq!(advanced, vec![1, 2, 0]);
        assert_eq!(timeline.current_frame(), 0);
        assert_eq!(timeline.accumulated(), Duration::ZERO);
    }

    #[test]
    fn test_frame_advances_at_its_own_duration() {
        let table = frame_table(&[100, 200]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);

        assert!(timeline.tick(start + ms(99)).is_empty());
        assert_eq!(timeline.tick(start + ms(100)), vec![1]);
        assert!(timeline.tick(start + ms(299)).is_empty());
        assert_eq!(timeline.tick(start + ms(300)), vec![0]);
    }

    #[test]
    fn test_each_advance_emitted_once() {
        let table = frame_table(&[10, 10, 10, 10]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);

        let mut emitted = Vec::new();
        for step in 1..=8 {
            emitted.extend(timeline.tick(start + ms(step * 5)));
        }
        assert_eq!(emitted, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_paused_tick_moves_baseline_only() {
        let table = frame_table(&[100, 100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);

        timeline.tick(start + ms(50));
        timeline.pause();
        assert!(timeline.tick(start + ms(5_000)).is_empty());
        assert_eq!(timeline.current_frame(), 0);
        assert_eq!(timeline.accumulated(), ms(50));

        timeline.resume();
        assert_eq!(timeline.tick(start + ms(5_050)), vec![1]);
    }

    #[test]
    fn test_pause_then_resume_is_a_no_op() {
        let table = frame_table(&[100, 100, 100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);
        timeline.tick(start + ms(130));

        let index = timeline.current_frame();
        let accumulated = timeline.accumulated();

        timeline.pause();
        timeline.resume();

        assert_eq!(timeline.current_frame(), index);
        assert_eq!(timeline.accumulated(), accumulated);
        assert!(!timeline.is_paused());
    }

    #[test]
    fn test_reset_timing_skips_suspended_interval() {
        let table = frame_table(&[100, 100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);
        timeline.tick(start + ms(40));

        // Suspended for an hour without ticks, then reset.
        let wake = start + Duration::from_secs(3600);
        timeline.reset_timing_and_resume(wake);
        assert_eq!(timeline.accumulated(), Duration::ZERO);

        assert!(timeline.tick(wake + ms(99)).is_empty());
        assert_eq!(timeline.tick(wake + ms(100)), vec![1]);
    }

    #[test]
    fn test_long_gap_is_bounded_to_one_loop() {
        let table = frame_table(&[100, 100, 100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, false);

        // 10 loops and 150ms.
        let advanced = timeline.tick(start + ms(3_150));
        assert_eq!(advanced.len(), 4);
        assert_eq!(timeline.current_frame(), 1);
        assert_eq!(timeline.accumulated(), ms(50));
    }

    #[test]
    fn test_starts_paused_when_requested() {
        let table = frame_table(&[100]);
        let start = Instant::now();
        let mut timeline = AnimationTimeline::new(&table, start, true);

        assert!(timeline.is_paused());
        assert!(timeline.tick(start + ms(500)).is_empty());
    }
}
