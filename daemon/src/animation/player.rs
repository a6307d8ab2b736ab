use anyhow::{Context, Result};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{AnimationTimeline, FrameTable};

/// Called from the timer thread whenever the current frame changed.
pub type FrameNotifier = Box<dyn Fn() + Send + 'static>;

/// Runs an [`AnimationTimeline`] on a dedicated timer thread.
///
/// The timer thread only reads the frame table and writes the timeline.
/// Consumers learn about new frames through the notifier and fetch the
/// pixels with [`AnimationPlayer::current_frame`] on their own thread.
pub struct AnimationPlayer {
    table: Arc<FrameTable>,
    timeline: Arc<Mutex<AnimationTimeline>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AnimationPlayer {
    /// Start the timer. Frame 0 is current immediately.
    pub fn start(
        table: Arc<FrameTable>,
        tick_interval: Duration,
        paused: bool,
        notify: FrameNotifier,
    ) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(AnimationTimeline::new(
            &table,
            Instant::now(),
            paused,
        )));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let timeline = Arc::clone(&timeline);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("backdrop-animation".to_string())
                .spawn(move || run_timer(timeline, stop, tick_interval, notify))
                .context("Failed to spawn animation timer thread")?
        };

        Ok(Self {
            table,
            timeline,
            stop,
            thread: Some(thread),
        })
    }

    pub fn pause(&self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.pause();
        }
    }

    pub fn resume(&self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.resume();
        }
    }

    pub fn reset_timing_and_resume(&self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.reset_timing_and_resume(Instant::now());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.timeline.lock().map(|t| t.is_paused()).unwrap_or(true)
    }

    pub fn current_index(&self) -> usize {
        self.timeline.lock().map(|t| t.current_frame()).unwrap_or(0)
    }

    pub fn current_frame(&self) -> Arc<RgbaImage> {
        Arc::clone(self.table.image(self.current_index()))
    }

    /// Stop and join the timer thread. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("Animation timer thread panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for AnimationPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(
    timeline: Arc<Mutex<AnimationTimeline>>,
    stop: Arc<AtomicBool>,
    tick_interval: Duration,
    notify: FrameNotifier,
) {
    while !stop.load(Ordering::Acquire) {
        thread::park_timeout(tick_interval);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let advanced = match timeline.lock() {
            Ok(mut timeline) => !timeline.tick(Instant::now()).is_empty(),
            Err(_) => break,
        };

        // Several advances in one tick collapse into a single notification.
        if advanced {
            notify();
        }
    }
    log::trace!("Animation timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::frame_table;
    use std::sync::atomic::AtomicUsize;

    fn counting_notifier() -> (Arc<AtomicUsize>, FrameNotifier) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_first_frame_available_immediately() {
        let (_, notify) = counting_notifier();
        let table = Arc::new(frame_table(&[10_000, 10_000]));
        let mut player =
            AnimationPlayer::start(table, Duration::from_millis(5), false, notify).unwrap();

        assert_eq!(player.current_index(), 0);
        assert_eq!(player.current_frame().dimensions(), (1, 1));
        player.stop();
    }

    #[test]
    fn test_player_advances_and_notifies() {
        let (count, notify) = counting_notifier();
        let table = Arc::new(frame_table(&[10, 10, 10]));
        let mut player =
            AnimationPlayer::start(table, Duration::from_millis(2), false, notify).unwrap();

        let advanced = common::process::wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) >= 3
        });
        player.stop();
        assert!(advanced);
    }

    #[test]
    fn test_paused_player_stays_on_frame() {
        let (count, notify) = counting_notifier();
        let table = Arc::new(frame_table(&[10, 10]));
        let mut player =
            AnimationPlayer::start(table, Duration::from_millis(2), true, notify).unwrap();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(player.current_index(), 0);
        assert!(player.is_paused());

        player.reset_timing_and_resume();
        assert!(!player.is_paused());
        player.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_, notify) = counting_notifier();
        let table = Arc::new(frame_table(&[100]));
        let mut player =
            AnimationPlayer::start(table, Duration::from_millis(1), false, notify).unwrap();

        player.stop();
        player.stop();
        assert!(player.is_stopped());
        drop(player);
    }
}
