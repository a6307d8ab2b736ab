//! Playback resources bound to render surfaces.

use anyhow::{Context, Result};
use common::{ContentKind, WallpaperRef};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

use crate::animation::{AnimationPlayer, FrameNotifier, FrameTable};
use crate::display::DisplayId;
use crate::events::{ControlEvent, EventSender};
use crate::video::VideoPlayback;

/// A decoded frame ready to be composed onto a surface.
pub type Frame = Arc<RgbaImage>;

/// One playing wallpaper: either a video pipeline or an animation player.
///
/// Pause state is pushed in by the lifecycle manager; implementations must
/// tolerate redundant calls.
pub trait Playback: Send {
    fn set_paused(&mut self, paused: bool);

    fn is_paused(&self) -> bool;

    /// Unstick playback after a sleep/wake cycle and leave it playing.
    fn force_resume(&mut self);

    /// Latest frame, if one has been produced yet.
    fn current_frame(&self) -> Option<Frame>;

    /// Periodic housekeeping on the control thread (bus messages, looping).
    fn service(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the resource. Idempotent.
    fn stop(&mut self);
}

/// Opens playback resources for wallpapers.
pub trait PlaybackFactory {
    fn open(
        &mut self,
        wallpaper: &WallpaperRef,
        display: &DisplayId,
        paused: bool,
    ) -> Result<Box<dyn Playback>>;
}

/// Factory for real content: GStreamer for videos, the animation engine for
/// frame sequences. Both announce new frames on the control queue.
pub struct MediaPlaybackFactory {
    events: EventSender,
    tick_interval: Duration,
}

impl MediaPlaybackFactory {
    pub fn new(events: EventSender, tick_interval: Duration) -> Self {
        Self {
            events,
            tick_interval,
        }
    }

    fn notifier(&self, display: &DisplayId) -> FrameNotifier {
        let events = self.events.clone();
        let display = display.clone();
        Box::new(move || {
            let _ = events.send(ControlEvent::FrameReady(display.clone()));
        })
    }
}

impl PlaybackFactory for MediaPlaybackFactory {
    fn open(
        &mut self,
        wallpaper: &WallpaperRef,
        display: &DisplayId,
        paused: bool,
    ) -> Result<Box<dyn Playback>> {
        match wallpaper.kind {
            ContentKind::FrameSequence => {
                let table = FrameTable::decode(&wallpaper.path)?;
                let player = AnimationPlayer::start(
                    Arc::new(table),
                    self.tick_interval,
                    paused,
                    self.notifier(display),
                )?;
                Ok(Box::new(player))
            }
            ContentKind::LoopingVideo => {
                let video = VideoPlayback::open(&wallpaper.path, paused, self.notifier(display))
                    .with_context(|| format!("Failed to open video {}", wallpaper.path.display()))?;
                Ok(Box::new(video))
            }
        }
    }
}

impl Playback for AnimationPlayer {
    fn set_paused(&mut self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.resume();
        }
    }

    fn is_paused(&self) -> bool {
        AnimationPlayer::is_paused(self)
    }

    fn force_resume(&mut self) {
        self.reset_timing_and_resume();
    }

    fn current_frame(&self) -> Option<Frame> {
        Some(AnimationPlayer::current_frame(self))
    }

    fn stop(&mut self) {
        AnimationPlayer::stop(self);
    }
}
