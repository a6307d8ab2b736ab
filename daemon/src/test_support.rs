//! Shared fakes for unit tests.

use anyhow::Result;
use common::{ContentKind, WallpaperRef};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::animation::FrameTable;
use crate::animation::frames::AnimationFrame;
use crate::display::DisplayId;
use crate::playback::{Frame, Playback, PlaybackFactory};
use crate::visibility::{DesktopProbe, DesktopSnapshot};

/// A table of 1x1 frames with the given durations in milliseconds.
pub fn frame_table(durations_ms: &[u64]) -> FrameTable {
    let frames = durations_ms
        .iter()
        .map(|&ms| AnimationFrame {
            image: Arc::new(RgbaImage::new(1, 1)),
            duration: Duration::from_millis(ms),
        })
        .collect();
    FrameTable::new(frames).unwrap()
}

pub fn wallpaper(id: &str) -> WallpaperRef {
    WallpaperRef {
        id: id.to_string(),
        name: format!("{id}.gif"),
        kind: ContentKind::FrameSequence,
        path: PathBuf::from(format!("/wallpapers/{id}.gif")),
    }
}

#[derive(Debug, Clone)]
struct PlaybackRecord {
    id: String,
    display: DisplayId,
    paused: bool,
    stopped: bool,
    force_resumes: usize,
}

#[derive(Debug, Default)]
struct FactoryLog {
    records: Vec<PlaybackRecord>,
    fail_next_open: bool,
    fail_service: bool,
}

/// Factory whose playbacks only record what was done to them.
#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    log: Arc<Mutex<FactoryLog>>,
}

impl FakeFactory {
    pub fn fail_next_open(&self) {
        self.log.lock().unwrap().fail_next_open = true;
    }

    pub fn fail_service(&self) {
        self.log.lock().unwrap().fail_service = true;
    }

    pub fn open_count(&self) -> usize {
        self.log.lock().unwrap().records.len()
    }

    /// Ids of stopped playbacks, in open order.
    pub fn stopped(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.stopped)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Pause flag of the most recent playback opened for `id`.
    pub fn is_paused(&self, id: &str) -> bool {
        self.log
            .lock()
            .unwrap()
            .records
            .iter()
            .rev()
            .find(|r| r.id == id)
            .map(|r| r.paused)
            .unwrap_or(false)
    }

    pub fn force_resumes(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .records
            .iter()
            .map(|r| r.force_resumes)
            .sum()
    }

    pub fn live_on(&self, display: &str) -> Option<String> {
        self.log
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| !r.stopped && r.display.as_str() == display)
            .map(|r| r.id.clone())
    }
}

impl PlaybackFactory for FakeFactory {
    fn open(
        &mut self,
        wallpaper: &WallpaperRef,
        display: &DisplayId,
        paused: bool,
    ) -> Result<Box<dyn Playback>> {
        let mut log = self.log.lock().unwrap();
        if std::mem::take(&mut log.fail_next_open) {
            anyhow::bail!("cannot open {}", wallpaper.name);
        }
        log.records.push(PlaybackRecord {
            id: wallpaper.id.clone(),
            display: display.clone(),
            paused,
            stopped: false,
            force_resumes: 0,
        });
        Ok(Box::new(FakePlayback {
            index: log.records.len() - 1,
            log: Arc::clone(&self.log),
            frame: Arc::new(RgbaImage::new(4, 4)),
        }))
    }
}

struct FakePlayback {
    index: usize,
    log: Arc<Mutex<FactoryLog>>,
    frame: Frame,
}

impl FakePlayback {
    fn update(&self, f: impl FnOnce(&mut PlaybackRecord)) {
        f(&mut self.log.lock().unwrap().records[self.index]);
    }
}

impl Playback for FakePlayback {
    fn set_paused(&mut self, paused: bool) {
        self.update(|r| r.paused = paused);
    }

    fn is_paused(&self) -> bool {
        self.log.lock().unwrap().records[self.index].paused
    }

    fn force_resume(&mut self) {
        self.update(|r| {
            r.paused = false;
            r.force_resumes += 1;
        });
    }

    fn current_frame(&self) -> Option<Frame> {
        Some(Arc::clone(&self.frame))
    }

    fn service(&mut self) -> Result<()> {
        if self.log.lock().unwrap().fail_service {
            anyhow::bail!("decoder error");
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.update(|r| r.stopped = true);
    }
}

/// Probe returning whatever the test last set.
#[derive(Clone)]
pub struct StaticProbe {
    snapshot: Arc<Mutex<Option<DesktopSnapshot>>>,
    queries: Arc<AtomicUsize>,
}

impl StaticProbe {
    pub fn new(snapshot: DesktopSnapshot) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(Some(snapshot))),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of snapshots taken so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn set(&self, snapshot: DesktopSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    /// Make every following query fail.
    pub fn fail(&self) {
        *self.snapshot.lock().unwrap() = None;
    }
}

impl DesktopProbe for StaticProbe {
    fn snapshot(&mut self) -> Result<DesktopSnapshot> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("compositor unreachable"))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
