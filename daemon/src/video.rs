//! Looping, muted video playback through GStreamer.

#[cfg(feature = "video")]
pub use gst_backend::VideoPlayback;

#[cfg(not(feature = "video"))]
pub use disabled::VideoPlayback;

#[cfg(feature = "video")]
mod gst_backend {
    use anyhow::{Context, Result};
    use gstreamer as gst;
    use gstreamer::prelude::*;
    use gstreamer_app as gst_app;
    use gstreamer_video as gst_video;
    use image::RgbaImage;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use crate::animation::FrameNotifier;
    use crate::playback::{Frame, Playback};

    /// A `filesrc ! decodebin ! videoconvert ! appsink` pipeline.
    ///
    /// No audio branch is ever linked, so playback is always silent.
    pub struct VideoPlayback {
        pipeline: gst::Pipeline,
        latest: Arc<Mutex<Option<Frame>>>,
        paused: bool,
        stopped: bool,
    }

    impl VideoPlayback {
        pub fn open(path: &Path, paused: bool, notify: FrameNotifier) -> Result<Self> {
            gst::init().context("Failed to initialize GStreamer")?;

            let pipeline = gst::parse::launch(
                "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink name=sink",
            )
            .context("Failed to create GStreamer pipeline")?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("Pipeline is not a gst::Pipeline"))?;

            let source = pipeline
                .by_name("src")
                .context("Failed to get filesrc from pipeline")?;
            source.set_property("location", &*path.to_string_lossy());

            let app_sink = pipeline
                .by_name("sink")
                .context("Failed to get appsink from pipeline")?
                .dynamic_cast::<gst_app::AppSink>()
                .map_err(|_| anyhow::anyhow!("sink is not an AppSink"))?;

            app_sink.set_property("sync", true);
            app_sink.set_property("max-buffers", 1u32);
            app_sink.set_property("drop", true);

            let latest: Arc<Mutex<Option<Frame>>> = Arc::new(Mutex::new(None));
            let notify = Arc::new(Mutex::new(notify));
            let store = {
                let latest = Arc::clone(&latest);
                move |sample: gst::Sample| {
                    let frame = sample_to_frame(&sample).ok_or(gst::FlowError::Error)?;
                    if let Ok(mut slot) = latest.lock() {
                        *slot = Some(frame);
                    }
                    if let Ok(notify) = notify.lock() {
                        notify();
                    }
                    Ok(gst::FlowSuccess::Ok)
                }
            };
            let store_preroll = store.clone();

            app_sink.set_callbacks(
                gst_app::AppSinkCallbacks::builder()
                    .new_preroll(move |sink| {
                        // A paused pipeline still prerolls its first frame.
                        let sample = sink.pull_preroll().map_err(|_| gst::FlowError::Eos)?;
                        store_preroll(sample)
                    })
                    .new_sample(move |sink| {
                        let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        store(sample)
                    })
                    .build(),
            );

            let target = if paused {
                gst::State::Paused
            } else {
                gst::State::Playing
            };
            pipeline
                .set_state(target)
                .context("Failed to start GStreamer pipeline")?;

            log::info!("Opened video {}", path.display());

            Ok(Self {
                pipeline,
                latest,
                paused,
                stopped: false,
            })
        }

        fn restart_at_position(&self) -> Result<()> {
            let position = self
                .pipeline
                .query_position::<gst::ClockTime>()
                .unwrap_or(gst::ClockTime::ZERO);

            self.pipeline
                .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
                .context("Failed to re-seek video")?;
            Ok(())
        }
    }

    /// Copy an RGBA sample into a tightly packed image, honouring row stride.
    fn sample_to_frame(sample: &gst::Sample) -> Option<Frame> {
        let caps = sample.caps()?;
        let info = gst_video::VideoInfo::from_caps(caps).ok()?;
        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;

        let width = info.width();
        let height = info.height();
        let stride = usize::try_from(*info.stride().first()?).ok()?;
        let row_bytes = width as usize * 4;
        let data = map.as_slice();

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(data.get(start..start + row_bytes)?);
        }

        RgbaImage::from_raw(width, height, pixels).map(Arc::new)
    }

    impl Playback for VideoPlayback {
        fn set_paused(&mut self, paused: bool) {
            if self.stopped || self.paused == paused {
                return;
            }
            let target = if paused {
                gst::State::Paused
            } else {
                gst::State::Playing
            };
            match self.pipeline.set_state(target) {
                Ok(_) => self.paused = paused,
                Err(e) => log::warn!("Failed to switch video to {:?}: {}", target, e),
            }
        }

        fn is_paused(&self) -> bool {
            self.paused
        }

        fn force_resume(&mut self) {
            if self.stopped {
                return;
            }
            if let Err(e) = self.restart_at_position() {
                log::warn!("{:#}", e);
            }
            if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
                log::warn!("Failed to resume video: {}", e);
            }
            self.paused = false;
        }

        fn current_frame(&self) -> Option<Frame> {
            self.latest.lock().ok()?.clone()
        }

        fn service(&mut self) -> Result<()> {
            let Some(bus) = self.pipeline.bus() else {
                return Ok(());
            };

            while let Some(msg) = bus.pop() {
                match msg.view() {
                    gst::MessageView::Eos(_) => {
                        log::debug!("Video reached EOS, looping");
                        self.pipeline
                            .seek_simple(
                                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                                gst::ClockTime::ZERO,
                            )
                            .context("Failed to loop video")?;
                    }
                    gst::MessageView::Error(err) => {
                        anyhow::bail!(
                            "GStreamer error: {} (debug: {:?})",
                            err.error(),
                            err.debug()
                        );
                    }
                    _ => {}
                }
            }
            Ok(())
        }

        fn stop(&mut self) {
            if self.stopped {
                return;
            }
            self.stopped = true;
            if let Err(e) = self.pipeline.set_state(gst::State::Null) {
                log::warn!("Failed to stop video pipeline: {}", e);
            }
        }
    }

    impl Drop for VideoPlayback {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(not(feature = "video"))]
mod disabled {
    use anyhow::Result;
    use std::path::Path;

    use crate::animation::FrameNotifier;
    use crate::playback::{Frame, Playback};

    /// Stand-in used when the daemon is built without GStreamer.
    pub struct VideoPlayback;

    impl VideoPlayback {
        pub fn open(path: &Path, _paused: bool, _notify: FrameNotifier) -> Result<Self> {
            anyhow::bail!(
                "Cannot play {}: built without the `video` feature",
                path.display()
            )
        }
    }

    impl Playback for VideoPlayback {
        fn set_paused(&mut self, _paused: bool) {}

        fn is_paused(&self) -> bool {
            true
        }

        fn force_resume(&mut self) {}

        fn current_frame(&self) -> Option<Frame> {
            None
        }

        fn stop(&mut self) {}
    }
}
