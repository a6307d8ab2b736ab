use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, Delay, DynamicImage, Frames, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Used when a frame declares no usable delay.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);
/// Delays below this are encoder artifacts and get [`DEFAULT_FRAME_DELAY`].
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },

    #[error("{0} contains no frames")]
    Empty(String),

    #[error("unsupported animation format: {0}")]
    Unsupported(String),
}

/// Resolve the display duration of one frame.
///
/// The unclamped delay wins when positive, then the standard delay, then
/// [`DEFAULT_FRAME_DELAY`]. Anything under [`MIN_FRAME_DELAY`] becomes the
/// default.
pub fn resolve_delay(unclamped: Option<Duration>, standard: Option<Duration>) -> Duration {
    let declared = unclamped
        .filter(|d| !d.is_zero())
        .or_else(|| standard.filter(|d| !d.is_zero()))
        .unwrap_or(DEFAULT_FRAME_DELAY);

    if declared < MIN_FRAME_DELAY {
        DEFAULT_FRAME_DELAY
    } else {
        declared
    }
}

fn delay_to_duration(delay: Delay) -> Duration {
    let (numer, denom) = delay.numer_denom_ms();
    if denom == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(u64::from(numer) * 1000 / u64::from(denom))
}

pub struct AnimationFrame {
    pub image: Arc<RgbaImage>,
    pub duration: Duration,
}

/// Decoded frames of one animation loop. Never empty.
pub struct FrameTable {
    frames: Vec<AnimationFrame>,
    total: Duration,
}

impl FrameTable {
    pub fn new(frames: Vec<AnimationFrame>) -> Result<Self, FrameError> {
        if frames.is_empty() {
            return Err(FrameError::Empty("animation".to_string()));
        }
        let total = frames.iter().map(|f| f.duration).sum();
        Ok(Self { frames, total })
    }

    /// Decode every frame of a GIF, APNG/PNG or WebP file.
    pub fn decode(path: &Path) -> Result<Self, FrameError> {
        let display = path.display().to_string();
        let open = || {
            File::open(path)
                .map(BufReader::new)
                .map_err(|source| FrameError::Open {
                    path: display.clone(),
                    source,
                })
        };
        let decode_err = |source| FrameError::Decode {
            path: display.clone(),
            source,
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let frames = match ext.as_str() {
            "gif" => {
                let decoder = GifDecoder::new(open()?).map_err(decode_err)?;
                collect_frames(decoder.into_frames()).map_err(decode_err)?
            }
            "png" | "apng" => {
                let decoder = PngDecoder::new(open()?).map_err(decode_err)?;
                if decoder.is_apng().map_err(decode_err)? {
                    let apng = decoder.apng().map_err(decode_err)?;
                    collect_frames(apng.into_frames()).map_err(decode_err)?
                } else {
                    still_frame(DynamicImage::from_decoder(decoder).map_err(decode_err)?)
                }
            }
            "webp" => {
                let decoder = WebPDecoder::new(open()?).map_err(decode_err)?;
                if decoder.has_animation() {
                    collect_frames(decoder.into_frames()).map_err(decode_err)?
                } else {
                    still_frame(DynamicImage::from_decoder(decoder).map_err(decode_err)?)
                }
            }
            _ => return Err(FrameError::Unsupported(display)),
        };

        if frames.is_empty() {
            return Err(FrameError::Empty(display));
        }

        let table = Self::new(frames)?;
        log::info!(
            "Decoded {} frame(s) from {} ({:.2}s per loop)",
            table.len(),
            display,
            table.total_duration().as_secs_f64()
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration(&self, index: usize) -> Duration {
        self.frames[index % self.frames.len()].duration
    }

    pub fn image(&self, index: usize) -> &Arc<RgbaImage> {
        &self.frames[index % self.frames.len()].image
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.frames.iter().map(|f| f.duration).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }
}

fn collect_frames(frames: Frames<'_>) -> image::ImageResult<Vec<AnimationFrame>> {
    frames
        .map(|frame| {
            let frame = frame?;
            // The container delay is the raw, unclamped value.
            let duration = resolve_delay(Some(delay_to_duration(frame.delay())), None);
            Ok(AnimationFrame {
                image: Arc::new(frame.into_buffer()),
                duration,
            })
        })
        .collect()
}

fn still_frame(image: DynamicImage) -> Vec<AnimationFrame> {
    vec![AnimationFrame {
        image: Arc::new(image.to_rgba8()),
        duration: DEFAULT_FRAME_DELAY,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, Rgba};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn table(durations: &[u64]) -> FrameTable {
        let frames = durations
            .iter()
            .map(|d| AnimationFrame {
                image: Arc::new(RgbaImage::new(1, 1)),
                duration: ms(*d),
            })
            .collect();
        FrameTable::new(frames).unwrap()
    }

    #[test]
    fn test_resolve_delay_preference() {
        assert_eq!(resolve_delay(Some(ms(40)), Some(ms(70))), ms(40));
        assert_eq!(resolve_delay(Some(ms(0)), Some(ms(70))), ms(70));
        assert_eq!(resolve_delay(None, Some(ms(70))), ms(70));
        assert_eq!(resolve_delay(None, None), DEFAULT_FRAME_DELAY);
        assert_eq!(resolve_delay(Some(ms(0)), Some(ms(0))), DEFAULT_FRAME_DELAY);
    }

    #[test]
    fn test_resolve_delay_clamps_tiny_values() {
        assert_eq!(resolve_delay(Some(ms(5)), None), ms(100));
        assert_eq!(resolve_delay(None, Some(ms(9))), ms(100));
        assert_eq!(resolve_delay(Some(ms(10)), None), ms(10));
        assert!(resolve_delay(Some(Duration::from_micros(1)), None) >= ms(10));
    }

    #[test]
    fn test_total_is_sum_of_durations() {
        let t = table(&[30, 70, 100, 250]);
        assert_eq!(t.len(), 4);
        assert_eq!(t.total_duration(), ms(450));
        assert_eq!(t.durations().iter().sum::<Duration>(), t.total_duration());
    }

    #[test]
    fn test_empty_table_is_rejected() {
        assert!(matches!(
            FrameTable::new(Vec::new()),
            Err(FrameError::Empty(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            FrameTable::decode(Path::new("/tmp/clip.mp4")),
            Err(FrameError::Unsupported(_))
        ));
    }

    #[test]
    fn test_decode_gif_with_zero_delays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.gif");

        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            for shade in [0u8, 128, 255] {
                let image = RgbaImage::from_pixel(4, 4, Rgba([shade, shade, shade, 255]));
                let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(0, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }

        let table = FrameTable::decode(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.durations().iter().all(|d| *d == DEFAULT_FRAME_DELAY));
        assert_eq!(table.total_duration(), ms(300));
        assert_eq!(table.image(0).dimensions(), (4, 4));
    }
}
