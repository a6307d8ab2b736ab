//! Frame-sequence playback.
//!
//! - [`frames`]: eager decoding into an immutable [`FrameTable`]
//! - [`timeline`]: the pure per-tick timing state machine
//! - [`player`]: a timer thread driving one timeline

pub mod frames;
pub mod player;
pub mod timeline;

pub use frames::{FrameError, FrameTable};
pub use player::{AnimationPlayer, FrameNotifier};
pub use timeline::AnimationTimeline;
