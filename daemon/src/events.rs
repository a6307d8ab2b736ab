//! The single ordered queue feeding the control thread.

use common::Command;
use tokio::sync::mpsc;

use crate::display::DisplayId;

/// Everything the control thread reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// A decoded client command.
    Command(Command),
    /// Termination signal received.
    Shutdown(&'static str),
    /// Periodic visibility safety net.
    VisibilityPoll,
    DisplaysChanged,
    WorkspaceSwitched,
    ForegroundChanged,
    WillSleep,
    DidWake,
    /// A playback bound to this display has a new current frame.
    FrameReady(DisplayId),
}

pub type EventSender = mpsc::UnboundedSender<ControlEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ControlEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
