//! Custom macros for reducing code repetition in backdropd

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(manager.unassign(&id), "unassign display");
/// log_and_continue!(catalog.persist_settings(settings), "persist settings", warn);
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        $crate::log_and_continue!($expr, $context, error)
    };
    ($expr:expr, $context:expr, $level:ident) => {
        if let Err(e) = $expr {
            log::$level!("Failed to {}: {:#}", $context, e);
        }
    };
}

/// Push an event into the control queue, returning from the enclosing
/// function once the control loop has gone away.
///
/// # Example
/// ```ignore
/// emit_or_return!(events, ControlEvent::DidWake);
/// ```
#[macro_export]
macro_rules! emit_or_return {
    ($events:expr, $event:expr) => {
        if $events.send($event).is_err() {
            log::debug!("Control loop closed, stopping event source");
            return;
        }
    };
    ($events:expr, $event:expr, $ret:expr) => {
        if $events.send($event).is_err() {
            log::debug!("Control loop closed, stopping event source");
            return $ret;
        }
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(backend, "auto", "wayland", "headless");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok::<(), anyhow::Error>(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}
