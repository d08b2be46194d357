//! macOS accessibility source for the axrelay engine.
//!
//! Implements [`axrelay_engine::AccessibilitySource`] on top of the
//! Accessibility API:
//! - focus sampling via the system-wide element's `AXFocusedUIElement`,
//! - one `AXObserver` per observed process, its run-loop source installed on
//!   the engine thread and removed when the last subscription goes,
//! - callbacks translated into engine notifications and delivered through a
//!   [`NotificationSink`](axrelay_engine::NotificationSink).
//!
//! Everything here must be used from a single thread: the one running the
//! engine loop, whose run loop is pumped on every tick.
//!
//! Compiles to an empty crate on other platforms.
#![cfg(target_os = "macos")]

mod elements;
mod error;
mod ffi;
mod observer;
mod source;

pub use error::Error;
pub use source::MacAxSource;

/// Whether this process is trusted for accessibility.
pub fn accessibility_ok() -> bool {
    // SAFETY: no arguments, no preconditions.
    unsafe { ffi::AXIsProcessTrusted() }
}
