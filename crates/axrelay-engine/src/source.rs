//! The seam between the engine and the platform accessibility API.
//!
//! The engine never touches OS handles directly. It sees elements through
//! [`ObservedElement`] values that carry a stable [`ElementId`], and it drives
//! sampling and subscriptions through the [`AccessibilitySource`] trait. OS
//! callbacks are delivered back into the engine through a
//! [`NotificationSink`](crate::NotificationSink) handed to the source when it is
//! constructed.

use axrelay_protocol::{AppInfo, NotificationKind};
use thiserror::Error;

/// Stable identifier for an element while the source keeps it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Coarse classification of an accessibility element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementClass {
    /// An application root element.
    Application,
    /// A top-level window.
    Window,
    /// Anything else (controls, text areas, ...).
    Other,
}

/// An element as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedElement {
    /// Source-assigned identity.
    pub id: ElementId,
    /// Owning process.
    pub pid: i32,
    /// Element classification.
    pub class: ElementClass,
    /// Accessibility role, when the source could read it.
    pub role: Option<String>,
    /// Element title, when the source could read it.
    pub title: Option<String>,
}

/// The application owning the focused element, with its root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedApplication {
    /// Descriptive attributes reported to clients.
    pub info: AppInfo,
    /// Application root element; app-level subscriptions attach here.
    pub root: ObservedElement,
}

impl FocusedApplication {
    /// Process id of the application.
    pub fn pid(&self) -> i32 {
        self.info.pid
    }
}

/// Opaque handle for one active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// A notification delivered by the OS for a subscribed element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxNotification {
    /// The element the notification is about.
    pub element: ObservedElement,
    /// Which notification fired.
    pub kind: NotificationKind,
}

/// Failures reported by an [`AccessibilitySource`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The process is not trusted for accessibility.
    #[error("accessibility permission not granted")]
    PermissionDenied,

    /// Nothing currently holds focus.
    #[error("no focused element")]
    NoFocusedElement,

    /// The owning application of an element could not be resolved.
    #[error("could not resolve application for pid {0}")]
    Resolution(i32),

    /// The element is no longer known to the source.
    #[error("element {0:?} is no longer valid")]
    InvalidElement(ElementId),

    /// The platform call failed with an error code.
    #[error("{op} failed with code {code}")]
    Os {
        /// Name of the failing operation.
        op: &'static str,
        /// Platform error code.
        code: i32,
    },
}

/// Platform accessibility access used by the engine.
///
/// Implementations are driven from the engine thread only and need not be
/// `Send`. Notifications for active subscriptions are delivered through the
/// sink the source was built with, never by calling back into the engine.
pub trait AccessibilitySource {
    /// Return the system-wide focused element.
    fn sample_focused_element(&mut self) -> Result<ObservedElement, SourceError>;

    /// Resolve the application that owns `element`.
    fn resolve_application(
        &mut self,
        element: &ObservedElement,
    ) -> Result<FocusedApplication, SourceError>;

    /// Start delivering `kind` notifications for `element`.
    fn subscribe(
        &mut self,
        element: &ObservedElement,
        kind: NotificationKind,
    ) -> Result<SubscriptionHandle, SourceError>;

    /// Stop delivering notifications for a handle. Unknown handles are ignored.
    fn unsubscribe(&mut self, handle: SubscriptionHandle);

    /// Give the platform a chance to deliver pending callbacks.
    fn pump(&mut self) {}
}
