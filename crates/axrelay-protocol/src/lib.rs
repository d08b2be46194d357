//! Wire protocol shared by the axrelay server, its clients, and the engine.
//!
//! Messages travel as msgpack payloads inside length-prefixed frames. Inbound
//! traffic is modelled by [`ClientMsg`], outbound traffic by [`ServerMsg`].
//! The [`ipc::codec`] module owns the byte-level encoding and the tolerant
//! inbound decoder.

use serde::{Deserialize, Serialize};

pub mod rpc;

pub use rpc::QueryKind;

/// Identity and descriptive attributes of a running application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    /// Bundle identifier, when the platform reports one.
    pub bundle_id: Option<String>,
    /// Localized application name, when available.
    pub name: Option<String>,
    /// Process identifier of the application.
    pub pid: i32,
    /// False while the application is still launching.
    pub is_finished_launching: bool,
}

impl AppInfo {
    /// True when either the name or the bundle id equals `ident`.
    pub fn matches(&self, ident: &str) -> bool {
        self.name.as_deref() == Some(ident) || self.bundle_id.as_deref() == Some(ident)
    }
}

/// Application focus transition: the app that lost focus and the one that gained it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppFocusState {
    /// Application that was focused before the most recent change.
    pub previous_app: Option<AppInfo>,
    /// Currently focused application.
    pub current_app: Option<AppInfo>,
}

/// Focus status of the editor application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FocusStatus {
    /// Currently tracked application, if any.
    pub app: Option<AppInfo>,
    /// True when the tracked application is one of the configured editors.
    pub editor_focused: bool,
}

/// Accessibility notification kinds watched on UI elements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationKind {
    /// A window was created by the application.
    WindowCreated,
    /// The application's main window changed.
    MainWindowChanged,
    /// The element moved on screen.
    Moved,
    /// The application's focused window changed.
    FocusedWindowChanged,
    /// The element was destroyed.
    ElementDestroyed,
}

impl NotificationKind {
    /// Platform notification name for this kind.
    pub fn ax_name(self) -> &'static str {
        match self {
            Self::WindowCreated => "AXWindowCreated",
            Self::MainWindowChanged => "AXMainWindowChanged",
            Self::Moved => "AXMoved",
            Self::FocusedWindowChanged => "AXFocusedWindowChanged",
            Self::ElementDestroyed => "AXUIElementDestroyed",
        }
    }
}

/// A single accessibility notification, forwarded to clients as it arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Which notification fired.
    pub kind: NotificationKind,
    /// Owning process of the element.
    pub pid: i32,
    /// Opaque element identifier, stable while the element is observed.
    pub element: u64,
    /// Accessibility role of the element, when known.
    pub role: Option<String>,
    /// Title of the element, when known.
    pub title: Option<String>,
}

/// Register the sending session under a client identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connect {
    /// Client identifier chosen by the peer.
    pub client: String,
}

/// Ask the server for a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    /// The snapshot being requested.
    #[serde(rename = "type")]
    pub kind: QueryKind,
}

/// Push new editor content to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentUpdate {
    /// Opaque editor content.
    pub content: String,
}

/// Messages sent from clients to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientMsg {
    /// Bind this session to a client id.
    Connect(Connect),
    /// Snapshot request; answered to the sender only.
    Request(Request),
    /// Editor content update; never answered.
    ContentUpdate(ContentUpdate),
}

/// Replies to [`ClientMsg::Request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Response {
    /// Current editor content, if any has been pushed.
    EditorContent {
        /// Opaque content blob.
        content: Option<String>,
    },
    /// Editor focus status.
    FocusStatus(FocusStatus),
    /// Application focus state.
    AppFocusState(AppFocusState),
}

/// Unsolicited state changes broadcast to every registered client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// The focused application changed.
    AppFocusChanged(AppFocusState),
    /// An accessibility notification fired on an observed element.
    Notification(NotificationEvent),
    /// A burst of notifications delivered together has ended.
    BoundaryClosed {
        /// Monotonic boundary sequence number.
        seq: u64,
    },
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerMsg {
    /// Reply to a request from this client.
    Response(Response),
    /// Broadcast state change.
    Event(Event),
    /// Forwarded server log line.
    Log {
        /// Severity level.
        level: String,
        /// Event target (module path).
        target: String,
        /// Rendered message.
        message: String,
    },
    /// Liveness signal carrying wall-clock milliseconds since the Unix epoch.
    Heartbeat(u64),
}

/// Channel aliases and the frame codec.
pub mod ipc {
    use super::ServerMsg;

    /// Tokio unbounded sender for outbound messages.
    pub type ServerTx = tokio::sync::mpsc::UnboundedSender<ServerMsg>;
    /// Tokio unbounded receiver for outbound messages.
    pub type ServerRx = tokio::sync::mpsc::UnboundedReceiver<ServerMsg>;

    /// Create a standard unbounded outbound channel (sender, receiver).
    pub fn server_channel() -> (ServerTx, ServerRx) {
        tokio::sync::mpsc::unbounded_channel::<ServerMsg>()
    }

    /// Frame payload encoding and decoding.
    pub mod codec;
}
