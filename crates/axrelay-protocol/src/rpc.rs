//! Query kinds accepted in [`crate::Request`] frames.
//!
//! The wire names are fixed by existing clients, so the enum maps them
//! explicitly instead of relying on derived variant names.

use serde::{Deserialize, Serialize};

/// Snapshot queries a client may request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryKind {
    /// Current editor content.
    EditorContent,
    /// Whether an editor application holds focus.
    EditorFocusStatus,
    /// Previous and current focused application.
    AppFocusState,
    /// Any name this server does not know; ignored by the router.
    Unknown(String),
}

impl QueryKind {
    /// Stable wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::EditorContent => "getXCodeEditorContent",
            Self::EditorFocusStatus => "getXCodeFocusStatus",
            Self::AppFocusState => "getAppFocusState",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a wire name; unrecognized names map to [`QueryKind::Unknown`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            "getXCodeEditorContent" => Self::EditorContent,
            "getXCodeFocusStatus" => Self::EditorFocusStatus,
            "getAppFocusState" => Self::AppFocusState,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Parse the short names used on the command line.
    pub fn from_cli(s: &str) -> Option<Self> {
        match s {
            "editor-content" => Some(Self::EditorContent),
            "focus-status" => Some(Self::EditorFocusStatus),
            "app-focus" => Some(Self::AppFocusState),
            _ => None,
        }
    }
}

impl From<String> for QueryKind {
    fn from(s: String) -> Self {
        Self::from_wire(&s)
    }
}

impl From<QueryKind> for String {
    fn from(kind: QueryKind) -> Self {
        kind.as_str().to_string()
    }
}
