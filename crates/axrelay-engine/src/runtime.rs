//! Engine command queue.
//!
//! Everything that mutates engine state arrives as a [`Command`] on one
//! unbounded queue and is processed on the engine task in arrival order. OS
//! callbacks, boundary closes, client queries, and content updates all share
//! this queue, so no state is ever touched from two places at once.

use axrelay_protocol::{QueryKind, Response};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
    oneshot,
};
use tracing::trace;

use crate::source::AxNotification;

/// Work items processed by the engine task.
#[derive(Debug)]
pub(crate) enum Command {
    /// A notification delivered by the accessibility source.
    Notify(AxNotification),
    /// Close the currently open event boundary.
    CloseBoundary,
    /// Answer a snapshot query.
    Query {
        /// Requested snapshot.
        kind: QueryKind,
        /// Reply slot.
        respond: oneshot::Sender<Option<Response>>,
    },
    /// Replace the editor content.
    UpdateContent(String),
    /// Stop the engine loop.
    Shutdown,
}

/// Cloneable handle used to talk to a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    /// Queue sender.
    tx: UnboundedSender<Command>,
}

/// Receiving side of the engine queue, consumed by [`Engine`](crate::Engine).
#[derive(Debug)]
pub struct Inbox {
    /// Queue receiver.
    pub(crate) rx: UnboundedReceiver<Command>,
    /// Weak sender used for work the engine schedules for itself. Weak so that
    /// the queue closes once every external handle is gone.
    pub(crate) own: WeakUnboundedSender<Command>,
}

/// Sender for notifications, handed to an [`AccessibilitySource`](crate::AccessibilitySource).
///
/// `Send + Sync`, so platform callbacks may deliver from any thread.
#[derive(Clone, Debug)]
pub struct NotificationSink {
    /// Queue sender.
    tx: UnboundedSender<Command>,
}

/// Create an engine queue: a handle for producers and the inbox for the engine.
pub fn queue() -> (EngineHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let own = tx.downgrade();
    (EngineHandle { tx }, Inbox { rx, own })
}

impl EngineHandle {
    /// Ask the engine for a snapshot. Returns `None` if the engine is gone or
    /// the query kind has no answer.
    pub async fn query(&self, kind: QueryKind) -> Option<Response> {
        let (respond, rx) = oneshot::channel();
        if self.tx.send(Command::Query { kind, respond }).is_err() {
            trace!("query dropped: engine stopped");
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Queue an editor content update. Returns false if the engine is gone.
    pub fn update_content(&self, content: String) -> bool {
        self.tx.send(Command::UpdateContent(content)).is_ok()
    }

    /// Ask the engine loop to stop after the commands already queued.
    pub fn shutdown(&self) {
        if self.tx.send(Command::Shutdown).is_err() {
            trace!("shutdown ignored: engine already stopped");
        }
    }

    /// Sink for sources to deliver notifications into this engine.
    pub fn notification_sink(&self) -> NotificationSink {
        NotificationSink {
            tx: self.tx.clone(),
        }
    }
}

impl NotificationSink {
    /// Deliver a notification. Returns false if the engine is gone.
    pub fn deliver(&self, notification: AxNotification) -> bool {
        self.tx.send(Command::Notify(notification)).is_ok()
    }
}

impl Inbox {
    /// Post a command the engine scheduled for itself. Returns false when the
    /// queue is closing, in which case the caller handles it inline.
    pub(crate) fn post(&self, cmd: Command) -> bool {
        match self.own.upgrade() {
            Some(tx) => tx.send(cmd).is_ok(),
            None => false,
        }
    }
}
