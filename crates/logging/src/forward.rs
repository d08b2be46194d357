//! Forward tracing events to connected clients.
//!
//! A small tracing [`Layer`] that, while a sink is installed, renders every
//! event and pushes it as `ServerMsg::Log { level, target, message }`. The
//! server installs the sink at startup when log forwarding is enabled and
//! clears it on shutdown.
//!
//! Events from the modules that deliver these lines are never forwarded;
//! a failed delivery would otherwise log, forward, and fail again.
//!
//! The layer no-ops when no sink is set, and never blocks: when the queue is
//! full the line is dropped and counted.

use std::sync::{
    OnceLock,
    atomic::{AtomicU64, Ordering},
};

use axrelay_protocol::ServerMsg;
use parking_lot::Mutex;
use tokio::sync::mpsc::{Sender, error::TrySendError};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::fmt;

/// Target prefixes whose events are never forwarded.
const SUPPRESSED_TARGETS: &[&str] = &[
    "axrelay_server::registry",
    "axrelay_server::hub",
    "axrelay_server::ipc",
    "logging::forward",
];

/// A global sink that, when present, receives forwarded log lines.
static LOG_SINK: OnceLock<Mutex<Option<Sender<ServerMsg>>>> = OnceLock::new();

/// Count of log lines dropped because the queue was full.
static LOG_DROPS: AtomicU64 = AtomicU64::new(0);

/// Access the global sink.
fn sink() -> &'static Mutex<Option<Sender<ServerMsg>>> {
    LOG_SINK.get_or_init(|| Mutex::new(None))
}

/// Install the forwarding sink.
pub fn set_sink(tx: Sender<ServerMsg>) {
    *sink().lock() = Some(tx);
}

/// Remove the forwarding sink.
pub fn clear_sink() {
    *sink().lock() = None;
}

/// Number of lines dropped so far because the queue was full.
pub fn dropped() -> u64 {
    LOG_DROPS.load(Ordering::Relaxed)
}

/// True when events from `target` may be forwarded.
fn forwardable(target: &str) -> bool {
    !SUPPRESSED_TARGETS.iter().any(|p| target.starts_with(p))
}

/// Tracing layer that forwards events when a sink is set.
pub struct ForwardLayer;

impl<S> Layer<S> for ForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !forwardable(event.metadata().target()) {
            return;
        }
        let tx_opt = { sink().lock().clone() };
        let Some(tx) = tx_opt else { return };

        let r = fmt::render_event(event);
        match tx.try_send(ServerMsg::Log {
            level: r.level,
            target: r.target,
            message: r.message,
        }) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => clear_sink(),
            Err(TrySendError::Full(_)) => {
                LOG_DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Create the forwarding layer instance to add to your subscriber.
pub fn layer() -> ForwardLayer {
    ForwardLayer
}
