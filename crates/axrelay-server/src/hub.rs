//! The hub: single owner of the router and the client registry.
//!
//! Session tasks only move bytes. Every decoded-or-not frame, every session
//! close, every engine event, forwarded log line, and heartbeat passes through
//! [`Hub::run`], so registry mutations and broadcasts are strictly ordered.

use std::{
    future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axrelay_protocol::{Event, ServerMsg};
use bytes::Bytes;
use tokio::{
    sync::mpsc::{Receiver, UnboundedReceiver, UnboundedSender},
    time::{self, Interval, MissedTickBehavior},
};
use tracing::{debug, trace};

use crate::{
    registry::{SessionId, SessionTx},
    router::{MessageRouter, QueryService, RouteOutcome},
};

/// Messages from session tasks to the hub.
#[derive(Debug)]
pub enum HubMsg {
    /// A frame arrived on a session.
    Frame {
        /// Outbound side of the session the frame came from.
        origin: SessionTx,
        /// Raw frame payload.
        payload: Bytes,
    },
    /// A session ended.
    Closed {
        /// The session that ended.
        session: SessionId,
    },
}

/// Sender used by session tasks.
pub type HubTx = UnboundedSender<HubMsg>;

/// Routes frames and fans engine output out to registered clients.
pub struct Hub<Q> {
    /// Router and registry.
    router: MessageRouter<Q, SessionTx>,
    /// Session traffic.
    inbox: UnboundedReceiver<HubMsg>,
    /// Engine events.
    events: UnboundedReceiver<Event>,
    /// Forwarded log lines, when enabled.
    logs: Option<Receiver<ServerMsg>>,
    /// Heartbeat interval, when enabled.
    heartbeat: Option<Duration>,
}

impl<Q: QueryService> Hub<Q> {
    /// Create a hub answering queries with `service`.
    pub fn new(
        service: Q,
        inbox: UnboundedReceiver<HubMsg>,
        events: UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            router: MessageRouter::new(service),
            inbox,
            events,
            logs: None,
            heartbeat: None,
        }
    }

    /// Broadcast log lines received on `logs`.
    pub fn with_logs(mut self, logs: Option<Receiver<ServerMsg>>) -> Self {
        self.logs = logs;
        self
    }

    /// Broadcast a heartbeat every `interval`.
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Run until the engine's event stream closes.
    pub async fn run(mut self) {
        let mut heartbeat = self.heartbeat.map(|period| {
            let mut iv = time::interval(period);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });
        loop {
            tokio::select! {
                biased;
                msg = self.inbox.recv() => {
                    let Some(msg) = msg else { break };
                    self.on_session_msg(msg).await;
                }
                ev = self.events.recv() => {
                    let Some(ev) = ev else {
                        debug!("engine event stream closed");
                        break;
                    };
                    self.router.broadcast(&ServerMsg::Event(ev));
                }
                Some(line) = next_log(&mut self.logs) => {
                    self.router.broadcast(&line);
                }
                () = next_tick(&mut heartbeat) => {
                    self.router.broadcast(&ServerMsg::Heartbeat(now_millis()));
                }
            }
        }
    }

    /// Handle traffic from a session task.
    async fn on_session_msg(&mut self, msg: HubMsg) {
        match msg {
            HubMsg::Frame { origin, payload } => {
                let session = origin.session();
                let outcome = self.router.route(&origin, &payload).await;
                trace!(%session, ?outcome, "frame routed");
                if outcome == (RouteOutcome::Registered { replaced: true }) {
                    debug!(%session, "session took over an existing client id");
                }
            }
            HubMsg::Closed { session } => {
                let removed = self
                    .router
                    .registry_mut()
                    .unregister_where(|t| t.session() == session);
                debug!(%session, ?removed, "session closed");
            }
        }
    }
}

/// Next forwarded log line; pending forever when forwarding is off.
async fn next_log(logs: &mut Option<Receiver<ServerMsg>>) -> Option<ServerMsg> {
    match logs {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// Next heartbeat tick; pending forever when heartbeats are off.
async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(iv) => {
            iv.tick().await;
        }
        None => future::pending().await,
    }
}

/// Wall-clock milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
