//! Inbound message routing.
//!
//! Every frame read from a session passes through [`MessageRouter::route`]:
//! - `Connect` binds the client id to the sending session,
//! - `Request` is answered on the sending session only,
//! - `ContentUpdate` is handed to the content model and never answered.
//!
//! Frames that do not decode are dropped without a reply, and the session
//! stays open.

use async_trait::async_trait;
use axrelay_engine::EngineHandle;
use axrelay_protocol::{ClientMsg, QueryKind, Response, ServerMsg, ipc::codec};
use tracing::{debug, trace};

use crate::registry::{BroadcastReport, ClientRegistry, Transport};

/// Answers snapshot queries and accepts content updates.
#[async_trait]
pub trait QueryService {
    /// Produce the reply for `kind`, or `None` when there is nothing to say.
    async fn query(&self, kind: QueryKind) -> Option<Response>;

    /// Store new editor content.
    fn update_content(&self, content: String);
}

#[async_trait]
impl QueryService for EngineHandle {
    async fn query(&self, kind: QueryKind) -> Option<Response> {
        Self::query(self, kind).await
    }

    fn update_content(&self, content: String) {
        if !Self::update_content(self, content) {
            debug!("content update dropped: engine stopped");
        }
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The sender was registered under a client id.
    Registered {
        /// True when the id was previously bound to another transport.
        replaced: bool,
    },
    /// A response was sent to the sender.
    Replied,
    /// The request named an unknown query and was ignored.
    Unanswered,
    /// Content was handed to the content model.
    ContentForwarded,
    /// The frame did not decode and was dropped.
    Dropped,
}

/// Dispatches inbound frames and owns the client registry.
pub struct MessageRouter<Q, T> {
    /// Registered clients.
    registry: ClientRegistry<T>,
    /// Snapshot and content backend.
    service: Q,
}

impl<Q, T> MessageRouter<Q, T>
where
    Q: QueryService,
    T: Transport + Clone,
{
    /// Create a router with an empty registry.
    pub fn new(service: Q) -> Self {
        Self {
            registry: ClientRegistry::new(),
            service,
        }
    }

    /// Decode and dispatch one frame received from `origin`.
    pub async fn route(&mut self, origin: &T, frame: &[u8]) -> RouteOutcome {
        let Some(msg) = codec::decode_client(frame) else {
            trace!(len = frame.len(), "undecodable frame dropped");
            return RouteOutcome::Dropped;
        };
        self.dispatch(origin, msg).await
    }

    /// Dispatch an already decoded message from `origin`.
    pub async fn dispatch(&mut self, origin: &T, msg: ClientMsg) -> RouteOutcome {
        match msg {
            ClientMsg::Connect(connect) => {
                let replaced = self
                    .registry
                    .register(connect.client, origin.clone())
                    .is_some();
                RouteOutcome::Registered { replaced }
            }
            ClientMsg::Request(req) => {
                if let QueryKind::Unknown(name) = &req.kind {
                    debug!(query = %name, "unknown request ignored");
                    return RouteOutcome::Unanswered;
                }
                let Some(resp) = self.service.query(req.kind).await else {
                    return RouteOutcome::Unanswered;
                };
                if let Err(err) = origin.deliver(&ServerMsg::Response(resp)) {
                    debug!(error = %err, "reply not delivered");
                }
                RouteOutcome::Replied
            }
            ClientMsg::ContentUpdate(update) => {
                self.service.update_content(update.content);
                RouteOutcome::ContentForwarded
            }
        }
    }

    /// Deliver `msg` to every registered client.
    pub fn broadcast(&self, msg: &ServerMsg) -> BroadcastReport {
        self.registry.broadcast(msg)
    }

    /// The client registry.
    pub fn registry(&self) -> &ClientRegistry<T> {
        &self.registry
    }

    /// Mutable access to the client registry.
    pub fn registry_mut(&mut self) -> &mut ClientRegistry<T> {
        &mut self.registry
    }
}
