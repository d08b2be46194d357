//! Client registry.
//!
//! Maps client identifiers to the transport of the session that registered
//! them. Registration is last-write-wins: a second `Connect` with the same id
//! rebinds it to the newer session. The displaced transport is simply dropped
//! from the map; anything already queued on it still flushes, but it gets no
//! further broadcasts.

use std::{collections::HashMap, fmt};

use axrelay_protocol::{ServerMsg, ipc::ServerTx};
use thiserror::Error;
use tracing::{debug, warn};

/// Identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Failure to hand a message to a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session's writer has gone away.
    #[error("session closed")]
    Closed,
}

/// Something messages can be delivered to.
pub trait Transport {
    /// Queue `msg` for delivery.
    fn deliver(&self, msg: &ServerMsg) -> Result<(), DeliveryError>;
}

/// Outbound side of one socket session.
#[derive(Debug, Clone)]
pub struct SessionTx {
    /// Owning session.
    session: SessionId,
    /// Writer task queue.
    tx: ServerTx,
}

impl SessionTx {
    /// Wrap the writer queue of `session`.
    pub fn new(session: SessionId, tx: ServerTx) -> Self {
        Self { session, tx }
    }

    /// Owning session.
    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Transport for SessionTx {
    fn deliver(&self, msg: &ServerMsg) -> Result<(), DeliveryError> {
        self.tx.send(msg.clone()).map_err(|_| DeliveryError::Closed)
    }
}

/// Counts from one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was queued for.
    pub delivered: usize,
    /// Clients whose transport refused the message.
    pub failed: usize,
}

/// Registered clients by id.
#[derive(Debug)]
pub struct ClientRegistry<T> {
    /// Transport per client id.
    clients: HashMap<String, T>,
}

impl<T> Default for ClientRegistry<T> {
    fn default() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }
}

impl<T: Transport> ClientRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client` to `transport`, replacing any earlier binding. Returns
    /// the displaced transport.
    pub fn register(&mut self, client: String, transport: T) -> Option<T> {
        let old = self.clients.insert(client.clone(), transport);
        if old.is_some() {
            debug!(client = %client, "client id rebound to a newer session");
        } else {
            debug!(client = %client, "client registered");
        }
        old
    }

    /// Remove `client`. Returns its transport if it was registered.
    pub fn unregister(&mut self, client: &str) -> Option<T> {
        self.clients.remove(client)
    }

    /// Remove every client whose transport matches `pred`. Returns the
    /// removed ids.
    pub fn unregister_where<F>(&mut self, pred: F) -> Vec<String>
    where
        F: Fn(&T) -> bool,
    {
        let ids: Vec<String> = self
            .clients
            .iter()
            .filter(|(_, t)| pred(t))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.unregister(id);
        }
        ids
    }

    /// Transport bound to `client`.
    pub fn lookup(&self, client: &str) -> Option<&T> {
        self.clients.get(client)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True when no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Deliver `msg` to every registered client. Failures are logged and the
    /// client stays registered.
    pub fn broadcast(&self, msg: &ServerMsg) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (client, transport) in &self.clients {
            match transport.deliver(msg) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(client = %client, error = %err, "broadcast delivery failed");
                }
            }
        }
        report
    }
}
