//! Socket server for axrelay.
//!
//! This crate hosts the [`axrelay_engine`] loop behind a Unix-domain socket and
//! relays its output to any number of clients.
//!
//! Public API
//! - [`Server`]: binds the socket and runs the engine, hub, and listener on
//!   one current-thread runtime.
//! - [`Connection`]: client side of the protocol, used by `axrelay query`.
//! - [`ServerConfig`]: RON-backed settings.
//! - [`ClientRegistry`] and [`MessageRouter`]: the client table and the inbound
//!   dispatcher, usable with any [`Transport`] / [`QueryService`].
//!
//! Connection lifecycle
//! - Socket path: `$AXRELAY_SOCKET`, else a per-user runtime directory (see
//!   [`default_socket_path`]). The directory is created with mode 0700, and an
//!   existing path is only replaced if it is a socket owned by this user.
//! - A peer sends `Connect` to bind a client id to its session; later `Connect`
//!   frames with the same id rebind it (last write wins). When a session ends,
//!   ids still bound to it are released.
//! - Requests are answered on the requesting session only. Engine events,
//!   forwarded logs, and heartbeats are broadcast to every registered client.
//! - Undecodable frames are dropped silently; oversized frames end the
//!   offending session only.
#![warn(missing_docs)]

use std::{env, path::PathBuf};

mod config;
mod error;
mod hub;
mod ipc;
mod registry;
mod router;
mod server;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use hub::{Hub, HubMsg, HubTx};
pub use ipc::Connection;
pub use registry::{
    BroadcastReport, ClientRegistry, DeliveryError, SessionId, SessionTx, Transport,
};
pub use router::{MessageRouter, QueryService, RouteOutcome};
pub use server::Server;

/// Environment variable overriding the default socket path.
pub const SOCKET_ENV: &str = "AXRELAY_SOCKET";

/// Real user id of this process.
pub(crate) fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Return the per-user runtime directory used for IPC socket files.
///
/// Preference order:
/// - `$XDG_RUNTIME_DIR/axrelay`
/// - `~/Library/Caches/axrelay/run` (macOS user cache)
fn socket_runtime_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_RUNTIME_DIR")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("axrelay");
    }
    let home = env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join("Library/Caches/axrelay/run")
}

/// Default socket path: `$AXRELAY_SOCKET` when set, otherwise
/// `axrelay-<uid>.sock` in the per-user runtime directory.
pub fn default_socket_path() -> String {
    if let Ok(path) = env::var(SOCKET_ENV)
        && !path.is_empty()
    {
        return path;
    }
    socket_runtime_dir()
        .join(format!("axrelay-{}.sock", current_uid()))
        .to_string_lossy()
        .to_string()
}
