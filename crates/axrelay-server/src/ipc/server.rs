//! IPC listener and session tasks.

use std::{
    fs,
    io::{self, ErrorKind},
    os::unix::fs::{FileTypeExt as _, MetadataExt as _, PermissionsExt as _},
    path::Path,
};

use axrelay_protocol::ipc::{codec, server_channel};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use super::frame_codec;
use crate::{
    Error, Result,
    hub::{HubMsg, HubTx},
    registry::{SessionId, SessionTx},
};

/// Bound listener. Dropping it removes the socket file.
pub(crate) struct IpcServer {
    /// Path the listener is bound to.
    socket_path: String,
    /// The listener.
    listener: UnixListener,
    /// Next session id to hand out.
    next_session: u64,
}

impl IpcServer {
    /// Prepare the socket directory, clear a stale socket, and bind.
    pub(crate) fn bind(socket_path: &str) -> Result<Self> {
        trace!("Binding IPC socket: {}", socket_path);

        // Parent directory is created user-only (0700).
        if let Some(parent) = Path::new(socket_path).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
            let mut perms = fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            if let Err(e) = fs::set_permissions(parent, perms) {
                debug!("could not restrict {}: {}", parent.display(), e);
            }
        }

        // Only ever unlink a socket we own; never a regular file or symlink.
        validate_or_unlink_existing_socket(socket_path)?;

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| Error::Ipc(format!("Failed to bind to socket: {}", e)))?;
        Ok(Self {
            socket_path: socket_path.to_string(),
            listener,
            next_session: 1,
        })
    }

    /// Accept connections forever, spawning one task per session.
    pub(crate) async fn run(mut self, hub: HubTx) -> Result<()> {
        debug!("listening on {}", self.socket_path);
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let session = SessionId(self.next_session);
                    self.next_session += 1;
                    tokio::spawn(run_session(stream, session, hub.clone()));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = validate_or_unlink_existing_socket(&self.socket_path) {
            debug!("socket cleanup skipped: {}", e);
        }
    }
}

/// Move bytes between one socket and the hub until the peer goes away.
///
/// A framing error (oversized or truncated frame) ends this session only.
async fn run_session(stream: UnixStream, session: SessionId, hub: HubTx) {
    debug!(%session, "session opened");
    let (rd, wr) = stream.into_split();
    let mut frames = FramedRead::new(rd, frame_codec());
    let mut sink = FramedWrite::new(wr, frame_codec());
    let (tx, mut rx) = server_channel();
    let origin = SessionTx::new(session, tx);

    let reader = async move {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(payload) => {
                    let msg = HubMsg::Frame {
                        origin: origin.clone(),
                        payload: payload.freeze(),
                    };
                    if hub.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%session, error = %err, "framing error, closing session");
                    break;
                }
            }
        }
        if hub.send(HubMsg::Closed { session }).is_err() {
            trace!(%session, "hub gone before close");
        }
    };

    // Ends once every sender for this session is gone and the queue drained.
    let writer = async move {
        while let Some(msg) = rx.recv().await {
            let payload = match codec::encode_server(&msg) {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => {
                    warn!(%session, error = %err, "failed to encode outbound message");
                    continue;
                }
            };
            if let Err(err) = sink.send(payload).await {
                debug!(%session, error = %err, "write failed");
                break;
            }
        }
    };

    tokio::join!(reader, writer);
    debug!(%session, "session ended");
}

/// Validate that an existing path is a Unix domain socket owned by the current
/// user. If so, unlink it to make room for a new bind. If the path does not
/// exist, this is a no-op. If the path exists but is not a socket (or is not
/// owned by us), return an error and do not unlink.
pub(crate) fn validate_or_unlink_existing_socket(path: &str) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Ipc(format!(
            "Failed to lstat existing path '{}': {}",
            path, e
        ))),
        Ok(meta) => {
            let ft = meta.file_type();
            if !ft.is_socket() {
                return Err(Error::Ipc(format!(
                    "Refusing to remove non-socket at '{}': {:?}",
                    path, ft
                )));
            }
            let uid = crate::current_uid();
            if meta.uid() != uid {
                return Err(Error::Ipc(format!(
                    "Socket at '{}' not owned by current user (uid {} != {})",
                    path,
                    meta.uid(),
                    uid
                )));
            }
            fs::remove_file(path).map_err(|e| {
                Error::Ipc(format!(
                    "Failed to remove pre-existing socket '{}': {}",
                    path, e
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, os::unix::net::UnixListener as StdUnixListener, path::PathBuf, process};

    use super::*;

    fn tmpdir(tag: &str) -> PathBuf {
        let mut p = env::temp_dir();
        p.push(format!(
            "axrelay-test-{}-{}-{}",
            crate::current_uid(),
            process::id(),
            tag
        ));
        fs::create_dir_all(&p).expect("tmpdir");
        p
    }

    #[test]
    fn guard_allows_absent_path() {
        let d = tmpdir("absent");
        let sock = d.join("nope.sock");
        assert!(validate_or_unlink_existing_socket(sock.to_str().expect("utf8")).is_ok());
        assert!(!sock.exists());
    }

    #[test]
    fn guard_refuses_regular_file() {
        let d = tmpdir("regular");
        let p = d.join("regular.txt");
        fs::write(&p, b"hi").expect("write");
        assert!(validate_or_unlink_existing_socket(p.to_str().expect("utf8")).is_err());
        // Must not delete arbitrary files
        assert!(p.exists());
    }

    #[test]
    fn guard_refuses_symlink() {
        use std::os::unix::fs::symlink;
        let d = tmpdir("symlink");
        let target = d.join("target.txt");
        fs::write(&target, b"hi").expect("write");
        let link = d.join("link.sock");
        if link.exists() {
            fs::remove_file(&link).expect("stale link");
        }
        symlink(&target, &link).expect("symlink");
        assert!(validate_or_unlink_existing_socket(link.to_str().expect("utf8")).is_err());
        assert!(link.exists());
    }

    #[test]
    fn guard_unlinks_owned_socket() {
        let d = tmpdir("owned");
        let sock = d.join("owned.sock");
        if sock.exists() {
            fs::remove_file(&sock).expect("stale socket");
        }
        let _listener = StdUnixListener::bind(&sock).expect("bind");
        validate_or_unlink_existing_socket(sock.to_str().expect("utf8")).expect("unlink");
        assert!(!sock.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bind_creates_private_parent_and_cleans_up() {
        let d = tmpdir("bind").join("nested");
        let sock = d.join("relay.sock");
        let path = sock.to_str().expect("utf8").to_string();
        let server = IpcServer::bind(&path).expect("bind");
        let mode = fs::metadata(&d).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert!(sock.exists());
        drop(server);
        assert!(!sock.exists());
    }
}
