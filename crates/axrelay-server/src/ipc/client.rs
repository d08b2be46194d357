//! Client side of the socket protocol.

use axrelay_protocol::{
    ClientMsg, Connect, QueryKind, Request, Response, ServerMsg,
    ipc::codec::{decode_server, encode_client},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, trace};

use super::frame_codec;
use crate::{Error, Result};

/// Active connection to an axrelay server.
pub struct Connection {
    /// Framed socket.
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl Connection {
    /// Connect to the server listening on `socket_path`.
    pub async fn connect(socket_path: &str) -> Result<Self> {
        debug!("Connecting to axrelay server at: {}", socket_path);
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| Error::Ipc(format!("Failed to connect: {}", e)))?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
        })
    }

    /// Send a tagged message.
    pub async fn send(&mut self, msg: &ClientMsg) -> Result<()> {
        let bytes = encode_client(msg)?;
        self.send_raw(bytes).await
    }

    /// Send an arbitrary payload as one frame.
    pub async fn send_raw(&mut self, payload: Vec<u8>) -> Result<()> {
        self.framed
            .send(Bytes::from(payload))
            .await
            .map_err(|e| Error::Ipc(format!("send failed: {}", e)))
    }

    /// Register under `client`.
    pub async fn register(&mut self, client: &str) -> Result<()> {
        self.send(&ClientMsg::Connect(Connect {
            client: client.to_string(),
        }))
        .await
    }

    /// Receive the next message. Returns `None` when the server closed the
    /// connection.
    pub async fn recv(&mut self) -> Result<Option<ServerMsg>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(Error::Ipc(format!("receive failed: {}", e))),
            Some(Ok(frame)) => Ok(Some(decode_server(&frame)?)),
        }
    }

    /// Send a request and wait for its response, skipping broadcast traffic.
    pub async fn request(&mut self, kind: QueryKind) -> Result<Response> {
        self.send(&ClientMsg::Request(Request { kind })).await?;
        loop {
            match self.recv().await? {
                Some(ServerMsg::Response(resp)) => return Ok(resp),
                Some(other) => trace!(?other, "skipping while awaiting response"),
                None => {
                    return Err(Error::Ipc(
                        "connection closed before a response arrived".into(),
                    ));
                }
            }
        }
    }
}
