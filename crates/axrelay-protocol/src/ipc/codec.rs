use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{ClientMsg, Connect, ContentUpdate, Request, ServerMsg};

/// Largest frame payload accepted on either side of the channel.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Errors from encoding/decoding frame payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// Deserialization via rmp_serde failed.
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
    /// Serialization via rmp_serde failed.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Encode a `ServerMsg` into a frame payload.
pub fn encode_server(msg: &ServerMsg) -> Result<Vec<u8>, Error> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decode a frame payload into a `ServerMsg`.
///
/// # Errors
/// Returns an error if the payload is not a valid tagged `ServerMsg`.
pub fn decode_server(bytes: &[u8]) -> Result<ServerMsg, Error> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a `ClientMsg` as a tagged frame payload.
pub fn encode_client(msg: &ClientMsg) -> Result<Vec<u8>, Error> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decode an inbound frame payload.
///
/// Tagged frames (`{"Connect": {...}}`) are tried first. If that fails and the
/// payload is a msgpack map, the untagged shapes are tried in priority order:
/// `Connect`, `Request`, `ContentUpdate`; the first one that decodes wins.
/// Returns `None` for anything else, including truncated payloads.
pub fn decode_client(bytes: &[u8]) -> Option<ClientMsg> {
    if let Ok(msg) = rmp_serde::from_slice::<ClientMsg>(bytes) {
        return Some(msg);
    }
    if !is_map(bytes) {
        return None;
    }
    try_shape::<Connect>(bytes)
        .map(ClientMsg::Connect)
        .or_else(|| try_shape::<Request>(bytes).map(ClientMsg::Request))
        .or_else(|| try_shape::<ContentUpdate>(bytes).map(ClientMsg::ContentUpdate))
}

fn try_shape<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    rmp_serde::from_slice::<T>(bytes).ok()
}

/// True when the payload starts with a msgpack map marker.
///
/// Structs also decode from msgpack arrays, which would let a one-element
/// array match whichever single-field shape is tried first.
fn is_map(bytes: &[u8]) -> bool {
    matches!(bytes.first(), Some(0x80..=0x8f | 0xde | 0xdf))
}
