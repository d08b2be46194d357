//! Unix-socket transport: the listener with its per-session tasks, and a
//! client connection.

mod client;
mod server;

pub use client::Connection;
pub(crate) use server::IpcServer;

use axrelay_protocol::ipc::codec::MAX_FRAME_LEN;
use tokio_util::codec::LengthDelimitedCodec;

/// Length-prefixed framing shared by both ends: 4-byte big-endian length,
/// payload capped at [`MAX_FRAME_LEN`].
fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
