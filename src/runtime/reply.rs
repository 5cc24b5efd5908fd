//! Reply construction.
//!
//! Every request gets the same answer shape: a fixed prefix followed by the
//! bytes the client sent.

use crate::config::EchoMode;
use bytes::BytesMut;

/// Text placed in front of the echoed message.
pub const REPLY_PREFIX: &[u8] = b"We just received your message: ";

/// Build the reply for a receive buffer of which `received` bytes were filled.
///
/// In [`EchoMode::Padded`] the whole buffer is echoed, so a short message is
/// followed by the buffer's trailing zero bytes.
pub fn build_reply(buf: &[u8], received: usize, mode: EchoMode) -> BytesMut {
    let body = match mode {
        EchoMode::Trimmed => &buf[..received.min(buf.len())],
        EchoMode::Padded => buf,
    };

    let mut reply = BytesMut::with_capacity(REPLY_PREFIX.len() + body.len());
    reply.extend_from_slice(REPLY_PREFIX);
    reply.extend_from_slice(body);
    reply
}
