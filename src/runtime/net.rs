//! Socket capability interface used by the event loop.
//!
//! The loop never touches the OS directly; everything goes through [`Net`].
//! [`crate::runtime::OsNet`] is the production implementation.

use crate::runtime::handle_set::{Handle, HandleSet};
use crate::runtime::peers::PeerAddr;
use std::io;

pub trait Net {
    /// Handle of the passive listening socket.
    fn listener(&self) -> Handle;

    /// Block until at least one handle in `watched` has pending input.
    ///
    /// Returns the ready subset. There is no timeout.
    fn wait_readable(&mut self, watched: &HandleSet) -> io::Result<HandleSet>;

    /// Accept one pending connection on the listener.
    fn accept(&mut self) -> io::Result<(Handle, PeerAddr)>;

    /// Single receive of at most `buf.len()` bytes.
    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<usize>;

    /// Non-blocking send of `payload` to the connection's peer.
    fn send(&mut self, handle: Handle, payload: &[u8], peer: &PeerAddr) -> io::Result<usize>;

    /// Release the handle. Called exactly once per accepted handle.
    fn close(&mut self, handle: Handle);
}
