//! Connection handle to peer address mapping.

use crate::runtime::handle_set::Handle;
use socket2::SockAddr;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddrV4;

/// Remote address of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    V4(SocketAddrV4),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::V4(addr) => addr.fmt(f),
        }
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        PeerAddr::V4(addr)
    }
}

impl TryFrom<&SockAddr> for PeerAddr {
    type Error = io::Error;

    fn try_from(addr: &SockAddr) -> io::Result<Self> {
        addr.as_socket_ipv4().map(PeerAddr::V4).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "peer address is not an IPv4 socket address",
            )
        })
    }
}

/// Peer address of every live connection, keyed by handle.
///
/// Owned by the event loop; not shared across threads.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<Handle, PeerAddr>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the peer of `handle`, replacing any previous entry.
    pub fn set(&mut self, handle: Handle, addr: PeerAddr) {
        self.peers.insert(handle, addr);
    }

    pub fn get(&self, handle: Handle) -> Option<PeerAddr> {
        self.peers.get(&handle).copied()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<PeerAddr> {
        self.peers.remove(&handle)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
impl PeerDirectory {
    pub fn contains(&self, handle: Handle) -> bool {
        self.peers.contains_key(&handle)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Handles with an entry, in ascending order.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.peers.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}
