//! OS socket backend: `socket2` sockets multiplexed with `select(2)`.
//!
//! Sockets stay in blocking mode. `select` only reports a handle once a
//! receive or accept on it will not block, and replies are sent with
//! `MSG_DONTWAIT`.

use crate::runtime::handle_set::{Handle, HandleSet};
use crate::runtime::net::Net;
use crate::runtime::peers::PeerAddr;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::net::SocketAddrV4;
use std::os::unix::io::AsRawFd;
use std::ptr;
use tracing::{info, trace, warn};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Failure while creating the listening socket.
#[derive(Debug)]
pub enum SetupError {
    Socket(io::Error),
    Bind(SocketAddrV4, io::Error),
    Listen(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Socket(e) => write!(f, "Failed to create socket: {}", e),
            SetupError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            SetupError::Listen(e) => write!(f, "Failed to listen: {}", e),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Socket(e) | SetupError::Bind(_, e) | SetupError::Listen(e) => Some(e),
        }
    }
}

/// Listening socket plus every accepted connection, keyed by handle.
pub struct OsNet {
    listener: Socket,
    connections: HashMap<Handle, Socket>,
}

impl OsNet {
    /// Create, bind and listen on an IPv4 TCP socket.
    pub fn bind(addr: SocketAddrV4, backlog: i32) -> Result<Self, SetupError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(SetupError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(SetupError::Socket)?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| SetupError::Bind(addr, e))?;
        socket.listen(backlog).map_err(SetupError::Listen)?;

        let net = Self {
            listener: socket,
            connections: HashMap::new(),
        };
        info!(
            addr = %addr,
            backlog,
            handle = net.listener(),
            "Server bound"
        );
        Ok(net)
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        self.listener.local_addr()?.as_socket_ipv4().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "listener is not bound to IPv4")
        })
    }

    fn connection(&self, handle: Handle) -> io::Result<&Socket> {
        self.connections.get(&handle).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no open connection for handle {handle}"),
            )
        })
    }
}

impl Net for OsNet {
    fn listener(&self) -> Handle {
        self.listener.as_raw_fd()
    }

    fn wait_readable(&mut self, watched: &HandleSet) -> io::Result<HandleSet> {
        let mut ready = HandleSet::with_capacity(watched.capacity());
        let Some(max) = watched.max() else {
            return Ok(ready);
        };

        let interest = fd_set_of(watched);
        let readable = loop {
            let mut readable = interest;
            // SAFETY: `readable` is an initialised fd_set holding handles
            // below FD_SETSIZE; null write/except sets and timeout are allowed.
            let rc = unsafe {
                libc::select(
                    max + 1,
                    &mut readable,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            if rc >= 0 {
                trace!(ready = rc, "select returned");
                break readable;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        for handle in watched.iter() {
            // SAFETY: `readable` was filled in by select above.
            if unsafe { libc::FD_ISSET(handle, &readable) } {
                ready
                    .insert(handle)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            }
        }
        Ok(ready)
    }

    fn accept(&mut self) -> io::Result<(Handle, PeerAddr)> {
        let (socket, addr) = self.listener.accept()?;
        let peer = PeerAddr::try_from(&addr)?;
        let handle = socket.as_raw_fd();
        self.connections.insert(handle, socket);
        Ok((handle, peer))
    }

    fn recv(&mut self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        let mut socket = self.connection(handle)?;
        socket.read(buf)
    }

    fn send(&mut self, handle: Handle, payload: &[u8], peer: &PeerAddr) -> io::Result<usize> {
        // The stream is connected, so the kernel already knows `peer`.
        trace!(handle, peer = %peer, len = payload.len(), "Sending reply");
        self.connection(handle)?.send_with_flags(payload, SEND_FLAGS)
    }

    fn close(&mut self, handle: Handle) {
        if self.connections.remove(&handle).is_none() {
            warn!(handle, "Close requested for unknown handle");
        }
    }
}

/// Build a `select` interest set from the watched handles.
fn fd_set_of(watched: &HandleSet) -> libc::fd_set {
    let mut set = MaybeUninit::<libc::fd_set>::uninit();
    // SAFETY: FD_ZERO initialises the whole set, and every handle in
    // `watched` is below its capacity, which config caps at FD_SETSIZE.
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        let mut set = set.assume_init();
        for handle in watched.iter() {
            libc::FD_SET(handle, &mut set);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpStream};

    fn loopback() -> OsNet {
        OsNet::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 16).unwrap()
    }

    fn watching(handles: &[Handle]) -> HandleSet {
        let mut set = HandleSet::with_capacity(libc::FD_SETSIZE as usize);
        for &h in handles {
            set.insert(h).unwrap();
        }
        set
    }

    #[test]
    fn test_accept_recv_send_close() {
        let mut net = loopback();
        let addr = net.local_addr().unwrap();
        let listener = net.listener();

        let mut client = TcpStream::connect(addr).unwrap();
        let client_addr = match client.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            other => panic!("unexpected client address: {other}"),
        };

        let ready = net.wait_readable(&watching(&[listener])).unwrap();
        assert!(ready.contains(listener));

        let (handle, peer) = net.accept().unwrap();
        assert_ne!(handle, listener);
        assert_eq!(peer, PeerAddr::V4(client_addr));

        client.write_all(b"ping").unwrap();
        let ready = net.wait_readable(&watching(&[listener, handle])).unwrap();
        assert!(ready.contains(handle));
        assert!(!ready.contains(listener));

        let mut buf = [0u8; 64];
        let n = net.recv(handle, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        assert_eq!(net.send(handle, b"pong", &peer).unwrap(), 4);
        net.close(handle);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn test_recv_on_unknown_handle_fails() {
        let mut net = loopback();
        let mut buf = [0u8; 8];
        let err = net.recv(9999, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let net = loopback();
        let addr = net.local_addr().unwrap();
        match OsNet::bind(addr, 16) {
            Err(SetupError::Bind(failed, _)) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind to {addr} succeeded"),
        }
    }
}
