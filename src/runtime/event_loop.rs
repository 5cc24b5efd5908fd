//! The multiplexing loop.
//!
//! One thread, one readiness wait per iteration. Every ready handle is
//! either the listener (accept one connection) or a connection that gets
//! exactly one receive, one reply and is then closed.
//!
//! The loop owns the watched [`HandleSet`] and the [`PeerDirectory`]. Both
//! satisfy, between iterations: watched handles minus the listener are
//! exactly the directory's keys.

use crate::config::EchoMode;
use crate::runtime::handle_set::{CapacityError, Handle, HandleSet};
use crate::runtime::net::Net;
use crate::runtime::peers::PeerDirectory;
use crate::runtime::reply::build_reply;
use bytes::BytesMut;
use std::fmt;
use std::io;
use tracing::{debug, info, trace, warn};

/// Loop tunables.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Handles `0..capacity` can be watched.
    pub capacity: usize,
    /// Receive buffer size.
    pub max_message_size: usize,
    pub echo_mode: EchoMode,
}

/// Unrecoverable loop failure. The process is expected to exit.
#[derive(Debug)]
pub enum LoopError {
    /// The listening handle cannot be watched.
    Listener(CapacityError),
    Wait(io::Error),
    Accept(io::Error),
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::Listener(e) => write!(f, "Cannot watch listener: {}", e),
            LoopError::Wait(e) => write!(f, "Readiness wait failed: {}", e),
            LoopError::Accept(e) => write!(f, "Accept failed: {}", e),
        }
    }
}

impl std::error::Error for LoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoopError::Listener(e) => Some(e),
            LoopError::Wait(e) | LoopError::Accept(e) => Some(e),
        }
    }
}

pub struct EventLoop<N: Net> {
    net: N,
    listener: Handle,
    watched: HandleSet,
    peers: PeerDirectory,
    max_message_size: usize,
    echo_mode: EchoMode,
}

impl<N: Net> EventLoop<N> {
    pub fn new(net: N, settings: LoopSettings) -> Result<Self, LoopError> {
        let listener = net.listener();
        let mut watched = HandleSet::with_capacity(settings.capacity);
        watched.insert(listener).map_err(LoopError::Listener)?;

        Ok(Self {
            net,
            listener,
            watched,
            peers: PeerDirectory::new(),
            max_message_size: settings.max_message_size,
            echo_mode: settings.echo_mode,
        })
    }

    /// Serve forever. Only returns on a fatal error.
    pub fn run(&mut self) -> Result<(), LoopError> {
        info!(
            listener = self.listener,
            capacity = self.watched.capacity(),
            max_message_size = self.max_message_size,
            echo_mode = ?self.echo_mode,
            "Event loop started"
        );
        loop {
            self.turn()?;
        }
    }

    /// One iteration: wait for readiness, then service every ready handle in
    /// ascending order. Returns the number of handles serviced.
    pub fn turn(&mut self) -> Result<usize, LoopError> {
        let snapshot = self.watched.clone();
        let ready = self
            .net
            .wait_readable(&snapshot)
            .map_err(LoopError::Wait)?;
        trace!(ready = ready.len(), watched = snapshot.len(), "Readiness wait returned");

        let Some(max) = snapshot.max() else {
            return Ok(0);
        };

        let mut serviced = 0;
        for handle in 0..=max {
            if !ready.contains(handle) {
                continue;
            }
            if handle == self.listener {
                self.accept()?;
            } else if self.watched.contains(handle) {
                self.serve(handle);
            } else {
                trace!(handle, "Ignoring readiness for unwatched handle");
                continue;
            }
            serviced += 1;
        }
        Ok(serviced)
    }

    fn accept(&mut self) -> Result<(), LoopError> {
        let (handle, peer) = self.net.accept().map_err(LoopError::Accept)?;

        if let Err(e) = self.watched.insert(handle) {
            warn!(handle, peer = %peer, error = %e, "Rejecting connection");
            self.net.close(handle);
            return Ok(());
        }
        self.peers.set(handle, peer);
        debug!(
            handle,
            peer = %peer,
            connections = self.peers.len(),
            "Accepted connection"
        );
        Ok(())
    }

    /// Receive once, reply once, close. Errors here are connection-scoped.
    fn serve(&mut self, handle: Handle) {
        let mut buf = BytesMut::zeroed(self.max_message_size);

        let received = match self.net.recv(handle, &mut buf) {
            Ok(0) => {
                warn!(handle, "Connection closed before sending data");
                self.release(handle);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(handle, error = %e, "Receive failed");
                self.release(handle);
                return;
            }
        };

        let Some(peer) = self.peers.get(handle) else {
            warn!(handle, "No peer recorded for watched handle");
            self.release(handle);
            return;
        };

        info!(bytes = received, peer = %peer, handle, "Received message");
        trace!(message = %String::from_utf8_lossy(&buf[..received]), "> Received message");

        let reply = build_reply(&buf, received, self.echo_mode);
        match self.net.send(handle, &reply, &peer) {
            Ok(sent) if sent < reply.len() => {
                warn!(handle, sent, len = reply.len(), "Reply truncated");
            }
            Ok(_) => {
                trace!(reply = %String::from_utf8_lossy(&reply), "< Response message");
            }
            Err(e) => warn!(handle, peer = %peer, error = %e, "Send failed"),
        }

        self.release(handle);
    }

    fn release(&mut self, handle: Handle) {
        self.watched.remove(handle);
        self.peers.remove(handle);
        self.net.close(handle);
        debug!(handle, connections = self.peers.len(), "Connection closed");
    }
}

#[cfg(test)]
impl<N: Net> EventLoop<N> {
    pub fn listener(&self) -> Handle {
        self.listener
    }

    pub fn watched(&self) -> &HandleSet {
        &self.watched
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn net(&self) -> &N {
        &self.net
    }
}
