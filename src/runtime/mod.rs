//! Readiness-based single-threaded runtime.
//!
//! - `HandleSet`: fixed-capacity bitset of watched handles
//! - `PeerDirectory`: peer address of each live connection
//! - `Net`: socket capability interface, implemented by `OsNet`
//! - `EventLoop`: accept / receive-reply-close multiplexing loop

mod event_loop;
mod handle_set;
mod net;
mod peers;
mod reply;
mod sys;

pub use event_loop::{EventLoop, LoopError, LoopSettings};
pub use sys::{OsNet, SetupError};

use crate::config::Config;

/// Bind the listener and serve until a fatal error.
pub fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let net = OsNet::bind(config.listen, config.backlog)?;

    let settings = LoopSettings {
        capacity: config.capacity,
        max_message_size: config.max_message_size,
        echo_mode: config.echo_mode,
    };

    let mut event_loop = EventLoop::new(net, settings)?;
    event_loop.run()?;
    Ok(())
}
