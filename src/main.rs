//! select-server: a single-threaded multiplexing TCP server
//!
//! One `select(2)` loop watches the listening socket and every open
//! connection. Each connection is served exactly once:
//! - receive one message
//! - reply with `We just received your message: <message>`
//! - close
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        capacity = config.capacity,
        max_message_size = config.max_message_size,
        echo_mode = ?config.echo_mode,
        "Starting select-server"
    );

    runtime::run(config)
}
