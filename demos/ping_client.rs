//! Client for the echo server demo.
//!
//! Sends `test0` through `testN`, checks each echo, then sends `exit`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example ping_client -- --count 100
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use framelink::{Connection, LinkConfig, MessageTransport, ENV_IDENTIFIER};
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_IDENTIFIER: &str = "clingoserver";

/// Framed echo client
#[derive(Parser)]
#[command(name = "ping_client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 5666)]
    port: u16,

    /// Validation identifier (falls back to FRAMELINK_IDENTIFIER, then a default)
    #[arg(short, long)]
    identifier: Option<String>,

    /// Number of messages to send before `exit`
    #[arg(short, long, default_value_t = 10)]
    count: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match cli.identifier {
        Some(identifier) => LinkConfig::new(identifier),
        None if std::env::var_os(ENV_IDENTIFIER).is_some() => LinkConfig::from_env()?,
        None => LinkConfig::new(DEFAULT_IDENTIFIER),
    };

    let socket = TcpStream::connect((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("connecting to {}:{}", cli.host, cli.port))?;
    let conn = Connection::with_config(socket, config);
    conn.validate().await.context("validating connection")?;
    info!(conn = conn.id(), "connected");

    let started = Instant::now();
    for i in 0..cli.count {
        let message = format!("test{i}").into_bytes();
        conn.send(message.clone()).await.context("sending message")?;
        let echo = conn.recv().await.context("receiving echo")?;
        if echo != message {
            bail!(
                "echo mismatch: sent {:?}, got {:?}",
                String::from_utf8_lossy(&message),
                String::from_utf8_lossy(&echo)
            );
        }
        debug!(i, "echo ok");
    }
    conn.send(b"exit".to_vec()).await.context("sending exit")?;

    info!(count = cli.count, elapsed = ?started.elapsed(), "all echoes received");
    Ok(())
}
