//! Echo server over framed TCP connections.
//!
//! Accepts connections, validates each one, then echoes every message back
//! until the client sends `exit`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example echo_server -- --port 5666 --identifier clingoserver
//! RUST_LOG=framelink=debug cargo run --example echo_server
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use framelink::{Connection, LinkConfig, ENV_IDENTIFIER};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_IDENTIFIER: &str = "clingoserver";

/// Framed echo server
#[derive(Parser)]
#[command(name = "echo_server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5666)]
    port: u16,

    /// Validation identifier (falls back to FRAMELINK_IDENTIFIER, then a default)
    #[arg(short, long)]
    identifier: Option<String>,

    /// Largest accepted message body in bytes
    #[arg(long)]
    max_frame_bytes: Option<u32>,

    /// Exit after the first session ends
    #[arg(long)]
    once: bool,
}

fn link_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.identifier {
        Some(identifier) => LinkConfig::new(identifier.clone()),
        None if std::env::var_os(ENV_IDENTIFIER).is_some() => {
            LinkConfig::from_env().context("reading link configuration from environment")?
        }
        None => LinkConfig::new(DEFAULT_IDENTIFIER),
    };
    if let Some(max) = cli.max_frame_bytes {
        config = config.with_max_frame_len(max);
    }
    Ok(config)
}

async fn serve(socket: TcpStream, config: LinkConfig) -> Result<usize> {
    let conn = Connection::with_config(socket, config);
    conn.validate().await.context("validating connection")?;

    let mut echoed = 0;
    loop {
        let (message, len) = conn
            .receive_message(Vec::new())
            .await
            .into_result()
            .context("receiving message")?;
        info!(conn = conn.id(), len, "received message");
        if message == b"exit" {
            return Ok(echoed);
        }
        conn.send_message(message)
            .await
            .into_result()
            .context("echoing message")?;
        echoed += 1;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = link_config(&cli)?;
    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("binding {}:{}", cli.host, cli.port))?;
    info!(addr = %listener.local_addr()?, identifier = %config.identifier, "listening");

    loop {
        let (socket, peer) = listener.accept().await.context("accepting connection")?;
        info!(%peer, "accepted connection");

        let session = serve(socket, config.clone());
        if cli.once {
            let echoed = session.await?;
            info!(%peer, echoed, "session finished");
            return Ok(());
        }
        tokio::spawn(async move {
            match session.await {
                Ok(echoed) => info!(%peer, echoed, "session finished"),
                Err(error) => warn!(%peer, error = %format!("{error:#}"), "session failed"),
            }
        });
    }
}
