//! Ping-Pong Example: peers exchanging requests over WebSocket.
//!
//! Run as two separate processes:
//!
//! ```bash
//! # Terminal 1 - Start the server
//! cargo run --example ping_pong -- server
//!
//! # Terminal 2 - Run the client
//! cargo run --example ping_pong -- client --name alice --count 5
//! ```
//!
//! The server answers `ping` with `pong`, `echo` with the request payload,
//! and rejects anything else with code 404. The client sends a few pings,
//! one unknown method, and prints each outcome.

use std::time::Duration;

use clap::{Parser, Subcommand};
use peerlink::{
    Peer, PeerConfig, PeerEvent, PeerServer, RegistryEvent, ServerConfig, TokioProviders,
    TokioTaskProvider, WebSocketTransport,
};
use serde_json::{json, Value};
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "ping_pong")]
#[command(about = "Request/response between two peers over WebSocket", long_about = None)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept peers and answer their requests
    Server {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:4500")]
        addr: String,
    },
    /// Connect to a server and send requests
    Client {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:4500")]
        addr: String,

        /// Name announced in the handshake path
        #[arg(short, long, default_value = "client")]
        name: String,

        /// Number of pings to send
        #[arg(short, long, default_value = "3")]
        count: u32,

        /// Request timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
}

async fn run_server(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = PeerServer::new(TokioProviders::new(), ServerConfig::default());
    let mut registry_events = server
        .registry()
        .take_events()
        .ok_or("registry events already taken")?;
    let mut errors = server.errors();

    let bound = server.listen(addr).await?;
    info!(addr = %bound, "server ready");

    tokio::task::spawn_local(async move {
        while let Some(error) = errors.recv().await {
            warn!(error = %error, "server error");
        }
    });

    while let Some(event) = registry_events.recv().await {
        match event {
            RegistryEvent::Online(peer) => {
                info!(peer = %peer.id(), "peer online");
                serve(peer);
            }
            RegistryEvent::Offline(id) => info!(peer = %id, "peer offline"),
        }
    }
    Ok(())
}

fn serve(peer: Peer) {
    let Some(mut events) = peer.take_events() else {
        return;
    };
    tokio::task::spawn_local(async move {
        while let Some(event) = events.recv().await {
            let request = match event {
                PeerEvent::Request(request) => request,
                PeerEvent::Closed => break,
            };
            info!(peer = %peer.id(), method = request.method(), "request received");
            let outcome = match request.method() {
                "ping" => request.accept(json!("pong")),
                "echo" => {
                    let data = request.data().clone();
                    request.accept(data)
                }
                _ => request.reject("unknown method", 404),
            };
            if let Err(e) = outcome {
                warn!(peer = %peer.id(), error = %e, "failed to respond");
            }
        }
    });
}

async fn run_client(
    addr: &str,
    name: &str,
    count: u32,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("ws://{addr}/{name}");
    let (transport, events) = WebSocketTransport::connect(&url, &TokioTaskProvider).await?;
    let server = Peer::new(
        "server",
        transport,
        events,
        TokioProviders::new(),
        PeerConfig::default().with_request_timeout(timeout),
    );
    info!(url = %url, "connected");

    for seq in 0..count {
        match server.send("ping", json!({ "seq": seq })).await {
            Ok(reply) => info!(seq, reply = %reply, "ping answered"),
            Err(e) => warn!(seq, error = %e, "ping failed"),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let echoed = server.send("echo", json!({ "from": name })).await?;
    info!(reply = %echoed, "echo answered");

    match server.send("shutdown", Value::Null).await {
        Ok(reply) => info!(reply = %reply, "unexpected answer"),
        Err(e) => info!(error = %e, "rejected as expected"),
    }

    let metrics = server.metrics();
    info!(
        sent = metrics.requests_sent,
        matched = metrics.responses_matched,
        timeouts = metrics.timeouts,
        "client done"
    );
    server.close();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,peerlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let local = LocalSet::new();
    local
        .run_until(async move {
            match args.mode {
                Mode::Server { addr } => run_server(&addr).await,
                Mode::Client {
                    addr,
                    name,
                    count,
                    timeout_ms,
                } => run_client(&addr, &name, count, Duration::from_millis(timeout_ms)).await,
            }
        })
        .await
}
