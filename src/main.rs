use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peermesh::config::get_config_path;
use peermesh::{Config, EventName, MeshNode, PeerEvent, PeerId, RtcTransport, WebSocketRelay};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "peermesh")]
#[command(about = "WebRTC data channel mesh over a shared signaling relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the mesh and broadcast stdin lines to every peer (`/peers` lists them)
    Start {
        /// Relay WebSocket URL (overrides config)
        #[arg(long)]
        relay: Option<String>,
        /// STUN server (overrides config)
        #[arg(long)]
        stun: Option<String>,
        /// Peer staleness timeout in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Use a fixed node identifier instead of a random one
        #[arg(long)]
        id: Option<String>,
    },
    /// Show the configuration file and its contents
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(
                    "peermesh=info"
                        .parse::<tracing_subscriber::filter::Directive>()
                        .context("Invalid log directive")?,
                ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            relay,
            stun,
            timeout_ms,
            id,
        } => {
            let config = Config::load()?;
            let relay_url = relay.unwrap_or_else(|| config.signaling.relay_url.clone());
            let mut mesh_config = config.mesh_config();
            if let Some(stun) = stun {
                mesh_config.stun_server = stun;
            }
            if let Some(timeout_ms) = timeout_ms {
                mesh_config.peer_timeout_ms = timeout_ms;
            }
            let my_id = id.map(PeerId::new).unwrap_or_else(PeerId::generate);

            let relay = WebSocketRelay::new(relay_url);
            let mut node = MeshNode::with_id(
                my_id,
                mesh_config,
                Arc::new(RtcTransport::new()),
                Arc::new(relay.clone()),
            );

            node.on(EventName::PeerJoined, |event: &PeerEvent| {
                println!("+ {}", event.peer_id());
            });
            node.on(EventName::PeerLeft, |event: &PeerEvent| {
                println!("- {}", event.peer_id());
            });
            node.on(EventName::PeerUpdated, |event: &PeerEvent| {
                if let PeerEvent::Updated(peer, payload) = event {
                    println!("{}: {}", peer.short(), payload);
                }
            });

            println!("Node ID: {}", node.my_id());
            println!("Relay: {}", relay.url());
            println!("STUN server: {}", node.config().stun_server);
            println!("Peer timeout: {} ms", node.config().peer_timeout_ms);

            node.connect()
                .await
                .with_context(|| format!("Failed to join relay {}", relay.url()))?;

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    line = lines.next_line() => {
                        match line? {
                            Some(line) if line.trim().is_empty() => {}
                            Some(line) if line.trim() == "/peers" => match node.peers().await {
                                Ok(peers) => {
                                    println!("{} peers", peers.len());
                                    for peer in peers {
                                        println!(
                                            "  {} {} channel={} idle={}ms",
                                            peer.peer_id,
                                            peer.state,
                                            peer.has_channel,
                                            peer.idle.as_millis()
                                        );
                                    }
                                }
                                Err(e) => warn!("Failed to list peers: {}", e),
                            },
                            Some(line) => {
                                match node.broadcast(serde_json::json!({ "text": line })).await {
                                    Ok(sent) => info!("Sent to {} peers", sent),
                                    Err(e) => {
                                        warn!("Broadcast failed: {}", e);
                                        if !node.is_connected() {
                                            break;
                                        }
                                    }
                                }
                            }
                            None => break,
                        }
                    }
                }
            }

            node.disconnect().await?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("Config file: {}", get_config_path().display());
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
