#!/usr/bin/env cargo
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tattler::cache::MemoryCache;
use tattler::cluster::{CacheKey, ClusterController, Command};
use tattler::settings::{self, Settings};
use tattler::transport::{
    GroupTransport, MemberAddress, MembershipListener, MessageReceiver, UdpGroupTransport,
};

#[derive(Parser)]
#[command(name = "tattler-admin")]
#[command(about = "Tattler invalidation group administration tool")]
struct Cli {
    /// Name of the invalidation group to join
    #[arg(long, default_value = settings::DEFAULT_GROUP, env = "TATTLER_GROUP")]
    group: String,

    /// UDP listen address for this tool (use port 0 for send-only runs;
    /// with --multicast, bind a concrete interface address so the node's
    /// own echoed datagrams are recognized and filtered)
    #[arg(long, default_value = settings::DEFAULT_LISTEN_UDP, env = "TATTLER_LISTEN_UDP")]
    listen_udp: SocketAddr,

    /// Multicast group address (e.g. "224.0.1.77:7600")
    #[arg(long, env = "TATTLER_MULTICAST")]
    multicast: Option<SocketAddr>,

    /// Peer addresses for unicast fan-out (e.g. "10.0.0.1:7600,10.0.0.2:7600")
    #[arg(long, env = "TATTLER_TOPOLOGY")]
    peers: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast a single-key eviction to every node in the group
    Evict {
        /// Cache region the key lives in
        region: String,
        /// Key to evict; integer-looking values are sent as integer keys
        key: String,
    },
    /// Broadcast a whole-region clear to every node in the group
    Clear {
        /// Cache region to clear
        region: String,
    },
    /// Join the group and print invalidation traffic until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tattler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    match cli.command {
        Commands::Evict { region, key } => {
            broadcast_evict(settings, &region, parse_key(&key)).await?;
        }
        Commands::Clear { region } => {
            broadcast_clear(settings, &region).await?;
        }
        Commands::Watch => {
            watch_group(settings).await?;
        }
    }

    Ok(())
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let topology = match self.peers.as_deref() {
            Some(peers) => parse_topology(peers)?,
            None => HashSet::new(),
        };
        Ok(Settings {
            group: self.group.clone(),
            listen_udp: self.listen_udp,
            multicast: self.multicast,
            topology,
        })
    }
}

async fn broadcast_evict(settings: Settings, region: &str, key: CacheKey) -> anyhow::Result<()> {
    let controller = connect_controller(&settings).await?;

    println!("📣 Broadcasting eviction: region '{}', key '{}'", region, key);
    controller.send_evict(region, key).await;
    controller.disconnect().await?;

    println!("✅ Command sent to group '{}'", settings.group);
    Ok(())
}

async fn broadcast_clear(settings: Settings, region: &str) -> anyhow::Result<()> {
    let controller = connect_controller(&settings).await?;

    println!("📣 Broadcasting clear: region '{}'", region);
    controller.send_clear(region).await;
    controller.disconnect().await?;

    println!("✅ Command sent to group '{}'", settings.group);
    Ok(())
}

async fn connect_controller(settings: &Settings) -> anyhow::Result<ClusterController> {
    let transport = Arc::new(UdpGroupTransport::new(settings.transport_config()));
    let cache = Arc::new(MemoryCache::new());
    let controller = ClusterController::new(&settings.group, transport, cache);
    controller.connect().await?;
    Ok(controller)
}

async fn watch_group(settings: Settings) -> anyhow::Result<()> {
    let transport = UdpGroupTransport::new(settings.transport_config());
    let address = transport
        .join(&settings.group, Arc::new(WatchReceiver), Arc::new(WatchListener))
        .await?;
    println!(
        "👀 Watching group '{}' from {} (Ctrl-C to stop)",
        settings.group, address
    );

    tokio::signal::ctrl_c().await?;

    let stats = transport.stats();
    transport.leave().await?;
    println!(
        "📊 Received {} messages, dropped {} packets",
        stats.messages_received, stats.packets_dropped
    );
    Ok(())
}

/// Prints every delivered command as one JSON line
struct WatchReceiver;

impl MessageReceiver for WatchReceiver {
    fn on_message(&self, sender: &MemberAddress, payload: &[u8]) {
        if payload.is_empty() {
            println!("⚠️  Empty message from {}", sender);
            return;
        }
        match Command::decode(payload) {
            Ok(command) => {
                let line = serde_json::json!({
                    "sender": sender.to_string(),
                    "operator": operator_name(command.operator),
                    "region": command.region,
                    "key": command.key,
                });
                println!("{}", line);
            }
            Err(e) => println!("⚠️  Undecodable message from {}: {}", sender, e),
        }
    }
}

struct WatchListener;

impl MembershipListener for WatchListener {
    fn on_view_change(&self, members: &[MemberAddress]) {
        let list: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        println!("👥 Group members: {}", list.join(","));
    }
}

fn operator_name(operator: u8) -> &'static str {
    match operator {
        Command::OPT_DELETE_KEY => "evict",
        Command::OPT_CLEAR_KEY => "clear",
        _ => "unknown",
    }
}

/// Integer-looking keys are broadcast as integer keys so they match what
/// applications send for numeric ids; everything else goes out as text.
fn parse_key(raw: &str) -> CacheKey {
    match raw.parse::<i64>() {
        Ok(n) => CacheKey::Int(n),
        Err(_) => CacheKey::Text(raw.to_string()),
    }
}

fn parse_topology(topology: &str) -> anyhow::Result<HashSet<SocketAddr>> {
    topology
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
        })
        .collect()
}
