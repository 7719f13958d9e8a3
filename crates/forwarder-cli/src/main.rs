//! p2pforwarder — open a local port for peers to dial, or subscribe to a
//! peer's advertised ports and reach them on a loopback address.

mod config;
mod keystore;

use anyhow::Context;
use clap::{Parser, Subcommand};
use forwarder_core::identity::PeerId;
use forwarder_core::protocol::ProtoTag;
use forwarder_tcp_overlay::{AddressBook, TcpOverlayHost};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::error;

/// p2pforwarder — peer-to-peer port forwarder
#[derive(Parser)]
#[command(name = "p2pforwarder", version, about = "Peer-to-peer port forwarder")]
struct Cli {
    /// Identity file path (default: ~/.p2pforwarder/identity)
    #[arg(short = 'i', long = "identity", global = true)]
    identity: Option<String>,

    /// Config file path (default: ~/.p2pforwarder/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh identity, refusing to overwrite an existing one.
    Keygen,

    /// Print this agent's peer id.
    Id,

    /// Run the agent: open local ports for peers to dial, and/or subscribe
    /// to peers' advertised ports.
    Run {
        /// Port to open, as proto:port (e.g. tcp:8080). Repeatable.
        #[arg(long = "open")]
        open: Vec<String>,

        /// Peer id (hex) to subscribe to. Repeatable.
        #[arg(long = "connect")]
        connect: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                "p2pforwarder=debug,forwarder_agent=debug,forwarder_tcp_overlay=debug",
            )
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("p2pforwarder=info,forwarder_agent=warn")
            .with_target(false)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".p2pforwarder")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    });
    let cfg = config::Config::load(&config_path).unwrap_or_default();

    let identity_path = cli
        .identity
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(keystore::KeyStore::default_location);
    let store = keystore::KeyStore::new(identity_path);

    let result = match cli.command {
        Command::Keygen => run_keygen(&store),
        Command::Id => run_id(&store),
        Command::Run { open, connect } => run_agent(&store, &cfg, open, connect).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("p2pforwarder: {e:#}");
        std::process::exit(1);
    }
}

fn run_keygen(store: &keystore::KeyStore) -> anyhow::Result<()> {
    let keypair = store.generate()?;
    println!("generated identity {}", keypair.peer_id());
    Ok(())
}

fn run_id(store: &keystore::KeyStore) -> anyhow::Result<()> {
    let keypair = store.load_or_generate()?;
    println!("{}", keypair.peer_id());
    Ok(())
}

async fn run_agent(
    store: &keystore::KeyStore,
    cfg: &config::Config,
    open: Vec<String>,
    connect: Vec<String>,
) -> anyhow::Result<()> {
    let keypair = store.load_or_generate()?;
    let listen: SocketAddr = cfg
        .agent
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", cfg.agent.listen))?;

    let addresses = AddressBook::new();
    for (peer_hex, addr) in &cfg.peers {
        let peer = PeerId::from_hex(peer_hex)
            .with_context(|| format!("invalid peer id '{peer_hex}' in config"))?;
        let socket_addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid address '{addr}' for peer '{peer_hex}'"))?;
        addresses.insert(peer, socket_addr);
    }

    let host = TcpOverlayHost::bind(&keypair, listen, addresses).await?;
    let (forwarder, shutdown) = forwarder_agent::new_forwarder(&keypair, host);
    forwarder.on_error(|msg| error!("{msg}"));

    println!("agent {} listening on {listen}", forwarder.id());

    let mut handles = Vec::new();
    for spec in &open {
        let (proto, port) = parse_port_spec(spec)?;
        let handle = forwarder.open_port(proto, port)?;
        println!("opened {proto} port {port}");
        handles.push(handle);
    }

    for peer_hex in &connect {
        let (listen_ip, _scope) = forwarder.connect(peer_hex).await?;
        println!("subscribed to {peer_hex}, reachable at {listen_ip}");
    }

    tokio::signal::ctrl_c().await.ok();
    shutdown.shutdown();
    Ok(())
}

fn parse_port_spec(spec: &str) -> anyhow::Result<(ProtoTag, u16)> {
    let (proto, port) = spec
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("port spec '{spec}' must be proto:port, e.g. tcp:8080"))?;
    let proto = match proto {
        "tcp" => ProtoTag::Tcp,
        "udp" => ProtoTag::Udp,
        other => anyhow::bail!("unknown protocol '{other}' in port spec '{spec}'"),
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in spec '{spec}'"))?;
    Ok((proto, port))
}
