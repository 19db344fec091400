//! `eddyd`: the Eddy daemon and its admin tools.
//!
//! One binary runs the metadata service, a block store, or both, and also
//! provides the admin and debug clients.
//!
//! # Usage
//!
//! ```text
//! eddyd serve -s meta -p 8080 -r 128 localhost:8081 localhost:8082
//! eddyd serve -s block -p 8081 -l
//! eddyd serve -s block -p 8082 -a 10.0.0.7:8082       # ring address differs
//! eddyd serve -s both -p 8080 localhost:8080      # include self in the ring
//! eddyd admin add localhost:8080 localhost:8083   # join a block store
//! eddyd admin remove localhost:8080 localhost:8082
//! eddyd debug localhost:8081 -r 128                # dump a block map
//! ```

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eddy_meta::MetaStore;
use eddy_net::{RpcClient, RpcServer};
use eddy_placement::{HashRing, hash_mod};
use eddy_store::{BlockStoreService, MemoryStore};
use eddy_types::{Block, BlockHash, RingIndex};
use tokio::net::TcpListener;
use tracing::info;

use config::CliConfig;

/// Exit status for command-line usage errors (`EX_USAGE` from sysexits.h).
const EX_USAGE: i32 = 64;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "eddyd",
    version,
    about = "Eddy distributed block store daemon"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a metadata server, a block store, or both.
    Serve {
        /// Service type to host.
        #[arg(short, long, value_enum, ignore_case = true)]
        service: ServiceType,

        /// Port to accept connections on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Consistent hashing ring size.
        #[arg(short, long)]
        ring_size: Option<u64>,

        /// Only listen on localhost.
        #[arg(short, long)]
        local_only: bool,

        /// Address this block store is known by on the ring
        /// (default `localhost:<port>`).
        #[arg(short, long)]
        advertise_addr: Option<String>,

        /// Output debug log statements.
        #[arg(short, long)]
        debug: bool,

        /// Block store addresses seeding the ring (include self for `both`).
        block_addrs: Vec<String>,
    },

    /// Change ring membership through the metadata server.
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },

    /// Print a block store's blocks with their ring indices.
    Debug {
        /// Block store address (`host:port`).
        addr: String,

        /// Consistent hashing ring size.
        #[arg(short, long)]
        ring_size: Option<u64>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Add a block store to the ring.
    Add {
        /// Metadata server address.
        meta_addr: String,
        /// Block store to add.
        block_addr: String,
    },
    /// Remove a block store from the ring.
    Remove {
        /// Metadata server address.
        meta_addr: String,
        /// Block store to remove.
        block_addr: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceType {
    Meta,
    Block,
    Both,
}

impl ServiceType {
    fn hosts_meta(self) -> bool {
        self != Self::Block
    }

    fn hosts_block(self) -> bool {
        self != Self::Meta
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(EX_USAGE);
        }
        // --help and --version.
        Err(e) => e.exit(),
    };
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Serve {
            service,
            port,
            ring_size,
            local_only,
            advertise_addr,
            debug,
            block_addrs,
        } => {
            // CLI args override config file values.
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(size) = ring_size {
                config.ring.size = size;
            }
            if local_only {
                config.server.local_only = true;
            }
            if let Some(addr) = advertise_addr {
                config.server.advertise_addr = Some(addr);
            }
            setup_tracing(&config.log.level, debug);
            cmd_serve(config, service, block_addrs).await
        }
        Commands::Admin { action } => {
            setup_tracing(&config.log.level, false);
            cmd_admin(&config, action).await
        }
        Commands::Debug { addr, ring_size } => {
            if let Some(size) = ring_size {
                config.ring.size = size;
            }
            setup_tracing(&config.log.level, false);
            cmd_debug(&config, &addr).await
        }
    }
}

/// Initialize the `tracing` subscriber.
///
/// `force_debug` wins over everything; otherwise `RUST_LOG` is respected if
/// set, falling back to the config value.
fn setup_tracing(level: &str, force_debug: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if force_debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// eddyd serve
// -----------------------------------------------------------------------

async fn cmd_serve(config: CliConfig, service: ServiceType, block_addrs: Vec<String>) -> Result<()> {
    let ring_size = config.ring.size;
    let port = config.server.port;
    let host = if config.server.local_only {
        "127.0.0.1"
    } else {
        "0.0.0.0"
    };
    let bind_addr = format!("{host}:{port}");

    info!(?service, %bind_addr, ring_size, "starting eddyd");

    let server = build_server(&config, service, block_addrs)?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tokio::select! {
        result = server.serve(listener) => result.context("server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

/// Assemble the services `service` asks for.
fn build_server(
    config: &CliConfig,
    service: ServiceType,
    block_addrs: Vec<String>,
) -> Result<RpcServer> {
    let ring_size = config.ring.size;
    let client = Arc::new(RpcClient::new(config.client_config()));
    let mut server = RpcServer::new();

    if service.hosts_meta() {
        let ring = HashRing::new(ring_size, block_addrs).context("invalid ring size")?;
        for node in ring.nodes() {
            info!(addr = %node.addr, index = node.index, "ring member");
        }
        let meta = MetaStore::new(ring, client.clone())
            .with_migration_timeout(config.rpc.migration_timeout());
        server = server.with_meta(Arc::new(meta));
    }

    if service.hosts_block() {
        let local_addr = config.advertise_addr();
        info!(%local_addr, "hosting block store");
        let store = Arc::new(MemoryStore::new());
        let block = BlockStoreService::new(store, client, ring_size)
            .context("invalid ring size")?
            .with_local_addr(local_addr);
        server = server.with_block_store(Arc::new(block));
    }

    Ok(server)
}

// -----------------------------------------------------------------------
// eddyd admin
// -----------------------------------------------------------------------

async fn cmd_admin(config: &CliConfig, action: AdminCommands) -> Result<()> {
    let client = RpcClient::new(config.client_config());

    match action {
        AdminCommands::Add {
            meta_addr,
            block_addr,
        } => {
            let changed = client
                .add_node(&meta_addr, &block_addr)
                .await
                .with_context(|| format!("failed to add {block_addr} via {meta_addr}"))?;
            if changed {
                println!("added {block_addr}");
            } else {
                println!("{block_addr} is already on the ring");
            }
        }
        AdminCommands::Remove {
            meta_addr,
            block_addr,
        } => {
            let changed = client
                .remove_node(&meta_addr, &block_addr)
                .await
                .with_context(|| format!("failed to remove {block_addr} via {meta_addr}"))?;
            if changed {
                println!("removed {block_addr}");
            } else {
                println!("{block_addr} is not on the ring");
            }
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// eddyd debug
// -----------------------------------------------------------------------

async fn cmd_debug(config: &CliConfig, addr: &str) -> Result<()> {
    let client = RpcClient::new(config.client_config());
    let blocks = client
        .get_block_map(addr)
        .await
        .with_context(|| format!("failed to fetch block map from {addr}"))?;

    println!("{addr}");
    for line in render_block_map(&blocks, config.ring.size)? {
        println!("{line}");
    }
    Ok(())
}

/// Render a block map as banner-delimited `hash index` lines, ordered by index.
fn render_block_map(blocks: &HashMap<BlockHash, Block>, ring_size: u64) -> Result<Vec<String>> {
    let mut indexed: Vec<(RingIndex, BlockHash)> = blocks
        .keys()
        .map(|hash| hash_mod(hash.as_bytes(), ring_size).map(|index| (index, *hash)))
        .collect::<Result<_, _>>()
        .context("invalid ring size")?;
    indexed.sort();

    let mut lines = Vec::with_capacity(indexed.len() + 2);
    lines.push("--------BEGIN PRINT MAP--------".to_string());
    for (index, hash) in indexed {
        lines.push(format!("\t{hash} {index}"));
    }
    lines.push("---------END PRINT MAP--------".to_string());
    Ok(lines)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
