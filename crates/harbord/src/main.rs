//! `harbord`: the Harbor storage provider daemon.
//!
//! Binary entrypoint that wires the shard engine to its state store,
//! content store, chain client and iroh transport.
//!
//! # Usage
//!
//! ```text
//! harbord start                              # start the node
//! harbord start -c harbor.toml               # start with a config file
//! harbord start -d ./node2 -a provider-2     # second instance
//! harbord shard list                         # list shard records
//! harbord shard status <order_id> <cid>      # show one shard
//! harbord shard fix <order_id> <cid>         # re-derive a stuck shard
//! harbord migrate list                       # list migrations
//! ```
//!
//! The `shard` and `migrate` commands open the state store directly and
//! must run while the node is stopped.

mod config;
mod handler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harbor_engine::{MemoryChain, ShardEngine, StagingGateway, rederive};
use harbor_meta::StateStore;
use harbor_net::{HARBOR_ALPN, Handlers, LocalProtocol, StreamProtocol, serve_local};
use harbor_store::{ContentStore, FileStore, MemoryStore};
use harbor_types::{Cid, OrderId, ShardKey};
use iroh::protocol::Router;
use iroh::{Endpoint, SecretKey};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::{CliConfig, parse_secret};
use handler::HarborProtocol;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "harbord", version, about = "Harbor storage provider daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory (useful for running multiple instances).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node.
    Start {
        /// Override this node's chain address.
        #[arg(short, long)]
        address: Option<String>,

        /// Endpoint secret key, hex-encoded.
        #[arg(long, env = "HARBOR_SECRET")]
        secret: Option<String>,

        /// Run fully in-memory (no disk persistence).
        #[arg(short, long)]
        memory: bool,
    },

    /// Inspect or repair shard records.
    Shard {
        #[command(subcommand)]
        action: ShardCommands,
    },

    /// Inspect migrations.
    Migrate {
        #[command(subcommand)]
        action: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum ShardCommands {
    /// List every shard record.
    List,
    /// Show one shard record.
    Status { order_id: OrderId, cid: String },
    /// Re-derive a shard's state from the content actually held and reset
    /// its retries; the node picks it up on next start.
    Fix { order_id: OrderId, cid: String },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// List every migration record.
    List,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            address,
            secret,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(address) = address {
                config.node.address = address;
            }
            if let Some(secret) = secret {
                config.node.secret = secret;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Shard { action } => match action {
            ShardCommands::List => cmd_shard_list(&config),
            ShardCommands::Status { order_id, cid } => cmd_shard_status(&config, order_id, &cid),
            ShardCommands::Fix { order_id, cid } => {
                cmd_shard_fix(&config, order_id, &cid).await.map(|_| ())
            }
        },
        Commands::Migrate { action } => match action {
            MigrateCommands::List => cmd_migrate_list(&config),
        },
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// harbord start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting harbord");
    let memory_mode = config.memory_mode();
    info!(
        data_dir = %config.node.data_dir.display(),
        backend = %config.storage.backend,
        codec = %config.node.codec,
        "node configuration"
    );
    // The development ledger lives in process and starts empty on every
    // run. Shards restored from a persistent state dir name orders it has
    // never seen, so they retry and terminate unless this node re-creates
    // those orders itself.
    anyhow::ensure!(
        config.chain.dev,
        "no ledger connection configured; set [chain] dev = true to use the development ledger"
    );

    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    // --- Node identity (iroh SecretKey) ---
    let secret_key = if !config.node.secret.is_empty() {
        SecretKey::from_bytes(&parse_secret(&config.node.secret)?)
    } else if memory_mode {
        info!("generated ephemeral node key (memory mode)");
        random_secret_key()
    } else {
        load_or_create_secret_key(&config.node.data_dir)?
    };

    // --- Network transport (iroh QUIC) ---
    // The Router owns the accept loop; the StreamProtocol only dials.
    let endpoint = Endpoint::builder()
        .secret_key(secret_key)
        .alpns(vec![HARBOR_ALPN.to_vec()])
        .relay_mode(iroh::RelayMode::Default)
        .bind()
        .await
        .context("failed to bind iroh endpoint")?;
    let stream = Arc::new(StreamProtocol::from_endpoint(endpoint.clone(), config.codec()?));
    info!(endpoint_id = %endpoint.id().fmt_short(), "iroh endpoint ready");
    for addr in endpoint.addr().ip_addrs() {
        info!(%addr, "listening on");
    }

    let address = if config.node.address.is_empty() {
        endpoint.id().to_string()
    } else {
        config.node.address.clone()
    };
    info!(%address, "node address");

    // --- State and content stores ---
    let (state, content, staged): (Arc<StateStore>, Arc<dyn ContentStore>, Arc<dyn ContentStore>) =
        if memory_mode {
            info!("using in-memory stores");
            (
                Arc::new(StateStore::open_temporary().context("failed to open state store")?),
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryStore::new()),
            )
        } else {
            info!(path = %config.content_dir().display(), "using file content store");
            (
                Arc::new(StateStore::open(config.state_dir()).context("failed to open state store")?),
                Arc::new(FileStore::new(config.content_dir()).context("failed to open content store")?),
                Arc::new(FileStore::new(config.staging_dir()).context("failed to open staging store")?),
            )
        };

    // --- Ledger ---
    let chain = Arc::new(MemoryChain::new());
    chain.register_node(&address, &endpoint.id().to_string());
    warn!("running against the in-process development ledger");
    let restored = state
        .list_shards()
        .context("failed to read state store")?
        .iter()
        .filter(|s| !s.state.is_absorbing())
        .count();
    if restored > 0 {
        warn!(
            restored,
            "development ledger does not survive restarts; restored shards will fail to resolve their orders"
        );
    }

    // --- Engine ---
    let (local, inbox) = LocalProtocol::channel();
    let engine = Arc::new(ShardEngine::new(
        config.engine_config(address.clone()),
        state,
        content,
        chain,
        Arc::new(local),
        stream,
    ));
    let gateway = Arc::new(StagingGateway::new(staged));
    let handlers = Handlers {
        provider: engine.clone(),
        gateway: Some(gateway),
    };

    let cancel = CancellationToken::new();
    let local_task = tokio::spawn(serve_local(inbox, handlers.clone(), cancel.clone()));

    // --- Incoming connection handler (iroh Router) ---
    let router = Router::builder(endpoint.clone())
        .accept(HARBOR_ALPN, HarborProtocol::new(handlers))
        .spawn();

    let mut tasks = engine.start(cancel.clone()).context("failed to start engine")?;
    tasks.push(local_task);
    info!(%address, endpoint_id = %endpoint.id(), "harbord ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "engine task failed");
        }
    }

    // Stops accepting, waits for in-flight handlers, closes the endpoint.
    info!("shutting down iroh router");
    router.shutdown().await.context("router shutdown failed")?;
    Ok(())
}

// -----------------------------------------------------------------------
// Key management
// -----------------------------------------------------------------------

fn random_secret_key() -> SecretKey {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    SecretKey::from(bytes)
}

/// Load or create a persistent iroh secret key from `data_dir/node.key`.
///
/// On first run, generates a new random ed25519 key and writes it to
/// `node.key`. Different `data_dir`s get different identities.
fn load_or_create_secret_key(data_dir: &Path) -> Result<SecretKey> {
    let key_path = data_dir.join("node.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read node.key")?;
        anyhow::ensure!(bytes.len() == 32, "node.key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let key = SecretKey::from_bytes(&arr);
        info!(endpoint_id = %key.public().fmt_short(), "loaded existing node key");
        Ok(key)
    } else {
        let key = random_secret_key();
        std::fs::write(&key_path, key.to_bytes()).context("failed to write node.key")?;
        info!(
            path = %key_path.display(),
            endpoint_id = %key.public().fmt_short(),
            "generated new node key"
        );
        Ok(key)
    }
}

// -----------------------------------------------------------------------
// Offline state commands
// -----------------------------------------------------------------------

fn open_state(config: &CliConfig) -> Result<StateStore> {
    let path = config.state_dir();
    StateStore::open(&path).map_err(|e| {
        anyhow::anyhow!(
            "cannot open state at {}. Is the node running? ({e})",
            path.display(),
        )
    })
}

fn parse_key(order_id: OrderId, cid: &str) -> Result<ShardKey> {
    let cid: Cid = cid.parse().context("invalid cid")?;
    Ok(ShardKey::new(order_id, cid))
}

fn cmd_shard_list(config: &CliConfig) -> Result<()> {
    let state = open_state(config)?;
    let shards = state.list_shards()?;
    println!("Shards: {}", shards.len());
    for shard in &shards {
        println!(
            "  {} data={} state={} retries={} size={}",
            shard.key(),
            shard.data_id,
            shard.state,
            shard.retries,
            shard.size,
        );
    }
    Ok(())
}

fn cmd_shard_status(config: &CliConfig, order_id: OrderId, cid: &str) -> Result<()> {
    let key = parse_key(order_id, cid)?;
    let state = open_state(config)?;
    let Some(shard) = state.get_shard(&key)? else {
        anyhow::bail!("shard {key} not found");
    };
    println!("Shard {key}");
    println!("  data_id:       {}", shard.data_id);
    println!("  gateway:       {}", shard.gateway);
    println!("  state:         {}", shard.state);
    println!("  retries:       {}", shard.retries);
    println!("  expire_at:     {}", shard.expire_at);
    if !shard.complete_hash.is_empty() {
        println!(
            "  completed in:  {} at height {}",
            shard.complete_hash, shard.complete_height
        );
    }
    if !shard.last_error.is_empty() {
        println!("  last error:    {}", shard.last_error);
    }
    Ok(())
}

async fn cmd_shard_fix(config: &CliConfig, order_id: OrderId, cid: &str) -> Result<ShardKey> {
    let key = parse_key(order_id, cid)?;
    let state = open_state(config)?;
    let content = FileStore::new(config.content_dir()).context("failed to open content store")?;
    let Some(mut shard) = state.get_shard(&key)? else {
        anyhow::bail!("shard {key} not found");
    };
    let before = shard.state;
    rederive(&mut shard, &content).await?;
    state.put_shard(&shard)?;
    println!("Shard {key}: {before} -> {}", shard.state);
    Ok(key)
}

fn cmd_migrate_list(config: &CliConfig) -> Result<()> {
    let state = open_state(config)?;
    let migrations = state.list_migrates()?;
    println!("Migrations: {}", migrations.len());
    for m in &migrations {
        println!(
            "  {} order={} to={} state={} retries={}",
            m.key(),
            m.order_id,
            m.to,
            m.state,
            m.retries,
        );
        if !m.last_error.is_empty() {
            println!("    last error: {}", m.last_error);
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
