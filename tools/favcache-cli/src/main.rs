//! Command-line host for the favcache offline favorites worker.
//!
//! Keeps favorites, cache stores and worker state in a data directory so
//! the worker can be started once and then serve fetches across runs.
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate against the configured scope
//! favcache --config favcache.json start
//!
//! # Route one request through the worker
//! favcache fetch http://localhost:8080/assets/style.css
//!
//! # Manage favorites
//! favcache favorite add 42 --fallback https://media.test/42.gif \
//!     --source https://media.test/42.webp
//! favcache favorite list
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use favcache_common::init_logging;
use favcache_core::{FavoriteRecord, WorkerConfig};
use favcache_net::Request;
use favcache_sw::{FavoritesController, ServiceWorkerState, WorkerEvent};
use tracing::{info, warn};

mod host;

use host::{Host, HostError};

#[derive(Parser)]
#[command(name = "favcache")]
#[command(about = "Offline favorites cache worker")]
struct Cli {
    /// Worker config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level, overrides the config
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the worker
    Start,

    /// Route one GET request through the activated worker
    Fetch {
        /// Request URL
        url: String,
    },

    /// Manage favorites
    Favorite {
        #[command(subcommand)]
        command: FavoriteCommands,
    },

    /// List cache stores and their entry counts
    Caches,
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Add a favorite and cache its images
    Add {
        /// Favorite id
        id: String,
        /// Fallback image URL
        #[arg(long)]
        fallback: String,
        /// Additional source URLs
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Remove a favorite
    Remove {
        /// Favorite id
        id: String,
    },

    /// List favorites
    List,
}

fn load_config(cli: &Cli) -> Result<WorkerConfig, HostError> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::load(path)?,
        None => {
            let mut config = WorkerConfig::default();
            config.apply_env();
            config.validate()?;
            config
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log = config.log.with_level(level.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(config.log.clone());

    let host = Host::open(config)?;

    match cli.command {
        Commands::Start => start(&host).await?,
        Commands::Fetch { url } => fetch(&host, &url).await?,
        Commands::Favorite { command } => favorite(&host, command).await?,
        Commands::Caches => caches(&host).await,
    }

    Ok(())
}

async fn start(host: &Host) -> Result<(), HostError> {
    let (worker, mut events) = host.worker()?;
    let result = worker.start().await;

    // Failed installs still leave their partial writes behind.
    host.save_caches().await?;
    host.save_state(worker.state().await)?;

    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::CachesEvicted { names } = event {
            println!("Evicted: {}", names.join(", "));
        }
    }

    result?;
    println!(
        "Worker {} for {} (cache {})",
        ServiceWorkerState::Activated,
        worker.scope(),
        host.config.cache_version
    );
    Ok(())
}

async fn fetch(host: &Host, url: &str) -> Result<(), HostError> {
    let worker = host.require_worker().await?;
    let response = worker.handle_fetch(Request::parse(url)?).await?;
    host.save_caches().await?;

    println!(
        "{} {} ({} bytes, {})",
        response.status,
        response.url,
        response.body.len(),
        if response.from_cache { "cache" } else { "network" }
    );
    Ok(())
}

async fn favorite(host: &Host, command: FavoriteCommands) -> Result<(), HostError> {
    let registry = host.registry();

    match command {
        FavoriteCommands::Add { id, fallback, sources } => {
            let record = sources
                .iter()
                .fold(FavoriteRecord::new(id.as_str(), fallback), |record, url| {
                    record.with_source(url.as_str(), None)
                });

            // Without an activated worker the record is stored and cached on
            // the next `start`.
            let worker = host.resume_worker().await?.map(Arc::new);
            let mut page = FavoritesController::new(registry);
            let mut task = None;
            if let Some(worker) = worker {
                let (handle, join) = worker.spawn_message_loop();
                page = page.with_worker(handle);
                task = Some(join);
            }

            page.add_to_favorites(&id, &record).await?;
            drop(page);
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "Message loop ended abnormally");
                }
                host.save_caches().await?;
            }
            info!(id = %id, images = record.image_urls().len(), "Favorite added");
            println!("Added {}", id);
        }

        FavoriteCommands::Remove { id } => {
            FavoritesController::new(registry).remove_from_favorites(&id).await?;
            println!("Removed {}", id);
        }

        FavoriteCommands::List => {
            for record in registry.list_all().await? {
                println!("{}\t{}", record.id, record.image_urls().join(" "));
            }
        }
    }

    Ok(())
}

async fn caches(host: &Host) {
    let caches = host.caches.read().await;
    for name in caches.keys() {
        let count = caches.get(name).map(|c| c.len()).unwrap_or(0);
        let marker = if name == host.config.cache_version { "*" } else { " " };
        println!("{} {}\t{} entries", marker, name, count);
    }
}
