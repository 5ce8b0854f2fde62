//! Command line front end for the swcache precache worker.
//!
//! ## Usage
//!
//! ```bash
//! # Print every precached URL and its versioned cache key
//! swcache keys --location http://localhost:8123/service_worker.js
//!
//! # Show how the fetch router treats a navigation
//! swcache resolve http://localhost:8123/history --navigate
//!
//! # Precache from a live origin into a directory, then prune
//! swcache install --cache-dir .swcache
//!
//! # Prune entries no longer referenced by the manifest
//! swcache prune --cache-dir .swcache
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use swcache_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use swcache_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use swcache_sw::{
    EventOutcome, FsCacheStorage, InProcessHost, Manifest, ServiceWorker, WorkerEvent,
};
use tracing::{debug, info};
use url::Url;

/// Manifest of the bundled frontend, used when `--manifest` is not given.
const FRONTEND_MANIFEST: &str = include_str!("../frontend-manifest.json");

#[derive(Parser)]
#[command(name = "swcache")]
#[command(about = "Precache service worker: cache keys, routing, install and prune")]
#[command(version)]
struct Cli {
    /// Worker config file (JSON). Falls back to $SWCACHE_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = Format::Compact, global = true)]
    log_format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

/// Options shared by every command.
#[derive(Args)]
struct WorkerArgs {
    /// Precache manifest (JSON array of [path, hash])
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// URL the worker script is served from
    #[arg(short, long, default_value = "http://localhost:8123/service_worker.js")]
    location: Url,

    /// Registration scope used in the cache name
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print each precached URL and its cache key
    Keys {
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Show which cache entry a request would be served from
    Resolve {
        /// Request URL
        url: Url,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Precache every missing entry from the origin into a cache directory
    Install {
        /// Cache storage directory
        #[arg(short, long)]
        cache_dir: PathBuf,
        /// Keep entries from older manifests
        #[arg(long)]
        no_activate: bool,
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Delete cache entries the manifest no longer references
    Prune {
        /// Cache storage directory
        #[arg(short, long)]
        cache_dir: PathBuf,
        #[command(flatten)]
        worker: WorkerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into()));

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "Loaded worker config");

    match cli.command {
        Commands::Keys { worker } => {
            let sw = build_worker(&config, &worker, None).await?;
            for (url, key) in sw.manifest().resolution_map() {
                println!("{url} -> {key}");
            }
        }

        Commands::Resolve {
            url,
            navigate,
            worker,
        } => {
            let sw = build_worker(&config, &worker, None).await?;
            let request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            match sw.router().resolve(&request) {
                Some(resolution) => println!(
                    "{:?} {} -> {}",
                    resolution.matched_by, resolution.url, resolution.cache_key
                ),
                None => println!("passthrough"),
            }
        }

        Commands::Install {
            cache_dir,
            no_activate,
            worker,
        } => {
            let sw = build_worker(&config, &worker, Some(&cache_dir)).await?;
            if let EventOutcome::Installed(report) = sw.dispatch(WorkerEvent::Install).await? {
                println!(
                    "installed {}: {} fetched, {} already cached",
                    sw.cache_name(),
                    report.fetched,
                    report.already_cached
                );
            }
            if !no_activate {
                activate(&sw).await?;
            }
        }

        Commands::Prune { cache_dir, worker } => {
            let sw = build_worker(&config, &worker, Some(&cache_dir)).await?;
            activate(&sw).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => WorkerConfig::from_env().context("loading config from SWCACHE_CONFIG"),
    }
}

fn load_manifest(path: Option<&Path>) -> Result<Manifest> {
    match path {
        Some(path) => Manifest::from_file(path)
            .with_context(|| format!("loading manifest {}", path.display())),
        None => Manifest::from_json(FRONTEND_MANIFEST).context("parsing bundled manifest"),
    }
}

/// Build a worker; with a cache directory its storage is on disk.
async fn build_worker(
    config: &WorkerConfig,
    args: &WorkerArgs,
    cache_dir: Option<&Path>,
) -> Result<ServiceWorker> {
    let manifest = load_manifest(args.manifest.as_deref())?;
    let network: Arc<dyn Fetcher> = Arc::new(ResourceLoader::new(LoaderConfig::from(&config.http))?);

    let mut builder = ServiceWorker::builder(config.clone(), args.location.clone())
        .manifest(manifest)
        .network(network.clone())
        .in_process(Arc::new(InProcessHost::new()));
    if let Some(scope) = &args.scope {
        builder = builder.scope(scope.clone());
    }
    if let Some(dir) = cache_dir {
        let storage = FsCacheStorage::new(dir, network)
            .await
            .with_context(|| format!("opening cache directory {}", dir.display()))?;
        info!(dir = %storage.root().display(), "Using on-disk cache storage");
        builder = builder.storage(Arc::new(storage));
    }

    Ok(builder.build()?)
}

async fn activate(sw: &ServiceWorker) -> Result<()> {
    if let EventOutcome::Activated(report) = sw.dispatch(WorkerEvent::Activate).await? {
        println!(
            "pruned {}: {} deleted, {} retained",
            sw.cache_name(),
            report.deleted,
            report.retained
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_manifest_parses() {
        let manifest = load_manifest(None).unwrap();
        assert_eq!(manifest.entries()[0].path, "/");
        assert!(manifest
            .entries()
            .iter()
            .any(|entry| entry.path == "static/icons/favicon.ico"));
    }

    #[test]
    fn test_cli_parses_install() {
        let cli = Cli::try_parse_from([
            "swcache",
            "-vv",
            "install",
            "--cache-dir",
            "/tmp/cache",
            "--no-activate",
            "--location",
            "https://hass.local/service_worker.js",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Install {
                no_activate, worker, ..
            } => {
                assert!(no_activate);
                assert_eq!(worker.location.as_str(), "https://hass.local/service_worker.js");
            }
            _ => panic!("expected install"),
        }
    }

    #[tokio::test]
    async fn test_keys_for_bundled_manifest() {
        let args = WorkerArgs {
            manifest: None,
            location: Url::parse("https://hass.local/service_worker.js").unwrap(),
            scope: None,
        };
        let sw = build_worker(&WorkerConfig::default(), &args, None).await.unwrap();
        assert_eq!(
            sw.manifest().cache_key_for("https://hass.local/"),
            Some("https://hass.local/?_sw-precache=0899bec0981cfd4ced9d5c4415c727f7")
        );
    }

    #[tokio::test]
    async fn test_prune_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let args = WorkerArgs {
            manifest: None,
            location: Url::parse("https://hass.local/service_worker.js").unwrap(),
            scope: Some("https://hass.local/".to_string()),
        };
        let sw = build_worker(&WorkerConfig::default(), &args, Some(dir.path()))
            .await
            .unwrap();
        activate(&sw).await.unwrap();
        assert_eq!(sw.cache_name(), "sw-precache-v2--https://hass.local/");
    }
}
