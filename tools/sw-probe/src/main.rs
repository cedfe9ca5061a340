//! Probe for the Ipoteka Krym offline worker.
//!
//! Runs the worker against the live origin and keeps its cache stores in a
//! JSON snapshot between invocations.
//!
//! ## Usage
//!
//! ```bash
//! # Install the current generation and activate it
//! sw-probe install --store sw-cache.json
//!
//! # Route a request through the worker, with or without network
//! sw-probe fetch https://ipoteka-krym.ru/catalog
//! sw-probe fetch https://functions.poehali.dev/properties --offline
//!
//! # Show the notification a push payload would produce
//! sw-probe push --payload '{"title":"Новая ставка","url":"/rates"}'
//!
//! # List stores in the snapshot
//! sw-probe stores
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use ipoteka_common::{init_logging, IpotekaError, LogConfig, LogFormat};
use ipoteka_net::{HttpFetcher, LoaderConfig, NetError};
use ipoteka_sw::{
    CacheStorage, CacheableRequest, CacheableResponse, FetchError, FetchOutcome, Fetcher,
    OfflineWorker, ServiceWorkerError, WorkerConfig, WorkerHost, WorkerId, WorkerServices,
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
enum ProbeError {
    #[error(transparent)]
    Common(#[from] IpotekaError),

    #[error(transparent)]
    Worker(#[from] ServiceWorkerError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    fn category(&self) -> &'static str {
        match self {
            ProbeError::Common(e) | ProbeError::Worker(ServiceWorkerError::Common(e)) => e.category(),
            ProbeError::Worker(_) => "worker",
            ProbeError::Net(_) => "net",
            ProbeError::Json(_) => "json",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sw-probe")]
#[command(about = "Drive the Ipoteka Krym offline worker against a live origin")]
struct Cli {
    /// Worker configuration (JSON); defaults to the deployed settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache snapshot file
    #[arg(short, long, global = true, default_value = "sw-cache.json")]
    store: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a worker generation and activate it
    Install {
        /// Override the static store name
        #[arg(short, long)]
        generation: Option<String>,
    },

    /// Route one request through the worker
    Fetch {
        /// Absolute request URL
        url: String,
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Reject every network fetch
        #[arg(long)]
        offline: bool,
    },

    /// Print the notification built from a push payload
    Push {
        /// Raw payload; omit for an empty push
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List stores and their entries
    Stores,
}

/// Network that rejects every request.
struct Disconnected;

#[async_trait]
impl Fetcher for Disconnected {
    async fn fetch(&self, request: &CacheableRequest) -> Result<CacheableResponse, FetchError> {
        Err(FetchError::Network(format!("offline: {}", request.url)))
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig, ProbeError> {
    let config = match path {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn network(config: &WorkerConfig, offline: bool) -> Result<Arc<dyn Fetcher>, ProbeError> {
    if offline {
        return Ok(Arc::new(Disconnected));
    }
    let fetcher = HttpFetcher::new(LoaderConfig::for_origin(config.origin.clone()))?;
    Ok(Arc::new(fetcher))
}

/// A worker over the stores in the snapshot, without running install.
fn resume_worker(
    config: WorkerConfig,
    store: &Path,
    fetcher: Arc<dyn Fetcher>,
) -> Result<OfflineWorker, ProbeError> {
    let caches = CacheStorage::load_from(store)?;
    let services = WorkerServices::with_caches(fetcher, caches);
    Ok(OfflineWorker::new(WorkerId::new(), Arc::new(config), services)?)
}

async fn save(services: &WorkerServices, store: &Path) -> Result<(), ProbeError> {
    services.caches.read().await.save_to(store)?;
    info!(path = %store.display(), "Snapshot saved");
    Ok(())
}

async fn install(cli: &Cli, generation: Option<&str>) -> Result<(), ProbeError> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(generation) = generation {
        config = config.with_generation(generation);
    }
    let fetcher = network(&config, false)?;
    let caches = CacheStorage::load_from(&cli.store)?;
    let (host, mut events) = WorkerHost::new(WorkerServices::with_caches(fetcher, caches));

    let id = host.deploy(config).await?;
    while let Ok(event) = events.try_recv() {
        println!("event: {event:?}");
    }
    println!("worker {id}: {:?}", host.state(id).await);

    save(host.services(), &cli.store).await
}

async fn fetch(cli: &Cli, url: &str, method: &str, offline: bool) -> Result<(), ProbeError> {
    let config = load_config(cli.config.as_deref())?;
    let fetcher = network(&config, offline)?;
    let request = CacheableRequest::parse(method, url)?;
    let worker = resume_worker(config, &cli.store, fetcher)?;

    match worker.fetch(&request).await? {
        FetchOutcome::NotIntercepted => println!("not intercepted"),
        FetchOutcome::Respond(response) => {
            let source = if response.from_cache { "cache" } else { "network" };
            println!(
                "{} {:?} from {source}, {} bytes",
                response.status,
                response.response_type,
                response.body.len()
            );
        }
    }

    save(worker.services(), &cli.store).await
}

async fn push(cli: &Cli, payload: Option<&str>) -> Result<(), ProbeError> {
    let config = load_config(cli.config.as_deref())?;
    let worker = resume_worker(config, &cli.store, Arc::new(Disconnected))?;
    let notification = worker.push(payload.map(str::as_bytes)).await;
    println!("{}", serde_json::to_string_pretty(&notification)?);
    Ok(())
}

fn stores(cli: &Cli) -> Result<(), ProbeError> {
    let caches = CacheStorage::load_from(&cli.store)?;
    for name in caches.keys() {
        let Some(cache) = caches.get(name) else {
            continue;
        };
        println!("{name} ({} entries)", cache.len());
        for key in cache.keys() {
            println!("  {key}");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), ProbeError> {
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    match &cli.command {
        Commands::Install { generation } => install(&cli, generation.as_deref()).await,
        Commands::Fetch {
            url,
            method,
            offline,
        } => fetch(&cli, url, method, *offline).await,
        Commands::Push { payload } => push(&cli, payload.as_deref()).await,
        Commands::Stores => stores(&cli),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error[{}]: {e}", e.category());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::try_parse_from([
            "sw-probe",
            "-vv",
            "fetch",
            "https://ipoteka-krym.ru/",
            "--offline",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Pretty);
        assert_eq!(cli.store, PathBuf::from("sw-cache.json"));
        match cli.command {
            Commands::Fetch {
                url,
                method,
                offline,
            } => {
                assert_eq!(url, "https://ipoteka-krym.ru/");
                assert_eq!(method, "GET");
                assert!(offline);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_log_format() {
        let cli = Cli::try_parse_from(["sw-probe", "stores", "--log-format", "JSON"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["sw-probe", "stores", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_load_config_rejects_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sw.json");
        std::fs::write(&path, r#"{"api_cache_patterns": ["("]}"#).unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn test_offline_fetch_served_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("sw-cache.json");

        let config = WorkerConfig::default();
        let request = CacheableRequest::get(config.resolve("/index.html").unwrap());
        let mut caches = CacheStorage::new();
        caches
            .open(&config.static_cache)
            .put(&request, &CacheableResponse::new(200, "<html></html>"));
        caches.save_to(&store).unwrap();

        let worker = resume_worker(config, &store, Arc::new(Disconnected)).unwrap();
        let outcome = worker.fetch(&request).await.unwrap();
        let response = outcome.response().unwrap();
        assert!(response.from_cache);
        assert_eq!(&response.body[..], b"<html></html>");
    }

    #[tokio::test]
    async fn test_disconnected_rejects() {
        let request = CacheableRequest::get("https://ipoteka-krym.ru/".parse().unwrap());
        assert!(Disconnected.fetch(&request).await.is_err());
    }
}
