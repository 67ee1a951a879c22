//! the `run` subcommand - runs the harvester next to a spire server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Context, Result, eyre};
use galadriel_types::HarvesterConfig;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

use crate::api::{self, LocalApi};
use crate::client::GaladrielClient;
use crate::credentials::{self, CredentialStore};
use crate::providers::{self, VerificationPolicy};
use crate::reconcile::{FederatedBundleSync, SelfBundleSync};
use crate::spire::GrpcSpireServer;

/// default config file search paths (in order of priority).
const CONFIG_SEARCH_PATHS: &[&str] = &["/etc/galadriel/harvester.toml", "./harvester.toml"];

/// how long background tasks get to stop after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// run the galadriel harvester
#[derive(Args, Debug)]
pub struct RunCommand {
    /// path to config file (toml format)
    #[arg(short, long, env = "GALADRIEL_HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    /// join token used to onboard when no valid certificate is stored
    #[arg(long, env = "GALADRIEL_JOIN_TOKEN")]
    join_token: Option<String>,

    /// trust domain of the colocated spire server
    #[arg(long, env = "GALADRIEL_TRUST_DOMAIN")]
    trust_domain: Option<String>,

    /// host:port of the galadriel server
    #[arg(long, env = "GALADRIEL_SERVER_ADDRESS")]
    server_address: Option<String>,

    /// unix socket of the spire server api
    #[arg(long, env = "GALADRIEL_SPIRE_SOCKET")]
    spire_socket_path: Option<PathBuf>,

    /// directory holding the harvester key and certificate
    #[arg(long, env = "GALADRIEL_HARVESTER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// log level
    #[arg(long, env = "GALADRIEL_LOG_LEVEL")]
    log_level: Option<String>,
}

impl RunCommand {
    /// find and load config file, returning none if no config file is found.
    fn load_config_file(config_path: Option<&Path>) -> Result<Option<HarvesterConfig>> {
        // if explicit path provided, it must exist
        if let Some(path) = config_path {
            return read_config(path).map(Some);
        }

        for path in CONFIG_SEARCH_PATHS.iter().map(Path::new) {
            if path.exists() {
                debug!("Found config file at {:?}", path);
                return read_config(path).map(Some);
            }
        }

        Ok(None)
    }

    /// convert cli arguments into a config struct, merging with config file if present.
    ///
    /// priority order: defaults -> config file -> cli flags
    fn into_config(self) -> Result<HarvesterConfig> {
        let mut config = Self::load_config_file(self.config.as_deref())?.unwrap_or_default();

        if let Some(trust_domain) = self.trust_domain {
            config.trust_domain = Some(
                trust_domain
                    .parse()
                    .map_err(|e| eyre!("invalid --trust-domain: {}", e))?,
            );
        }
        if let Some(server_address) = self.server_address {
            config.galadriel_server_address = server_address;
        }
        if let Some(spire_socket_path) = self.spire_socket_path {
            config.spire_socket_path = spire_socket_path;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        config
            .validate()
            .map_err(|e| eyre!("invalid configuration: {}", e))?;
        Ok(config)
    }

    /// run the harvester until sigint or sigterm
    pub async fn run(mut self) -> Result<()> {
        let join_token = self.join_token.take();
        let log_level = init_logging(self.log_level.as_deref())?;
        let config = self.into_config()?;
        log_level.modify(|filter| *filter = level_filter(&config.log_level))?;

        let trust_domain = config
            .trust_domain()
            .map_err(|e| eyre!("invalid configuration: {}", e))?
            .clone();
        info!("Starting galadriel-harvester for {}...", trust_domain);
        info!("Galadriel server: {}", config.galadriel_server_address);
        info!("SPIRE socket: {:?}", config.spire_socket_path);

        let client =
            Arc::new(GaladrielClient::new(&config).context("failed to create server client")?);
        let store = Arc::new(
            CredentialStore::open(&config.data_dir, trust_domain.clone())
                .context("failed to open data directory")?,
        );
        let credentials = credentials::bootstrap(&store, &client, join_token.as_deref())
            .await
            .context("failed to obtain harvester credentials")?;

        let spire = Arc::new(
            GrpcSpireServer::connect_unix(&config.spire_socket_path)
                .context("failed to set up spire client")?,
        );
        let signer = providers::load_signer(&config.providers.bundle_signer)
            .context("failed to load bundle signer")?;
        let policy =
            VerificationPolicy::from_config(&config).context("failed to load bundle verifiers")?;
        if !policy.is_enforced() {
            warn!("Peer bundles are installed without signature verification");
        }

        let local_api = LocalApi::bind(&config.harvester_socket_path).with_context(|| {
            format!(
                "failed to bind local api socket {:?}",
                config.harvester_socket_path
            )
        })?;

        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone())?;

        let tracker = TaskTracker::new();
        tracker.spawn(credentials::renew_loop(
            store,
            client.clone(),
            credentials,
            cancel.clone(),
        ));
        tracker.spawn(
            SelfBundleSync::new(spire.clone(), client.clone(), trust_domain.clone(), signer)
                .run(config.spire_bundle_poll_interval, cancel.clone()),
        );
        tracker.spawn(
            FederatedBundleSync::new(spire, client.clone(), trust_domain, policy)
                .run(config.federated_bundles_poll_interval, cancel.clone()),
        );
        let app = api::create_local_app(client);
        let api_cancel = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = local_api.serve(app, api_cancel.clone()).await {
                error!("Local api failed: {}", e);
                api_cancel.cancel();
            }
        });
        tracker.close();

        cancel.cancelled().await;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, tracker.wait())
            .await
            .is_err()
        {
            warn!("Background tasks did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }

        info!("galadriel-harvester stopped");
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<HarvesterConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file: {:?}", path))
}

/// install the global subscriber before the config file is read, at the
/// `--log-level` level or info. the handle applies the configured level later.
fn init_logging(flag: Option<&str>) -> Result<reload::Handle<LevelFilter, Registry>> {
    let (filter, handle) = reload::Layer::new(level_filter(flag.unwrap_or("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()?;
    Ok(handle)
}

fn level_filter(level: &str) -> LevelFilter {
    LevelFilter::from_level(parse_level(level))
}

/// map a config log level to a tracing level, falling back to info.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Failed to listen for SIGINT: {}", e);
                }
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}
