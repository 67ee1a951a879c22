//! the `run` subcommand - runs the server.

use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::{Context, Result, eyre};
use galadriel_db::GaladrielDb;
use galadriel_types::ServerConfig;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

use crate::AppState;
use crate::bootstrap;
use crate::endpoints::Endpoints;

/// default config file search paths (in order of priority).
const CONFIG_SEARCH_PATHS: &[&str] = &["/etc/galadriel/server.toml", "./server.toml"];

/// run the galadriel server
#[derive(Args, Debug)]
pub struct RunCommand {
    /// path to config file (toml format)
    #[arg(short, long, env = "GALADRIEL_CONFIG")]
    config: Option<PathBuf>,

    /// public tls address of the harvester surface
    #[arg(long, env = "GALADRIEL_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// local address of the admin surface
    #[arg(long, env = "GALADRIEL_ADMIN_LISTEN_ADDRESS")]
    admin_listen_address: Option<String>,

    /// datastore connection string (sqlite:// or postgres://)
    #[arg(long, env = "GALADRIEL_DATASTORE")]
    datastore: Option<String>,

    /// log level
    #[arg(long, env = "GALADRIEL_LOG_LEVEL")]
    log_level: Option<String>,
}

impl RunCommand {
    /// find and load config file, returning none if no config file is found.
    fn load_config_file(config_path: Option<&Path>) -> Result<Option<ServerConfig>> {
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
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = Self::load_config_file(self.config.as_deref())?.unwrap_or_default();

        if let Some(listen_address) = self.listen_address {
            config.listen_address = listen_address;
        }
        if let Some(admin_listen_address) = self.admin_listen_address {
            config.admin_listen_address = admin_listen_address;
        }
        if let Some(datastore) = self.datastore {
            config.datastore = datastore;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        config
            .validate()
            .map_err(|e| eyre!("invalid configuration: {}", e))?;
        Ok(config)
    }

    /// run the server until sigint or sigterm
    pub async fn run(self) -> Result<()> {
        let log_level = init_logging(self.log_level.as_deref())?;
        let config = self.into_config()?;
        log_level.modify(|filter| *filter = level_filter(&config.log_level))?;

        info!("Starting galadriel-server...");
        info!("Harvester surface: {}", config.listen_address);
        info!("Admin surface: {}", config.admin_listen_address);

        ensure_sqlite_dir(&config.datastore)?;
        let db = GaladrielDb::connect(&config.datastore)
            .await
            .context("failed to open datastore")?;

        let key_manager = bootstrap::open_key_manager(&config.key_manager)
            .context("failed to open key manager")?;
        let ca = bootstrap::load_x509_ca(
            &config.x509_ca,
            key_manager.as_ref(),
            config.key_manager.key_type,
        )
        .context("failed to load x509 ca")?;

        let endpoints = Endpoints::bind(&config.admin_listen_address, &config.listen_address)
            .await
            .context("failed to bind listeners")?;
        let state = AppState::new(db, key_manager, ca, config)
            .context("failed to initialize jwt signing key")?;

        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone())?;

        endpoints
            .serve(state, cancel)
            .await
            .context("server error")?;

        info!("galadriel-server stopped");
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<ServerConfig> {
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

/// create the parent directory of a file-backed sqlite datastore.
fn ensure_sqlite_dir(datastore: &str) -> Result<()> {
    let Some(path) = datastore
        .strip_prefix("sqlite://")
        .or_else(|| datastore.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        info!("Creating datastore directory: {:?}", parent);
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create datastore directory: {:?}", parent))?;
    }
    Ok(())
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
