mod auth;
mod config;
mod http;
mod logger;
#[cfg(feature = "metrics")]
mod metrics;
mod reconcile;
mod settlement;
mod signal;
mod state;
mod store;

use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::SetLoggerError;
use tennis_tournament_api::{MatchId, PlayerId, Role};
use tennis_tournament_core::PolicyError;
use thiserror::Error;

use crate::auth::{AuthError, Authorization};
use crate::config::{Config, ConfigError};
use crate::http::StatusCodeError;
use crate::settlement::{SettleMatch, SettlementError};
use crate::store::StoreError;

pub use state::State;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the config file. Without a config file the config is read from the environment.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Run a single rating reconciliation pass.
    Reconcile,
    /// Settle a match.
    Settle {
        match_id: MatchId,
        winner_id: PlayerId,
        #[arg(default_value = "")]
        score: String,
        /// The loser retired.
        #[arg(long)]
        retirement: bool,
    },
    /// Create a signed auth token.
    Token {
        #[arg(long)]
        sub: PlayerId,
        #[arg(long, default_value = "admin")]
        role: Role,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(err) = run(args).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let config = load_config(&args.config).await?;
    logger::init(config.loglevel)?;

    log::debug!(
        "Using config: bind = {}, driver = {}, rating = {:?}, settlement = {:?}",
        config.bind,
        config.database.driver,
        config.rating,
        config.settlement
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = open(config).await?;

            let shutdown_rx = signal::spawn();
            http::bind(state.config.bind, state, shutdown_rx).await?;

            log::info!("Server stopped");
        }
        Command::Reconcile => {
            let state = open(config).await?;

            let report = state.reconciler.run().await?;
            println!(
                "processed: {}, skipped: {}, players updated: {}",
                report.processed, report.skipped, report.players_updated
            );
        }
        Command::Settle {
            match_id,
            winner_id,
            score,
            retirement,
        } => {
            let state = open(config).await?;

            let settled = state
                .settlement
                .settle(SettleMatch {
                    match_id,
                    winner_id,
                    score,
                    is_retirement: retirement,
                })
                .await?;

            println!("{}", settled.message());
        }
        Command::Token { sub, role } => {
            let auth = Authorization::new(
                config.authorization.alg,
                config.authorization.secret.as_bytes(),
            );

            println!("{}", auth.create_token(sub, role)?);
        }
    }

    Ok(())
}

/// Reads the config file at `path`, falling back to the environment if it doesn't exist.
async fn load_config(path: &Path) -> Result<Config, Error> {
    match Config::from_file(path).await {
        Ok(config) => Ok(config.with_environment()),
        Err(ConfigError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
            Ok(Config::from_environment()?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Connects to the store, creates missing tables and builds the [`State`].
async fn open(config: Config) -> Result<State, Error> {
    let store = store::connect(&config.database)?;

    let state = State::new(config, store)?;
    state.store.migrate().await?;

    Ok(state)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error("failed to load config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to initialize logger: {0}")]
    Logger(#[from] SetLoggerError),
    #[error("invalid rating policy: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    StatusCodeError(#[from] StatusCodeError),
}
