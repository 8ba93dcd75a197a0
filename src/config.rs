use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::PipelineError;
use crate::ratings::EloConfig;

/// Basketball play-by-play normaliser, game-state replayer and Elo rater
#[derive(Parser, Debug, Clone)]
#[command(name = "pbp-replay", version, about)]
pub struct Config {
    /// Directory holding raw game artifacts and games_manifest.csv
    #[arg(long, env = "PBP_RAW_DIR", default_value = "data/raw", global = true)]
    pub raw_dir: PathBuf,

    /// SQLite database path
    #[arg(
        long,
        env = "PBP_DATABASE_PATH",
        default_value = "data/parsed/pbp.db",
        global = true
    )]
    pub database_path: String,

    /// Elo update step size
    #[arg(long, env = "PBP_ELO_K", default_value = "20", global = true)]
    pub elo_k: f64,

    /// Rating every team starts a season with
    #[arg(long, env = "PBP_ELO_INITIAL", default_value = "1500", global = true)]
    pub elo_initial: f64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Normalise every raw game artifact into the store
    Parse {
        /// Also export canonical events with labels as CSV
        #[arg(long, env = "PBP_EVENTS_CSV")]
        events_csv: Option<PathBuf>,
    },
    /// Compute per-season pre-game ratings from the manifest
    Ratings {
        /// Also export ratings as CSV
        #[arg(long, env = "PBP_RATINGS_CSV")]
        output: Option<PathBuf>,
    },
    /// Replay stored games into the training dataset
    Replay(ReplayArgs),
    /// Parse, rate, then replay
    Run(ReplayArgs),
    /// Serve the read-only HTTP API over the store
    Serve {
        /// Listen address
        #[arg(long, env = "PBP_API_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Training dataset CSV path
    #[arg(
        long,
        env = "PBP_TRAINING_CSV",
        default_value = "data/parsed/training_dataset.csv"
    )]
    pub output: PathBuf,

    /// Keep every N-th event per game (1 keeps all)
    #[arg(long, env = "PBP_EVERY_N", default_value = "1")]
    pub every_n: usize,

    /// Replay only the first N games
    #[arg(long, env = "PBP_LIMIT_GAMES")]
    pub limit_games: Option<usize>,

    /// Leave pre-game ratings out of the dataset
    #[arg(long, env = "PBP_NO_ELO", default_value = "false")]
    pub no_elo: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.elo_k.is_finite() || self.elo_k <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "elo_k must be a positive number, got {}",
                self.elo_k
            )));
        }
        if !self.elo_initial.is_finite() {
            return Err(PipelineError::InvalidConfig(
                "elo_initial must be finite".to_string(),
            ));
        }
        if let Command::Replay(args) | Command::Run(args) = &self.command {
            if args.every_n == 0 {
                return Err(PipelineError::InvalidConfig(
                    "every_n must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn elo(&self) -> EloConfig {
        EloConfig {
            k: self.elo_k,
            initial: self.elo_initial,
        }
    }
}
