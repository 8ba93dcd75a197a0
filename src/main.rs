use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod feeds;
mod pipeline;
mod ratings;
mod replay;

use api::AppState;
use config::{Command, Config, ReplayArgs};
use db::Database;
use pipeline::ReplayOptions;

fn replay_options(args: &ReplayArgs, config: &Config) -> ReplayOptions {
    ReplayOptions {
        output: args.output.clone(),
        every_n: args.every_n,
        limit_games: args.limit_games,
        with_ratings: !args.no_elo,
        default_rating: config.elo_initial,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    match &config.command {
        Command::Parse { events_csv } => {
            pipeline::parse_all_games(&db, &config.raw_dir, events_csv.as_deref())
                .await
                .context("parse failed")?;
        }
        Command::Ratings { output } => {
            pipeline::compute_ratings(&db, &config.raw_dir, config.elo(), output.as_deref())
                .await
                .context("ratings failed")?;
        }
        Command::Replay(args) => {
            pipeline::replay_games(&db, &replay_options(args, &config))
                .await
                .context("replay failed")?;
        }
        Command::Run(args) => {
            let runs = pipeline::run_all(
                &db,
                &config.raw_dir,
                config.elo(),
                &replay_options(args, &config),
            )
            .await?;
            info!("Pipeline complete ({} stages)", runs.len());
        }
        Command::Serve { addr } => {
            let app = api::router(AppState { db: db.clone() });
            let addr: SocketAddr = addr.parse().with_context(|| format!("bad listen address {addr}"))?;
            info!("API listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
