use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::db::models::{CanonicalEvent, GameId, GameOutcome, ManifestEntry};
use crate::db::{Database, Stats};
use crate::error::PipelineError;
use crate::pipeline::is_not_found;
use crate::replay::{initial_state, replay_game, GameState, PregameRatings, ReplayStep};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Build the Axum router for the read-only API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/games", get(games_handler))
        .route("/api/games/:game_id", get(game_handler))
        .route("/api/games/:game_id/events", get(events_handler))
        .route("/api/games/:game_id/states", get(states_handler))
        .route("/api/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn api_error(e: anyhow::Error) -> (StatusCode, String) {
    if is_not_found(&e) {
        (StatusCode::NOT_FOUND, e.to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    }
}

fn parse_game_id(raw: &str) -> Result<GameId, (StatusCode, String)> {
    GameId::parse(raw).ok_or_else(|| (StatusCode::BAD_REQUEST, "empty game id".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct GamesQuery {
    pub team: Option<String>,
}

/// GET /api/games?team=ABBR
async fn games_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GamesQuery>,
) -> ApiResult<Vec<ManifestEntry>> {
    state
        .db
        .list_games(query.team.as_deref())
        .map(Json)
        .map_err(api_error)
}

/// GET /api/games/:game_id
async fn game_handler(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> ApiResult<ManifestEntry> {
    let game_id = parse_game_id(&game_id)?;
    match state.db.get_game(&game_id).map_err(api_error)? {
        Some(game) => Ok(Json(game)),
        None => Err(api_error(
            PipelineError::not_found("game", game_id.to_string()).into(),
        )),
    }
}

/// GET /api/games/:game_id/events
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> ApiResult<Vec<CanonicalEvent>> {
    let game_id = parse_game_id(&game_id)?;
    state.db.load_game_events(&game_id).map(Json).map_err(api_error)
}

#[derive(Debug, Serialize)]
pub struct GameStates {
    pub game_id: GameId,
    pub outcome: Option<GameOutcome>,
    pub ratings: Option<PregameRatings>,
    pub initial: GameState,
    pub steps: Vec<ReplayStep>,
}

/// GET /api/games/:game_id/states
async fn states_handler(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> ApiResult<GameStates> {
    let game_id = parse_game_id(&game_id)?;
    let events = state.db.load_game_events(&game_id).map_err(api_error)?;
    let outcome = state.db.get_outcome(&game_id).map_err(api_error)?;
    let ratings = state
        .db
        .get_rating(&game_id)
        .map_err(api_error)?
        .map(|r| PregameRatings {
            home_elo: r.home_elo,
            away_elo: r.away_elo,
        });
    Ok(Json(GameStates {
        steps: replay_game(&events),
        initial: initial_state(),
        game_id,
        outcome,
        ratings,
    }))
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<Stats> {
    state.db.get_stats().map(Json).map_err(api_error)
}
