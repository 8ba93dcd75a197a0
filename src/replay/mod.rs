pub mod game_state;

pub use game_state::{initial_state, state_for, to_features, Features, GameState};

use serde::Serialize;

use crate::db::models::{CanonicalEvent, GameId};

/// State and features after one event of a replayed game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep {
    pub event_num: i64,
    pub state: GameState,
    pub features: Features,
}

/// Replay an ordered event list. No state is threaded between events, so the
/// same input always gives the same output and games replay independently.
pub fn replay_game(events: &[CanonicalEvent]) -> Vec<ReplayStep> {
    events
        .iter()
        .map(|ev| {
            let state = state_for(ev);
            ReplayStep {
                event_num: ev.event_num,
                features: to_features(&state),
                state,
            }
        })
        .collect()
}

/// Pre-game ratings joined onto every training row of a game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PregameRatings {
    pub home_elo: f64,
    pub away_elo: f64,
}

impl PregameRatings {
    pub fn initial(rating: f64) -> Self {
        PregameRatings {
            home_elo: rating,
            away_elo: rating,
        }
    }
}

/// One model-ready row: replayed features plus the game's label.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub game_id: GameId,
    pub event_num: i64,
    pub label_home_win: u8,
    pub features: Features,
    pub ratings: Option<PregameRatings>,
}

impl TrainingRow {
    pub fn header(with_ratings: bool) -> Vec<&'static str> {
        let mut cols = vec!["game_id", "event_num", "label_home_win"];
        cols.extend(Features::KEYS);
        if with_ratings {
            cols.extend(["home_elo", "away_elo"]);
        }
        cols
    }

}

/// Replay one game into training rows, keeping every `every_n`-th event
/// (1 keeps all).
pub fn training_rows_for_game(
    game_id: &GameId,
    events: &[CanonicalEvent],
    label_home_win: u8,
    ratings: Option<PregameRatings>,
    every_n: usize,
) -> Vec<TrainingRow> {
    let every_n = every_n.max(1);
    replay_game(events)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| (i + 1) % every_n == 0)
        .map(|(_, step)| TrainingRow {
            game_id: game_id.clone(),
            event_num: step.event_num,
            label_home_win,
            features: step.features,
            ratings,
        })
        .collect()
}
