//! Elo team ratings, scoped to one season.
//!
//! Expected score for A against B:
//!   E_A = 1 / (1 + 10^((R_B − R_A) / 400))
//! After the game each side moves by K × (actual − expected), actual being
//! 1 for a win and 0 for a loss.

use std::collections::HashMap;

/// Rating every team starts a season with.
pub const INITIAL_RATING: f64 = 1500.0;
/// Update step size.
pub const K_FACTOR: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloConfig {
    pub k: f64,
    pub initial: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: K_FACTOR,
            initial: INITIAL_RATING,
        }
    }
}

/// Probability-like expected score of a team rated `r_a` against `r_b`.
pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((r_b - r_a) / 400.0))
}

/// Mutable team → rating map for a single season. Build a fresh one per
/// season and drop it when the season is done; nothing carries over.
#[derive(Debug, Clone)]
pub struct RatingTable {
    cfg: EloConfig,
    ratings: HashMap<i64, f64>,
}

impl RatingTable {
    pub fn new(cfg: EloConfig) -> Self {
        RatingTable {
            cfg,
            ratings: HashMap::new(),
        }
    }

    /// Current rating; a team not seen yet this season has the initial rating.
    pub fn rating(&self, team_id: i64) -> f64 {
        self.ratings.get(&team_id).copied().unwrap_or(self.cfg.initial)
    }

    pub fn teams(&self) -> usize {
        self.ratings.len()
    }

    /// Apply one finished game and return both teams' pre-game ratings
    /// `(home, away)`.
    pub fn apply_game(&mut self, home_team: i64, away_team: i64, home_won: bool) -> (f64, f64) {
        let home_elo = self.rating(home_team);
        let away_elo = self.rating(away_team);

        let expected_home = expected_score(home_elo, away_elo);
        let expected_away = expected_score(away_elo, home_elo);
        let actual_home = if home_won { 1.0 } else { 0.0 };

        self.ratings
            .insert(home_team, home_elo + self.cfg.k * (actual_home - expected_home));
        self.ratings.insert(
            away_team,
            away_elo + self.cfg.k * ((1.0 - actual_home) - expected_away),
        );
        (home_elo, away_elo)
    }
}
