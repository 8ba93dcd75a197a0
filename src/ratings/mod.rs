pub mod elo;

pub use elo::{EloConfig, RatingTable};

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use crate::db::models::{GameId, ManifestEntry, RatingRow};

/// A manifest game with every field rating depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct RatedGame {
    pub game_id: GameId,
    pub game_date: NaiveDate,
    pub season_id: String,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_won: bool,
}

impl RatedGame {
    /// `None` when the row lacks season, date, either team, or any outcome.
    pub fn from_manifest(entry: &ManifestEntry) -> Option<Self> {
        Some(RatedGame {
            game_id: entry.game_id.clone(),
            game_date: entry.game_date?,
            season_id: entry.season_id.clone()?,
            home_team_id: entry.home_team_id?,
            away_team_id: entry.away_team_id?,
            home_won: entry.home_won()?,
        })
    }
}

/// Manifest games grouped into independent season pools.
#[derive(Debug, Clone, Default)]
pub struct SeasonPools {
    pub seasons: BTreeMap<String, Vec<RatedGame>>,
    /// Rows missing season, date or a team id
    pub dropped_incomplete: usize,
    /// Complete rows with neither a win flag nor final points
    pub dropped_no_outcome: usize,
}

impl SeasonPools {
    pub fn from_manifest(manifest: &[ManifestEntry]) -> Self {
        let mut pools = SeasonPools::default();
        for entry in manifest {
            let complete = entry.game_date.is_some()
                && entry.season_id.is_some()
                && entry.home_team_id.is_some()
                && entry.away_team_id.is_some();
            if !complete {
                debug!("Dropping incomplete manifest row {}", entry.game_id);
                pools.dropped_incomplete += 1;
                continue;
            }
            match RatedGame::from_manifest(entry) {
                Some(game) => pools
                    .seasons
                    .entry(game.season_id.clone())
                    .or_default()
                    .push(game),
                None => {
                    debug!("Dropping manifest row {} with no outcome", entry.game_id);
                    pools.dropped_no_outcome += 1;
                }
            }
        }
        pools
    }

    pub fn games(&self) -> usize {
        self.seasons.values().map(Vec::len).sum()
    }

    pub fn dropped(&self) -> usize {
        self.dropped_incomplete + self.dropped_no_outcome
    }
}

/// Rate one season in `(game_date, game_id)` order with a fresh table.
/// Returns each game's pre-game ratings in that order.
pub fn rate_season(mut games: Vec<RatedGame>, cfg: EloConfig) -> Vec<RatingRow> {
    games.sort_by(|a, b| {
        a.game_date
            .cmp(&b.game_date)
            .then_with(|| a.game_id.cmp(&b.game_id))
    });

    let mut table = RatingTable::new(cfg);
    let rows: Vec<RatingRow> = games
        .into_iter()
        .map(|g| {
            let (home_elo, away_elo) = table.apply_game(g.home_team_id, g.away_team_id, g.home_won);
            RatingRow {
                game_id: g.game_id,
                season_id: g.season_id,
                home_elo,
                away_elo,
            }
        })
        .collect();
    debug!("Rated {} games across {} teams", rows.len(), table.teams());
    rows
}
