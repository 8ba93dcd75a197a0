use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

use crate::db::models::{LabeledEvent, RatingRow};
use crate::replay::TrainingRow;

fn create_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))
}

// Every writer goes through `serialize`, so a float reads the same in each
// output ("685.0", "2880.0", "1490.0").

/// Canonical events with each game's label and final score appended.
pub fn write_labeled_events(path: &Path, events: &[LabeledEvent]) -> Result<usize> {
    let mut wtr = create_writer(path)?;
    for ev in events {
        wtr.serialize(ev)?;
    }
    wtr.flush()?;
    Ok(events.len())
}

/// Pre-game ratings, one row per game: `game_id,home_elo,away_elo`.
pub fn write_ratings(path: &Path, rows: &[RatingRow]) -> Result<usize> {
    let mut wtr = create_writer(path)?;
    wtr.write_record(["game_id", "home_elo", "away_elo"])?;
    for r in rows {
        wtr.serialize((&r.game_id, r.home_elo, r.away_elo))?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Training rows in `TrainingRow::header` column order. A game without
/// ratings leaves both rating cells blank.
pub fn write_training_rows(path: &Path, rows: &[TrainingRow], with_ratings: bool) -> Result<usize> {
    let mut wtr = create_writer(path)?;
    wtr.write_record(TrainingRow::header(with_ratings))?;
    for row in rows {
        let f = &row.features;
        if with_ratings {
            wtr.serialize((
                &row.game_id,
                row.event_num,
                row.label_home_win,
                f.time_remaining_sec,
                f.score_diff,
                f.period,
                f.possession_home,
                f.is_home_court,
                row.ratings.map(|r| r.home_elo),
                row.ratings.map(|r| r.away_elo),
            ))?;
        } else {
            wtr.serialize((
                &row.game_id,
                row.event_num,
                row.label_home_win,
                f.time_remaining_sec,
                f.score_diff,
                f.period,
                f.possession_home,
                f.is_home_court,
            ))?;
        }
    }
    wtr.flush()?;
    Ok(rows.len())
}
