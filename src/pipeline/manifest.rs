use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::db::models::{GameId, ManifestEntry};
use crate::error::PipelineError;
use crate::feeds::stats::parse_lenient_int;
use crate::feeds::MANIFEST_FILE;

/// Manifest row exactly as it sits in the CSV. Every column is optional and
/// read as text so one bad cell never drops the whole row.
#[derive(Debug, Default, Deserialize)]
struct RawManifestRow {
    game_id: Option<String>,
    game_date: Option<String>,
    season_id: Option<String>,
    home_team_id: Option<String>,
    away_team_id: Option<String>,
    home_team_abbrev: Option<String>,
    away_team_abbrev: Option<String>,
    pts_home: Option<String>,
    pts_away: Option<String>,
    wl_home: Option<String>,
}

fn text(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn int(v: &Option<String>) -> Option<i64> {
    v.as_deref().and_then(parse_lenient_int)
}

/// Accepts plain dates and date-times ("2023-10-24", "2023-10-24T00:00:00").
fn parse_game_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    raw.get(..10)
        .or(Some(raw))
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

impl RawManifestRow {
    fn into_entry(self) -> Option<ManifestEntry> {
        let game_id = self.game_id.as_deref().and_then(GameId::parse)?;
        // "22023.0" and "22023" name the same season
        let season_id = text(self.season_id).map(|s| match parse_lenient_int(&s) {
            Some(n) => n.to_string(),
            None => s,
        });
        Some(ManifestEntry {
            game_date: self.game_date.as_deref().and_then(parse_game_date),
            season_id,
            home_team_id: int(&self.home_team_id),
            away_team_id: int(&self.away_team_id),
            pts_home: int(&self.pts_home).and_then(|p| i32::try_from(p).ok()),
            pts_away: int(&self.pts_away).and_then(|p| i32::try_from(p).ok()),
            home_team_abbrev: text(self.home_team_abbrev),
            away_team_abbrev: text(self.away_team_abbrev),
            wl_home: text(self.wl_home),
            game_id,
        })
    }
}

/// Parse manifest rows from any reader. Rows without a game id are skipped.
pub fn read_manifest<R: Read>(rdr: R) -> Result<Vec<ManifestEntry>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(rdr);
    let mut entries = Vec::new();
    for (idx, result) in reader.deserialize::<RawManifestRow>().enumerate() {
        match result {
            Ok(row) => match row.into_entry() {
                Some(entry) => entries.push(entry),
                None => debug!("Manifest row {} has no game id", idx + 1),
            },
            Err(e) => warn!("Skipping malformed manifest row {}: {}", idx + 1, e),
        }
    }
    Ok(entries)
}

/// Load `games_manifest.csv` from the raw directory. An absent manifest is a
/// not-found condition for whoever needs it.
pub fn load_manifest(raw_dir: &Path) -> Result<Vec<ManifestEntry>, PipelineError> {
    let path = raw_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(PipelineError::not_found("manifest", path.display().to_string()));
    }
    let handle = File::open(&path).map_err(|source| PipelineError::Io {
        path: path.clone(),
        source,
    })?;
    read_manifest(handle).map_err(|source| PipelineError::Csv { path, source })
}

/// Index manifest rows by game id; a later duplicate row wins.
pub fn index_manifest(entries: Vec<ManifestEntry>) -> HashMap<GameId, ManifestEntry> {
    entries
        .into_iter()
        .map(|e| (e.game_id.clone(), e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
game_id,game_date,season_id,home_team_id,away_team_id,home_team_abbrev,away_team_abbrev,pts_home,pts_away,wl_home
22300001,2023-10-24,22023,1610612743.0,1610612747,DEN,LAL,119,107,W
0022300002,2023-10-24T00:00:00,22023.0,1610612744,1610612756,GSW,PHX,104.0,108,L
22300003,,,,,,,,,
,2023-10-25,22023,1,2,AAA,BBB,1,2,L
";

    #[test]
    fn test_rows_are_normalised() {
        let entries = read_manifest(MANIFEST.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);

        let first = &entries[0];
        assert_eq!(first.game_id.as_str(), "0022300001");
        assert_eq!(first.game_date, NaiveDate::from_ymd_opt(2023, 10, 24));
        assert_eq!(first.season_id.as_deref(), Some("22023"));
        assert_eq!(first.home_team_id, Some(1610612743));
        assert_eq!(first.final_score(), Some((119, 107)));
        assert_eq!(first.home_won(), Some(true));

        let second = &entries[1];
        assert_eq!(second.season_id.as_deref(), Some("22023"));
        assert_eq!(second.game_date, NaiveDate::from_ymd_opt(2023, 10, 24));
        assert_eq!(second.pts_home, Some(104));
        assert_eq!(second.home_won(), Some(false));
    }

    #[test]
    fn test_blank_fields_stay_missing() {
        let entries = read_manifest(MANIFEST.as_bytes()).unwrap();
        let bare = &entries[2];
        assert_eq!(bare.game_id.as_str(), "0022300003");
        assert!(bare.game_date.is_none());
        assert!(bare.season_id.is_none());
        assert!(bare.home_team_abbrev.is_none());
        assert!(bare.final_score().is_none());
        assert!(bare.home_won().is_none());
    }

    #[test]
    fn test_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_manifest(dir.path()).unwrap_err().is_not_found());

        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        let index = index_manifest(load_manifest(dir.path()).unwrap());
        assert!(index.contains_key(&GameId::parse("22300002").unwrap()));
    }
}
