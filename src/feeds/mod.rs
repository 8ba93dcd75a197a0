pub mod live;
pub mod stats;

pub use live::{LiveAction, LiveFeedNormalizer};
pub use stats::{StatsFeedNormalizer, StatsRecord};

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::db::models::{CanonicalEvent, GameId};
use crate::error::PipelineError;

/// File name of the manifest that lives next to the raw game artifacts.
pub const MANIFEST_FILE: &str = "games_manifest.csv";

/// Upstream schema a raw game artifact was written in. Declaration order is
/// precedence: when one game has artifacts in both schemas, stats wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeedSource {
    /// Tabular stats-style play-by-play (`<game_id>.csv`)
    Stats,
    /// Nested live-style action list (`<game_id>.json`)
    Live,
}

impl FeedSource {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(FeedSource::Stats),
            "json" => Some(FeedSource::Live),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeedSource::Stats => "stats",
            FeedSource::Live => "live",
        }
    }
}

/// Trait every schema-specific normaliser implements. Each one only
/// understands its own record type; the output shape is shared.
pub trait FeedNormalizer {
    type Record;

    fn source(&self) -> FeedSource;

    /// Convert one game's ordered raw records into canonical events. An
    /// empty result means the game had no usable data.
    fn normalize(&self, game_id: &GameId, records: &[Self::Record]) -> Vec<CanonicalEvent>;
}

/// One game's raw records, tagged by schema.
#[derive(Debug, Clone)]
pub enum RawFeed {
    Stats(Vec<StatsRecord>),
    Live(Vec<LiveAction>),
}

impl RawFeed {
    pub fn source(&self) -> FeedSource {
        match self {
            RawFeed::Stats(_) => StatsFeedNormalizer.source(),
            RawFeed::Live(_) => LiveFeedNormalizer.source(),
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            RawFeed::Stats(r) => r.len(),
            RawFeed::Live(a) => a.len(),
        }
    }

    pub fn normalize(&self, game_id: &GameId) -> Vec<CanonicalEvent> {
        match self {
            RawFeed::Stats(records) => StatsFeedNormalizer.normalize(game_id, records),
            RawFeed::Live(actions) => LiveFeedNormalizer.normalize(game_id, actions),
        }
    }
}

/// A raw game artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGameFile {
    pub game_id: GameId,
    pub path: PathBuf,
    pub source: FeedSource,
}

/// Find every raw game artifact in `raw_dir`, not just the games the manifest
/// lists. Sorted by game id with one artifact per game; the manifest file
/// itself is excluded. A game stored as both `0022300001.csv` and
/// `22300001.json` keeps the stats table and the others are logged and ignored.
pub fn discover_raw_games(raw_dir: &Path) -> Result<Vec<RawGameFile>, PipelineError> {
    if !raw_dir.is_dir() {
        return Err(PipelineError::not_found(
            "raw directory",
            raw_dir.display().to_string(),
        ));
    }
    let entries = std::fs::read_dir(raw_dir).map_err(|source| PipelineError::Io {
        path: raw_dir.to_path_buf(),
        source,
    })?;

    let mut games = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::Io {
            path: raw_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() || path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE) {
            continue;
        }
        let Some(source) = FeedSource::from_path(&path) else {
            debug!("Ignoring non-feed file {}", path.display());
            continue;
        };
        let Some(game_id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(GameId::parse)
        else {
            warn!("Ignoring raw file with no usable game id: {}", path.display());
            continue;
        };
        games.push(RawGameFile {
            game_id,
            path,
            source,
        });
    }
    games.sort_by(|a, b| {
        a.game_id
            .cmp(&b.game_id)
            .then(a.source.cmp(&b.source))
            .then_with(|| a.path.cmp(&b.path))
    });
    games.dedup_by(|dup, kept| {
        let same = dup.game_id == kept.game_id;
        if same {
            warn!(
                "Game {} has more than one raw artifact; using {}, ignoring {}",
                kept.game_id,
                kept.path.display(),
                dup.path.display()
            );
        }
        same
    });
    Ok(games)
}

/// Read one raw artifact in whichever schema its extension names.
pub fn load_raw_feed(file: &RawGameFile) -> Result<RawFeed, PipelineError> {
    match file.source {
        FeedSource::Stats => {
            let handle = File::open(&file.path).map_err(|source| PipelineError::Io {
                path: file.path.clone(),
                source,
            })?;
            let records = stats::read_stats_records(handle).map_err(|source| {
                PipelineError::Csv {
                    path: file.path.clone(),
                    source,
                }
            })?;
            Ok(RawFeed::Stats(records))
        }
        FeedSource::Live => {
            let text = std::fs::read_to_string(&file.path).map_err(|source| PipelineError::Io {
                path: file.path.clone(),
                source,
            })?;
            let actions = live::parse_live_document(&text).map_err(|source| PipelineError::Json {
                path: file.path.clone(),
                source,
            })?;
            Ok(RawFeed::Live(actions))
        }
    }
}

/// Truncate free text to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
