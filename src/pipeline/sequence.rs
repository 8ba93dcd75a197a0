use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::models::{
    CanonicalEvent, GameId, GameOutcome, LabeledEvent, ManifestEntry, OutcomeSource,
};
use crate::error::PipelineError;
use crate::feeds::{load_raw_feed, FeedSource, RawFeed, RawGameFile};

/// One game's ordered canonical events plus its authoritative outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSequence {
    pub game_id: GameId,
    pub source: FeedSource,
    pub events: Vec<CanonicalEvent>,
    pub outcome: GameOutcome,
}

impl GameSequence {
    /// Events stamped with the game's label and final score.
    pub fn labeled_events(&self) -> Vec<LabeledEvent> {
        self.events
            .iter()
            .map(|ev| LabeledEvent::new(ev, &self.outcome))
            .collect()
    }
}

/// Stable sort by `event_num` and drop repeated numbers, keeping the first.
pub fn order_events(mut events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    events.sort_by_key(|e| e.event_num);
    let before = events.len();
    events.dedup_by_key(|e| e.event_num);
    if events.len() != before {
        if let Some(first) = events.first() {
            warn!(
                "Game {}: dropped {} events with duplicate event numbers",
                first.game_id,
                before - events.len()
            );
        }
    }
    events
}

/// Final score and label: the manifest when it has a valid final score,
/// the last event's running score otherwise. `None` only for an empty game.
pub fn resolve_outcome(
    events: &[CanonicalEvent],
    manifest: Option<&ManifestEntry>,
) -> Option<GameOutcome> {
    let from_events = events
        .last()
        .map(|ev| GameOutcome::from_final_score(ev.home_score, ev.away_score, OutcomeSource::LastEvent));

    let from_manifest = manifest
        .and_then(ManifestEntry::final_score)
        .map(|(h, a)| GameOutcome::from_final_score(h, a, OutcomeSource::Manifest));

    if let (Some(m), Some(e)) = (&from_manifest, &from_events) {
        if m.label_home_win != e.label_home_win {
            warn!(
                "Game {}: manifest final {}-{} disagrees with last event {}-{}",
                events[0].game_id,
                m.pts_home_final,
                m.pts_away_final,
                e.pts_home_final,
                e.pts_away_final
            );
        }
    }

    from_events.map(|last| from_manifest.unwrap_or(last))
}

/// Turns raw game artifacts into ordered, labelled canonical sequences.
/// Cheap to clone; the manifest index is shared.
#[derive(Debug, Clone, Default)]
pub struct EventSequenceBuilder {
    manifest: Arc<HashMap<GameId, ManifestEntry>>,
}

impl EventSequenceBuilder {
    pub fn new(manifest: HashMap<GameId, ManifestEntry>) -> Self {
        EventSequenceBuilder {
            manifest: Arc::new(manifest),
        }
    }

    pub fn manifest_entry(&self, game_id: &GameId) -> Option<&ManifestEntry> {
        self.manifest.get(game_id)
    }

    /// `None` when the feed produced no usable events.
    pub fn build(&self, game_id: &GameId, feed: &RawFeed) -> Option<GameSequence> {
        let events = order_events(feed.normalize(game_id));
        if events.is_empty() {
            debug!("Game {}: {} raw records, no events", game_id, feed.record_count());
            return None;
        }
        let outcome = resolve_outcome(&events, self.manifest_entry(game_id))?;
        Some(GameSequence {
            game_id: game_id.clone(),
            source: feed.source(),
            events,
            outcome,
        })
    }

    /// Read one raw artifact from disk and build its sequence.
    pub fn build_file(&self, file: &RawGameFile) -> Result<Option<GameSequence>, PipelineError> {
        let feed = load_raw_feed(file)?;
        Ok(self.build(&file.game_id, &feed))
    }
}
