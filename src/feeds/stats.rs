//! Stats-style play-by-play tables.
//!
//! One CSV per game, one row per event. Clock is `M:SS` seconds left in the
//! period, score is `"<home> - <away>"` and only present on scoring rows, and
//! the play type is a numeric code refined by description cues.

use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use tracing::warn;

use super::{truncate_chars, FeedNormalizer, FeedSource};
use crate::db::models::{CanonicalEvent, EventType, GameId, Possession};
use crate::replay::game_state::period_length;

/// Longest description kept on a canonical event.
pub const DESCRIPTION_MAX_CHARS: usize = 200;

/// Numeric event codes of the stats schema. The live schema maps into the
/// same space.
pub mod codes {
    pub const OTHER: i64 = 0;
    pub const FIELD_GOAL_MADE: i64 = 1;
    pub const FIELD_GOAL_MISSED: i64 = 2;
    pub const FREE_THROW: i64 = 3;
    pub const REBOUND: i64 = 4;
    pub const TURNOVER: i64 = 5;
    pub const FOUL: i64 = 6;
    pub const VIOLATION: i64 = 7;
    pub const SUBSTITUTION: i64 = 8;
    pub const TIMEOUT: i64 = 9;
    pub const JUMP_BALL: i64 = 10;
    pub const EJECTION: i64 = 11;
    pub const PERIOD_START: i64 = 12;
    pub const PERIOD_END: i64 = 13;
    pub const INSTANT_REPLAY: i64 = 18;
}

/// One raw stats-style row. Column names follow the upstream table; extra
/// columns are ignored and any field may be blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(rename = "EVENTNUM", default, deserialize_with = "lenient_int")]
    pub event_num: Option<i64>,
    #[serde(rename = "PERIOD", default, deserialize_with = "lenient_int")]
    pub period: Option<i64>,
    #[serde(rename = "PCTIMESTRING", default)]
    pub clock: Option<String>,
    #[serde(rename = "HOMEDESCRIPTION", default)]
    pub home_description: Option<String>,
    #[serde(rename = "NEUTRALDESCRIPTION", default)]
    pub neutral_description: Option<String>,
    #[serde(rename = "VISITORDESCRIPTION", default)]
    pub visitor_description: Option<String>,
    #[serde(rename = "SCORE", default)]
    pub score: Option<String>,
    #[serde(rename = "SCOREMARGIN", default)]
    pub score_margin: Option<String>,
    #[serde(rename = "EVENTMSGTYPE", default, deserialize_with = "lenient_int")]
    pub event_msg_type: Option<i64>,
}

/// Accepts "12", "12.0" and blanks; anything else reads as missing.
fn lenient_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_lenient_int))
}

pub(crate) fn parse_lenient_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
        _ => None,
    }
}

/// Read a stats-style table, one record per data row in file order. Bytes
/// that are not UTF-8 are replaced rather than dropping their row, and a row
/// that still fails to deserialize becomes a blank record in its place.
pub fn read_stats_records<R: Read>(rdr: R) -> Result<Vec<StatsRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers = lossy_record(reader.byte_headers()?);
    let mut records = Vec::new();
    for (idx, result) in reader.byte_records().enumerate() {
        let row = lossy_record(&result?);
        let rec = row
            .deserialize::<StatsRecord>(Some(&headers))
            .unwrap_or_else(|e| {
                warn!("play-by-play row {} unreadable, keeping it blank: {}", idx + 1, e);
                StatsRecord::default()
            });
        records.push(rec);
    }
    Ok(records)
}

fn lossy_record(raw: &csv::ByteRecord) -> csv::StringRecord {
    raw.iter().map(String::from_utf8_lossy).collect()
}

// ── Token parsing ────────────────────────────────────────────────────────────

/// `"11:25"` → 685.0 seconds left in the period. Empty or malformed → 0.0.
pub fn parse_clock(token: &str) -> f64 {
    let Some((minutes, seconds)) = token.trim().split_once(':') else {
        return 0.0;
    };
    if seconds.contains(':') {
        return 0.0;
    }
    let Ok(minutes) = minutes.trim().parse::<i64>() else {
        return 0.0;
    };
    let seconds = seconds.trim();
    let seconds = if seconds.contains('.') {
        seconds.parse::<f64>().ok()
    } else {
        seconds.parse::<i64>().ok().map(|s| s as f64)
    };
    match seconds {
        Some(s) if s.is_finite() => minutes as f64 * 60.0 + s,
        _ => 0.0,
    }
}

/// `"100 - 98"` → `Some((100, 98))`. The caller carries the previous score
/// forward on `None`.
pub fn parse_score(token: &str) -> Option<(i32, i32)> {
    let (home, away) = token.trim().split_once('-')?;
    let home = home.trim().parse::<i32>().ok()?;
    let away = away.trim().parse::<i32>().ok()?;
    Some((home, away))
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Home description present ⇒ home; visitor description present ⇒ away.
pub fn infer_possession(record: &StatsRecord) -> Possession {
    if non_blank(&record.home_description).is_some() {
        Possession::Home
    } else if non_blank(&record.visitor_description).is_some() {
        Possession::Away
    } else {
        Possession::Unknown
    }
}

// ── Classification ──────────────────────────────────────────────────────────

/// Coarse category a numeric code maps to before description refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseCategory {
    FieldGoalMade,
    FieldGoalMissed,
    FreeThrow,
    Rebound,
    Turnover,
    Foul,
    Violation,
    Substitution,
    Timeout,
    JumpBall,
    Ejection,
    PeriodStart,
    PeriodEnd,
    InstantReplay,
    Other,
}

const BASE_CATEGORIES: [(i64, BaseCategory); 14] = [
    (codes::FIELD_GOAL_MADE, BaseCategory::FieldGoalMade),
    (codes::FIELD_GOAL_MISSED, BaseCategory::FieldGoalMissed),
    (codes::FREE_THROW, BaseCategory::FreeThrow),
    (codes::REBOUND, BaseCategory::Rebound),
    (codes::TURNOVER, BaseCategory::Turnover),
    (codes::FOUL, BaseCategory::Foul),
    (codes::VIOLATION, BaseCategory::Violation),
    (codes::SUBSTITUTION, BaseCategory::Substitution),
    (codes::TIMEOUT, BaseCategory::Timeout),
    (codes::JUMP_BALL, BaseCategory::JumpBall),
    (codes::EJECTION, BaseCategory::Ejection),
    (codes::PERIOD_START, BaseCategory::PeriodStart),
    (codes::PERIOD_END, BaseCategory::PeriodEnd),
    (codes::INSTANT_REPLAY, BaseCategory::InstantReplay),
];

pub fn base_category(code: Option<i64>) -> BaseCategory {
    code.and_then(|c| {
        BASE_CATEGORIES
            .iter()
            .find(|(k, _)| *k == c)
            .map(|(_, cat)| *cat)
    })
    .unwrap_or(BaseCategory::Other)
}

/// Description cue a refinement rule tests for.
#[derive(Debug, Clone, Copy)]
enum Cue {
    Always,
    /// "(3 PTS)", or "3PT" without a miss marker
    ThreeMade,
    /// "3PT" anywhere
    ThreeAttempt,
    /// "MISS" anywhere
    Miss,
}

impl Cue {
    fn matches(self, text: &str) -> bool {
        match self {
            Cue::Always => true,
            Cue::ThreeMade => {
                text.contains("(3 PTS)") || (text.contains("3PT") && !text.contains("MISS"))
            }
            Cue::ThreeAttempt => text.contains("3PT"),
            Cue::Miss => text.contains("MISS"),
        }
    }
}

/// Ordered refinement table: the first rule whose category and cue both match
/// decides the canonical type.
const REFINEMENTS: [(BaseCategory, Cue, EventType); 18] = [
    (BaseCategory::FieldGoalMade, Cue::ThreeMade, EventType::Made3),
    (BaseCategory::FieldGoalMade, Cue::Always, EventType::Made2),
    (BaseCategory::FieldGoalMissed, Cue::ThreeAttempt, EventType::Miss3),
    (BaseCategory::FieldGoalMissed, Cue::Always, EventType::Miss2),
    (BaseCategory::FreeThrow, Cue::Miss, EventType::FreeThrowMiss),
    (BaseCategory::FreeThrow, Cue::Always, EventType::FreeThrowMade),
    (BaseCategory::Rebound, Cue::Always, EventType::Rebound),
    (BaseCategory::Turnover, Cue::Always, EventType::Turnover),
    (BaseCategory::Foul, Cue::Always, EventType::Foul),
    (BaseCategory::Violation, Cue::Always, EventType::Violation),
    (BaseCategory::Substitution, Cue::Always, EventType::Substitution),
    (BaseCategory::Timeout, Cue::Always, EventType::Timeout),
    (BaseCategory::JumpBall, Cue::Always, EventType::JumpBall),
    (BaseCategory::Ejection, Cue::Always, EventType::Ejection),
    (BaseCategory::PeriodStart, Cue::Always, EventType::PeriodStart),
    (BaseCategory::PeriodEnd, Cue::Always, EventType::PeriodEnd),
    (BaseCategory::InstantReplay, Cue::Always, EventType::InstantReplay),
    (BaseCategory::Other, Cue::Always, EventType::Other),
];

/// Classify a raw code plus its cue text (home and visitor descriptions
/// joined) into the canonical enumeration.
pub fn classify(code: Option<i64>, cue_text: &str) -> EventType {
    let base = base_category(code);
    REFINEMENTS
        .iter()
        .find(|(cat, cue, _)| *cat == base && cue.matches(cue_text))
        .map(|(_, _, t)| *t)
        .unwrap_or(EventType::Other)
}

fn cue_text(record: &StatsRecord) -> String {
    format!(
        "{} {}",
        record.home_description.as_deref().unwrap_or(""),
        record.visitor_description.as_deref().unwrap_or("")
    )
}

fn description(record: &StatsRecord) -> String {
    let text = non_blank(&record.home_description)
        .or_else(|| non_blank(&record.visitor_description))
        .or_else(|| non_blank(&record.neutral_description))
        .unwrap_or("");
    truncate_chars(text, DESCRIPTION_MAX_CHARS)
}

// ── Normaliser ───────────────────────────────────────────────────────────────

/// Normaliser for the stats-style schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsFeedNormalizer;

impl FeedNormalizer for StatsFeedNormalizer {
    type Record = StatsRecord;

    fn source(&self) -> FeedSource {
        FeedSource::Stats
    }

    /// One canonical event per record, same order. Scores carry forward
    /// across rows with no parseable score token.
    fn normalize(&self, game_id: &GameId, records: &[StatsRecord]) -> Vec<CanonicalEvent> {
        let mut home_score = 0;
        let mut away_score = 0;
        let mut events = Vec::with_capacity(records.len());

        for (idx, rec) in records.iter().enumerate() {
            let period = rec
                .period
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or(1);
            let clock = rec.clock.as_deref().map(parse_clock).unwrap_or(0.0);
            let time_remaining_sec = clock.clamp(0.0, period_length(period));

            if let Some((h, a)) = rec.score.as_deref().and_then(parse_score) {
                home_score = h;
                away_score = a;
            }

            let event_type = classify(rec.event_msg_type, &cue_text(rec));

            events.push(CanonicalEvent {
                game_id: game_id.clone(),
                event_num: rec.event_num.unwrap_or(idx as i64),
                period,
                time_remaining_sec,
                home_score,
                away_score,
                possession: infer_possession(rec),
                event_type,
                points_scored: event_type.points(),
                description: description(rec),
            });
        }
        events
    }
}
