use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-padded game identifier shared by raw files, the manifest, the store
/// and every CSV export, so joins are exact string matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub const WIDTH: usize = 10;

    /// Normalise a raw identifier ("22300001", "0022300001", "22300001.0").
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut s = raw.trim();
        if let Some(stripped) = s.strip_suffix(".0") {
            if !stripped.is_empty() && stripped.bytes().all(|b| b.is_ascii_digit()) {
                s = stripped;
            }
        }
        if s.is_empty() {
            return None;
        }
        Some(GameId(format!("{:0>width$}", s, width = Self::WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side controlled the ball for the play that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Possession {
    Home,
    Away,
    Unknown,
}

impl Possession {
    pub fn as_str(&self) -> &'static str {
        match self {
            Possession::Home => "home",
            Possession::Away => "away",
            Possession::Unknown => "unknown",
        }
    }

    /// Anything other than "home"/"away" reads back as `Unknown`.
    pub fn from_label(s: &str) -> Self {
        match s {
            "home" => Possession::Home,
            "away" => Possession::Away,
            _ => Possession::Unknown,
        }
    }
}

/// Fixed canonical event enumeration. Feeds never produce free-form types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "made_2")]
    Made2,
    #[serde(rename = "made_3")]
    Made3,
    #[serde(rename = "miss_2")]
    Miss2,
    #[serde(rename = "miss_3")]
    Miss3,
    #[serde(rename = "free_throw_made")]
    FreeThrowMade,
    #[serde(rename = "free_throw_miss")]
    FreeThrowMiss,
    #[serde(rename = "rebound")]
    Rebound,
    #[serde(rename = "turnover")]
    Turnover,
    #[serde(rename = "foul")]
    Foul,
    #[serde(rename = "violation")]
    Violation,
    #[serde(rename = "substitution")]
    Substitution,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "jump_ball")]
    JumpBall,
    #[serde(rename = "ejection")]
    Ejection,
    #[serde(rename = "period_start")]
    PeriodStart,
    #[serde(rename = "period_end")]
    PeriodEnd,
    #[serde(rename = "instant_replay")]
    InstantReplay,
    #[serde(rename = "other")]
    Other,
}

impl EventType {
    pub const ALL: [EventType; 18] = [
        EventType::Made2,
        EventType::Made3,
        EventType::Miss2,
        EventType::Miss3,
        EventType::FreeThrowMade,
        EventType::FreeThrowMiss,
        EventType::Rebound,
        EventType::Turnover,
        EventType::Foul,
        EventType::Violation,
        EventType::Substitution,
        EventType::Timeout,
        EventType::JumpBall,
        EventType::Ejection,
        EventType::PeriodStart,
        EventType::PeriodEnd,
        EventType::InstantReplay,
        EventType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Made2 => "made_2",
            EventType::Made3 => "made_3",
            EventType::Miss2 => "miss_2",
            EventType::Miss3 => "miss_3",
            EventType::FreeThrowMade => "free_throw_made",
            EventType::FreeThrowMiss => "free_throw_miss",
            EventType::Rebound => "rebound",
            EventType::Turnover => "turnover",
            EventType::Foul => "foul",
            EventType::Violation => "violation",
            EventType::Substitution => "substitution",
            EventType::Timeout => "timeout",
            EventType::JumpBall => "jump_ball",
            EventType::Ejection => "ejection",
            EventType::PeriodStart => "period_start",
            EventType::PeriodEnd => "period_end",
            EventType::InstantReplay => "instant_replay",
            EventType::Other => "other",
        }
    }

    /// Unknown labels collapse to `Other` rather than failing.
    pub fn from_label(s: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .unwrap_or(EventType::Other)
    }

    /// Points credited to the scoring side for this play.
    pub fn points(&self) -> u8 {
        match self {
            EventType::Made3 => 3,
            EventType::Made2 => 2,
            EventType::FreeThrowMade => 1,
            _ => 0,
        }
    }
}

/// Normalised, schema-independent play-by-play event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    pub game_id: GameId,
    /// Ordering key, strictly increasing within a game
    pub event_num: i64,
    /// 1–4 regulation, 5+ overtime
    pub period: i32,
    /// Seconds left in the current period
    pub time_remaining_sec: f64,
    pub home_score: i32,
    pub away_score: i32,
    pub possession: Possession,
    pub event_type: EventType,
    pub points_scored: u8,
    pub description: String,
}

/// Where a game's final score and label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Manifest,
    LastEvent,
}

impl OutcomeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSource::Manifest => "manifest",
            OutcomeSource::LastEvent => "last_event",
        }
    }

    pub fn from_label(s: &str) -> Self {
        if s == "manifest" {
            OutcomeSource::Manifest
        } else {
            OutcomeSource::LastEvent
        }
    }
}

/// Authoritative final score and win label for one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameOutcome {
    pub pts_home_final: i32,
    pub pts_away_final: i32,
    pub label_home_win: u8,
    pub source: OutcomeSource,
}

impl GameOutcome {
    pub fn from_final_score(home: i32, away: i32, source: OutcomeSource) -> Self {
        GameOutcome {
            pts_home_final: home,
            pts_away_final: away,
            label_home_win: u8::from(home > away),
            source,
        }
    }
}

/// A canonical event stamped with its game's outcome. Training use only;
/// the per-game canonical artifact never carries these fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledEvent {
    pub game_id: GameId,
    pub event_num: i64,
    pub period: i32,
    pub time_remaining_sec: f64,
    pub home_score: i32,
    pub away_score: i32,
    pub possession: Possession,
    pub event_type: EventType,
    pub points_scored: u8,
    pub description: String,
    pub label_home_win: u8,
    pub pts_home_final: i32,
    pub pts_away_final: i32,
}

impl LabeledEvent {
    pub fn new(event: &CanonicalEvent, outcome: &GameOutcome) -> Self {
        LabeledEvent {
            game_id: event.game_id.clone(),
            event_num: event.event_num,
            period: event.period,
            time_remaining_sec: event.time_remaining_sec,
            home_score: event.home_score,
            away_score: event.away_score,
            possession: event.possession,
            event_type: event.event_type,
            points_scored: event.points_scored,
            description: event.description.clone(),
            label_home_win: outcome.label_home_win,
            pts_home_final: outcome.pts_home_final,
            pts_away_final: outcome.pts_away_final,
        }
    }
}

/// One manifest row after normalisation. Every field except the id may be
/// missing upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub game_id: GameId,
    pub game_date: Option<NaiveDate>,
    pub season_id: Option<String>,
    pub home_team_id: Option<i64>,
    pub away_team_id: Option<i64>,
    pub home_team_abbrev: Option<String>,
    pub away_team_abbrev: Option<String>,
    pub pts_home: Option<i32>,
    pub pts_away: Option<i32>,
    pub wl_home: Option<String>,
}

impl ManifestEntry {
    /// Final score, only when both sides are present and non-negative.
    pub fn final_score(&self) -> Option<(i32, i32)> {
        match (self.pts_home, self.pts_away) {
            (Some(h), Some(a)) if h >= 0 && a >= 0 => Some((h, a)),
            _ => None,
        }
    }

    /// Home win indicator: `wl_home` first, final points otherwise.
    pub fn home_won(&self) -> Option<bool> {
        if let Some(wl) = self.wl_home.as_deref() {
            return Some(wl.trim().eq_ignore_ascii_case("W"));
        }
        self.final_score().map(|(h, a)| h > a)
    }
}

/// Pre-game ratings of both teams for one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingRow {
    pub game_id: GameId,
    pub season_id: String,
    pub home_elo: f64,
    pub away_elo: f64,
}

/// Summary of one pipeline command, persisted for the API.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: Option<i64>,
    /// "parse" | "ratings" | "replay"
    pub command: String,
    pub games_found: i64,
    pub games_processed: i64,
    pub games_skipped: i64,
    pub rows_written: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
