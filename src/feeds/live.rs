//! Live-style play-by-play action lists.
//!
//! The live document nests an ordered `actions` array under `game`. Each
//! action carries a duration clock (`PT11M08.00S`), free-form action type /
//! sub-type / shot result strings, a team id and the running score of both
//! sides. Actions are first converted into stats-style rows (same code space,
//! same `M:SS` clock, same `"<home> - <away>"` score) and then normalised by
//! the stats rules, so nothing downstream needs to know which schema a game
//! came from.
//!
//! Home/away identity is not part of the action stream. It is inferred from
//! which team is first credited while the home (resp. away) running score is
//! nonzero, falling back to the first action's possession/team for home and
//! the first different team for away. This is a best-effort heuristic and is
//! kept as such.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::stats::{codes, StatsFeedNormalizer, StatsRecord};
use super::{truncate_chars, FeedNormalizer, FeedSource};
use crate::db::models::{CanonicalEvent, GameId};

/// Descriptions are cut to this length before classification.
const RAW_DESCRIPTION_MAX_CHARS: usize = 500;

/// One action from the live feed, with loosely-typed fields resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveAction {
    pub action_number: Option<i64>,
    pub period: Option<i64>,
    pub clock: String,
    pub action_type: String,
    pub sub_type: String,
    pub shot_result: String,
    pub description: String,
    pub team_id: Option<i64>,
    pub possession: Option<i64>,
    pub score_home: i32,
    pub score_away: i32,
}

impl LiveAction {
    /// Build from one JSON action. Numbers may arrive as strings or numbers;
    /// missing or unparseable values become `None`/0/empty.
    pub fn from_value(v: &Value) -> Self {
        let text = |key: &str| v.get(key).and_then(|s| s.as_str()).unwrap_or("").to_string();
        LiveAction {
            action_number: loose_int(v.get("actionNumber")),
            period: loose_int(v.get("period")),
            clock: text("clock"),
            action_type: text("actionType"),
            sub_type: text("subType"),
            shot_result: text("shotResult"),
            description: text("description"),
            team_id: loose_int(v.get("teamId")),
            possession: loose_int(v.get("possession")),
            score_home: loose_int(v.get("scoreHome"))
                .and_then(|s| i32::try_from(s).ok())
                .unwrap_or(0),
            score_away: loose_int(v.get("scoreAway"))
                .and_then(|s| i32::try_from(s).ok())
                .unwrap_or(0),
        }
    }
}

fn loose_int(v: Option<&Value>) -> Option<i64> {
    let v = v?;
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .or_else(|| v.as_str().and_then(super::stats::parse_lenient_int))
}

/// Parse a live document (`{"game": {"actions": [...]}}`). A document without
/// actions yields an empty list, not an error.
pub fn parse_live_document(text: &str) -> Result<Vec<LiveAction>, serde_json::Error> {
    let val: Value = serde_json::from_str(text)?;
    let actions = val
        .get("game")
        .and_then(|g| g.get("actions"))
        .or_else(|| val.get("actions"))
        .and_then(|a| a.as_array());
    Ok(actions
        .map(|a| a.iter().map(LiveAction::from_value).collect())
        .unwrap_or_default())
}

// ── Clock ────────────────────────────────────────────────────────────────────

fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^PT(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?").expect("clock pattern is valid")
    })
}

/// `"PT11M08.00S"` → `"11:08"`. Both components are optional; anything that
/// does not look like a duration becomes `"0:00"`.
pub fn live_clock_to_clock_string(clock: &str) -> String {
    let Some(caps) = clock_pattern().captures(clock.trim()) else {
        return "0:00".to_string();
    };
    let minutes: u64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let seconds: f64 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    format!("{}:{:02}", minutes, seconds.trunc() as u64)
}

// ── Action classification ────────────────────────────────────────────────────

/// Condition an action rule tests, over lowercased fields.
#[derive(Debug, Clone, Copy)]
enum ActionCue {
    TypeIn(&'static [&'static str]),
    DescriptionHas(&'static str),
    TypeOrSubTypeHas(&'static str),
}

#[derive(Debug, Clone, Copy)]
enum ActionCode {
    Fixed(i64),
    /// Made vs missed field goal, decided by the shot result
    ByShotResult,
}

/// Ordered mapping into the stats code space; first match wins, no match is
/// "other".
const ACTION_RULES: [(ActionCue, ActionCode); 15] = [
    (ActionCue::TypeIn(&["period", "startperiod"]), ActionCode::Fixed(codes::PERIOD_START)),
    (ActionCue::DescriptionHas("period start"), ActionCode::Fixed(codes::PERIOD_START)),
    (ActionCue::TypeIn(&["endperiod"]), ActionCode::Fixed(codes::PERIOD_END)),
    (ActionCue::TypeIn(&["jumpball"]), ActionCode::Fixed(codes::JUMP_BALL)),
    (ActionCue::TypeIn(&["violation"]), ActionCode::Fixed(codes::VIOLATION)),
    (ActionCue::TypeIn(&["timeout"]), ActionCode::Fixed(codes::TIMEOUT)),
    (ActionCue::TypeIn(&["substitution"]), ActionCode::Fixed(codes::SUBSTITUTION)),
    (ActionCue::TypeIn(&["foul"]), ActionCode::Fixed(codes::FOUL)),
    (ActionCue::TypeIn(&["turnover"]), ActionCode::Fixed(codes::TURNOVER)),
    (ActionCue::TypeIn(&["rebound"]), ActionCode::Fixed(codes::REBOUND)),
    (ActionCue::TypeIn(&["2pt", "3pt"]), ActionCode::ByShotResult),
    (ActionCue::TypeIn(&["freethrow"]), ActionCode::Fixed(codes::FREE_THROW)),
    // Blocked shots are folded into missed field goals.
    (ActionCue::TypeOrSubTypeHas("block"), ActionCode::Fixed(codes::FIELD_GOAL_MISSED)),
    (ActionCue::TypeIn(&["ejection"]), ActionCode::Fixed(codes::EJECTION)),
    (ActionCue::TypeIn(&["instantreplay"]), ActionCode::Fixed(codes::INSTANT_REPLAY)),
];

/// Map an action's type / sub-type / shot result to a stats event code.
pub fn action_code(action: &LiveAction) -> i64 {
    let at = action.action_type.to_lowercase();
    let sub = action.sub_type.to_lowercase();
    let desc = action.description.to_lowercase();
    let result = action.shot_result.to_lowercase();

    for (cue, code) in ACTION_RULES {
        let hit = match cue {
            ActionCue::TypeIn(types) => types.contains(&at.as_str()),
            ActionCue::DescriptionHas(needle) => desc.contains(needle),
            ActionCue::TypeOrSubTypeHas(needle) => sub.contains(needle) || at.contains(needle),
        };
        if hit {
            return match code {
                ActionCode::Fixed(c) => c,
                ActionCode::ByShotResult if result == "made" => codes::FIELD_GOAL_MADE,
                ActionCode::ByShotResult => codes::FIELD_GOAL_MISSED,
            };
        }
    }
    codes::OTHER
}

// ── Team inference ───────────────────────────────────────────────────────────

/// Team ids inferred for each side. Either may remain unresolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamSides {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

fn nonzero(v: Option<i64>) -> Option<i64> {
    v.filter(|id| *id != 0)
}

/// First team credited while the home score is nonzero is home; likewise for
/// away. Fallback: first action's possession (or team) for home, first team
/// id that differs from home for away.
pub fn infer_team_sides(actions: &[LiveAction]) -> TeamSides {
    let mut sides = TeamSides::default();
    for a in actions {
        let Some(tid) = nonzero(a.team_id) else {
            continue;
        };
        if a.score_home > 0 && sides.home.is_none() {
            sides.home = Some(tid);
        }
        if a.score_away > 0 && sides.away.is_none() {
            sides.away = Some(tid);
        }
        if sides.home.is_some() && sides.away.is_some() {
            break;
        }
    }
    if sides.home.is_none() {
        if let Some(first) = actions.first() {
            sides.home = nonzero(first.possession).or_else(|| nonzero(first.team_id));
        }
    }
    if sides.away.is_none() {
        sides.away = actions
            .iter()
            .filter_map(|a| nonzero(a.team_id))
            .find(|tid| Some(*tid) != sides.home);
    }
    sides
}

fn score_margin(home: i32, away: i32) -> String {
    match home.saturating_sub(away) {
        0 => "TIE".to_string(),
        m => m.to_string(),
    }
}

// ── Normaliser ───────────────────────────────────────────────────────────────

/// Normaliser for the live-style schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveFeedNormalizer;

impl LiveFeedNormalizer {
    /// Convert actions to stats-style rows. `None` when there is nothing to
    /// convert, so callers see "no data" rather than a degenerate game.
    pub fn to_stats_records(&self, actions: &[LiveAction]) -> Option<Vec<StatsRecord>> {
        if actions.is_empty() {
            return None;
        }
        let sides = infer_team_sides(actions);

        let mut rows = Vec::with_capacity(actions.len());
        let mut score_home = 0;
        let mut score_away = 0;
        for a in actions {
            if a.score_home > 0 || a.score_away > 0 {
                score_home = a.score_home;
                score_away = a.score_away;
            }
            let is_home = sides.home.is_some() && a.team_id == sides.home;
            let is_away = sides.away.is_some() && a.team_id == sides.away;
            let desc = truncate_chars(&a.description, RAW_DESCRIPTION_MAX_CHARS);
            let desc = (!desc.is_empty()).then_some(desc);

            let (home_description, visitor_description) = match (is_home, is_away) {
                (true, _) => (desc, None),
                (false, true) => (None, desc),
                // unattributed text defaults to the visitor side
                (false, false) => (None, desc),
            };

            rows.push(StatsRecord {
                event_num: Some(a.action_number.unwrap_or(rows.len() as i64 + 1)),
                period: Some(nonzero(a.period).unwrap_or(1)),
                clock: Some(live_clock_to_clock_string(&a.clock)),
                home_description,
                neutral_description: None,
                visitor_description,
                score: Some(format!("{} - {}", score_home, score_away)),
                score_margin: Some(score_margin(score_home, score_away)),
                event_msg_type: Some(action_code(a)),
            });
        }
        Some(rows)
    }
}

impl FeedNormalizer for LiveFeedNormalizer {
    type Record = LiveAction;

    fn source(&self) -> FeedSource {
        FeedSource::Live
    }

    fn normalize(&self, game_id: &GameId, actions: &[LiveAction]) -> Vec<CanonicalEvent> {
        match self.to_stats_records(actions) {
            Some(rows) => StatsFeedNormalizer.normalize(game_id, &rows),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EventType, Possession};
    use approx::assert_relative_eq;

    #[test]
    fn test_margin_text_saturates() {
        assert_eq!(score_margin(3, 3), "TIE");
        assert_eq!(score_margin(2, 5), "-3");
        assert_eq!(score_margin(i32::MAX, -5), i32::MAX.to_string());
        assert_eq!(score_margin(i32::MIN, 1), i32::MIN.to_string());
    }

    fn action(num: i64, at: &str, team: Option<i64>, home: i32, away: i32) -> LiveAction {
        LiveAction {
            action_number: Some(num),
            period: Some(1),
            clock: "PT11M08.00S".into(),
            action_type: at.into(),
            team_id: team,
            score_home: home,
            score_away: away,
            ..Default::default()
        }
    }

    #[test]
    fn test_live_clock_conversion() {
        assert_eq!(live_clock_to_clock_string("PT11M08.00S"), "11:08");
        assert_eq!(live_clock_to_clock_string("PT00M05.70S"), "0:05");
        assert_eq!(live_clock_to_clock_string("PT45.00S"), "0:45");
        assert_eq!(live_clock_to_clock_string("PT12M"), "12:00");
        assert_eq!(live_clock_to_clock_string(""), "0:00");
        assert_eq!(live_clock_to_clock_string("11:08"), "0:00");
    }

    #[test]
    fn test_action_code_mapping() {
        let mut a = LiveAction::default();
        let mut code = |at: &str, sub: &str, result: &str, desc: &str| {
            a.action_type = at.into();
            a.sub_type = sub.into();
            a.shot_result = result.into();
            a.description = desc.into();
            action_code(&a)
        };
        assert_eq!(code("period", "start", "", ""), codes::PERIOD_START);
        assert_eq!(code("game", "", "", "Period Start"), codes::PERIOD_START);
        assert_eq!(code("endperiod", "", "", ""), codes::PERIOD_END);
        assert_eq!(code("jumpball", "", "", ""), codes::JUMP_BALL);
        assert_eq!(code("violation", "", "", ""), codes::VIOLATION);
        assert_eq!(code("timeout", "full", "", ""), codes::TIMEOUT);
        assert_eq!(code("substitution", "out", "", ""), codes::SUBSTITUTION);
        assert_eq!(code("foul", "personal", "", ""), codes::FOUL);
        assert_eq!(code("turnover", "bad pass", "", ""), codes::TURNOVER);
        assert_eq!(code("rebound", "defensive", "", ""), codes::REBOUND);
        assert_eq!(code("3pt", "jump shot", "Made", ""), codes::FIELD_GOAL_MADE);
        assert_eq!(code("2pt", "layup", "Missed", ""), codes::FIELD_GOAL_MISSED);
        assert_eq!(code("freethrow", "1 of 2", "Made", ""), codes::FREE_THROW);
        assert_eq!(code("block", "", "", ""), codes::FIELD_GOAL_MISSED);
        assert_eq!(code("steal", "", "", ""), codes::OTHER);
    }

    #[test]
    fn test_team_sides_from_first_scores() {
        let actions = vec![
            action(1, "jumpball", Some(10), 0, 0),
            action(2, "2pt", Some(20), 0, 2),
            action(3, "3pt", Some(10), 3, 2),
        ];
        assert_eq!(
            infer_team_sides(&actions),
            TeamSides { home: Some(10), away: Some(20) }
        );
    }

    #[test]
    fn test_team_sides_fallback_when_nobody_scores() {
        let mut first = action(1, "period", None, 0, 0);
        first.possession = Some(30);
        let actions = vec![first, action(2, "foul", Some(30), 0, 0), action(3, "foul", Some(40), 0, 0)];
        assert_eq!(
            infer_team_sides(&actions),
            TeamSides { home: Some(30), away: Some(40) }
        );
    }

    #[test]
    fn test_empty_actions_signal_no_data() {
        assert!(LiveFeedNormalizer.to_stats_records(&[]).is_none());
        let gid = GameId::parse("1").unwrap();
        assert!(LiveFeedNormalizer.normalize(&gid, &[]).is_empty());
    }

    #[test]
    fn test_running_score_and_margin() {
        let actions = vec![
            action(1, "jumpball", Some(10), 0, 0),
            action(2, "2pt", Some(10), 2, 0),
            action(3, "foul", Some(20), 0, 0),
            action(4, "3pt", Some(20), 2, 3),
            action(5, "2pt", Some(10), 4, 3),
        ];
        let rows = LiveFeedNormalizer.to_stats_records(&actions).unwrap();
        let scores: Vec<_> = rows.iter().map(|r| r.score.clone().unwrap()).collect();
        assert_eq!(scores, vec!["0 - 0", "2 - 0", "2 - 0", "2 - 3", "4 - 3"]);
        let margins: Vec<_> = rows.iter().map(|r| r.score_margin.clone().unwrap()).collect();
        assert_eq!(margins, vec!["TIE", "2", "2", "-1", "1"]);
    }

    #[test]
    fn test_descriptions_attributed_to_sides() {
        let mut a1 = action(1, "2pt", Some(10), 2, 0);
        a1.description = "Home Layup".into();
        let mut a2 = action(2, "2pt", Some(20), 2, 2);
        a2.description = "Away Layup".into();
        let mut a3 = action(3, "timeout", None, 0, 0);
        a3.description = "Official timeout".into();
        let rows = LiveFeedNormalizer.to_stats_records(&[a1, a2, a3]).unwrap();
        assert_eq!(rows[0].home_description.as_deref(), Some("Home Layup"));
        assert_eq!(rows[1].visitor_description.as_deref(), Some("Away Layup"));
        assert_eq!(rows[2].home_description, None);
        assert_eq!(rows[2].visitor_description.as_deref(), Some("Official timeout"));
    }

    #[test]
    fn test_parse_live_document_and_normalize() {
        let doc = r#"{"game": {"gameId": "0022300001", "actions": [
            {"actionNumber": 2, "clock": "PT12M00.00S", "period": 1, "actionType": "period",
             "subType": "start", "description": "Period Start", "scoreHome": "0", "scoreAway": "0"},
            {"actionNumber": 4, "clock": "PT11M40.00S", "period": 1, "teamId": 1610612747,
             "actionType": "3pt", "subType": "Jump Shot", "shotResult": "Made",
             "description": "James 26' 3PT Jump Shot (3 PTS)", "scoreHome": "3", "scoreAway": "0"},
            {"actionNumber": 7, "clock": "PT11M20.00S", "period": 1, "teamId": 1610612738,
             "actionType": "freethrow", "subType": "1 of 2", "shotResult": "Missed",
             "description": "MISS Tatum Free Throw 1 of 2", "scoreHome": "3", "scoreAway": "0"},
            {"actionNumber": 8, "clock": "PT11M20.00S", "period": 1, "teamId": 1610612738,
             "actionType": "freethrow", "subType": "2 of 2", "shotResult": "Made",
             "description": "Tatum Free Throw 2 of 2 (1 PTS)", "scoreHome": 3, "scoreAway": 1}
        ]}}"#;
        let actions = parse_live_document(doc).unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[1].team_id, Some(1610612747));

        let gid = GameId::parse("0022300001").unwrap();
        let events = LiveFeedNormalizer.normalize(&gid, &actions);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event_type, EventType::PeriodStart);
        assert_relative_eq!(events[0].time_remaining_sec, 720.0);
        assert_eq!(events[1].event_type, EventType::Made3);
        assert_eq!(events[1].possession, Possession::Home);
        assert_eq!(events[1].points_scored, 3);
        assert_eq!(events[2].event_type, EventType::FreeThrowMiss);
        assert_eq!(events[2].possession, Possession::Away);
        assert_eq!(events[3].event_type, EventType::FreeThrowMade);
        assert_eq!((events[3].home_score, events[3].away_score), (3, 1));
        assert_eq!(events.iter().map(|e| e.event_num).collect::<Vec<_>>(), vec![2, 4, 7, 8]);
    }

    #[test]
    fn test_document_without_actions_is_empty() {
        assert!(parse_live_document(r#"{"game": {}}"#).unwrap().is_empty());
        assert!(parse_live_document("not json").is_err());
    }
}
