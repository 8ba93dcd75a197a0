//! Point-in-time game state for win-probability features.
//!
//! Every canonical event already carries the score, clock and possession that
//! result from its play, so a state is a pure projection of one event rather
//! than an accumulator. Replaying a game is a map over its ordered events.

use serde::Serialize;

use crate::db::models::{CanonicalEvent, Possession};

/// 12-minute regulation quarters.
pub const REGULATION_PERIOD_SECS: f64 = 720.0;
/// 5-minute overtime periods.
pub const OVERTIME_PERIOD_SECS: f64 = 300.0;
pub const REGULATION_PERIODS: i32 = 4;
/// Seconds left in the game at tip-off.
pub const GAME_START_SECS: f64 = REGULATION_PERIODS as f64 * REGULATION_PERIOD_SECS;

/// Length of one period in seconds.
pub fn period_length(period: i32) -> f64 {
    if period > REGULATION_PERIODS {
        OVERTIME_PERIOD_SECS
    } else {
        REGULATION_PERIOD_SECS
    }
}

/// Total seconds left in the game from the period and its clock.
///
/// Periods at or below zero read as pre-game. In overtime the value counts
/// from the start of the first extra period.
pub fn game_seconds_remaining(period: i32, period_seconds_left: f64) -> f64 {
    if period <= 0 {
        return GAME_START_SECS;
    }
    if period <= REGULATION_PERIODS {
        return (REGULATION_PERIODS - period) as f64 * REGULATION_PERIOD_SECS + period_seconds_left;
    }
    (period - (REGULATION_PERIODS + 1)) as f64 * OVERTIME_PERIOD_SECS + period_seconds_left
}

/// Side with the ball in a game state. Unknown possession is not allowed
/// here; it defaults to home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GameState {
    /// Seconds left in the whole game
    pub time_remaining_sec: f64,
    /// Home minus away
    pub score_diff: i32,
    pub period: i32,
    pub possession: Side,
    /// Always true: the "home" side of this dataset plays at home
    pub is_home_court: bool,
}

/// Flat numeric feature record with fixed keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Features {
    pub time_remaining_sec: f64,
    pub score_diff: i32,
    pub period: i32,
    pub possession_home: u8,
    pub is_home_court: u8,
}

impl Features {
    pub const KEYS: [&'static str; 5] = [
        "time_remaining_sec",
        "score_diff",
        "period",
        "possession_home",
        "is_home_court",
    ];
}

/// State at tip-off: first period, full clock, level score, home ball by
/// convention until the jump ball resolves.
pub fn initial_state() -> GameState {
    GameState {
        time_remaining_sec: GAME_START_SECS,
        score_diff: 0,
        period: 1,
        possession: Side::Home,
        is_home_court: true,
    }
}

/// State right after `event`, computed from that event alone.
pub fn state_for(event: &CanonicalEvent) -> GameState {
    let possession = match event.possession {
        Possession::Away => Side::Away,
        Possession::Home | Possession::Unknown => Side::Home,
    };
    GameState {
        time_remaining_sec: game_seconds_remaining(event.period, event.time_remaining_sec),
        score_diff: event.home_score.saturating_sub(event.away_score),
        period: event.period,
        possession,
        is_home_court: true,
    }
}

pub fn to_features(state: &GameState) -> Features {
    Features {
        time_remaining_sec: state.time_remaining_sec,
        score_diff: state.score_diff,
        period: state.period,
        possession_home: u8::from(state.possession == Side::Home),
        is_home_court: u8::from(state.is_home_court),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EventType, GameId};
    use approx::assert_relative_eq;

    fn event(period: i32, secs: f64, home: i32, away: i32, possession: Possession) -> CanonicalEvent {
        CanonicalEvent {
            game_id: GameId::parse("1").unwrap(),
            event_num: 1,
            period,
            time_remaining_sec: secs,
            home_score: home,
            away_score: away,
            possession,
            event_type: EventType::Other,
            points_scored: 0,
            description: String::new(),
        }
    }

    #[test]
    fn score_diff_saturates_on_extreme_scores() {
        let state = state_for(&event(1, 600.0, i32::MAX, -5, Possession::Home));
        assert_eq!(state.score_diff, i32::MAX);
        let state = state_for(&event(1, 600.0, -5, i32::MAX, Possession::Home));
        assert_eq!(state.score_diff, i32::MIN);
    }

    #[test]
    fn time_remaining_examples() {
        assert_relative_eq!(game_seconds_remaining(1, 720.0), 2880.0);
        assert_relative_eq!(game_seconds_remaining(4, 0.0), 0.0);
        assert_relative_eq!(game_seconds_remaining(2, 330.0), 1770.0);
        assert_relative_eq!(game_seconds_remaining(5, 300.0), 300.0);
        assert_relative_eq!(game_seconds_remaining(6, 0.0), 300.0);
        assert_relative_eq!(game_seconds_remaining(0, 100.0), 2880.0);
        assert_relative_eq!(game_seconds_remaining(-3, 0.0), 2880.0);
    }

    #[test]
    fn period_lengths() {
        assert_relative_eq!(period_length(1), 720.0);
        assert_relative_eq!(period_length(4), 720.0);
        assert_relative_eq!(period_length(5), 300.0);
    }

    #[test]
    fn initial_state_is_tip_off() {
        let s = initial_state();
        assert_relative_eq!(s.time_remaining_sec, 2880.0);
        assert_eq!(s.period, 1);
        assert_eq!(s.score_diff, 0);
        assert_eq!(s.possession, Side::Home);
        assert!(s.is_home_court);
    }

    #[test]
    fn state_is_projection_of_event() {
        let s = state_for(&event(3, 100.0, 70, 75, Possession::Away));
        assert_relative_eq!(s.time_remaining_sec, 820.0);
        assert_eq!(s.score_diff, -5);
        assert_eq!(s.period, 3);
        assert_eq!(s.possession, Side::Away);
    }

    #[test]
    fn unknown_possession_defaults_home() {
        let s = state_for(&event(1, 600.0, 0, 0, Possession::Unknown));
        assert_eq!(s.possession, Side::Home);
    }

    #[test]
    fn features_are_flat_and_binary() {
        let f = to_features(&state_for(&event(2, 60.0, 40, 38, Possession::Away)));
        assert_relative_eq!(f.time_remaining_sec, 1500.0);
        assert_eq!(f.score_diff, 2);
        assert_eq!(f.period, 2);
        assert_eq!(f.possession_home, 0);
        assert_eq!(f.is_home_court, 1);

        let json = serde_json::to_value(f).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in Features::KEYS {
            assert!(keys.contains(&key), "missing feature key {key}");
        }
        assert_eq!(keys.len(), Features::KEYS.len());
    }
}
