use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::error::PipelineError;

/// Thread-safe SQLite handle (single connection behind a mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path, creating the
    /// parent directory if needed.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("opening database {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ── Games (manifest) ──────────────────────────────────────────────────────

    /// Upsert manifest rows in one transaction.
    pub fn upsert_games(&self, games: &[ManifestEntry]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO games (game_id, game_date, season_id, home_team_id, away_team_id,
                                    home_team_abbrev, away_team_abbrev, pts_home, pts_away, wl_home)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(game_id) DO UPDATE SET
                    game_date=excluded.game_date,
                    season_id=excluded.season_id,
                    home_team_id=excluded.home_team_id,
                    away_team_id=excluded.away_team_id,
                    home_team_abbrev=excluded.home_team_abbrev,
                    away_team_abbrev=excluded.away_team_abbrev,
                    pts_home=excluded.pts_home,
                    pts_away=excluded.pts_away,
                    wl_home=excluded.wl_home",
            )?;
            for g in games {
                stmt.execute(params![
                    g.game_id,
                    g.game_date,
                    g.season_id,
                    g.home_team_id,
                    g.away_team_id,
                    g.home_team_abbrev,
                    g.away_team_abbrev,
                    g.pts_home,
                    g.pts_away,
                    g.wl_home,
                ])?;
            }
        }
        tx.commit()?;
        Ok(games.len())
    }

    /// Manifest games, newest first, optionally only those a team played in.
    pub fn list_games(&self, team_abbrev: Option<&str>) -> Result<Vec<ManifestEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GAME_COLUMNS} FROM games
             WHERE ?1 IS NULL
                OR UPPER(home_team_abbrev) = UPPER(?1)
                OR UPPER(away_team_abbrev) = UPPER(?1)
             ORDER BY game_date DESC, game_id DESC"
        ))?;
        let games = stmt
            .query_map(params![team_abbrev], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    pub fn get_game(&self, game_id: &GameId) -> Result<Option<ManifestEntry>> {
        let conn = self.conn();
        let game = conn
            .query_row(
                &format!("SELECT {GAME_COLUMNS} FROM games WHERE game_id = ?1"),
                params![game_id],
                map_game,
            )
            .optional()?;
        Ok(game)
    }

    // ── Canonical events ──────────────────────────────────────────────────────

    /// Replace a game's canonical record-set and outcome atomically.
    pub fn replace_game_events(
        &self,
        game_id: &GameId,
        feed_source: &str,
        events: &[CanonicalEvent],
        outcome: &GameOutcome,
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM canonical_events WHERE game_id = ?1", params![game_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO canonical_events (
                    game_id, event_num, period, time_remaining_sec, home_score, away_score,
                    possession, event_type, points_scored, description
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?;
            for ev in events {
                stmt.execute(params![
                    ev.game_id,
                    ev.event_num,
                    ev.period,
                    ev.time_remaining_sec,
                    ev.home_score,
                    ev.away_score,
                    ev.possession.as_str(),
                    ev.event_type.as_str(),
                    ev.points_scored,
                    ev.description,
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO game_outcomes (game_id, feed_source, pts_home_final, pts_away_final,
                                        label_home_win, outcome_source, event_count)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(game_id) DO UPDATE SET
                feed_source=excluded.feed_source,
                pts_home_final=excluded.pts_home_final,
                pts_away_final=excluded.pts_away_final,
                label_home_win=excluded.label_home_win,
                outcome_source=excluded.outcome_source,
                event_count=excluded.event_count",
            params![
                game_id,
                feed_source,
                outcome.pts_home_final,
                outcome.pts_away_final,
                outcome.label_home_win,
                outcome.source.as_str(),
                events.len() as i64,
            ],
        )?;
        tx.commit()?;
        Ok(events.len())
    }

    /// A game's canonical events in `event_num` order. A game with no stored
    /// rows is `PipelineError::NotFound`.
    pub fn load_game_events(&self, game_id: &GameId) -> Result<Vec<CanonicalEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT game_id, event_num, period, time_remaining_sec, home_score, away_score,
                    possession, event_type, points_scored, description
             FROM canonical_events WHERE game_id = ?1 ORDER BY event_num",
        )?;
        let events = stmt
            .query_map(params![game_id], map_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if events.is_empty() {
            return Err(PipelineError::not_found("canonical events", game_id.to_string()).into());
        }
        Ok(events)
    }

    /// Drop a game's canonical rows and outcome. Returns the events removed.
    pub fn remove_game(&self, game_id: &GameId) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM canonical_events WHERE game_id = ?1", params![game_id])?;
        tx.execute("DELETE FROM game_outcomes WHERE game_id = ?1", params![game_id])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Ids of every game with stored canonical events, ascending.
    pub fn list_parsed_game_ids(&self) -> Result<Vec<GameId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT game_id FROM game_outcomes ORDER BY game_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<GameId>>>()?;
        Ok(ids)
    }

    pub fn get_outcome(&self, game_id: &GameId) -> Result<Option<GameOutcome>> {
        let conn = self.conn();
        let outcome = conn
            .query_row(
                "SELECT pts_home_final, pts_away_final, label_home_win, outcome_source
                 FROM game_outcomes WHERE game_id = ?1",
                params![game_id],
                |row| {
                    Ok(GameOutcome {
                        pts_home_final: row.get(0)?,
                        pts_away_final: row.get(1)?,
                        label_home_win: row.get(2)?,
                        source: OutcomeSource::from_label(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(outcome)
    }

    // ── Ratings ───────────────────────────────────────────────────────────────

    /// Replace all stored ratings with a freshly computed set.
    pub fn replace_ratings(&self, rows: &[RatingRow]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM ratings", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO ratings (game_id, season_id, home_elo, away_elo)
                 VALUES (?1,?2,?3,?4)",
            )?;
            for r in rows {
                stmt.execute(params![r.game_id, r.season_id, r.home_elo, r.away_elo])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn get_rating(&self, game_id: &GameId) -> Result<Option<RatingRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT game_id, season_id, home_elo, away_elo FROM ratings WHERE game_id = ?1",
                params![game_id],
                map_rating,
            )
            .optional()?;
        Ok(row)
    }

    /// Every stored rating, by season then game id.
    pub fn all_ratings(&self) -> Result<Vec<RatingRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT game_id, season_id, home_elo, away_elo FROM ratings
             ORDER BY season_id, game_id",
        )?;
        let rows = stmt
            .query_map([], map_rating)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Pipeline runs ─────────────────────────────────────────────────────────

    pub fn record_run(&self, run: &PipelineRun) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pipeline_runs (command, games_found, games_processed, games_skipped,
                                        rows_written, started_at, finished_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                run.command,
                run.games_found,
                run.games_processed,
                run.games_skipped,
                run.rows_written,
                run.started_at,
                run.finished_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_run(&self, command: &str) -> Result<Option<PipelineRun>> {
        let conn = self.conn();
        let run = conn
            .query_row(
                "SELECT id, command, games_found, games_processed, games_skipped,
                        rows_written, started_at, finished_at
                 FROM pipeline_runs WHERE command = ?1 ORDER BY id DESC LIMIT 1",
                params![command],
                map_run,
            )
            .optional()?;
        Ok(run)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn get_stats(&self) -> Result<Stats> {
        let (games, parsed_games, events, ratings) = {
            let conn = self.conn();
            let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, i64>(0));
            (
                count("SELECT COUNT(*) FROM games")?,
                count("SELECT COUNT(*) FROM game_outcomes")?,
                count("SELECT COUNT(*) FROM canonical_events")?,
                count("SELECT COUNT(*) FROM ratings")?,
            )
        };
        Ok(Stats {
            games,
            parsed_games,
            events,
            ratings,
            last_parse: self.latest_run("parse")?,
        })
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

impl ToSql for GameId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for GameId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        GameId::parse(raw).ok_or(FromSqlError::InvalidType)
    }
}

const GAME_COLUMNS: &str = "game_id, game_date, season_id, home_team_id, away_team_id,
    home_team_abbrev, away_team_abbrev, pts_home, pts_away, wl_home";

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<ManifestEntry> {
    Ok(ManifestEntry {
        game_id: row.get(0)?,
        game_date: row.get(1)?,
        season_id: row.get(2)?,
        home_team_id: row.get(3)?,
        away_team_id: row.get(4)?,
        home_team_abbrev: row.get(5)?,
        away_team_abbrev: row.get(6)?,
        pts_home: row.get(7)?,
        pts_away: row.get(8)?,
        wl_home: row.get(9)?,
    })
}

fn map_event(row: &rusqlite::Row) -> rusqlite::Result<CanonicalEvent> {
    Ok(CanonicalEvent {
        game_id: row.get(0)?,
        event_num: row.get(1)?,
        period: row.get(2)?,
        time_remaining_sec: row.get(3)?,
        home_score: row.get(4)?,
        away_score: row.get(5)?,
        possession: Possession::from_label(&row.get::<_, String>(6)?),
        event_type: EventType::from_label(&row.get::<_, String>(7)?),
        points_scored: row.get(8)?,
        description: row.get(9)?,
    })
}

fn map_rating(row: &rusqlite::Row) -> rusqlite::Result<RatingRow> {
    Ok(RatingRow {
        game_id: row.get(0)?,
        season_id: row.get(1)?,
        home_elo: row.get(2)?,
        away_elo: row.get(3)?,
    })
}

fn map_run(row: &rusqlite::Row) -> rusqlite::Result<PipelineRun> {
    Ok(PipelineRun {
        id: row.get(0)?,
        command: row.get(1)?,
        games_found: row.get(2)?,
        games_processed: row.get(3)?,
        games_skipped: row.get(4)?,
        rows_written: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    game_id          TEXT    PRIMARY KEY,
    game_date        TEXT,
    season_id        TEXT,
    home_team_id     INTEGER,
    away_team_id     INTEGER,
    home_team_abbrev TEXT,
    away_team_abbrev TEXT,
    pts_home         INTEGER,
    pts_away         INTEGER,
    wl_home          TEXT
);

CREATE TABLE IF NOT EXISTS canonical_events (
    game_id            TEXT    NOT NULL,
    event_num          INTEGER NOT NULL,
    period             INTEGER NOT NULL,
    time_remaining_sec REAL    NOT NULL,
    home_score         INTEGER NOT NULL,
    away_score         INTEGER NOT NULL,
    possession         TEXT    NOT NULL,
    event_type         TEXT    NOT NULL,
    points_scored      INTEGER NOT NULL,
    description        TEXT    NOT NULL DEFAULT '',
    PRIMARY KEY (game_id, event_num)
);

CREATE TABLE IF NOT EXISTS game_outcomes (
    game_id        TEXT    PRIMARY KEY,
    feed_source    TEXT    NOT NULL,
    pts_home_final INTEGER NOT NULL,
    pts_away_final INTEGER NOT NULL,
    label_home_win INTEGER NOT NULL,
    outcome_source TEXT    NOT NULL,
    event_count    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ratings (
    game_id   TEXT PRIMARY KEY,
    season_id TEXT NOT NULL,
    home_elo  REAL NOT NULL,
    away_elo  REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    command         TEXT    NOT NULL,
    games_found     INTEGER NOT NULL,
    games_processed INTEGER NOT NULL,
    games_skipped   INTEGER NOT NULL,
    rows_written    INTEGER NOT NULL,
    started_at      TEXT    NOT NULL,
    finished_at     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_games_date ON games(game_date);
CREATE INDEX IF NOT EXISTS idx_ratings_season ON ratings(season_id);
"#;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Manifest rows
    pub games: i64,
    /// Games with stored canonical events
    pub parsed_games: i64,
    pub events: i64,
    pub ratings: i64,
    pub last_parse: Option<PipelineRun>,
}
