pub mod export;
pub mod manifest;
pub mod sequence;

pub use manifest::{index_manifest, load_manifest};
pub use sequence::EventSequenceBuilder;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::models::{GameId, LabeledEvent, PipelineRun};
use crate::db::Database;
use crate::error::PipelineError;
use crate::feeds::discover_raw_games;
use crate::ratings::{rate_season, EloConfig, SeasonPools};
use crate::replay::{training_rows_for_game, PregameRatings, TrainingRow};

const PARSE_PROGRESS_EVERY: usize = 50;
const REPLAY_PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub output: PathBuf,
    /// Keep every N-th replayed event per game (1 keeps all)
    pub every_n: usize,
    /// Replay only the first N games in id order
    pub limit_games: Option<usize>,
    /// Join pre-game ratings onto each row
    pub with_ratings: bool,
    /// Rating used when a game has none stored
    pub default_rating: f64,
}

fn finish_run(
    db: &Database,
    command: &str,
    started_at: DateTime<Utc>,
    found: usize,
    processed: usize,
    skipped: usize,
    rows_written: usize,
) -> Result<PipelineRun> {
    let mut run = PipelineRun {
        id: None,
        command: command.to_string(),
        games_found: found as i64,
        games_processed: processed as i64,
        games_skipped: skipped as i64,
        rows_written: rows_written as i64,
        started_at,
        finished_at: Utc::now(),
    };
    run.id = Some(db.record_run(&run)?);
    info!(
        "{} finished: {} found, {} processed, {} skipped, {} rows written",
        command, found, processed, skipped, rows_written
    );
    Ok(run)
}

/// A skipped game must not keep rows from an earlier run.
fn forget_game(db: &Database, game_id: &GameId) -> Result<()> {
    let removed = db
        .remove_game(game_id)
        .with_context(|| format!("removing game {}", game_id))?;
    if removed > 0 {
        info!("Removed {} stale events for game {}", removed, game_id);
    }
    Ok(())
}

/// Normalise every raw game artifact in `raw_dir` into the store. Games
/// without usable events are skipped and counted, never fatal.
pub async fn parse_all_games(
    db: &Database,
    raw_dir: &Path,
    events_csv: Option<&Path>,
) -> Result<PipelineRun> {
    let started_at = Utc::now();
    let files = discover_raw_games(raw_dir)?;
    info!("Discovered {} raw game artifacts in {}", files.len(), raw_dir.display());

    let manifest = match load_manifest(raw_dir) {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => {
            warn!("{}; labels will come from each game's last event", e);
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    db.upsert_games(&manifest).context("storing manifest")?;
    let builder = EventSequenceBuilder::new(index_manifest(manifest));

    let total = files.len();
    let tasks = files.into_iter().map(|file| {
        let builder = builder.clone();
        tokio::task::spawn_blocking(move || {
            let built = builder.build_file(&file);
            (file, built)
        })
    });
    let results = join_all(tasks).await;

    let mut parsed = 0;
    let mut skipped = 0;
    let mut events_written = 0;
    let mut labeled: Vec<LabeledEvent> = Vec::new();
    for (i, joined) in results.into_iter().enumerate() {
        let (file, built) = joined.context("parse task panicked")?;
        match built {
            Ok(Some(seq)) => {
                events_written += db
                    .replace_game_events(&seq.game_id, seq.source.name(), &seq.events, &seq.outcome)
                    .with_context(|| format!("storing game {}", seq.game_id))?;
                if events_csv.is_some() {
                    labeled.extend(seq.labeled_events());
                }
                parsed += 1;
            }
            Ok(None) => {
                warn!("Skipping game {}: no usable events in {}", file.game_id, file.path.display());
                forget_game(db, &file.game_id)?;
                skipped += 1;
            }
            Err(e) => {
                warn!("Skipping game {}: {}", file.game_id, e);
                forget_game(db, &file.game_id)?;
                skipped += 1;
            }
        }
        if (i + 1) % PARSE_PROGRESS_EVERY == 0 {
            info!("Parsed {}/{} games", i + 1, total);
        }
    }

    if let Some(path) = events_csv {
        let n = export::write_labeled_events(path, &labeled)?;
        info!("Wrote {} labeled events to {}", n, path.display());
    }

    finish_run(db, "parse", started_at, total, parsed, skipped, events_written)
}

/// Compute per-season pre-game ratings from the manifest into the store.
/// Seasons run concurrently; each owns a fresh rating table.
pub async fn compute_ratings(
    db: &Database,
    raw_dir: &Path,
    cfg: EloConfig,
    output: Option<&Path>,
) -> Result<PipelineRun> {
    let started_at = Utc::now();
    let manifest = load_manifest(raw_dir)?;
    db.upsert_games(&manifest).context("storing manifest")?;

    let pools = SeasonPools::from_manifest(&manifest);
    if pools.dropped() > 0 {
        warn!(
            "Dropped {} manifest rows before rating ({} incomplete, {} without an outcome)",
            pools.dropped(),
            pools.dropped_incomplete,
            pools.dropped_no_outcome
        );
    }
    info!("Rating {} games across {} seasons", pools.games(), pools.seasons.len());

    let found = manifest.len();
    let skipped = pools.dropped();
    // BTreeMap order keeps seasons ascending in the joined output
    let tasks = pools
        .seasons
        .into_values()
        .map(|games| tokio::task::spawn_blocking(move || rate_season(games, cfg)));
    let mut rows = Vec::new();
    for joined in join_all(tasks).await {
        rows.extend(joined.context("rating task panicked")?);
    }

    db.replace_ratings(&rows).context("storing ratings")?;
    if let Some(path) = output {
        export::write_ratings(path, &rows)?;
        info!("Wrote ratings to {}", path.display());
    }

    finish_run(db, "ratings", started_at, found, rows.len(), skipped, rows.len())
}

/// Replay every stored game into training rows and write them as CSV in
/// game-id order.
pub async fn replay_games(db: &Database, opts: &ReplayOptions) -> Result<PipelineRun> {
    let started_at = Utc::now();
    let mut ids = db.list_parsed_game_ids()?;
    let found = ids.len();
    if let Some(limit) = opts.limit_games {
        ids.truncate(limit);
    }

    let ratings: HashMap<GameId, PregameRatings> = if opts.with_ratings {
        db.all_ratings()?
            .into_iter()
            .map(|r| {
                let pre = PregameRatings {
                    home_elo: r.home_elo,
                    away_elo: r.away_elo,
                };
                (r.game_id, pre)
            })
            .collect()
    } else {
        HashMap::new()
    };

    let total = ids.len();
    let tasks = ids.into_iter().map(|game_id| {
        let db = db.clone();
        let pre = opts.with_ratings.then(|| {
            ratings
                .get(&game_id)
                .copied()
                .unwrap_or_else(|| PregameRatings::initial(opts.default_rating))
        });
        let every_n = opts.every_n;
        tokio::task::spawn_blocking(move || -> Result<(GameId, Vec<TrainingRow>)> {
            let events = db.load_game_events(&game_id)?;
            let outcome = db
                .get_outcome(&game_id)?
                .ok_or_else(|| PipelineError::not_found("game outcome", game_id.to_string()))?;
            let rows = training_rows_for_game(&game_id, &events, outcome.label_home_win, pre, every_n);
            Ok((game_id, rows))
        })
    });

    let mut rows = Vec::new();
    let mut replayed = 0;
    let mut skipped = 0;
    for (i, joined) in join_all(tasks).await.into_iter().enumerate() {
        match joined.context("replay task panicked")? {
            Ok((_, game_rows)) => {
                rows.extend(game_rows);
                replayed += 1;
            }
            Err(e) => {
                warn!("Skipping replay: {:#}", e);
                skipped += 1;
            }
        }
        if (i + 1) % REPLAY_PROGRESS_EVERY == 0 {
            info!("Replayed {}/{} games", i + 1, total);
        }
    }

    let written = export::write_training_rows(&opts.output, &rows, opts.with_ratings)?;
    info!("Wrote {} training rows to {}", written, opts.output.display());
    finish_run(db, "replay", started_at, found, replayed, skipped, written)
}

/// Parse, rate (when a manifest exists), then replay.
pub async fn run_all(
    db: &Database,
    raw_dir: &Path,
    cfg: EloConfig,
    opts: &ReplayOptions,
) -> Result<Vec<PipelineRun>> {
    let mut runs = vec![parse_all_games(db, raw_dir, None).await?];
    match compute_ratings(db, raw_dir, cfg, None).await {
        Ok(run) => runs.push(run),
        Err(e) if is_not_found(&e) => {
            warn!("Skipping ratings: {}", e);
        }
        Err(e) => return Err(e),
    }
    runs.push(replay_games(db, opts).await?);
    Ok(runs)
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PipelineError>()
        .is_some_and(PipelineError::is_not_found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
game_id,game_date,season_id,home_team_id,away_team_id,home_team_abbrev,away_team_abbrev,pts_home,pts_away,wl_home
22300001,2023-10-24,22023,1,2,DEN,LAL,2,3,L
22300002,2023-10-26,22023,1,3,DEN,PHX,5,0,W
";

    const GAME_ONE: &str = "\
EVENTNUM,PERIOD,PCTIMESTRING,HOMEDESCRIPTION,NEUTRALDESCRIPTION,VISITORDESCRIPTION,SCORE,SCOREMARGIN,EVENTMSGTYPE
1,1,12:00,,Start of 1st Period,,,,12
2,1,11:25,Jokic 2' Layup (2 PTS),,,2 - 0,2,1
3,2,10:00,,,James 26' 3PT Jump Shot (3 PTS),2 - 3,-1,1
";

    const GAME_TWO: &str = r#"{"game": {"actions": [
        {"actionNumber": 1, "period": 1, "clock": "PT12M00.00S", "actionType": "period", "subType": "start", "description": "Period Start"},
        {"actionNumber": 2, "period": 1, "clock": "PT11M30.00S", "actionType": "2pt", "shotResult": "Made", "teamId": 1, "scoreHome": "2", "scoreAway": "0", "description": "Jokic Layup"},
        {"actionNumber": 3, "period": 4, "clock": "PT00M05.00S", "actionType": "3pt", "shotResult": "Made", "teamId": 1, "scoreHome": 5, "scoreAway": 0, "description": "Murray 3PT"}
    ]}}"#;

    fn write_raw_dir(with_manifest: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0022300001.csv"), GAME_ONE).unwrap();
        std::fs::write(dir.path().join("0022300002.json"), GAME_TWO).unwrap();
        std::fs::write(dir.path().join("0022300009.json"), r#"{"game": {"actions": []}}"#).unwrap();
        if with_manifest {
            std::fs::write(dir.path().join(crate::feeds::MANIFEST_FILE), MANIFEST).unwrap();
        }
        dir
    }

    fn replay_opts(dir: &Path, with_ratings: bool) -> ReplayOptions {
        ReplayOptions {
            output: dir.join("parsed").join("training.csv"),
            every_n: 1,
            limit_games: None,
            with_ratings,
            default_rating: 1500.0,
        }
    }

    #[tokio::test]
    async fn test_parse_skips_empty_games() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        let events_csv = dir.path().join("events.csv");
        let run = parse_all_games(&db, dir.path(), Some(&events_csv)).await.unwrap();

        assert_eq!(run.games_found, 3);
        assert_eq!(run.games_processed, 2);
        assert_eq!(run.games_skipped, 1);
        assert_eq!(run.rows_written, 6);

        let one = GameId::parse("22300001").unwrap();
        assert_eq!(db.load_game_events(&one).unwrap().len(), 3);
        assert_eq!(db.get_outcome(&one).unwrap().unwrap().label_home_win, 0);
        let two = GameId::parse("22300002").unwrap();
        assert_eq!(db.get_outcome(&two).unwrap().unwrap().label_home_win, 1);
        assert!(is_not_found(&db.load_game_events(&GameId::parse("22300009").unwrap()).unwrap_err()));

        let text = std::fs::read_to_string(&events_csv).unwrap();
        assert_eq!(text.lines().count(), 7);
    }

    #[tokio::test]
    async fn test_ratings_follow_game_dates() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        let out = dir.path().join("ratings.csv");
        let run = compute_ratings(&db, dir.path(), EloConfig::default(), Some(&out))
            .await
            .unwrap();
        assert_eq!(run.rows_written, 2);

        // DEN lost the first game, so it enters the second below 1500
        let second = db.get_rating(&GameId::parse("22300002").unwrap()).unwrap().unwrap();
        assert_eq!(second.home_elo, 1490.0);
        assert_eq!(second.away_elo, 1500.0);
        assert!(std::fs::read_to_string(&out).unwrap().contains("0022300002,1490.0,1500.0"));
    }

    #[tokio::test]
    async fn test_ratings_without_manifest_is_not_found() {
        let dir = write_raw_dir(false);
        let db = Database::open_in_memory().unwrap();
        let err = compute_ratings(&db, dir.path(), EloConfig::default(), None)
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_run_all_writes_training_rows_in_game_order() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        let opts = replay_opts(dir.path(), true);
        let runs = run_all(&db, dir.path(), EloConfig::default(), &opts).await.unwrap();
        assert_eq!(runs.len(), 3);

        let text = std::fs::read_to_string(&opts.output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "game_id,event_num,label_home_win,time_remaining_sec,score_diff,period,possession_home,is_home_court,home_elo,away_elo"
        );
        assert_eq!(lines.len(), 7);
        assert!(lines[1].starts_with("0022300001,1,0,2880.0,0,1,"));
        assert!(lines[3].starts_with("0022300001,3,0,"));
        assert!(lines[4].starts_with("0022300002,1,1,"));
        assert!(lines[6].ends_with(",1490.0,1500.0"));
    }

    #[tokio::test]
    async fn test_run_all_without_manifest_uses_default_ratings() {
        let dir = write_raw_dir(false);
        let db = Database::open_in_memory().unwrap();
        let opts = replay_opts(dir.path(), true);
        let runs = run_all(&db, dir.path(), EloConfig::default(), &opts).await.unwrap();
        assert_eq!(runs.len(), 2);

        let text = std::fs::read_to_string(&opts.output).unwrap();
        assert!(text.lines().skip(1).all(|l| l.ends_with(",1500.0,1500.0")));
    }

    #[tokio::test]
    async fn test_replay_sampling_and_limit() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        parse_all_games(&db, dir.path(), None).await.unwrap();

        let mut opts = replay_opts(dir.path(), false);
        opts.every_n = 2;
        opts.limit_games = Some(1);
        let run = replay_games(&db, &opts).await.unwrap();
        assert_eq!(run.games_found, 2);
        assert_eq!(run.games_processed, 1);
        assert_eq!(run.rows_written, 1);

        let text = std::fs::read_to_string(&opts.output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("0022300001,2,0,"));
        assert!(lines[1].ends_with(",1,1"));
    }

    #[tokio::test]
    async fn test_skipped_game_drops_rows_from_earlier_parse() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        parse_all_games(&db, dir.path(), None).await.unwrap();

        // same game, now header only
        let header = GAME_ONE.lines().next().unwrap();
        std::fs::write(dir.path().join("0022300001.csv"), format!("{header}\n")).unwrap();
        let run = parse_all_games(&db, dir.path(), None).await.unwrap();
        assert_eq!(run.games_processed, 1);
        assert_eq!(run.games_skipped, 2);

        let gone = GameId::parse("22300001").unwrap();
        assert!(is_not_found(&db.load_game_events(&gone).unwrap_err()));
        assert!(db.get_outcome(&gone).unwrap().is_none());

        let opts = replay_opts(dir.path(), false);
        let replay = replay_games(&db, &opts).await.unwrap();
        assert_eq!(replay.games_found, 1);
        let text = std::fs::read_to_string(&opts.output).unwrap();
        assert!(text.lines().skip(1).all(|l| l.starts_with("0022300002,")));
        assert_eq!(text.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_one_artifact_per_game_when_both_schemas_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0022300001.csv"), GAME_ONE).unwrap();
        std::fs::write(
            dir.path().join("22300001.json"),
            r#"{"game": {"actions": [{"actionNumber": 1, "period": 1, "clock": "PT12M00.00S", "actionType": "jumpball"}]}}"#,
        )
        .unwrap();
        let db = Database::open_in_memory().unwrap();
        let events_csv = dir.path().join("events.csv");
        let run = parse_all_games(&db, dir.path(), Some(&events_csv)).await.unwrap();

        assert_eq!(run.games_found, 1);
        assert_eq!(run.games_processed, 1);
        let stored = db.load_game_events(&GameId::parse("22300001").unwrap()).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(std::fs::read_to_string(&events_csv).unwrap().lines().count(), 4);
    }

    #[tokio::test]
    async fn test_ratings_reset_each_season() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(crate::feeds::MANIFEST_FILE),
            "\
game_id,game_date,season_id,home_team_id,away_team_id,pts_home,pts_away
22300001,2023-10-24,22023,1,2,100,90
22200900,2023-04-01,22022,1,2,100,90
22200901,2023-04-03,22022,2,1,100,90
22300002,2023-10-26,22023,2,1,100,90
",
        )
        .unwrap();
        let db = Database::open_in_memory().unwrap();
        let out = dir.path().join("ratings.csv");
        compute_ratings(&db, dir.path(), EloConfig::default(), Some(&out))
            .await
            .unwrap();

        let rating = |id: &str| db.get_rating(&GameId::parse(id).unwrap()).unwrap().unwrap();
        assert_eq!((rating("22200900").home_elo, rating("22200900").away_elo), (1500.0, 1500.0));
        assert_eq!((rating("22200901").home_elo, rating("22200901").away_elo), (1490.0, 1510.0));
        // a new season starts every team over
        assert_eq!((rating("22300001").home_elo, rating("22300001").away_elo), (1500.0, 1500.0));
        assert_eq!((rating("22300002").home_elo, rating("22300002").away_elo), (1490.0, 1510.0));

        // seasons come out in ascending order
        let text = std::fs::read_to_string(&out).unwrap();
        let ids: Vec<&str> = text.lines().skip(1).map(|l| &l[..10]).collect();
        assert_eq!(ids, vec!["0022200900", "0022200901", "0022300001", "0022300002"]);
    }

    #[tokio::test]
    async fn test_replay_output_is_reproducible() {
        let dir = write_raw_dir(true);
        let db = Database::open_in_memory().unwrap();
        parse_all_games(&db, dir.path(), None).await.unwrap();
        let opts = replay_opts(dir.path(), false);
        replay_games(&db, &opts).await.unwrap();
        let first = std::fs::read(&opts.output).unwrap();
        replay_games(&db, &opts).await.unwrap();
        assert_eq!(first, std::fs::read(&opts.output).unwrap());
    }
}
