use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

use stats_ingestion::api::{
    conferences_path, divisions_path, game_feed_path, roster_path, schedule_path, teams_path,
};
use stats_ingestion::model::{RecordBatch, RecordCounts};
use stats_ingestion::{
    FileWatermarkStore, Loader, Pipeline, PipelineOptions, PipelineState, StatsClient, Transport,
    WatermarkPolicy,
};

const GAME: i64 = 2022020100;

#[derive(Clone)]
struct FixtureTransport {
    bodies: Arc<HashMap<String, String>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FixtureTransport {
    fn new(bodies: HashMap<String, String>) -> Self {
        Self {
            bodies: Arc::new(bodies),
            requests: Arc::default(),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get(&self, path: &str) -> Result<String> {
        self.requests.lock().unwrap().push(path.to_string());
        self.bodies
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("Stats API error for {} (status 404 Not Found)", path))
    }
}

#[derive(Default)]
struct RecordingLoader {
    batches: Vec<RecordBatch>,
    fail: bool,
}

#[async_trait]
impl Loader for RecordingLoader {
    async fn load(&mut self, batch: &RecordBatch) -> Result<RecordCounts> {
        self.batches.push(batch.clone());
        if self.fail {
            bail!("insert or update on table \"events\" violates foreign key constraint");
        }
        Ok(batch.counts())
    }
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn schedule_body() -> String {
    format!(
        r#"{{"dates": [{{"games": [{{
            "gamePk": {},
            "gameDate": "2023-01-03T00:00:00Z",
            "teams": {{
                "home": {{"team": {{"id": 3}}, "score": 4}},
                "away": {{"team": {{"id": 1}}, "score": 2}}
            }}
        }}]}}]}}"#,
        GAME
    )
}

fn game_feed_body() -> String {
    r#"{"liveData": {"plays": {"allPlays": [
        {
            "result": {"eventCode": "NYR52", "description": "Mika Zibanejad (5) Wrist Shot, assists: Adam Fox (12), Artemi Panarin (9)",
                       "event": "Goal", "secondaryType": "Wrist Shot"},
            "about": {"period": 2, "periodTimeRemaining": "11:32"},
            "players": [
                {"player": {"id": 8476459}, "playerType": "Scorer"},
                {"player": {"id": 8479323}, "playerType": "Assist"},
                {"player": {"id": 8478550}, "playerType": "Assist"},
                {"player": {"id": 8477234}, "playerType": "Goalie"}
            ]
        },
        {
            "result": {"eventCode": "NYR53", "description": "Period Start", "event": "Period Start"},
            "about": {"period": 3, "periodTimeRemaining": "20:00"}
        }
    ]}}}"#
        .to_string()
}

/// Two teams, three players, one game seen by both teams, two events.
fn league(start: NaiveDate, end: NaiveDate) -> HashMap<String, String> {
    let mut bodies = HashMap::new();
    bodies.insert(
        conferences_path(),
        r#"{"conferences": [{"id": 6, "name": "Eastern"}]}"#.to_string(),
    );
    bodies.insert(
        divisions_path(),
        r#"{"divisions": [{"id": 18, "name": "Metropolitan"}]}"#.to_string(),
    );
    bodies.insert(
        teams_path(),
        r#"{"teams": [
            {"id": 1, "name": "New Jersey Devils", "abbreviation": "NJD", "division": {"id": 18}},
            {"id": 3, "name": "New York Rangers", "abbreviation": "NYR", "division": {"id": 18}}
        ]}"#
        .to_string(),
    );
    bodies.insert(
        roster_path(1),
        r#"{"teams": [{"roster": {"roster": [
            {"person": {"id": 8480002, "fullName": "Nico Hischier"}, "jerseyNumber": "13"},
            {"person": {"id": 8481559, "fullName": "Jack Hughes"}}
        ]}}]}"#
            .to_string(),
    );
    bodies.insert(
        roster_path(3),
        r#"{"teams": [{"roster": {"roster": [
            {"person": {"id": 8476459, "fullName": "Mika Zibanejad"}, "jerseyNumber": "93"}
        ]}}]}"#
            .to_string(),
    );
    bodies.insert(schedule_path(1, start, end), schedule_body());
    bodies.insert(schedule_path(3, start, end), schedule_body());
    bodies.insert(game_feed_path(GAME), game_feed_body());
    bodies
}

struct Harness {
    _dir: tempfile::TempDir,
    transport: FixtureTransport,
    store: FileWatermarkStore,
}

impl Harness {
    fn new(watermark: Option<&str>, bodies: HashMap<String, String>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_update.txt");
        if let Some(w) = watermark {
            fs::write(&path, w).unwrap();
        }
        Self {
            _dir: dir,
            transport: FixtureTransport::new(bodies),
            store: FileWatermarkStore::new(path),
        }
    }

    fn pipeline(
        &self,
        loader: RecordingLoader,
        options: PipelineOptions,
    ) -> Pipeline<FixtureTransport, RecordingLoader> {
        Pipeline::new(
            StatsClient::new(self.transport.clone()),
            self.store.clone(),
            loader,
            options,
        )
    }

    fn watermark_file(&self) -> String {
        fs::read_to_string(self.store.path()).unwrap()
    }
}

#[tokio::test]
async fn end_to_end_loads_one_unit_of_work() {
    let today = date("2023-01-05");
    let harness = Harness::new(
        Some("2023-01-01"),
        league(date("2023-01-01"), date("2023-01-06")),
    );
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    let report = assert_ok!(pipeline.run(today).await);

    assert_eq!(report.state, PipelineState::Committed);
    assert_eq!(pipeline.state(), PipelineState::Committed);
    assert_eq!(report.window.start, date("2023-01-01"));
    assert_eq!(report.window.end, date("2023-01-06"));

    let batches = &pipeline.loader().batches;
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.teams.len(), 2);
    assert_eq!(batch.players.len(), 3);
    assert_eq!(batch.games.len(), 1);
    assert_eq!(batch.events.len(), 2);
    assert_eq!(batch.divisions.len(), 1);
    assert_eq!(batch.conferences.len(), 1);
    assert_eq!(report.counts, batch.counts());

    let game = &batch.games[0];
    assert_eq!(game.game_key, GAME);
    assert_eq!((game.home_team_key, game.away_team_key), (3, 1));
    assert_eq!((game.home_score, game.away_score), (4, 2));

    let goal = batch.events.iter().find(|e| e.event_key == "NYR52").unwrap();
    assert_eq!(goal.participant_count(), 4);
    assert_eq!(goal.participant_key(3), Some(8477234));
    assert_eq!(goal.secondary_type.as_deref(), Some("Wrist Shot"));

    let period_start = batch.events.iter().find(|e| e.event_key == "NYR53").unwrap();
    assert!(period_start.participants.iter().all(Option::is_none));
    assert_eq!(period_start.secondary_type, None);

    let hughes = batch.players.iter().find(|p| p.player_key == 8481559).unwrap();
    assert_eq!(hughes.jersey_number, None);
    assert_eq!(hughes.team_key, 1);

    assert_eq!(harness.watermark_file(), "2023-01-06");

    let requests = harness.transport.requests();
    assert!(requests.contains(&"/schedule?teamId=1&startDate=2023-01-01&endDate=2023-01-06".to_string()));
    assert_eq!(
        requests.iter().filter(|p| p.starts_with("/game/")).count(),
        1,
        "game feed fetched once despite two schedule sightings"
    );
}

#[tokio::test]
async fn next_run_refetches_the_last_day_already_covered() {
    let mut bodies = league(date("2023-01-01"), date("2023-01-06"));
    for team_id in [1, 3] {
        bodies.insert(
            schedule_path(team_id, date("2023-01-06"), date("2023-01-07")),
            schedule_body(),
        );
    }
    let harness = Harness::new(Some("2023-01-01"), bodies);

    let mut first = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());
    assert_ok!(first.run(date("2023-01-05")).await);
    assert_eq!(harness.watermark_file(), "2023-01-06");

    let mut second = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());
    let report = assert_ok!(second.run(date("2023-01-06")).await);
    assert_eq!(report.counts.games, 1);
    assert_eq!(harness.watermark_file(), "2023-01-07");

    let schedules: Vec<String> = harness
        .transport
        .requests()
        .into_iter()
        .filter(|p| p.starts_with("/schedule?teamId=1&"))
        .collect();
    assert_eq!(
        schedules,
        vec![
            "/schedule?teamId=1&startDate=2023-01-01&endDate=2023-01-06".to_string(),
            "/schedule?teamId=1&startDate=2023-01-06&endDate=2023-01-07".to_string(),
        ]
    );
}

#[tokio::test]
async fn second_run_on_the_same_day_refetches_tomorrow() {
    let mut bodies = league(date("2023-01-01"), date("2023-01-06"));
    for team_id in [1, 3] {
        bodies.insert(
            schedule_path(team_id, date("2023-01-06"), date("2023-01-06")),
            r#"{"dates": []}"#.to_string(),
        );
    }
    let harness = Harness::new(Some("2023-01-01"), bodies);

    let mut first = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());
    assert_ok!(first.run(date("2023-01-05")).await);

    let mut second = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());
    let report = assert_ok!(second.run(date("2023-01-05")).await);

    assert_eq!(report.counts.games, 0);
    assert!(harness
        .transport
        .requests()
        .contains(&"/schedule?teamId=3&startDate=2023-01-06&endDate=2023-01-06".to_string()));
    assert_eq!(harness.watermark_file(), "2023-01-06");
}

#[tokio::test]
async fn failed_load_keeps_watermark_when_advancing_after_commit() {
    let harness = Harness::new(
        Some("2023-01-01"),
        league(date("2023-01-01"), date("2023-01-06")),
    );
    let loader = RecordingLoader {
        fail: true,
        ..Default::default()
    };
    let mut pipeline = harness.pipeline(loader, PipelineOptions::default());

    assert_err!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert_eq!(pipeline.loader().batches.len(), 1);
    assert_eq!(harness.watermark_file(), "2023-01-01");
}

#[tokio::test]
async fn failed_load_still_moves_watermark_when_advancing_before_load() {
    let harness = Harness::new(
        Some("2023-01-01"),
        league(date("2023-01-01"), date("2023-01-06")),
    );
    let loader = RecordingLoader {
        fail: true,
        ..Default::default()
    };
    let options = PipelineOptions {
        watermark_policy: WatermarkPolicy::BeforeLoad,
        ..Default::default()
    };
    let mut pipeline = harness.pipeline(loader, options);

    assert_err!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert_eq!(harness.watermark_file(), "2023-01-06");
}

#[tokio::test]
async fn upstream_failure_aborts_before_loading() {
    let mut bodies = league(date("2023-01-01"), date("2023-01-06"));
    bodies.remove(&game_feed_path(GAME));
    let harness = Harness::new(Some("2023-01-01"), bodies);
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    let err = assert_err!(pipeline.run(date("2023-01-05")).await);

    assert!(format!("{:?}", err).contains(&game_feed_path(GAME)));
    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert!(pipeline.loader().batches.is_empty());
    assert_eq!(harness.watermark_file(), "2023-01-01");
}

#[tokio::test]
async fn missing_watermark_aborts_without_fetching() {
    let harness = Harness::new(None, league(date("2023-01-01"), date("2023-01-06")));
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    assert_err!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert!(harness.transport.requests().is_empty());
    assert!(!harness.store.path().exists());
}

#[tokio::test]
async fn skipping_games_still_loads_their_events() {
    let harness = Harness::new(
        Some("2023-01-01"),
        league(date("2023-01-01"), date("2023-01-06")),
    );
    let options = PipelineOptions {
        load_games: false,
        ..Default::default()
    };
    let mut pipeline = harness.pipeline(RecordingLoader::default(), options);

    let report = assert_ok!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(report.counts.games, 0);
    assert_eq!(report.counts.events, 2);
    assert_eq!(harness.watermark_file(), "2023-01-06");
}

#[tokio::test]
async fn future_watermark_skips_incremental_fetch() {
    let harness = Harness::new(
        Some("2023-01-09"),
        league(date("2023-01-01"), date("2023-01-06")),
    );
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    let report = assert_ok!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(report.counts.teams, 2);
    assert_eq!(report.counts.games, 0);
    assert_eq!(report.counts.events, 0);
    assert!(!harness
        .transport
        .requests()
        .iter()
        .any(|p| p.starts_with("/schedule") || p.starts_with("/game/")));
    assert_eq!(harness.watermark_file(), "2023-01-09");
}

#[tokio::test]
async fn duplicate_event_codes_overwrite() {
    let mut bodies = league(date("2023-01-01"), date("2023-01-06"));
    bodies.insert(
        game_feed_path(GAME),
        r#"{"liveData": {"plays": {"allPlays": [
            {"result": {"eventCode": "NYR7", "description": "Shot", "event": "Shot"},
             "about": {"period": 1, "periodTimeRemaining": "15:00"}},
            {"result": {"eventCode": "NYR7", "description": "Goal", "event": "Goal"},
             "about": {"period": 1, "periodTimeRemaining": "14:58"}}
        ]}}}"#
            .to_string(),
    );
    let harness = Harness::new(Some("2023-01-01"), bodies);
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    let report = assert_ok!(pipeline.run(date("2023-01-05")).await);

    assert_eq!(report.counts.events, 1);
    let event = &pipeline.loader().batches[0].events[0];
    assert_eq!(event.primary_type, "Goal");
    assert_eq!(event.time_remaining, "14:58");
}

#[tokio::test]
async fn unsplittable_player_name_aborts_the_run() {
    let mut bodies = league(date("2023-01-01"), date("2023-01-06"));
    bodies.insert(
        roster_path(3),
        r#"{"teams": [{"roster": {"roster": [
            {"person": {"id": 1, "fullName": "Mononym"}}
        ]}}]}"#
            .to_string(),
    );
    let harness = Harness::new(Some("2023-01-01"), bodies);
    let mut pipeline = harness.pipeline(RecordingLoader::default(), PipelineOptions::default());

    let err = assert_err!(pipeline.run(date("2023-01-05")).await);

    assert!(err.to_string().contains("Mononym"));
    assert!(pipeline.loader().batches.is_empty());
}
