//! Run controller.
//!
//! One run: read watermark, fetch reference data (conferences, divisions,
//! teams, rosters), fetch the window's games and play-by-play, load it all as
//! a single unit of work, then move the watermark. Stages run strictly in
//! sequence and any failure aborts the run; nothing is retried.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::api::StatsClient;
use crate::loader::Loader;
use crate::model::{Conference, Event, Player, RecordBatch, RecordCounts};
use crate::normalize;
use crate::transport::Transport;
use crate::watermark::{FetchWindow, FileWatermarkStore};

/// When the watermark moves relative to the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPolicy {
    /// Advance only after the unit of work commits.
    AfterCommit,
    /// Advance before anything is fetched. A failed run then skips its
    /// window on the next run.
    BeforeLoad,
}

impl FromStr for WatermarkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "after-commit" => Ok(Self::AfterCommit),
            "before-load" => Ok(Self::BeforeLoad),
            other => Err(format!(
                "unknown policy '{}', expected after-commit or before-load",
                other
            )),
        }
    }
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterCommit => write!(f, "after-commit"),
            Self::BeforeLoad => write!(f, "before-load"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub watermark_policy: WatermarkPolicy,
    /// When false, game ids are still discovered for play-by-play but no
    /// Game rows are loaded.
    pub load_games: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            watermark_policy: WatermarkPolicy::AfterCommit,
            load_games: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    FetchingReference,
    FetchingIncremental,
    Loading,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub window: FetchWindow,
    pub state: PipelineState,
    pub counts: RecordCounts,
}

pub struct Pipeline<T, L> {
    client: StatsClient<T>,
    watermark: FileWatermarkStore,
    loader: L,
    options: PipelineOptions,
    state: PipelineState,
}

impl<T: Transport, L: Loader> Pipeline<T, L> {
    pub fn new(
        client: StatsClient<T>,
        watermark: FileWatermarkStore,
        loader: L,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            watermark,
            loader,
            options,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    fn transition(&mut self, next: PipelineState) {
        info!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs once for the logical day `today`.
    pub async fn run(&mut self, today: NaiveDate) -> Result<RunReport> {
        self.state = PipelineState::Idle;

        let result = self.execute(today).await;
        if let Err(e) = &result {
            // A commit that already happened stays committed even if the
            // watermark write afterwards failed.
            if self.state != PipelineState::Committed {
                self.transition(PipelineState::Aborted);
            }
            error!("Ingestion run failed in state {:?}: {:?}", self.state, e);
        }
        result
    }

    async fn execute(&mut self, today: NaiveDate) -> Result<RunReport> {
        let watermark = self.watermark.read_watermark()?;
        let window = FetchWindow::from_watermark(watermark, today)?;
        info!(
            "Ingesting window {} (watermark policy: {})",
            window, self.options.watermark_policy
        );

        if self.options.watermark_policy == WatermarkPolicy::BeforeLoad {
            warn!(
                "Advancing watermark to {} before loading; a failed run will not be retried",
                window.next_watermark()
            );
            self.watermark.advance_watermark(window.next_watermark())?;
        }

        let mut batch = RecordBatch::default();

        self.transition(PipelineState::FetchingReference);
        batch.conferences = self
            .client
            .fetch_conferences()
            .await?
            .into_keys()
            .map(|conference_key| Conference { conference_key })
            .collect();
        batch.divisions = self.client.fetch_divisions().await?.into_values().collect();
        batch.teams = self.client.fetch_teams().await?.into_values().collect();
        let team_ids = self.client.fetch_team_ids().await?;
        batch.players = self.fetch_players(&team_ids).await?;

        self.transition(PipelineState::FetchingIncremental);
        let game_ids: Vec<i64> = match window.schedule_range() {
            None => {
                warn!(
                    "Watermark {} is past {}; no games to fetch",
                    window.start, window.end
                );
                Vec::new()
            }
            Some((start_date, end_date)) if self.options.load_games => {
                let games = self
                    .client
                    .fetch_games(&team_ids, start_date, end_date)
                    .await?;
                let ids = games.keys().copied().collect();
                batch.games = games.into_values().collect();
                ids
            }
            Some((start_date, end_date)) => self
                .client
                .fetch_game_ids(&team_ids, start_date, end_date)
                .await?
                .into_iter()
                .collect(),
        };
        batch.events = self.fetch_events(&game_ids).await?;

        info!("Fetched {}", batch.counts());

        self.transition(PipelineState::Loading);
        let counts = self.loader.load(&batch).await?;
        self.transition(PipelineState::Committed);

        if self.options.watermark_policy == WatermarkPolicy::AfterCommit {
            self.watermark
                .advance_watermark(window.next_watermark())
                .context("Run committed but the watermark was not advanced; the next run will re-fetch this window")?;
        }

        Ok(RunReport {
            window,
            state: self.state,
            counts,
        })
    }

    /// A player listed on several rosters keeps the last team fetched.
    async fn fetch_players(&self, team_ids: &[i64]) -> Result<Vec<Player>> {
        let mut players = BTreeMap::new();
        for &team_id in team_ids {
            let roster = self.client.fetch_roster(team_id).await?;
            for entry in &roster {
                players.insert(entry.person.id, normalize::player(entry, team_id)?);
            }
        }

        info!("Fetched {} players from {} rosters", players.len(), team_ids.len());
        Ok(players.into_values().collect())
    }

    /// Events sharing `(game_key, event_key)` overwrite each other.
    async fn fetch_events(&self, game_ids: &[i64]) -> Result<Vec<Event>> {
        let mut events = BTreeMap::new();
        for &game_id in game_ids {
            let feed = self.client.fetch_game_feed(game_id).await?;
            for event in normalize::events(game_id, &feed) {
                events.insert((event.game_key, event.event_key.clone()), event);
            }
        }

        info!("Fetched {} events from {} games", events.len(), game_ids.len());
        Ok(events.into_values().collect())
    }
}
