//! NHL stats API client.
//!
//! Raw response structures mirror the upstream JSON only as deep as the
//! fields this service consumes. Each `fetch_*` issues one request per
//! upstream entity, strictly one after another.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::model::{Division, Game, Team};
use crate::normalize;
use crate::transport::Transport;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// `{"id": 17}` style reference to another entity
#[derive(Debug, Deserialize, Clone)]
pub struct RawRef {
    pub id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConferencesResponse {
    pub conferences: Vec<RawConference>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawConference {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DivisionsResponse {
    pub divisions: Vec<RawDivision>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawDivision {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TeamsResponse {
    pub teams: Vec<RawTeam>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawTeam {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub division: RawRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RosterResponse {
    pub teams: Vec<RosterTeam>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RosterTeam {
    pub roster: RosterBlock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RosterBlock {
    #[serde(default)]
    pub roster: Vec<RawRosterEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawRosterEntry {
    pub person: RawPerson,
    #[serde(default, deserialize_with = "deserialize_jersey_number")]
    pub jersey_number: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawPerson {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleResponse {
    #[serde(default)]
    pub dates: Vec<ScheduleDate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleDate {
    #[serde(default)]
    pub games: Vec<RawScheduleGame>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawScheduleGame {
    pub game_pk: i64,
    pub game_date: DateTime<Utc>,
    pub teams: ScheduleTeams,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleTeams {
    pub home: ScheduleSide,
    pub away: ScheduleSide,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSide {
    pub team: RawRef,
    pub score: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawGameFeed {
    pub live_data: LiveData,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveData {
    pub plays: Plays,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Plays {
    #[serde(default)]
    pub all_plays: Vec<RawPlay>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawPlay {
    pub result: PlayResult,
    pub about: PlayAbout,
    /// Entries may be `null` or incomplete; see `normalize::contiguous_participants`.
    #[serde(default)]
    pub players: Option<Vec<Option<RawPlayParticipant>>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayResult {
    pub event_code: String,
    pub description: String,
    pub event: String,
    pub secondary_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayAbout {
    pub period: i32,
    pub period_time_remaining: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawPlayParticipant {
    pub player: Option<RawPlayerRef>,
    pub player_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawPlayerRef {
    pub id: Option<i64>,
}

/// Jersey numbers arrive as `"91"` or `91`; a missing or blank value is `None`.
fn deserialize_jersey_number<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Jersey {
        Number(i32),
        Text(String),
    }

    match Option::<Jersey>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Jersey::Number(n)) => Ok(Some(n)),
        Some(Jersey::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Jersey::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid jersey number '{}'", s))),
    }
}

pub fn conferences_path() -> String {
    "/conferences".to_string()
}

pub fn divisions_path() -> String {
    "/divisions".to_string()
}

pub fn teams_path() -> String {
    "/teams".to_string()
}

pub fn roster_path(team_id: i64) -> String {
    format!("/teams/{}?expand=team.roster", team_id)
}

/// Both dates are inclusive on the upstream side.
pub fn schedule_path(team_id: i64, start_date: NaiveDate, end_date: NaiveDate) -> String {
    format!(
        "/schedule?teamId={}&startDate={}&endDate={}",
        team_id,
        start_date.format(DATE_FORMAT),
        end_date.format(DATE_FORMAT)
    )
}

pub fn game_feed_path(game_id: i64) -> String {
    format!("/game/{}/feed/live", game_id)
}

/// Stats API client
pub struct StatsClient<T> {
    transport: T,
}

impl<T: Transport> StatsClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let body = self.transport.get(path).await?;
        serde_json::from_str(&body).with_context(|| format!("Failed to parse response from {}", path))
    }

    pub async fn fetch_conferences(&self) -> Result<BTreeMap<i64, String>> {
        let response: ConferencesResponse = self.get_json(&conferences_path()).await?;
        let conferences: BTreeMap<i64, String> = response
            .conferences
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        info!("Fetched {} conferences", conferences.len());
        Ok(conferences)
    }

    pub async fn fetch_divisions(&self) -> Result<BTreeMap<i64, Division>> {
        let response: DivisionsResponse = self.get_json(&divisions_path()).await?;
        let divisions: BTreeMap<i64, Division> = response
            .divisions
            .iter()
            .map(|d| (d.id, normalize::division(d)))
            .collect();

        info!("Fetched {} divisions", divisions.len());
        Ok(divisions)
    }

    /// Team ids in upstream order
    pub async fn fetch_team_ids(&self) -> Result<Vec<i64>> {
        let response: TeamsResponse = self.get_json(&teams_path()).await?;
        Ok(response.teams.iter().map(|t| t.id).collect())
    }

    pub async fn fetch_teams(&self) -> Result<BTreeMap<i64, Team>> {
        let response: TeamsResponse = self.get_json(&teams_path()).await?;
        let mut teams = BTreeMap::new();
        for raw in &response.teams {
            teams.insert(raw.id, normalize::team(raw)?);
        }

        info!("Fetched {} teams", teams.len());
        Ok(teams)
    }

    async fn fetch_schedule(
        &self,
        team_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<ScheduleResponse> {
        self.get_json(&schedule_path(team_id, start_date, end_date))
            .await
            .with_context(|| format!("Failed to fetch schedule for team {}", team_id))
    }

    /// Game ids played by any of `team_ids` within `[start_date, end_date]`.
    pub async fn fetch_game_ids(
        &self,
        team_ids: &[i64],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BTreeSet<i64>> {
        let mut game_ids = BTreeSet::new();
        for &team_id in team_ids {
            let schedule = self.fetch_schedule(team_id, start_date, end_date).await?;
            game_ids.extend(normalize::first_game_per_date(&schedule).map(|g| g.game_pk));
        }

        info!(
            "Found {} games between {} and {} across {} teams",
            game_ids.len(),
            start_date,
            end_date,
            team_ids.len()
        );
        Ok(game_ids)
    }

    /// Same traversal as `fetch_game_ids`, keeping scores and start time.
    /// The first team to report a game wins; later sightings are ignored.
    pub async fn fetch_games(
        &self,
        team_ids: &[i64],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BTreeMap<i64, Game>> {
        let mut games = BTreeMap::new();
        for &team_id in team_ids {
            let schedule = self.fetch_schedule(team_id, start_date, end_date).await?;
            for raw in normalize::first_game_per_date(&schedule) {
                match games.entry(raw.game_pk) {
                    Entry::Vacant(slot) => {
                        slot.insert(normalize::game(raw));
                    }
                    Entry::Occupied(_) => {
                        debug!("Game {} already seen, skipping (team {})", raw.game_pk, team_id);
                    }
                }
            }
        }

        info!(
            "Fetched {} games between {} and {} across {} teams",
            games.len(),
            start_date,
            end_date,
            team_ids.len()
        );
        Ok(games)
    }

    pub async fn fetch_roster(&self, team_id: i64) -> Result<Vec<RawRosterEntry>> {
        let response: RosterResponse = self
            .get_json(&roster_path(team_id))
            .await
            .with_context(|| format!("Failed to fetch roster for team {}", team_id))?;

        let team = response
            .teams
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Roster response for team {} contained no team", team_id))?;

        debug!("Team {} roster has {} entries", team_id, team.roster.roster.len());
        Ok(team.roster.roster)
    }

    pub async fn fetch_game_feed(&self, game_id: i64) -> Result<RawGameFeed> {
        self.get_json(&game_feed_path(game_id))
            .await
            .with_context(|| format!("Failed to fetch live feed for game {}", game_id))
    }
}
