//! Normalized relational records.
//!
//! Every key is assigned upstream; nothing here generates identifiers.

use chrono::{DateTime, Utc};

/// Number of participant columns on an event row
pub const MAX_EVENT_PLAYERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conference {
    pub conference_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Division {
    pub division_key: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub team_key: i64,
    pub name: String,
    pub abbreviation: String,
    pub division_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub player_key: i64,
    pub first_name: String,
    pub last_name: String,
    pub jersey_number: Option<i32>,
    pub team_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub game_key: i64,
    pub home_team_key: i64,
    pub away_team_key: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub start_timestamp: DateTime<Utc>,
}

/// One player involved in an event, e.g. (8471214, "Scorer")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParticipant {
    pub player_key: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub game_key: i64,
    pub event_key: String,
    pub description: String,
    pub primary_type: String,
    pub secondary_type: Option<String>,
    pub period: i32,
    pub time_remaining: String,
    /// Filled from slot 0 upward; once a slot is `None` every later slot is too.
    pub participants: [Option<EventParticipant>; MAX_EVENT_PLAYERS],
}

impl Event {
    pub fn participant_count(&self) -> usize {
        self.participants.iter().take_while(|p| p.is_some()).count()
    }

    pub fn participant_key(&self, slot: usize) -> Option<i64> {
        self.participants
            .get(slot)
            .and_then(|p| p.as_ref())
            .map(|p| p.player_key)
    }

    pub fn participant_role(&self, slot: usize) -> Option<&str> {
        self.participants
            .get(slot)
            .and_then(|p| p.as_ref())
            .map(|p| p.role.as_str())
    }
}

/// Everything one run hands to the loader as a single unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub conferences: Vec<Conference>,
    pub divisions: Vec<Division>,
    pub teams: Vec<Team>,
    pub players: Vec<Player>,
    pub games: Vec<Game>,
    pub events: Vec<Event>,
}

impl RecordBatch {
    pub fn counts(&self) -> RecordCounts {
        RecordCounts {
            conferences: self.conferences.len(),
            divisions: self.divisions.len(),
            teams: self.teams.len(),
            players: self.players.len(),
            games: self.games.len(),
            events: self.events.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub conferences: usize,
    pub divisions: usize,
    pub teams: usize,
    pub players: usize,
    pub games: usize,
    pub events: usize,
}

impl std::fmt::Display for RecordCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} conferences, {} divisions, {} teams, {} players, {} games, {} events",
            self.conferences, self.divisions, self.teams, self.players, self.games, self.events
        )
    }
}
