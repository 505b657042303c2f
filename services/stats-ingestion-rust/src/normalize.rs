//! Raw API payloads to fixed-shape relational records.
//!
//! Optional upstream fields map to `None`, never to zero or an error. The only
//! failures here are values the schema cannot hold: a full name that cannot
//! be split into first and last name, or an over-long team abbreviation.

use thiserror::Error;

use crate::api::{
    RawDivision, RawGameFeed, RawPlay, RawPlayParticipant, RawRosterEntry, RawScheduleGame,
    RawTeam, ScheduleResponse,
};
use crate::model::{Division, Event, EventParticipant, Game, Player, Team, MAX_EVENT_PLAYERS};

pub const MAX_ABBREVIATION_LEN: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("player {player_id}: full name '{full_name}' cannot be split into first and last name")]
    UnsplittableName { player_id: i64, full_name: String },

    #[error("team {team_id}: abbreviation '{abbreviation}' is longer than 3 characters")]
    AbbreviationTooLong { team_id: i64, abbreviation: String },
}

pub fn division(raw: &RawDivision) -> Division {
    Division {
        division_key: raw.id,
        name: raw.name.clone(),
    }
}

pub fn team(raw: &RawTeam) -> Result<Team, NormalizeError> {
    if raw.abbreviation.chars().count() > MAX_ABBREVIATION_LEN {
        return Err(NormalizeError::AbbreviationTooLong {
            team_id: raw.id,
            abbreviation: raw.abbreviation.clone(),
        });
    }

    Ok(Team {
        team_key: raw.id,
        name: raw.name.clone(),
        abbreviation: raw.abbreviation.clone(),
        division_key: raw.division.id,
    })
}

/// Splits at the first space: "Jean Gabriel Pageau" -> ("Jean", "Gabriel Pageau").
/// Returns `None` when there is no space or either side is blank.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let (first, last) = full_name.trim().split_once(' ')?;
    let last = last.trim();
    if first.is_empty() || last.is_empty() {
        return None;
    }
    Some((first, last))
}

pub fn player(raw: &RawRosterEntry, team_key: i64) -> Result<Player, NormalizeError> {
    let (first_name, last_name) =
        split_full_name(&raw.person.full_name).ok_or_else(|| NormalizeError::UnsplittableName {
            player_id: raw.person.id,
            full_name: raw.person.full_name.clone(),
        })?;

    Ok(Player {
        player_key: raw.person.id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        jersey_number: raw.jersey_number,
        team_key,
    })
}

/// Only `games[0]` of each schedule date is considered; dates with no games
/// are skipped.
pub fn first_game_per_date(schedule: &ScheduleResponse) -> impl Iterator<Item = &RawScheduleGame> {
    schedule.dates.iter().filter_map(|date| date.games.first())
}

pub fn game(raw: &RawScheduleGame) -> Game {
    Game {
        game_key: raw.game_pk,
        home_team_key: raw.teams.home.team.id,
        away_team_key: raw.teams.away.team.id,
        home_score: raw.teams.home.score,
        away_score: raw.teams.away.score,
        start_timestamp: raw.game_date,
    }
}

fn participant(raw: &RawPlayParticipant) -> Option<EventParticipant> {
    let player_key = raw.player.as_ref()?.id?;
    let role = raw.player_type.clone()?;
    Some(EventParticipant { player_key, role })
}

/// Reads participants in order and stops at the first missing one. Entries
/// after a gap are never read, and nothing is compacted: `[p1, null, p3]`
/// yields `[p1, None, None, None]`.
pub fn contiguous_participants(
    raw: &[Option<RawPlayParticipant>],
) -> [Option<EventParticipant>; MAX_EVENT_PLAYERS] {
    let mut slots: [Option<EventParticipant>; MAX_EVENT_PLAYERS] = Default::default();

    for (slot, entry) in slots.iter_mut().zip(raw) {
        match entry.as_ref().and_then(participant) {
            Some(p) => *slot = Some(p),
            None => break,
        }
    }

    slots
}

pub fn event(game_key: i64, raw: &RawPlay) -> Event {
    Event {
        game_key,
        event_key: raw.result.event_code.clone(),
        description: raw.result.description.clone(),
        primary_type: raw.result.event.clone(),
        secondary_type: raw.result.secondary_type.clone(),
        period: raw.about.period,
        time_remaining: raw.about.period_time_remaining.clone(),
        participants: contiguous_participants(raw.players.as_deref().unwrap_or(&[])),
    }
}

pub fn events<'a>(game_key: i64, feed: &'a RawGameFeed) -> impl Iterator<Item = Event> + 'a {
    feed.live_data
        .plays
        .all_plays
        .iter()
        .map(move |play| event(game_key, play))
}
