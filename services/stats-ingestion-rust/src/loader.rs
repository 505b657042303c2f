//! Applies a run's records to Postgres as one transaction.
//!
//! Tables are provisioned separately. Every statement is an upsert keyed on
//! the upstream identifier, so re-fetched entities replace their rows.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::model::{Conference, Division, Event, Game, Player, RecordBatch, RecordCounts, Team};

#[async_trait]
pub trait Loader: Send {
    /// All-or-nothing: either every record in `batch` is durable or none is.
    async fn load(&mut self, batch: &RecordBatch) -> Result<RecordCounts>;
}

/// Single-connection pool: the whole run goes through one connection.
pub async fn connect_db_with_retry(url: &str, max_retries: u32) -> Result<PgPool> {
    let max_retries = max_retries.max(1);
    let mut attempt = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    ));
                }
                warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}

/// An open transaction plus the inserts it accepts. Dropping it without
/// `commit` rolls everything back.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
    counts: RecordCounts,
}

impl UnitOfWork {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await.context("Failed to begin transaction")?;
        Ok(Self {
            tx,
            counts: RecordCounts::default(),
        })
    }

    pub async fn insert_conference(&mut self, conference: &Conference) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conferences (conference_key)
            VALUES ($1)
            ON CONFLICT (conference_key) DO NOTHING
            "#,
        )
        .bind(conference.conference_key)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert conference {}", conference.conference_key))?;

        self.counts.conferences += 1;
        Ok(())
    }

    pub async fn insert_division(&mut self, division: &Division) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO divisions (division_key, name)
            VALUES ($1, $2)
            ON CONFLICT (division_key) DO UPDATE SET
                name = EXCLUDED.name
            "#,
        )
        .bind(division.division_key)
        .bind(&division.name)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert division {}", division.division_key))?;

        self.counts.divisions += 1;
        Ok(())
    }

    pub async fn insert_team(&mut self, team: &Team) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO teams (team_key, name, abbreviation, division)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (team_key) DO UPDATE SET
                name = EXCLUDED.name,
                abbreviation = EXCLUDED.abbreviation,
                division = EXCLUDED.division
            "#,
        )
        .bind(team.team_key)
        .bind(&team.name)
        .bind(&team.abbreviation)
        .bind(team.division_key)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert team {}", team.team_key))?;

        self.counts.teams += 1;
        Ok(())
    }

    pub async fn insert_player(&mut self, player: &Player) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO players (player_key, first_name, last_name, number, team)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (player_key) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                number = EXCLUDED.number,
                team = EXCLUDED.team
            "#,
        )
        .bind(player.player_key)
        .bind(&player.first_name)
        .bind(&player.last_name)
        .bind(player.jersey_number)
        .bind(player.team_key)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert player {}", player.player_key))?;

        self.counts.players += 1;
        Ok(())
    }

    pub async fn insert_game(&mut self, game: &Game) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games (game_key, home_team, away_team, home_team_score, away_team_score, puck_drop)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (game_key) DO UPDATE SET
                home_team = EXCLUDED.home_team,
                away_team = EXCLUDED.away_team,
                home_team_score = EXCLUDED.home_team_score,
                away_team_score = EXCLUDED.away_team_score,
                puck_drop = EXCLUDED.puck_drop
            "#,
        )
        .bind(game.game_key)
        .bind(game.home_team_key)
        .bind(game.away_team_key)
        .bind(game.home_score)
        .bind(game.away_score)
        .bind(game.start_timestamp)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to insert game {}", game.game_key))?;

        self.counts.games += 1;
        Ok(())
    }

    pub async fn insert_event(&mut self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                game_key, event_key, description, primary_type, secondary_type,
                player_1, player_1_type, player_2, player_2_type,
                player_3, player_3_type, player_4, player_4_type,
                period, time_remaining
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (game_key, event_key) DO UPDATE SET
                description = EXCLUDED.description,
                primary_type = EXCLUDED.primary_type,
                secondary_type = EXCLUDED.secondary_type,
                player_1 = EXCLUDED.player_1,
                player_1_type = EXCLUDED.player_1_type,
                player_2 = EXCLUDED.player_2,
                player_2_type = EXCLUDED.player_2_type,
                player_3 = EXCLUDED.player_3,
                player_3_type = EXCLUDED.player_3_type,
                player_4 = EXCLUDED.player_4,
                player_4_type = EXCLUDED.player_4_type,
                period = EXCLUDED.period,
                time_remaining = EXCLUDED.time_remaining
            "#,
        )
        .bind(event.game_key)
        .bind(&event.event_key)
        .bind(&event.description)
        .bind(&event.primary_type)
        .bind(&event.secondary_type)
        .bind(event.participant_key(0))
        .bind(event.participant_role(0))
        .bind(event.participant_key(1))
        .bind(event.participant_role(1))
        .bind(event.participant_key(2))
        .bind(event.participant_role(2))
        .bind(event.participant_key(3))
        .bind(event.participant_role(3))
        .bind(event.period)
        .bind(&event.time_remaining)
        .execute(&mut *self.tx)
        .await
        .with_context(|| {
            format!(
                "Failed to insert event {} of game {}",
                event.event_key, event.game_key
            )
        })?;

        self.counts.events += 1;
        Ok(())
    }

    pub async fn commit(self) -> Result<RecordCounts> {
        self.tx.commit().await.context("Failed to commit transaction")?;
        Ok(self.counts)
    }
}

pub struct PgLoader {
    pool: PgPool,
}

impl PgLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Loader for PgLoader {
    async fn load(&mut self, batch: &RecordBatch) -> Result<RecordCounts> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        // Parents before children so foreign keys resolve inside the transaction.
        for conference in &batch.conferences {
            uow.insert_conference(conference).await?;
        }
        for division in &batch.divisions {
            uow.insert_division(division).await?;
        }
        for team in &batch.teams {
            uow.insert_team(team).await?;
        }
        for player in &batch.players {
            uow.insert_player(player).await?;
        }
        for game in &batch.games {
            uow.insert_game(game).await?;
        }
        for event in &batch.events {
            uow.insert_event(event).await?;
        }

        let counts = uow.commit().await?;
        info!("Committed {}", counts);
        Ok(counts)
    }
}
