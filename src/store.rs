//! Durable Store Adapter (component A).
//!
//! Wraps a Postgres pool. Each method is one round trip (or one
//! transaction); the adapter never retries — failures surface as a
//! [`ChallengeError::Store`] to the caller, who decides whether to log and
//! drop or propagate.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{ChallengeError, Result};
use crate::models::{Challenge, ChallengeStatus, NewChallenge, User, WinnerSelection};

/// A `WinnerSelection` row joined to its parent challenge's status, used to
/// warm the nomination cache on startup (spec §4.7).
pub struct ActiveSelection {
    pub challenge_id: String,
    pub player_id: String,
    pub winner_id: String,
}

/// Durable store adapter over Postgres.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to `database_url` and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ChallengeError::store(format!("connect failed: {e}")))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| ChallengeError::store(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Build a store directly from an existing pool (used by tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, name, coins, image FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_challenge(&self, id: &str) -> Result<Option<Challenge>> {
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"SELECT id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                      status, winner_id, created_at, updated_at, accepted_at, expires_at,
                      completed_at, claim_time
               FROM challenges WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(challenge)
    }

    pub async fn create_challenge(&self, fields: NewChallenge) -> Result<Challenge> {
        let now = Utc::now();
        let expires_at = now + Challenge::expiry_window();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"INSERT INTO challenges
                 (id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                  status, winner_id, created_at, updated_at, accepted_at, expires_at,
                  completed_at, claim_time)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                       'PENDING', NULL, $10, $10, NULL, $11, NULL, NULL)
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(fields.id)
        .bind(fields.creator_id)
        .bind(fields.invitee_id)
        .bind(fields.is_open)
        .bind(fields.game)
        .bind(fields.description)
        .bind(fields.rules)
        .bind(fields.coins)
        .bind(fields.xp)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// PENDING -> ACCEPTED for a challenge with a pre-assigned invitee.
    pub async fn mark_accepted(&self, id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges SET status = 'ACCEPTED', accepted_at = $2, updated_at = $2
               WHERE id = $1
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// PENDING -> ACCEPTED while also binding `invitee_id` and closing the
    /// open slot (joinOpenChallenge).
    pub async fn bind_invitee_and_accept(&self, id: &str, invitee_id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges
               SET invitee_id = $2, status = 'ACCEPTED', accepted_at = $3, is_open = false, updated_at = $3
               WHERE id = $1
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(invitee_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// ACCEPTED -> IN_PROGRESS.
    pub async fn mark_in_progress(&self, id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges SET status = 'IN_PROGRESS', updated_at = $2
               WHERE id = $1
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// IN_PROGRESS -> COMPLETED plus deletion of its `WinnerSelection` rows,
    /// all inside one transaction (invariant 2 in spec §8).
    pub async fn complete_challenge(&self, id: &str, winner_id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let challenge = Self::complete_challenge_tx(&mut tx, id, winner_id, now).await?;
        tx.commit().await?;
        Ok(challenge)
    }

    async fn complete_challenge_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        winner_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<Challenge> {
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges
               SET status = 'COMPLETED', winner_id = $2, completed_at = $3, updated_at = $3
               WHERE id = $1
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(winner_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM winner_selections WHERE challenge_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(challenge)
    }

    /// Administrative transition: PENDING -> EXPIRED (spec §9, lazily
    /// invoked from observation, never from an inbound message).
    pub async fn expire_challenge(&self, id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges SET status = 'EXPIRED', updated_at = $2
               WHERE id = $1 AND status = 'PENDING'
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// Administrative transition: any non-terminal status -> DISPUTED.
    /// Reserved; no inbound handler drives it (spec §4.4).
    pub async fn dispute_challenge(&self, id: &str) -> Result<Challenge> {
        let now = Utc::now();
        let challenge = sqlx::query_as::<_, Challenge>(
            r#"UPDATE challenges SET status = 'DISPUTED', updated_at = $2
               WHERE id = $1 AND status NOT IN ('COMPLETED', 'EXPIRED', 'DISPUTED')
               RETURNING id, creator_id, invitee_id, is_open, game, description, rules, coins, xp,
                         status, winner_id, created_at, updated_at, accepted_at, expires_at,
                         completed_at, claim_time"#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(challenge)
    }

    /// Upsert a player's nomination (spec §4.4 `selectWinner`).
    pub async fn upsert_selection(
        &self,
        challenge_id: &str,
        player_id: &str,
        winner_id: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO winner_selections (challenge_id, player_id, selected_winner, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (challenge_id, player_id)
               DO UPDATE SET selected_winner = EXCLUDED.selected_winner, updated_at = EXCLUDED.updated_at"#,
        )
        .bind(challenge_id)
        .bind(player_id)
        .bind(winner_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All selections for a single challenge (used by `getWinnerSelections`).
    pub async fn selections_for(&self, challenge_id: &str) -> Result<Vec<WinnerSelection>> {
        let rows = sqlx::query_as::<_, WinnerSelection>(
            "SELECT challenge_id, player_id, selected_winner, updated_at FROM winner_selections WHERE challenge_id = $1",
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Load every selection whose challenge is still IN_PROGRESS, for the
    /// janitor's startup cache warm (spec §4.7).
    pub async fn load_active_selections(&self) -> Result<Vec<ActiveSelection>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"SELECT ws.challenge_id, ws.player_id, ws.selected_winner
               FROM winner_selections ws
               JOIN challenges c ON c.id = ws.challenge_id
               WHERE c.status = $1"#,
        )
        .bind(ChallengeStatus::InProgress)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(challenge_id, player_id, winner_id)| ActiveSelection {
                challenge_id,
                player_id,
                winner_id,
            })
            .collect())
    }

    pub async fn delete_selections_for(&self, challenge_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM winner_selections WHERE challenge_id = $1")
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
