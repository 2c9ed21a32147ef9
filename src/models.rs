//! Domain types persisted by the store and mirrored in the cache.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered player. Read-only to this engine; owned by the upstream
/// auth/accounting service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub coins: i64,
    pub image: Option<String>,
}

/// Lifecycle status of a [`Challenge`].
///
/// Transitions are monotonic: PENDING -> ACCEPTED -> IN_PROGRESS -> COMPLETED,
/// with PENDING -> EXPIRED and any non-terminal -> DISPUTED as the only
/// branches (see `fsm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "challenge_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Expired,
    Disputed,
}

/// A two-player wager on a named game.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub creator_id: String,
    pub invitee_id: Option<String>,
    pub is_open: bool,
    pub game: String,
    pub description: Option<String>,
    pub rules: Option<Value>,
    pub coins: i64,
    pub xp: i64,
    pub status: ChallengeStatus,
    pub winner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claim_time: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Challenges expire 24 hours after creation (spec §3).
    pub fn expiry_window() -> Duration {
        Duration::hours(24)
    }

    /// True once `now` has passed this challenge's `expires_at` while it is
    /// still PENDING. Used for the "lazy — on next observation" EXPIRED rule.
    pub fn is_lazily_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Pending && now >= self.expires_at
    }
}

/// Fields required to create a new challenge.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub id: String,
    pub creator_id: String,
    pub invitee_id: Option<String>,
    pub is_open: bool,
    pub game: String,
    pub description: Option<String>,
    pub rules: Option<Value>,
    pub coins: i64,
    pub xp: i64,
}

/// One player's declaration of who they believe won a challenge.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WinnerSelection {
    pub challenge_id: String,
    pub player_id: String,
    pub selected_winner: String,
    pub updated_at: DateTime<Utc>,
}
