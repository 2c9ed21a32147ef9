//! Inbound/outbound websocket frame shapes.
//!
//! Frames are JSON objects discriminated by a `type` field, matching the
//! `Action`/`Response` split used by the reference turn-based game servers
//! this engine is modeled on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Challenge;

/// A challenge plus the nomination map current at broadcast time — every
/// outbound frame carrying a challenge uses this shape (spec §6, "Enriched
/// challenge payload").
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeView {
    #[serde(flatten)]
    pub challenge: Challenge,
    #[serde(rename = "winnerSelections")]
    pub winner_selections: HashMap<String, String>,
}

/// Frames received from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "setOnline")]
    SetOnline { #[serde(rename = "userId")] user_id: String, online: bool },

    #[serde(rename = "createChallenge")]
    CreateChallenge {
        #[serde(rename = "creatorId")]
        creator_id: String,
        game: String,
        coins: i64,
        #[serde(default)]
        xp: i64,
        #[serde(rename = "inviteeId", default)]
        invitee_id: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        rules: Option<Value>,
        #[serde(rename = "isOpen", default)]
        is_open: bool,
    },

    #[serde(rename = "acceptChallenge")]
    AcceptChallenge { #[serde(rename = "challengeId")] challenge_id: String },

    #[serde(rename = "joinOpenChallenge")]
    JoinOpenChallenge {
        #[serde(rename = "challengeId")]
        challenge_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "startChallenge")]
    StartChallenge {
        #[serde(rename = "challengeId")]
        challenge_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "selectWinner")]
    SelectWinner {
        #[serde(rename = "challengeId", alias = "gameId")]
        challenge_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "winnerId", alias = "selectedWinner")]
        winner_id: String,
    },

    #[serde(rename = "claimVictory")]
    ClaimVictory { #[serde(rename = "challengeId")] challenge_id: String },

    #[serde(rename = "getWinnerSelections")]
    GetWinnerSelections,
}

/// A user entry in the presence roster.
#[derive(Debug, Clone, Serialize)]
pub struct OnlineUser {
    pub id: String,
    pub name: String,
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "onlineUsers")]
    OnlineUsers { users: Vec<OnlineUser> },

    #[serde(rename = "challengeCreated")]
    ChallengeCreated { challenge: ChallengeView },

    #[serde(rename = "openChallengeCreated")]
    OpenChallengeCreated { challenge: ChallengeView },

    #[serde(rename = "challengeAccepted")]
    ChallengeAccepted { challenge: ChallengeView },

    #[serde(rename = "challengeStartedBy")]
    ChallengeStartedBy { challenge: ChallengeView, #[serde(rename = "startedBy")] started_by: String },

    #[serde(rename = "challengeUpdate")]
    ChallengeUpdate { challenge: ChallengeView },

    #[serde(rename = "challengeCompleted")]
    ChallengeCompleted { challenge: ChallengeView },

    #[serde(rename = "allWinnerSelections")]
    AllWinnerSelections { selections: HashMap<String, HashMap<String, String>> },

    #[serde(rename = "joinOpenChallengeFailed")]
    JoinOpenChallengeFailed { message: String },

    #[serde(rename = "failedToStartChallenge")]
    FailedToStartChallenge { message: String },

    #[serde(rename = "claimVictoryFailed")]
    ClaimVictoryFailed { message: String },

    #[serde(rename = "error")]
    Error { message: String },
}

impl Outbound {
    /// The generic protocol-error frame (spec §4.5, §7).
    pub fn generic_error() -> Self {
        Self::Error { message: "Failed to process message".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChallengeStatus;
    use chrono::Utc;

    fn sample_challenge() -> Challenge {
        let now = Utc::now();
        Challenge {
            id: "c1".to_string(),
            creator_id: "u1".to_string(),
            invitee_id: Some("u2".to_string()),
            is_open: false,
            game: "chess".to_string(),
            description: None,
            rules: None,
            coins: 10,
            xp: 0,
            status: ChallengeStatus::InProgress,
            winner_id: None,
            created_at: now,
            updated_at: now,
            accepted_at: Some(now),
            expires_at: now,
            completed_at: None,
            claim_time: None,
        }
    }

    #[test]
    fn challenge_view_serializes_camel_case() {
        let view = ChallengeView { challenge: sample_challenge(), winner_selections: HashMap::new() };
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["creatorId"], "u1");
        assert_eq!(json["inviteeId"], "u2");
        assert_eq!(json["isOpen"], false);
        assert!(json.get("winnerSelections").is_some());

        for snake in ["creator_id", "invitee_id", "is_open", "winner_selections", "winner_id"] {
            assert!(json.get(snake).is_none(), "unexpected snake_case field {snake} in outbound JSON");
        }
    }

    #[test]
    fn challenge_completed_carries_camel_case_winner_id() {
        let mut challenge = sample_challenge();
        challenge.status = ChallengeStatus::Completed;
        challenge.winner_id = Some("u1".to_string());
        let frame = Outbound::ChallengeCompleted { challenge: ChallengeView { challenge, winner_selections: HashMap::new() } };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["challenge"]["winnerId"], "u1");
        assert!(json["challenge"].get("winner_id").is_none());
    }
}
