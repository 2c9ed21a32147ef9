//! Challenge FSM (component D): enforces the PENDING -> ACCEPTED ->
//! IN_PROGRESS -> COMPLETED lifecycle, the EXPIRED/DISPUTED terminal
//! branches, and the two-player victory consensus gate.
//!
//! Each function takes the store and cache, applies one transition, and
//! returns the outbound frame(s) for the caller to broadcast. Preconditions
//! are checked in the order spec'd; the first failure short-circuits.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::cache::Cache;
use crate::error::{ChallengeError, Result};
use crate::messages::{ChallengeView, Outbound};
use crate::models::{Challenge, NewChallenge};
use crate::store::Store;

/// Build the enriched payload a broadcast carries: the challenge plus its
/// current nomination map (spec §6, "Enriched challenge payload").
async fn view(cache: &Cache, challenge: Challenge) -> ChallengeView {
    let winner_selections = cache.nominations_for(&challenge.id).await;
    ChallengeView { challenge, winner_selections }
}

/// Pure agreement check over two optional nominations — kept separate from
/// the completing transaction so diagnostics/tests can reuse it without a
/// store (spec §9, "Two-player consensus").
pub fn nominations_agree(creator_sel: Option<&str>, invitee_sel: Option<&str>) -> ConsensusOutcome {
    match (creator_sel, invitee_sel) {
        (Some(c), Some(i)) if c == i => ConsensusOutcome::Agreed(c.to_string()),
        (Some(_), Some(_)) => ConsensusOutcome::Disagree,
        _ => ConsensusOutcome::Incomplete,
    }
}

/// Result of the consensus gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutcome {
    /// Both players nominated and agree on `String` as the winner.
    Agreed(String),
    /// Both nominated but disagree.
    Disagree,
    /// At least one nomination is still missing.
    Incomplete,
}

/// PENDING creation. Broadcasts `challengeCreated` (targeted) or
/// `openChallengeCreated` (all) depending on `is_open`.
pub async fn create_challenge(
    store: &Store,
    cache: &Cache,
    creator_id: &str,
    game: String,
    coins: i64,
    xp: i64,
    invitee_id: Option<String>,
    description: Option<String>,
    rules: Option<serde_json::Value>,
    is_open: bool,
) -> Result<Challenge> {
    if is_open && invitee_id.is_some() {
        return Err(ChallengeError::protocol("open challenges must not specify an inviteeId"));
    }
    if !is_open && invitee_id.is_none() {
        return Err(ChallengeError::protocol("non-open challenges require an inviteeId"));
    }

    let challenge = store
        .create_challenge(NewChallenge {
            id: Uuid::new_v4().to_string(),
            creator_id: creator_id.to_string(),
            invitee_id,
            is_open,
            game,
            description,
            rules,
            coins,
            xp,
        })
        .await?;

    let broadcaster = Broadcaster::new(cache);
    let payload = view(cache, challenge.clone()).await;
    if is_open {
        broadcaster.all(&Outbound::OpenChallengeCreated { challenge: payload }).await;
    } else {
        broadcaster
            .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeCreated { challenge: payload })
            .await;
    }
    Ok(challenge)
}

/// PENDING -> ACCEPTED by the pre-assigned invitee. The core trusts that the
/// caller already verified `challengeId`'s invitee matches the acting user
/// (spec §4.4: enforced by the external action layer).
pub async fn accept_challenge(store: &Store, cache: &Cache, challenge_id: &str) -> Result<Challenge> {
    let challenge = store
        .find_challenge(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found(format!("challenge {challenge_id} not found")))?;
    let challenge = lazily_expire(store, challenge).await?;

    if challenge.status != crate::models::ChallengeStatus::Pending {
        return Err(ChallengeError::precondition("challenge is not pending"));
    }

    let challenge = store.mark_accepted(challenge_id).await?;
    let payload = view(cache, challenge.clone()).await;
    Broadcaster::new(cache)
        .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeAccepted { challenge: payload })
        .await;
    Ok(challenge)
}

/// Open-challenge join: first qualifying joiner becomes the invitee.
/// On any precondition failure, the caller sends `joinOpenChallengeFailed`
/// to the originator only (spec §4.4).
pub async fn join_open_challenge(store: &Store, cache: &Cache, challenge_id: &str, user_id: &str) -> Result<Challenge> {
    let challenge = store
        .find_challenge(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("challenge not found"))?;
    let challenge = lazily_expire(store, challenge).await?;

    // Idempotency: the current invitee re-joining re-broadcasts rather than
    // erroring, even though `invitee_id` being set would otherwise fail the
    // "must be null" precondition below (spec §4.4, §5).
    if challenge.invitee_id.as_deref() == Some(user_id) {
        let payload = view(cache, challenge.clone()).await;
        Broadcaster::new(cache)
            .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeAccepted { challenge: payload })
            .await;
        return Ok(challenge);
    }

    if !(challenge.is_open && challenge.status == crate::models::ChallengeStatus::Pending) {
        return Err(ChallengeError::precondition("challenge is not an open pending challenge"));
    }
    if user_id == challenge.creator_id {
        return Err(ChallengeError::precondition("creator cannot join their own challenge"));
    }
    if challenge.invitee_id.is_some() {
        return Err(ChallengeError::precondition("challenge already has an invitee"));
    }
    let user = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| ChallengeError::precondition("user does not exist"))?;
    if user.coins < challenge.coins {
        return Err(ChallengeError::precondition("insufficient coins to join this challenge"));
    }

    let challenge = store.bind_invitee_and_accept(challenge_id, user_id).await?;
    let payload = view(cache, challenge.clone()).await;
    Broadcaster::new(cache)
        .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeAccepted { challenge: payload })
        .await;
    Ok(challenge)
}

/// ACCEPTED -> IN_PROGRESS, invitee-initiated (spec §9's "direct edge"
/// decision — see DESIGN.md). On failure, the caller sends
/// `failedToStartChallenge` to the originator only.
pub async fn start_challenge(store: &Store, cache: &Cache, challenge_id: &str, user_id: &str) -> Result<Challenge> {
    let challenge = store
        .find_challenge(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("challenge not found"))?;

    // Record a legitimate participant's touch before any precondition
    // check, so a lone `startChallenge` from one side (the other still
    // offline, say) leaves a partial `starts` entry for the janitor to
    // sweep if abandoned (spec §4.2/§4.7, scenario 6). A caller who is
    // neither the creator nor the invitee never reaches the handshake.
    if user_id == challenge.creator_id {
        cache.mark_start(challenge_id, true).await;
    } else if challenge.invitee_id.as_deref() == Some(user_id) {
        cache.mark_start(challenge_id, false).await;
    }

    if challenge.invitee_id.as_deref() != Some(user_id) {
        return Err(ChallengeError::precondition("Only the invitee can start this challenge"));
    }
    let creator_online = cache.find_by_user(&challenge.creator_id).await.is_some();
    let invitee_online = cache.find_by_user(user_id).await.is_some();
    if !creator_online {
        return Err(ChallengeError::precondition("Opponent is Offline"));
    }
    if !invitee_online {
        return Err(ChallengeError::precondition("You must be online to start a challenge"));
    }
    if challenge.status != crate::models::ChallengeStatus::Accepted {
        return Err(ChallengeError::precondition("challenge is not accepted"));
    }

    let challenge = store.mark_in_progress(challenge_id).await?;
    cache.clear_start(challenge_id).await;
    let payload = view(cache, challenge.clone()).await;
    Broadcaster::new(cache)
        .targeted(
            &challenge.creator_id,
            challenge.invitee_id.as_deref(),
            &Outbound::ChallengeStartedBy { challenge: payload, started_by: user_id.to_string() },
        )
        .await;
    Ok(challenge)
}

/// Upsert a nomination; never changes `status`. Broadcasts `challengeUpdate`
/// with the refreshed nomination map (spec §4.4).
pub async fn select_winner(store: &Store, cache: &Cache, challenge_id: &str, player_id: &str, winner_id: &str) -> Result<Challenge> {
    let challenge = store
        .find_challenge(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("challenge not found"))?;

    store.upsert_selection(challenge_id, player_id, winner_id).await?;
    cache.set_nomination(challenge_id, player_id.to_string(), winner_id.to_string()).await;

    let payload = view(cache, challenge.clone()).await;
    Broadcaster::new(cache)
        .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeUpdate { challenge: payload })
        .await;
    Ok(challenge)
}

/// Outcome of a `claimVictory` attempt.
pub enum ClaimOutcome {
    Completed(Box<Challenge>),
    Failed { message: String },
}

/// Consensus gate: both nominations must exist and agree before
/// IN_PROGRESS -> COMPLETED (spec §4.4). On disagreement or an incomplete
/// pair, the failure frame goes to both players and the challenge stays
/// IN_PROGRESS.
pub async fn claim_victory(store: &Store, cache: &Cache, challenge_id: &str) -> Result<ClaimOutcome> {
    let challenge = store
        .find_challenge(challenge_id)
        .await?
        .ok_or_else(|| ChallengeError::not_found("challenge not found"))?;
    let invitee_id = challenge
        .invitee_id
        .clone()
        .ok_or_else(|| ChallengeError::precondition("challenge has no invitee"))?;

    let nominations = cache.nominations_for(challenge_id).await;
    let creator_sel = nominations.get(&challenge.creator_id).map(String::as_str);
    let invitee_sel = nominations.get(&invitee_id).map(String::as_str);

    let broadcaster = Broadcaster::new(cache);
    match nominations_agree(creator_sel, invitee_sel) {
        ConsensusOutcome::Incomplete => {
            let message = "Both players must select a winner before a challenge can be completed".to_string();
            broadcaster
                .targeted(&challenge.creator_id, Some(&invitee_id), &Outbound::ClaimVictoryFailed { message: message.clone() })
                .await;
            Ok(ClaimOutcome::Failed { message })
        }
        ConsensusOutcome::Disagree => {
            let message = "Players disagree on who won; reselect and try again".to_string();
            broadcaster
                .targeted(&challenge.creator_id, Some(&invitee_id), &Outbound::ClaimVictoryFailed { message: message.clone() })
                .await;
            Ok(ClaimOutcome::Failed { message })
        }
        ConsensusOutcome::Agreed(winner_id) => {
            let challenge = store.complete_challenge(challenge_id, &winner_id).await?;
            cache.clear_nominations(challenge_id).await;
            info!(challenge_id, %winner_id, "challenge completed by consensus");
            let payload = view(cache, challenge.clone()).await;
            broadcaster
                .targeted(&challenge.creator_id, challenge.invitee_id.as_deref(), &Outbound::ChallengeCompleted { challenge: payload })
                .await;
            Ok(ClaimOutcome::Completed(Box::new(challenge)))
        }
    }
}

/// Lazily move a PENDING challenge to EXPIRED if `now` has passed
/// `expires_at`. Invoked opportunistically on read, never eagerly (spec
/// §4.4: "lazy — on next observation").
pub async fn lazily_expire(store: &Store, challenge: Challenge) -> Result<Challenge> {
    if challenge.is_lazily_expired(Utc::now()) {
        return store.expire_challenge(&challenge.id).await;
    }
    Ok(challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_requires_both_nominations() {
        assert_eq!(nominations_agree(None, None), ConsensusOutcome::Incomplete);
        assert_eq!(nominations_agree(Some("u1"), None), ConsensusOutcome::Incomplete);
        assert_eq!(nominations_agree(None, Some("u1")), ConsensusOutcome::Incomplete);
    }

    #[test]
    fn consensus_detects_disagreement() {
        assert_eq!(nominations_agree(Some("u1"), Some("u2")), ConsensusOutcome::Disagree);
    }

    #[test]
    fn consensus_agrees_when_matching() {
        assert_eq!(nominations_agree(Some("u1"), Some("u1")), ConsensusOutcome::Agreed("u1".to_string()));
    }
}
