//! Message Router (component E): demultiplexes inbound frames to the FSM,
//! validates shape, and turns handler errors into frames addressed back to
//! the originating socket.

use axum::extract::ws::Message;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::SocketTx;
use crate::error::ChallengeError;
use crate::fsm::{self, ClaimOutcome};
use crate::messages::{Inbound, Outbound};
use crate::session::Engine;

const KNOWN_TYPES: &[&str] = &[
    "setOnline",
    "createChallenge",
    "acceptChallenge",
    "joinOpenChallenge",
    "startChallenge",
    "selectWinner",
    "claimVictory",
    "getWinnerSelections",
];

/// Parse and dispatch one inbound text frame. Never closes the socket; any
/// failure becomes a frame sent back on `reply_tx` (or is dropped, per the
/// protocol-error rules in spec §4.5/§7).
pub async fn handle_message(engine: &Engine, conn_id: Uuid, reply_tx: &SocketTx, raw: &str) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "dropping frame with invalid JSON");
            return;
        }
    };

    let Some(type_tag) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        warn!("dropping frame with no type discriminator");
        return;
    };

    if !KNOWN_TYPES.contains(&type_tag.as_str()) {
        debug!(r#type = %type_tag, "ignoring unknown message type");
        return;
    }

    let inbound: Inbound = match serde_json::from_value(value) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(%err, r#type = %type_tag, "malformed payload for known message type");
            send(reply_tx, &Outbound::generic_error());
            return;
        }
    };

    if let Err(err) = dispatch(engine, conn_id, reply_tx, inbound).await {
        warn!(%err, "handler failed, sending error frame to originator");
        send(reply_tx, &Outbound::generic_error());
    }
}

async fn dispatch(engine: &Engine, conn_id: Uuid, reply_tx: &SocketTx, inbound: Inbound) -> Result<(), ChallengeError> {
    match inbound {
        Inbound::SetOnline { user_id, online } => {
            if online {
                engine.session_set_online(conn_id, reply_tx.clone(), user_id).await?;
            } else {
                engine.session_set_offline(conn_id).await;
            }
            Ok(())
        }

        Inbound::CreateChallenge { creator_id, game, coins, xp, invitee_id, description, rules, is_open } => {
            fsm::create_challenge(&engine.store, &engine.cache, &creator_id, game, coins, xp, invitee_id, description, rules, is_open)
                .await?;
            Ok(())
        }

        Inbound::AcceptChallenge { challenge_id } => {
            fsm::accept_challenge(&engine.store, &engine.cache, &challenge_id).await?;
            Ok(())
        }

        Inbound::JoinOpenChallenge { challenge_id, user_id } => {
            match fsm::join_open_challenge(&engine.store, &engine.cache, &challenge_id, &user_id).await {
                Ok(_) => Ok(()),
                Err(ChallengeError::Precondition { message }) => {
                    send(reply_tx, &Outbound::JoinOpenChallengeFailed { message });
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        Inbound::StartChallenge { challenge_id, user_id } => {
            match fsm::start_challenge(&engine.store, &engine.cache, &challenge_id, &user_id).await {
                Ok(_) => Ok(()),
                Err(ChallengeError::Precondition { message }) => {
                    send(reply_tx, &Outbound::FailedToStartChallenge { message });
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        Inbound::SelectWinner { challenge_id, player_id, winner_id } => {
            fsm::select_winner(&engine.store, &engine.cache, &challenge_id, &player_id, &winner_id).await?;
            Ok(())
        }

        Inbound::ClaimVictory { challenge_id } => {
            match fsm::claim_victory(&engine.store, &engine.cache, &challenge_id).await? {
                ClaimOutcome::Completed(_) | ClaimOutcome::Failed { .. } => Ok(()),
            }
        }

        Inbound::GetWinnerSelections => {
            let selections = engine.all_winner_selections().await?;
            send(reply_tx, &Outbound::AllWinnerSelections { selections });
            Ok(())
        }
    }
}

fn send(tx: &SocketTx, frame: &Outbound) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            if tx.send(Message::Text(text)).is_err() {
                debug!("reply socket already closed");
            }
        }
        Err(err) => warn!(%err, "failed to serialize reply frame"),
    }
}
