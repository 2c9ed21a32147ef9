//! Session Manager (component F): accepts connections, mints a connection
//! id, binds a socket to a user id on `setOnline`, and tears the binding
//! down on close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::cache::{Cache, OnlineEntry};
use crate::error::Result;
use crate::messages::{OnlineUser, Outbound};
use crate::router;
use crate::store::Store;

/// Per-message size cap; oversize frames close the socket (spec §5).
const MAX_MESSAGE_BYTES: usize = 100 * 1024;

/// Shared engine state handed to every connection task.
pub struct Engine {
    pub store: Store,
    pub cache: Cache,
}

impl Engine {
    pub fn new(store: Store, cache: Cache) -> Self {
        Self { store, cache }
    }

    /// Verify the user exists, then bind this connection to it, evicting
    /// any prior binding for the same user (spec §4.6, invariant 6).
    pub async fn session_set_online(&self, conn_id: Uuid, tx: mpsc::UnboundedSender<Message>, user_id: String) -> Result<()> {
        let user = self
            .store
            .find_user(&user_id)
            .await?
            .ok_or_else(|| crate::error::ChallengeError::not_found(format!("unknown user {user_id}")))?;

        self.cache
            .set_online(
                user_id.clone(),
                OnlineEntry { conn_id, tx, display_name: user.name, connected_at: Instant::now() },
            )
            .await;

        self.broadcast_online_users().await;
        Ok(())
    }

    /// Evict whichever user was bound to `conn_id` and tell everyone the
    /// roster changed.
    pub async fn session_closed(&self, conn_id: Uuid) {
        self.evict_presence(conn_id).await;
    }

    /// Evict the presence binding on an explicit `setOnline{online:false}`
    /// frame, without closing the socket itself — the spec documents the
    /// `online:true` path explicitly and leaves `false` to mirror the same
    /// eviction-by-connection-id the close handler performs.
    pub async fn session_set_offline(&self, conn_id: Uuid) {
        self.evict_presence(conn_id).await;
    }

    async fn evict_presence(&self, conn_id: Uuid) {
        if let Some(user_id) = self.cache.remove_by_conn_id(conn_id).await {
            debug!(user_id, "evicted presence binding");
            self.broadcast_online_users().await;
        }
    }

    async fn broadcast_online_users(&self) {
        let users: Vec<OnlineUser> = self
            .cache
            .all_online()
            .await
            .into_iter()
            .map(|(id, name)| OnlineUser { id, name })
            .collect();
        Broadcaster::new(&self.cache).all(&Outbound::OnlineUsers { users }).await;
    }

    pub async fn all_winner_selections(&self) -> Result<HashMap<String, HashMap<String, String>>> {
        Ok(self.cache.all_nominations().await)
    }
}

/// Axum handler: upgrades the HTTP connection and spawns the per-connection
/// task. Reachable at any path — the router mounts it at a wildcard so the
/// protocol stays path-independent (spec §6).
pub async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES).on_upgrade(move |socket| handle_socket(engine, socket))
}

async fn handle_socket(engine: Arc<Engine>, socket: WebSocket) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, "connection established");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward everything other tasks push onto `tx` (broadcasts, replies)
    // out over the real socket. A pushed `Close` (shutdown drain) ends this
    // loop once sent, so the connection actually tears down instead of
    // idling with the client never told to disconnect.
    let mut write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let is_close = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || is_close {
                break;
            }
        }
    });

    let reader_engine = engine.clone();
    let reply_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    router::handle_message(&reader_engine, conn_id, &reply_tx, &text).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%conn_id, %err, "socket read error");
                    break;
                }
            }
        }
    });

    // A close cancels no in-flight store call; whichever of the two tasks
    // finishes first (reader hit EOF, or the writer's socket died) tears
    // down the other (spec §5).
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    engine.session_closed(conn_id).await;
    info!(%conn_id, "connection closed");
}
