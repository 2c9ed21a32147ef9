//! State Cache (component B): process-local mirrors of online users,
//! per-challenge start handshakes, and per-challenge winner nominations.
//!
//! Three independently-guarded maps rather than one big mutex: a nomination
//! write should not serialize behind a presence read. Each lock is held
//! only for the map mutation itself — callers never hold it across a store
//! call or a socket send (spec §5).

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Upper bound referenced by the spec for the online-user linear scan; not
/// enforced here (the store layer and upstream auth bound real traffic) but
/// documented as the assumption behind `find_by_conn_id`'s scan cost.
pub const MAX_CONNECTIONS: usize = 10_000;

/// Window after which an untouched start handshake is considered stale.
pub const START_STALE_AFTER_SECS: u64 = 5 * 60;

/// Handle used to push a frame to a connection's write task.
pub type SocketTx = mpsc::UnboundedSender<Message>;

/// An online user's live connection.
#[derive(Clone)]
pub struct OnlineEntry {
    pub conn_id: Uuid,
    pub tx: SocketTx,
    pub display_name: String,
    pub connected_at: Instant,
}

/// Per-challenge progress of the ACCEPTED -> IN_PROGRESS handshake.
#[derive(Clone, Copy, Default)]
pub struct StartEntry {
    pub creator_started: bool,
    pub invitee_started: bool,
    pub first_touch_at: Option<Instant>,
}

/// The single-writer cache manager. All access goes through its methods;
/// nothing outside this module touches the maps directly.
#[derive(Default)]
pub struct Cache {
    online: Mutex<HashMap<String, OnlineEntry>>,
    starts: Mutex<HashMap<String, StartEntry>>,
    nominations: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    // --- online ---------------------------------------------------------

    /// Register `user_id` as online, replacing any prior binding (invariant
    /// 6 in spec §3: at most one live socket per user).
    pub async fn set_online(&self, user_id: String, entry: OnlineEntry) -> Option<OnlineEntry> {
        self.online.lock().await.insert(user_id, entry)
    }

    pub async fn find_by_user(&self, user_id: &str) -> Option<OnlineEntry> {
        self.online.lock().await.get(user_id).cloned()
    }

    pub async fn remove_by_user(&self, user_id: &str) -> Option<OnlineEntry> {
        self.online.lock().await.remove(user_id)
    }

    /// Linear scan for the user bound to a given connection. Bounded by
    /// `MAX_CONNECTIONS`; acceptable per spec §4.2.
    pub async fn find_by_conn_id(&self, conn_id: Uuid) -> Option<String> {
        self.online
            .lock()
            .await
            .iter()
            .find(|(_, entry)| entry.conn_id == conn_id)
            .map(|(user_id, _)| user_id.clone())
    }

    /// Remove whichever binding owns `conn_id`, returning the freed user id.
    pub async fn remove_by_conn_id(&self, conn_id: Uuid) -> Option<String> {
        let mut online = self.online.lock().await;
        let user_id = online
            .iter()
            .find(|(_, entry)| entry.conn_id == conn_id)
            .map(|(user_id, _)| user_id.clone())?;
        online.remove(&user_id);
        Some(user_id)
    }

    /// Snapshot of every online user, for `onlineUsers` broadcasts.
    pub async fn all_online(&self) -> Vec<(String, String)> {
        self.online
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.display_name.clone()))
            .collect()
    }

    // --- start handshake --------------------------------------------------

    pub async fn mark_start(&self, challenge_id: &str, is_creator: bool) -> StartEntry {
        let mut starts = self.starts.lock().await;
        let entry = starts.entry(challenge_id.to_string()).or_default();
        if entry.first_touch_at.is_none() {
            entry.first_touch_at = Some(Instant::now());
        }
        if is_creator {
            entry.creator_started = true;
        } else {
            entry.invitee_started = true;
        }
        *entry
    }

    pub async fn clear_start(&self, challenge_id: &str) {
        self.starts.lock().await.remove(challenge_id);
    }

    /// Drop any start-handshake entry whose first touch is older than
    /// `stale_after` relative to `now` (the janitor's fixed tick, spec §4.7).
    pub async fn evict_stale_starts(&self, now: Instant, stale_after: std::time::Duration) -> usize {
        let mut starts = self.starts.lock().await;
        let before = starts.len();
        starts.retain(|_, entry| match entry.first_touch_at {
            Some(touched) => now.saturating_duration_since(touched) < stale_after,
            None => true,
        });
        before - starts.len()
    }

    // --- nominations --------------------------------------------------------

    pub async fn set_nomination(&self, challenge_id: &str, player_id: String, winner_id: String) {
        self.nominations
            .lock()
            .await
            .entry(challenge_id.to_string())
            .or_default()
            .insert(player_id, winner_id);
    }

    pub async fn nominations_for(&self, challenge_id: &str) -> HashMap<String, String> {
        self.nominations
            .lock()
            .await
            .get(challenge_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear_nominations(&self, challenge_id: &str) {
        self.nominations.lock().await.remove(challenge_id);
    }

    /// Full nomination snapshot across every challenge, for
    /// `getWinnerSelections` (spec §6).
    pub async fn all_nominations(&self) -> HashMap<String, HashMap<String, String>> {
        self.nominations.lock().await.clone()
    }

    /// Seed the nomination cache from a store snapshot (janitor startup
    /// warm, spec §4.7 / §8 invariant 6).
    pub async fn seed_nominations(&self, rows: impl IntoIterator<Item = (String, String, String)>) {
        let mut nominations = self.nominations.lock().await;
        for (challenge_id, player_id, winner_id) in rows {
            nominations.entry(challenge_id).or_default().insert(player_id, winner_id);
        }
    }
}
