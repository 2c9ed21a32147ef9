//! Broadcaster (component C): resolves a recipient set from a challenge (or
//! "all online") and fans a frame out, tolerating dead sockets.

use axum::extract::ws::Message;
use tracing::warn;

use crate::cache::Cache;
use crate::messages::Outbound;

/// Dispatches outbound frames to the recipients a transition computes.
pub struct Broadcaster<'a> {
    cache: &'a Cache,
}

impl<'a> Broadcaster<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// Send `frame` to the creator and, if present, the invitee.
    pub async fn targeted(&self, creator_id: &str, invitee_id: Option<&str>, frame: &Outbound) {
        let mut recipients = vec![self.cache.find_by_user(creator_id).await];
        if let Some(invitee_id) = invitee_id {
            recipients.push(self.cache.find_by_user(invitee_id).await);
        }
        self.send_all(recipients.into_iter().flatten(), frame);
    }

    /// Send `frame` to every currently online socket.
    pub async fn all(&self, frame: &Outbound) {
        let ids: Vec<String> = self.cache.all_online().await.into_iter().map(|(id, _)| id).collect();
        let mut recipients = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.cache.find_by_user(&id).await {
                recipients.push(entry);
            }
        }
        self.send_all(recipients.into_iter(), frame);
    }

    fn send_all(&self, recipients: impl Iterator<Item = crate::cache::OnlineEntry>, frame: &Outbound) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound frame, dropping broadcast");
                return;
            }
        };
        for entry in recipients {
            // A closed or half-open socket's send simply errors; logged and
            // swallowed so one bad recipient never blocks the others
            // (spec §4.3, §9).
            if let Err(err) = entry.tx.send(Message::Text(text.clone())) {
                warn!(error = %err, "failed to deliver frame to recipient, socket likely closed");
            }
        }
    }
}
