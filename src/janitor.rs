//! Janitor (component G): periodic stale-handshake sweep, plus the
//! startup warm of the nomination cache from the store.
//!
//! Startup warm failure aborts bring-up (spec §4.7: "stale cache is worse
//! than no service").

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cache::{Cache, START_STALE_AFTER_SECS};
use crate::error::Result;
use crate::store::Store;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Load every `WinnerSelection` whose challenge is IN_PROGRESS and seed the
/// cache, so a restart restores nominations before any client re-sends them
/// (spec §8 invariant 6).
pub async fn warm_nominations(store: &Store, cache: &Cache) -> Result<()> {
    let rows = store.load_active_selections().await?;
    let count = rows.len();
    cache
        .seed_nominations(rows.into_iter().map(|row| (row.challenge_id, row.player_id, row.winner_id)))
        .await;
    info!(count, "warmed nomination cache from store");
    Ok(())
}

/// Runs the fixed-tick stale-start sweep until `shutdown` resolves.
pub async fn run(cache: &Cache, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = cache
                    .evict_stale_starts(Instant::now(), Duration::from_secs(START_STALE_AFTER_SECS))
                    .await;
                if evicted > 0 {
                    debug!(evicted, "swept stale start handshakes");
                }
            }
            _ = shutdown.changed() => {
                debug!("janitor stopping");
                break;
            }
        }
    }
}
