//! End-to-end lifecycle tests against a real Postgres database.
//!
//! Requires `DATABASE_URL` to point at a scratch database; the suite skips
//! itself with a warning when that isn't set rather than failing, so a
//! plain `cargo test` still passes in an environment with no database.

use std::time::{Duration, Instant};

use challenge_server::cache::{Cache, START_STALE_AFTER_SECS};
use challenge_server::fsm::{self, ClaimOutcome};
use challenge_server::models::ChallengeStatus;
use challenge_server::store::Store;
use sqlx::PgPool;

/// Connect to `DATABASE_URL`, run migrations, and truncate every table so
/// tests don't see each other's rows. Returns `None` (with a warning) if no
/// database is configured for this run.
async fn test_store() -> Option<Store> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };
    let store = Store::connect(&database_url).await.expect("connect + migrate");
    let pool = PgPool::connect(&database_url).await.expect("pool for cleanup");
    sqlx::query("TRUNCATE winner_selections, challenges, users CASCADE").execute(&pool).await.expect("truncate");
    Some(store)
}

async fn seed_user(pool: &PgPool, id: &str, name: &str, coins: i64) {
    sqlx::query("INSERT INTO users (id, name, coins) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(coins)
        .execute(pool)
        .await
        .expect("seed user");
}

#[tokio::test]
async fn happy_path_create_accept_start_claim() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "invitee", "Bea", 100).await;
    let cache = Cache::new();

    let challenge = fsm::create_challenge(
        &store,
        &cache,
        "creator",
        "chess".to_string(),
        10,
        0,
        Some("invitee".to_string()),
        None,
        None,
        false,
    )
    .await
    .expect("create");
    assert_eq!(challenge.status, ChallengeStatus::Pending);

    let challenge = fsm::accept_challenge(&store, &cache, &challenge.id).await.expect("accept");
    assert_eq!(challenge.status, ChallengeStatus::Accepted);

    // start_challenge requires both players online in the presence cache.
    let err = fsm::start_challenge(&store, &cache, &challenge.id, "invitee").await.unwrap_err();
    assert_eq!(err.reason(), "Opponent is Offline");

    cache
        .set_online("creator".into(), dummy_entry())
        .await;
    cache
        .set_online("invitee".into(), dummy_entry())
        .await;
    let challenge = fsm::start_challenge(&store, &cache, &challenge.id, "invitee").await.expect("start");
    assert_eq!(challenge.status, ChallengeStatus::InProgress);

    fsm::select_winner(&store, &cache, &challenge.id, "creator", "creator").await.expect("select by creator");
    fsm::select_winner(&store, &cache, &challenge.id, "invitee", "creator").await.expect("select by invitee");

    match fsm::claim_victory(&store, &cache, &challenge.id).await.expect("claim") {
        ClaimOutcome::Completed(c) => {
            assert_eq!(c.status, ChallengeStatus::Completed);
            assert_eq!(c.winner_id.as_deref(), Some("creator"));
        }
        ClaimOutcome::Failed { message } => panic!("expected consensus to complete, got: {message}"),
    }

    let remaining = store.selections_for(&challenge.id).await.expect("selections");
    assert!(remaining.is_empty(), "winner_selections rows should be deleted on completion");
}

#[tokio::test]
async fn disagreement_then_agreement_reaches_consensus() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "invitee", "Bea", 100).await;
    let cache = Cache::new();

    let challenge = fsm::create_challenge(
        &store,
        &cache,
        "creator",
        "chess".to_string(),
        10,
        0,
        Some("invitee".to_string()),
        None,
        None,
        false,
    )
    .await
    .unwrap();
    fsm::accept_challenge(&store, &cache, &challenge.id).await.unwrap();
    cache.set_online("creator".into(), dummy_entry()).await;
    cache.set_online("invitee".into(), dummy_entry()).await;
    fsm::start_challenge(&store, &cache, &challenge.id, "invitee").await.unwrap();

    fsm::select_winner(&store, &cache, &challenge.id, "creator", "creator").await.unwrap();
    fsm::select_winner(&store, &cache, &challenge.id, "invitee", "invitee").await.unwrap();
    match fsm::claim_victory(&store, &cache, &challenge.id).await.unwrap() {
        ClaimOutcome::Failed { message } => assert!(message.contains("disagree")),
        ClaimOutcome::Completed(_) => panic!("disagreeing nominations must not complete"),
    }

    // Both now agree; the same challenge should complete without recreating it.
    fsm::select_winner(&store, &cache, &challenge.id, "invitee", "creator").await.unwrap();
    match fsm::claim_victory(&store, &cache, &challenge.id).await.unwrap() {
        ClaimOutcome::Completed(c) => assert_eq!(c.winner_id.as_deref(), Some("creator")),
        ClaimOutcome::Failed { message } => panic!("expected consensus after agreement, got: {message}"),
    }
}

#[tokio::test]
async fn join_open_challenge_rejects_insufficient_coins() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "pauper", "Cal", 1).await;
    let cache = Cache::new();

    let challenge =
        fsm::create_challenge(&store, &cache, "creator", "chess".to_string(), 50, 0, None, None, None, true)
            .await
            .unwrap();

    let err = fsm::join_open_challenge(&store, &cache, &challenge.id, "pauper").await.unwrap_err();
    assert_eq!(err.reason(), "insufficient coins to join this challenge");

    let challenge = store.find_challenge(&challenge.id).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Pending);
    assert!(challenge.invitee_id.is_none());
}

#[tokio::test]
async fn join_open_challenge_rejects_creator_self_join() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    let cache = Cache::new();

    let challenge =
        fsm::create_challenge(&store, &cache, "creator", "chess".to_string(), 50, 0, None, None, None, true)
            .await
            .unwrap();

    let err = fsm::join_open_challenge(&store, &cache, &challenge.id, "creator").await.unwrap_err();
    assert_eq!(err.reason(), "creator cannot join their own challenge");
}

#[tokio::test]
async fn start_challenge_rejects_non_invitee() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "invitee", "Bea", 100).await;
    seed_user(&pool, "stranger", "Cal", 100).await;
    let cache = Cache::new();

    let challenge = fsm::create_challenge(
        &store,
        &cache,
        "creator",
        "chess".to_string(),
        10,
        0,
        Some("invitee".to_string()),
        None,
        None,
        false,
    )
    .await
    .unwrap();
    fsm::accept_challenge(&store, &cache, &challenge.id).await.unwrap();
    cache.set_online("creator".into(), dummy_entry()).await;
    cache.set_online("stranger".into(), dummy_entry()).await;

    let err = fsm::start_challenge(&store, &cache, &challenge.id, "stranger").await.unwrap_err();
    assert_eq!(err.reason(), "Only the invitee can start this challenge");
}

#[tokio::test]
async fn accept_challenge_lazily_expires_past_deadline() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "invitee", "Bea", 100).await;
    let cache = Cache::new();

    let challenge = fsm::create_challenge(
        &store,
        &cache,
        "creator",
        "chess".to_string(),
        10,
        0,
        Some("invitee".to_string()),
        None,
        None,
        false,
    )
    .await
    .unwrap();

    sqlx::query("UPDATE challenges SET expires_at = now() - interval '1 hour' WHERE id = $1")
        .bind(&challenge.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = fsm::accept_challenge(&store, &cache, &challenge.id).await.unwrap_err();
    assert_eq!(err.reason(), "challenge is not pending");

    let challenge = store.find_challenge(&challenge.id).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Expired);
}

#[tokio::test]
async fn abandoned_start_handshake_is_evicted_by_the_janitor_sweep() {
    let Some(store) = test_store().await else { return };
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
    seed_user(&pool, "creator", "Ada", 100).await;
    seed_user(&pool, "invitee", "Bea", 100).await;
    let cache = Cache::new();

    let challenge = fsm::create_challenge(
        &store,
        &cache,
        "creator",
        "chess".to_string(),
        10,
        0,
        Some("invitee".to_string()),
        None,
        None,
        false,
    )
    .await
    .unwrap();
    fsm::accept_challenge(&store, &cache, &challenge.id).await.unwrap();

    // Only the creator touches `startChallenge`; the invitee never follows
    // up, leaving a partially populated `starts` entry (spec scenario 6).
    let err = fsm::start_challenge(&store, &cache, &challenge.id, "creator").await.unwrap_err();
    assert_eq!(err.reason(), "Only the invitee can start this challenge");

    let later = Instant::now() + Duration::from_secs(6 * 60);
    let evicted = cache.evict_stale_starts(later, Duration::from_secs(START_STALE_AFTER_SECS)).await;
    assert_eq!(evicted, 1, "abandoned starts entry should be swept after the stale window");

    // A subsequent startChallenge proceeds from a fresh state.
    cache.set_online("creator".into(), dummy_entry()).await;
    cache.set_online("invitee".into(), dummy_entry()).await;
    let challenge = fsm::start_challenge(&store, &cache, &challenge.id, "invitee").await.expect("start after eviction");
    assert_eq!(challenge.status, ChallengeStatus::InProgress);
}

fn dummy_entry() -> challenge_server::cache::OnlineEntry {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    challenge_server::cache::OnlineEntry {
        conn_id: uuid::Uuid::new_v4(),
        tx,
        display_name: "test".to_string(),
        connected_at: std::time::Instant::now(),
    }
}
