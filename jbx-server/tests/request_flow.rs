//! Track request path: validation, filter rejections, acceptance

mod helpers;

use helpers::{test_config, track, MockCatalog};
use jbx_server::filter::RejectCode;
use jbx_server::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

const OPENING_URL: &str = "https://example.com/playlist/opening";
const ENDING_URL: &str = "https://example.com/playlist/ending";
const BGM_URL: &str = "https://example.com/playlist/bgm";

/// Catalog with a long opening track (keeps playback busy for the whole
/// test) and a handful of requestable tracks.
fn request_catalog() -> MockCatalog {
    let mut us_only = track("us-only", "US Exclusive", &["Artist US"], Duration::from_secs(240));
    us_only.markets = vec!["US".to_string()];

    MockCatalog::new()
        .with_playlist(
            BGM_URL,
            vec![track("bgm1", "Ambient", &["Eno"], Duration::from_secs(60))],
        )
        .with_playlist(
            OPENING_URL,
            vec![track("open1", "Opener", &["House Band"], Duration::from_secs(3600))],
        )
        .with_track(track("u1", "Requested One", &["Artist A"], Duration::from_secs(240)))
        .with_track(track("u2", "Requested Two", &["Artist B"], Duration::from_secs(240)))
        .with_track(track("u3", "Requested Three", &["Artist C"], Duration::from_secs(240)))
        .with_track(track("short", "Jingle", &["Artist D"], Duration::from_secs(30)))
        .with_track(us_only)
}

async fn started_manager() -> (Arc<SessionManager>, Arc<MockCatalog>) {
    let catalog = Arc::new(request_catalog());
    let mut config = test_config(BGM_URL);
    config.playlists.opening.playlist_url = OPENING_URL.to_string();
    let manager = SessionManager::new(Arc::new(config), catalog.clone()).unwrap();
    manager.start().await.unwrap();
    (manager, catalog)
}

#[tokio::test]
async fn test_accepted_request_queues_and_mirrors_to_playlist() {
    let (manager, catalog) = started_manager().await;
    let listener = manager.join("Alice", "").unwrap();

    let outcome = manager.request_track(&listener, "u1").await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(outcome.code, None);
    assert_eq!(manager.message_for(&outcome), "Request accepted");

    // Pending count reflects the waiting request
    let listeners = manager.list_listeners();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].pending_count, 1);
    assert_eq!(listeners[0].total_requests, 1);

    // Mirrored onto the session playlist
    assert!(catalog.added_ids("session-playlist").contains(&"u1".to_string()));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_request_accepts_url_form() {
    let (manager, _catalog) = started_manager().await;
    let listener = manager.join("Alice", "").unwrap();

    let outcome = manager
        .request_track(&listener, "https://open.spotify.com/track/u1?si=xyz")
        .await
        .unwrap();
    assert!(outcome.accepted);

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_second_request_rejected_while_pending() {
    let (manager, _catalog) = started_manager().await;
    let listener = manager.join("Alice", "").unwrap();

    assert!(manager.request_track(&listener, "u1").await.unwrap().accepted);

    let outcome = manager.request_track(&listener, "u2").await.unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.code, Some(RejectCode::UserPending));
    assert_eq!(
        manager.message_for(&outcome),
        "You already have a track waiting"
    );

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_vip_bypasses_pending_limit() {
    let (manager, _catalog) = started_manager().await;
    // "DJ Admin" is listed under admin.display_names
    let listener = manager.join("DJ Admin", "").unwrap();

    assert!(manager.request_track(&listener, "u1").await.unwrap().accepted);
    assert!(manager.request_track(&listener, "u2").await.unwrap().accepted);

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_duplicate_track_rejected_across_listeners() {
    let (manager, _catalog) = started_manager().await;
    let alice = manager.join("Alice", "").unwrap();
    let bob = manager.join("Bob", "").unwrap();

    assert!(manager.request_track(&alice, "u1").await.unwrap().accepted);

    let outcome = manager.request_track(&bob, "u1").await.unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.code, Some(RejectCode::DuplicateTrack));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_kicked_listener_rejected() {
    let (manager, _catalog) = started_manager().await;
    let listener = manager.join("Troll", "").unwrap();
    manager.kick_listener(&listener).unwrap();

    let outcome = manager.request_track(&listener, "u1").await.unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.code, Some(RejectCode::Kicked));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_market_and_duration_rejections() {
    let (manager, _catalog) = started_manager().await;
    let listener = manager.join("Alice", "").unwrap();

    let outcome = manager.request_track(&listener, "us-only").await.unwrap();
    assert_eq!(outcome.code, Some(RejectCode::MarketRestriction));

    let outcome = manager.request_track(&listener, "short").await.unwrap();
    assert_eq!(outcome.code, Some(RejectCode::DurationLimitExceeded));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_unknown_listener_and_unknown_track() {
    let (manager, _catalog) = started_manager().await;

    let outcome = manager
        .request_track("no-such-listener", "u1")
        .await
        .unwrap();
    assert_eq!(outcome.code, Some(RejectCode::InvalidListener));

    let listener = manager.join("Alice", "").unwrap();
    let outcome = manager.request_track(&listener, "no-such-track").await.unwrap();
    assert_eq!(outcome.code, Some(RejectCode::TrackNotFound));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_requests_rejected_after_acceptance_deadline_projection() {
    // End in 1h; ending playlist totals 5m -> deadline at 55m. The
    // opening backlog is 10m (current) + 50m (queued), so any new
    // request would start at the 60m mark: rejected.
    let catalog = Arc::new(
        request_catalog()
            .with_playlist(
                OPENING_URL,
                vec![
                    track("long1", "First Set", &["House Band"], Duration::from_secs(600)),
                    track("long2", "Second Set", &["House Band"], Duration::from_secs(3000)),
                ],
            )
            .with_playlist(
                ENDING_URL,
                vec![track("e1", "Closer", &["House Band"], Duration::from_secs(300))],
            ),
    );

    let mut config = test_config(BGM_URL);
    config.playlists.opening.playlist_url = OPENING_URL.to_string();
    config.playlists.ending.playlist_url = ENDING_URL.to_string();
    config.session.end_time = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();

    let manager = SessionManager::new(Arc::new(config), catalog).unwrap();
    manager.start().await.unwrap();

    let listener = manager.join("Alice", "").unwrap();
    let outcome = manager.request_track(&listener, "u1").await.unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.code, Some(RejectCode::TimeLimitExceeded));

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_request_whose_end_spills_past_deadline_is_accepted() {
    // Same schedule, but the backlog is 10m + 40m: a new request starts
    // at 50m, before the 55m deadline, even though it ends past it.
    let catalog = Arc::new(
        request_catalog()
            .with_playlist(
                OPENING_URL,
                vec![
                    track("long1", "First Set", &["House Band"], Duration::from_secs(600)),
                    track("long2", "Second Set", &["House Band"], Duration::from_secs(2400)),
                ],
            )
            .with_playlist(
                ENDING_URL,
                vec![track("e1", "Closer", &["House Band"], Duration::from_secs(300))],
            ),
    );

    let mut config = test_config(BGM_URL);
    config.playlists.opening.playlist_url = OPENING_URL.to_string();
    config.playlists.ending.playlist_url = ENDING_URL.to_string();
    config.session.end_time = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();

    let manager = SessionManager::new(Arc::new(config), catalog).unwrap();
    manager.start().await.unwrap();

    let listener = manager.join("Alice", "").unwrap();
    let outcome = manager.request_track(&listener, "u1").await.unwrap();
    assert!(outcome.accepted, "end spillover should be tolerated: {outcome:?}");

    manager.stop_immediate().await.unwrap();
    manager.close();
}

#[tokio::test]
async fn test_rejoin_with_external_id_is_stable() {
    let (manager, _catalog) = started_manager().await;
    let first = manager.join("Alice", "discord:123").unwrap();
    let second = manager.join("Alice again", "discord:123").unwrap();
    assert_eq!(first, second);

    manager.stop_immediate().await.unwrap();
    manager.close();
}
