//! Playback controller timing and event-ordering tests
//!
//! These exercise the virtual clock against the real wall clock; the
//! 100 ms timer polling granularity sets the tolerance used throughout.

mod helpers;

use chrono::Utc;
use jbx_common::track::{QueuedTrack, Requester, RequesterClass};
use jbx_server::playback::{Controller, PlaybackConfig, PlaybackEvent, PlaybackState};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn queued(id: &str, duration: Duration) -> QueuedTrack {
    QueuedTrack {
        track: helpers::track(id, &format!("Track {id}"), &["Artist"], duration),
        requester: Requester {
            id: "sys".to_string(),
            display_name: "System".to_string(),
            external_user_id: String::new(),
            class: RequesterClass::System,
        },
        added_at: Utc::now(),
    }
}

fn controller(
    threshold: Duration,
    delay: Duration,
    gap: Duration,
) -> (Controller, mpsc::Receiver<PlaybackEvent>) {
    let controller = Controller::new(PlaybackConfig {
        depletion_threshold: threshold,
        notification_delay: delay,
        gap_correction: gap,
    });
    let events = controller.take_events().expect("events taken once");
    (controller, events)
}

async fn next_event(events: &mut mpsc::Receiver<PlaybackEvent>, within: Duration) -> PlaybackEvent {
    timeout(within, events.recv())
        .await
        .expect("event within deadline")
        .expect("channel open")
}

#[tokio::test]
async fn test_track_started_is_delayed_by_gap_plus_notification_delay() {
    let (controller, mut events) = controller(
        Duration::ZERO,
        Duration::from_millis(300),
        Duration::from_millis(100),
    );
    controller.enqueue(queued("t1", Duration::from_secs(5)));

    let begun = Instant::now();
    controller.play().unwrap();

    let event = next_event(&mut events, Duration::from_secs(2)).await;
    let elapsed = begun.elapsed();
    assert!(matches!(event, PlaybackEvent::TrackStarted { .. }));
    // Not before gap + delay, not wildly after (poll granularity 100 ms)
    assert!(
        elapsed >= Duration::from_millis(300),
        "notification arrived too early: {elapsed:?}"
    );
    assert!(
        elapsed <= Duration::from_millis(1500),
        "notification arrived too late: {elapsed:?}"
    );

    controller.close();
}

#[tokio::test]
async fn test_zero_delay_notifies_immediately() {
    let (controller, mut events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    controller.enqueue(queued("t1", Duration::from_secs(5)));
    controller.play().unwrap();

    let event = next_event(&mut events, Duration::from_millis(200)).await;
    match event {
        PlaybackEvent::TrackStarted { track } => assert_eq!(track.track.id, "t1"),
        other => panic!("expected TrackStarted, got {}", other.type_name()),
    }

    controller.close();
}

#[tokio::test]
async fn test_pause_resume_preserves_elapsed_plus_remaining() {
    let (controller, mut events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    let duration = Duration::from_millis(1500);
    controller.enqueue(queued("t1", duration));
    controller.play().unwrap();
    let _started = next_event(&mut events, Duration::from_secs(1)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.pause().unwrap();
    assert_eq!(controller.state(), PlaybackState::Paused);

    let at_pause = controller.remaining_duration();

    // Remaining must not change while paused
    tokio::time::sleep(Duration::from_millis(300)).await;
    let still_paused = controller.remaining_duration();
    let drift = if still_paused > at_pause {
        still_paused - at_pause
    } else {
        at_pause - still_paused
    };
    assert!(drift <= Duration::from_millis(50), "clock ran while paused: {drift:?}");

    controller.resume().unwrap();
    let after_resume = controller.remaining_duration();

    // ~400 ms elapsed in playing state, so ~1100 ms should remain
    assert!(
        after_resume >= Duration::from_millis(950) && after_resume <= Duration::from_millis(1250),
        "unexpected remaining after resume: {after_resume:?}"
    );

    controller.close();
}

#[tokio::test]
async fn test_remaining_duration_is_non_increasing_while_playing() {
    let (controller, _events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    controller.enqueue(queued("t1", Duration::from_secs(3)));
    controller.play().unwrap();

    let mut samples = Vec::new();
    for _ in 0..5 {
        samples.push(controller.remaining_duration());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    for pair in samples.windows(2) {
        assert!(pair[1] <= pair[0], "remaining increased: {samples:?}");
    }

    controller.close();
}

#[tokio::test]
async fn test_natural_track_end_advances_the_queue() {
    let (controller, mut events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    controller.enqueue(queued("t1", Duration::from_millis(400)));
    controller.enqueue(queued("t2", Duration::from_millis(400)));
    controller.play().unwrap();

    let mut names = Vec::new();
    loop {
        let event = next_event(&mut events, Duration::from_secs(3)).await;
        let done = matches!(event, PlaybackEvent::QueueEmpty);
        names.push(event.type_name());
        if done {
            break;
        }
    }

    assert_eq!(
        names,
        vec![
            "track_started",
            "track_ended",
            "track_started",
            "track_ended",
            "queue_empty",
        ]
    );
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(controller.played_tracks().len(), 2);

    controller.close();
}

#[tokio::test]
async fn test_skip_emits_skipped_and_advances() {
    let (controller, mut events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    controller.enqueue(queued("t1", Duration::from_secs(30)));
    controller.enqueue(queued("t2", Duration::from_secs(30)));
    controller.play().unwrap();
    let _ = next_event(&mut events, Duration::from_secs(1)).await; // t1 started

    controller.skip().unwrap();

    let skipped = next_event(&mut events, Duration::from_secs(1)).await;
    match skipped {
        PlaybackEvent::TrackSkipped { track } => assert_eq!(track.track.id, "t1"),
        other => panic!("expected TrackSkipped, got {}", other.type_name()),
    }
    let started = next_event(&mut events, Duration::from_secs(1)).await;
    match started {
        PlaybackEvent::TrackStarted { track } => assert_eq!(track.track.id, "t2"),
        other => panic!("expected TrackStarted, got {}", other.type_name()),
    }

    // Skipping the last track leaves the controller idle
    let result = controller.skip();
    assert!(result.is_err());
    let skipped = next_event(&mut events, Duration::from_secs(1)).await;
    assert!(matches!(skipped, PlaybackEvent::TrackSkipped { .. }));
    let empty = next_event(&mut events, Duration::from_secs(1)).await;
    assert!(matches!(empty, PlaybackEvent::QueueEmpty));
    assert_eq!(controller.state(), PlaybackState::Idle);

    controller.close();
}

#[tokio::test]
async fn test_skip_cancels_pending_start_notification() {
    // Long notification delay: the skip lands before the TrackStarted
    // timer fires, so t1 must never be announced
    let (controller, mut events) = controller(
        Duration::ZERO,
        Duration::from_secs(2),
        Duration::ZERO,
    );
    controller.enqueue(queued("t1", Duration::from_secs(30)));
    controller.enqueue(queued("t2", Duration::from_secs(30)));
    controller.play().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.skip().unwrap();

    let event = next_event(&mut events, Duration::from_secs(1)).await;
    match event {
        PlaybackEvent::TrackSkipped { track } => assert_eq!(track.track.id, "t1"),
        other => panic!("expected TrackSkipped first, got {}", other.type_name()),
    }

    // The next start notification is for t2, not the skipped t1
    let event = next_event(&mut events, Duration::from_secs(4)).await;
    match event {
        PlaybackEvent::TrackStarted { track } => assert_eq!(track.track.id, "t2"),
        other => panic!("expected TrackStarted for t2, got {}", other.type_name()),
    }

    controller.close();
}

#[tokio::test]
async fn test_depletion_fires_once_per_dip_and_resets_on_enqueue() {
    let (controller, mut events) =
        controller(Duration::from_secs(5), Duration::ZERO, Duration::ZERO);

    // Total 2 s < 5 s threshold: fires immediately on enqueue
    controller.enqueue(queued("t1", Duration::from_secs(2)));
    let event = next_event(&mut events, Duration::from_secs(1)).await;
    assert!(matches!(event, PlaybackEvent::QueueDepleting));

    // No second event without another enqueue
    assert!(timeout(Duration::from_millis(400), events.recv()).await.is_err());

    // Another enqueue resets the once-flag; still under threshold
    controller.enqueue(queued("t2", Duration::from_secs(2)));
    let event = next_event(&mut events, Duration::from_secs(1)).await;
    assert!(matches!(event, PlaybackEvent::QueueDepleting));

    // Lifting the total above the threshold: no immediate event
    controller.enqueue(queued("t3", Duration::from_secs(60)));
    assert!(timeout(Duration::from_millis(400), events.recv()).await.is_err());

    controller.close();
}

#[tokio::test]
async fn test_control_errors() {
    let (controller, _events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);

    // Nothing playing yet
    assert!(controller.pause().is_err());
    assert!(controller.skip().is_err());

    controller.enqueue(queued("t1", Duration::from_secs(10)));
    controller.play().unwrap();

    // Resume requires paused state
    assert!(controller.resume().is_err());

    // Play while playing is a no-op
    controller.play().unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);

    controller.close();
}

#[tokio::test]
async fn test_clear_queue_returns_pending_tracks() {
    let (controller, _events) = controller(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    controller.enqueue(queued("t1", Duration::from_secs(30)));
    controller.enqueue(queued("t2", Duration::from_secs(30)));
    controller.enqueue(queued("t3", Duration::from_secs(30)));
    controller.play().unwrap();

    // t1 is current; clearing returns only the waiting tracks
    let removed = controller.clear_queue();
    let ids: Vec<&str> = removed.iter().map(|qt| qt.track.id.as_str()).collect();
    assert_eq!(ids, vec!["t2", "t3"]);
    assert!(controller.is_queue_empty());
    assert!(controller.current_track().is_some());

    controller.close();
}
