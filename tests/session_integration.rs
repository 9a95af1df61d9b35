// Integration tests for the tracking session controller
//
// These drive a controller the way an application would: commands from several
// threads, samples from a position source thread, and observers on channels.

use std::{
    sync::{Arc, mpsc},
    thread,
    time::{Duration, Instant},
};

use stride::{
    AlwaysGranted, Command, GeoPoint, ManualPositionSource, SessionController, SessionState,
    Snapshot, StatusView, StrideError, TrackerConfig,
    session::ManualTimeSource,
    sources::ReplayPositionSource,
    status::StatusTrigger,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> TrackerConfig {
    TrackerConfig {
        tick_interval_ms: 5,
        ..Default::default()
    }
}

fn drain_until_stopped(rx: &mpsc::Receiver<Snapshot>) -> Vec<Snapshot> {
    let mut received = Vec::new();
    loop {
        let snapshot = rx.recv_timeout(WAIT).expect("missing final snapshot");
        let stopped = snapshot.state == SessionState::Stopped;
        received.push(snapshot);
        if stopped {
            return received;
        }
    }
}

#[test]
fn test_observed_snapshots_are_ordered_and_consistent() {
    let (status_tx, _status_rx) = mpsc::channel::<StatusView>();
    let source = ManualPositionSource::new();
    let controller = Arc::new(
        SessionController::new(fast_config(), source.clone(), AlwaysGranted, status_tx).unwrap(),
    );
    let (tx, rx) = mpsc::channel::<Snapshot>();
    controller.subscribe(tx).unwrap();

    controller.start().unwrap();
    let sampler = {
        let source = source.clone();
        thread::spawn(move || {
            for i in 0..200 {
                source.push(Some(GeoPoint::new(45.0 + i as f64 * 1e-4, 7.0)));
                thread::sleep(Duration::from_micros(200));
            }
        })
    };
    let commander = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            for _ in 0..5 {
                thread::sleep(Duration::from_millis(7));
                controller.pause().unwrap();
                thread::sleep(Duration::from_millis(3));
                controller.start().unwrap();
            }
        })
    };
    sampler.join().unwrap();
    commander.join().unwrap();
    controller.stop().unwrap();

    let snapshots = drain_until_stopped(&rx);
    let mut previous: Option<&Snapshot> = None;
    for snapshot in &snapshots {
        if let Some(previous) = previous {
            assert!(snapshot.sequence > previous.sequence);
            assert!(snapshot.elapsed.total_millis >= previous.elapsed.total_millis);
            assert!(snapshot.path_len() >= previous.path_len());
            // every accepted sample is published right away, so a snapshot taken
            // outside of tracking never carries new points
            if snapshot.state != SessionState::Tracking {
                assert_eq!(snapshot.path_len(), previous.path_len());
            }
            // published paths are immutable prefixes of each other
            assert_eq!(
                &snapshot.path[..previous.path_len()],
                previous.path.as_slice()
            );
        }
        previous = Some(snapshot);
    }
}

#[test]
fn test_elapsed_never_exceeds_tracked_wall_time() {
    let (status_tx, _status_rx) = mpsc::channel::<StatusView>();
    let controller =
        SessionController::new(fast_config(), ManualPositionSource::new(), AlwaysGranted, status_tx)
            .unwrap();

    let mut tracked = Duration::ZERO;
    for _ in 0..3 {
        let started = Instant::now();
        controller.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        let paused = controller.pause().unwrap();
        tracked += started.elapsed();
        // both clocks truncate to whole milliseconds, allow one per interval
        tracked += Duration::from_millis(1);
        assert!(paused.elapsed.total_millis <= tracked.as_millis() as u64);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(
            controller.snapshot().elapsed.total_millis,
            paused.elapsed.total_millis
        );
    }
    let stopped = controller.stop().unwrap();
    assert!(stopped.elapsed.total_millis >= 117);
    assert!(stopped.elapsed.total_millis <= tracked.as_millis() as u64);
}

#[test]
fn test_paused_interval_emits_no_boundaries() {
    let time = ManualTimeSource::new(1_000);
    let (status_tx, status_rx) = mpsc::channel::<StatusView>();
    let controller = SessionController::with_time_source(
        fast_config(),
        ManualPositionSource::new(),
        AlwaysGranted,
        status_tx,
        Arc::new(time.clone()),
    )
    .unwrap();

    controller.dispatch(Command::StartOrResume).unwrap();
    time.advance(1_999);
    controller.dispatch(Command::Pause).unwrap();
    time.advance(3_600_000);
    thread::sleep(Duration::from_millis(20));
    controller.dispatch(Command::StartOrResume).unwrap();
    time.advance(1);
    let stopped = controller.dispatch(Command::Stop).unwrap();

    assert_eq!(stopped.elapsed.total_millis, 2_000);
    let seconds: Vec<String> = status_rx
        .try_iter()
        .filter(|view| view.trigger == StatusTrigger::SecondElapsed)
        .map(|view| view.text)
        .collect();
    assert_eq!(seconds, vec!["00:00:01", "00:00:02"]);
}

#[test]
fn test_replay_source_feeds_the_path() {
    let samples = vec![
        Some(GeoPoint::new(52.5200, 13.4050)),
        None,
        // a few centimeters away, below the requested minimum distance
        Some(GeoPoint::new(52.5200001, 13.4050)),
        Some(GeoPoint::new(52.5210, 13.4060)),
        Some(GeoPoint::new(52.5220, 13.4070)),
    ];
    let source = ReplayPositionSource::from_samples(samples).with_interval(Duration::from_millis(1));
    let (status_tx, _status_rx) = mpsc::channel::<StatusView>();
    let controller = SessionController::new(fast_config(), source, AlwaysGranted, status_tx).unwrap();
    let (tx, rx) = mpsc::channel::<Snapshot>();
    controller.subscribe(tx).unwrap();

    controller.start().unwrap();
    let full = loop {
        let snapshot = rx.recv_timeout(WAIT).expect("replay did not deliver every sample");
        if snapshot.path_len() == 3 {
            break snapshot;
        }
    };
    assert_eq!(full.path[0], GeoPoint::new(52.5200, 13.4050));
    assert_eq!(full.path[2], GeoPoint::new(52.5220, 13.4070));

    let stopped = controller.stop().unwrap();
    assert_eq!(stopped.path_len(), 3);
}

#[test]
fn test_denied_permission_never_subscribes() {
    let source = ManualPositionSource::new();
    let (status_tx, _status_rx) = mpsc::channel::<StatusView>();
    let controller =
        SessionController::new(fast_config(), source.clone(), || false, status_tx).unwrap();

    controller.start().unwrap();
    assert!(!source.is_subscribed());
    assert!(!source.push(Some(GeoPoint::new(0.0, 0.0))));
    controller.pause().unwrap();
    controller.start().unwrap();
    let stopped = controller.stop().unwrap();
    assert_eq!(stopped.path_len(), 0);
}

#[test]
fn test_stopped_session_rejects_commands_from_other_threads() {
    let (status_tx, _status_rx) = mpsc::channel::<StatusView>();
    let controller = Arc::new(
        SessionController::new(fast_config(), ManualPositionSource::new(), AlwaysGranted, status_tx)
            .unwrap(),
    );
    controller.start().unwrap();
    controller.stop().unwrap();

    let handles: Vec<_> = [Command::StartOrResume, Command::Pause, Command::Stop]
        .into_iter()
        .map(|command| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.dispatch(command))
        })
        .collect();
    for handle in handles {
        assert!(matches!(
            handle.join().unwrap(),
            Err(StrideError::InvalidTransition {
                from: SessionState::Stopped,
                ..
            })
        ));
    }
}
