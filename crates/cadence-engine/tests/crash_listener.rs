use std::thread;
use std::time::Duration;

use cadence_engine::{listen_for_crash, stop_listening_for_crash, Engine};

#[test]
fn stopping_releases_waiting_listeners() {
    let first = listen_for_crash();
    let second = listen_for_crash();
    assert!(first.wait_timeout(Duration::from_millis(20)).is_none());

    let waiter = thread::spawn(move || second.wait());
    stop_listening_for_crash();
    assert!(waiter.join().unwrap().is_ok());
    assert_eq!(first.try_recv().map(|outcome| outcome.is_ok()), Some(true));
}

#[test]
fn healthy_engines_report_nothing() {
    let listener = listen_for_crash();
    let mut engine = Engine::dummy().unwrap();
    engine.play().unwrap();
    // A concurrent `stop_listening_for_crash` may release the listener early.
    assert!(!matches!(
        listener.wait_timeout(Duration::from_millis(100)),
        Some(Err(_))
    ));
    engine.close().unwrap();
}
