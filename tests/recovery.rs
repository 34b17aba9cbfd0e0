//! Session recovery integration tests

use media_relay::FailureReason;
use media_relay::responder::SessionState;
use tokio_test::{assert_err, assert_ok};

mod common;
use common::Harness;

const FIRST: &str = "https://tiktok.com/@a/video/1";
const SECOND: &str = "https://tiktok.com/@b/video/2";

#[tokio::test]
async fn single_fault_recovers_and_retries() {
    let harness = Harness::start();
    harness.responder.fail_sessions(1);

    let result = harness
        .dispatcher
        .submit("alice", FIRST, None, None)
        .unwrap()
        .await_result()
        .await;

    assert_ok!(result);
    assert_eq!(harness.responder.reconnects(), 1);
    assert_eq!(harness.dispatcher.status().session, SessionState::Active);
    // The failed send never reached the responder
    assert_eq!(harness.responder.sent_urls(), vec![FIRST]);
}

#[tokio::test]
async fn success_between_faults_allows_another_recovery() {
    let harness = Harness::start();

    harness.responder.fail_sessions(1);
    let first = harness.dispatcher.submit("alice", FIRST, None, None).unwrap();
    assert_ok!(first.await_result().await);

    harness.responder.fail_sessions(1);
    let second = harness.dispatcher.submit("alice", SECOND, None, None).unwrap();
    assert_ok!(second.await_result().await);

    assert_eq!(harness.responder.reconnects(), 2);
    assert_eq!(harness.dispatcher.status().session, SessionState::Active);
}

#[tokio::test]
async fn consecutive_faults_make_session_unusable() {
    let harness = Harness::start();
    harness.responder.fail_sessions(2);

    let result = harness
        .dispatcher
        .submit("alice", FIRST, None, None)
        .unwrap()
        .await_result()
        .await;
    assert!(matches!(result, Err(FailureReason::SessionInvalid(_))));
    assert_eq!(harness.responder.reconnects(), 1);
    assert_eq!(harness.dispatcher.status().session, SessionState::Unusable);

    // Later jobs fail without touching the transport
    let calls = harness.responder.calls();
    let result = harness
        .dispatcher
        .submit("bob", SECOND, None, None)
        .unwrap()
        .await_result()
        .await;
    assert!(matches!(result, Err(FailureReason::SessionInvalid(_))));
    assert_eq!(harness.responder.calls(), calls);

    harness.dispatcher.reset_session();
    assert_eq!(harness.dispatcher.status().session, SessionState::Active);

    let result = harness
        .dispatcher
        .submit("bob", SECOND, None, None)
        .unwrap()
        .await_result()
        .await;
    assert_ok!(result);
}

#[tokio::test]
async fn unauthorized_after_reconnect_is_unusable() {
    let harness = Harness::start();
    harness.responder.fail_sessions(1);
    harness.responder.set_authorized(false);

    let result = harness
        .dispatcher
        .submit("alice", FIRST, None, None)
        .unwrap()
        .await_result()
        .await;

    let reason = assert_err!(result);
    assert!(matches!(reason, FailureReason::SessionInvalid(_)));
    assert_eq!(harness.dispatcher.status().session, SessionState::Unusable);
    assert!(harness.store.uploads().is_empty());
}

#[tokio::test]
async fn recovery_pause_uses_the_clock() {
    let harness = Harness::start();
    harness.responder.fail_sessions(1);

    harness
        .dispatcher
        .submit("alice", FIRST, None, None)
        .unwrap()
        .await_result()
        .await
        .unwrap();

    // Two primes, one reconnect pause
    assert_eq!(harness.clock.elapsed().as_secs(), 2 + 5 + 2);
}
