//! Integration tests for the session state machine.
//!
//! Every session here runs on the loopback engine, scripted through its
//! handle to play the part of the network.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use waypost_engine::{
    ChallengeEvent, EngineEvent, EngineFactory, LoopbackEngine, LoopbackFactory, LoopbackHandle,
};
use waypost_protocol::{Address, SessionSnapshot, SessionStatus};
use waypost_session::{Session, SessionConfig, SessionError};

struct Fixture {
    _dir: TempDir,
    handle: LoopbackHandle,
    session: Arc<Session<LoopbackEngine>>,
}

async fn fixture_with_timeout(challenge_timeout: Duration) -> Fixture {
    let dir = TempDir::new().unwrap();
    let factory = LoopbackFactory::new();
    let (engine, events) = factory
        .open("work", &dir.path().join("work"))
        .await
        .expect("open should succeed");
    let session = Session::spawn("work", engine, events, SessionConfig { challenge_timeout });
    Fixture {
        _dir: dir,
        handle: factory.handle("work"),
        session,
    }
}

async fn fixture() -> Fixture {
    fixture_with_timeout(Duration::from_secs(5)).await
}

/// Connects and completes pairing, waiting until the session has seen it.
async fn login(fx: &Fixture) {
    let mut notices = fx.session.subscribe();
    fx.session.connect().await.expect("connect");
    fx.handle.pair("6281234", "Ana");
    loop {
        if notices.recv().await.expect("notice") == EngineEvent::Connected {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_new_session_is_logged_out() {
    let fx = fixture().await;

    let state = fx.session.state().await;
    assert_eq!(state.id, "work");
    assert_eq!(state.status, SessionStatus::LoggedOut);
    assert!(!state.connected);
    assert!(!state.logged_in);
    assert!(state.connection_error.is_empty());
}

#[tokio::test]
async fn test_connect_without_credentials_is_disconnected() {
    let fx = fixture().await;

    fx.session.connect().await.unwrap();

    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Disconnected);
    assert!(state.connected);
    assert!(!state.logged_in);
}

#[tokio::test]
async fn test_connect_twice_dials_once() {
    let fx = fixture().await;

    fx.session.connect().await.unwrap();
    fx.session.connect().await.unwrap();

    assert_eq!(fx.handle.connect_calls(), 1);
}

#[tokio::test]
async fn test_connect_failure_records_error() {
    let fx = fixture().await;
    fx.handle.fail_next_connect("dial tcp: refused");

    let err = fx.session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectionFailed(_)));

    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Error);
    assert!(state.connection_error.contains("refused"));
}

#[tokio::test]
async fn test_reconnect_clears_previous_error() {
    let fx = fixture().await;
    fx.handle.fail_next_connect("refused");
    let _ = fx.session.connect().await;

    fx.session.connect().await.unwrap();

    assert!(fx.session.state().await.connection_error.is_empty());
}

#[tokio::test]
async fn test_pairing_event_moves_session_to_connected() {
    let fx = fixture().await;

    login(&fx).await;

    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Connected);
    assert!(state.logged_in);
    assert_eq!(state.phone_number, "6281234");
    assert_eq!(state.push_name, "Ana");
}

#[tokio::test]
async fn test_disconnect_keeps_credentials() {
    let fx = fixture().await;
    login(&fx).await;

    fx.session.disconnect().await;

    let state = fx.session.state().await;
    assert!(!state.connected);
    assert!(state.phone_number.is_empty(), "phone is only shown while logged in");
    assert!(fx.handle.is_paired());
    assert_eq!(state.status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_disconnect_when_offline_is_noop() {
    let fx = fixture().await;

    fx.session.disconnect().await;

    assert_eq!(fx.handle.disconnect_calls(), 0);
    assert_eq!(fx.session.state().await.status, SessionStatus::LoggedOut);
}

#[tokio::test]
async fn test_logout_clears_credentials() {
    let fx = fixture().await;
    login(&fx).await;

    fx.session.logout().await.unwrap();

    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::LoggedOut);
    assert!(!state.logged_in);
    assert!(!fx.handle.is_paired());
}

#[tokio::test]
async fn test_logout_when_not_logged_in_is_noop() {
    let fx = fixture().await;

    fx.session.logout().await.unwrap();

    assert_eq!(fx.handle.logout_calls(), 0);
}

#[tokio::test]
async fn test_logout_failure_records_error() {
    let fx = fixture().await;
    login(&fx).await;
    fx.handle.fail_logout("server said no");

    let err = fx.session.logout().await.unwrap_err();

    assert!(matches!(err, SessionError::LogoutFailed(_)));
    assert!(fx.session.state().await.connection_error.contains("server said no"));
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generate_qr_returns_first_code() {
    let fx = fixture().await;

    let code = fx.session.generate_qr().await.unwrap();

    assert!(code.starts_with("2@"));
    assert!(fx.session.state().await.connected);
}

#[tokio::test]
async fn test_generate_qr_when_logged_in_is_rejected() {
    let fx = fixture().await;
    login(&fx).await;

    let err = fx.session.generate_qr().await.unwrap_err();

    assert!(matches!(err, SessionError::AlreadyAuthenticated));
    assert_eq!(fx.handle.connect_calls(), 1, "only the login connect");
    assert_eq!(fx.handle.disconnect_calls(), 0);
    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Connected);
    assert!(state.connection_error.is_empty());
}

#[tokio::test]
async fn test_generate_qr_drops_existing_socket_first() {
    let fx = fixture().await;
    fx.session.connect().await.unwrap();

    fx.session.generate_qr().await.unwrap();

    assert_eq!(fx.handle.disconnect_calls(), 1);
    assert_eq!(fx.handle.connect_calls(), 2);
}

#[tokio::test]
async fn test_generate_qr_outdated_client() {
    let fx = fixture().await;
    fx.handle.script_challenge([ChallengeEvent::ClientOutdated]);

    let err = fx.session.generate_qr().await.unwrap_err();

    assert!(matches!(err, SessionError::ProtocolOutdated));
    assert!(!fx.session.state().await.connection_error.is_empty());
}

#[tokio::test]
async fn test_generate_qr_non_code_event_is_unexpected() {
    let fx = fixture().await;
    fx.handle.script_challenge([ChallengeEvent::Timeout]);

    let err = fx.session.generate_qr().await.unwrap_err();

    assert!(matches!(err, SessionError::UnexpectedEvent(kind) if kind == "timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_generate_qr_times_out() {
    let fx = fixture_with_timeout(SessionConfig::default().challenge_timeout).await;
    fx.handle.withhold_challenges();
    let started = tokio::time::Instant::now();

    let err = fx.session.generate_qr().await.unwrap_err();

    assert!(matches!(err, SessionError::AuthenticationTimeout(d) if d == Duration::from_secs(30)));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(fx.session.state().await.connection_error.contains("timed out"));
}

#[tokio::test]
async fn test_generate_qr_connect_failure_sets_error_status() {
    let fx = fixture().await;
    fx.handle.fail_next_connect("refused");

    let err = fx.session.generate_qr().await.unwrap_err();

    assert!(matches!(err, SessionError::ConnectionFailed(_)));
    assert_eq!(fx.session.state().await.status, SessionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_state_answers_during_pairing_wait() {
    let fx = fixture_with_timeout(SessionConfig::default().challenge_timeout).await;
    fx.handle.withhold_challenges();

    let session = Arc::clone(&fx.session);
    let waiter = tokio::spawn(async move { session.generate_qr().await });
    tokio::time::sleep(Duration::from_secs(10)).await;

    let state = tokio::time::timeout(Duration::from_millis(100), fx.session.state()).await;
    assert!(state.is_ok(), "state() must not wait for the pairing timeout");

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(SessionError::AuthenticationTimeout(_))));
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_send_message_requires_connection() {
    let fx = fixture().await;

    let err = fx.session.send_message("6281234", "hi").await.unwrap_err();

    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test]
async fn test_send_message_requires_login() {
    let fx = fixture().await;
    fx.session.connect().await.unwrap();

    let err = fx.session.send_message("6281234", "hi").await.unwrap_err();

    assert!(matches!(err, SessionError::NotLoggedIn));
}

#[tokio::test]
async fn test_send_message_normalizes_recipient() {
    let fx = fixture().await;
    login(&fx).await;

    fx.session.send_message("+6289999", "hello").await.unwrap();

    assert_eq!(
        fx.handle.sent_messages(),
        vec![(Address::user("6289999"), "hello".to_string())]
    );
}

#[tokio::test]
async fn test_send_message_empty_user_is_invalid() {
    let fx = fixture().await;
    login(&fx).await;

    let err = fx.session.send_message("+", "hello").await.unwrap_err();

    assert!(matches!(err, SessionError::InvalidRecipient(_)));
    assert!(fx.handle.sent_messages().is_empty());
}

#[tokio::test]
async fn test_send_failure_leaves_status_alone() {
    let fx = fixture().await;
    login(&fx).await;
    fx.handle.fail_send("rate limited");

    let err = fx.session.send_message("6289999", "hello").await.unwrap_err();

    assert!(matches!(err, SessionError::SendFailed(_)));
    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Connected);
    assert!(state.connection_error.is_empty());
}

// ---------------------------------------------------------------------------
// Events, restore, close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_engine_events_reach_subscribers() {
    let fx = fixture().await;
    let mut notices = fx.session.subscribe();

    fx.handle.emit(EngineEvent::Other("presence".into()));

    assert_eq!(
        notices.recv().await.unwrap(),
        EngineEvent::Other("presence".into())
    );
}

#[tokio::test]
async fn test_operations_advance_last_activity() {
    let fx = fixture().await;
    let before = fx.session.state().await.last_activity;
    tokio::time::sleep(Duration::from_millis(5)).await;

    fx.session.disconnect().await;

    assert!(fx.session.state().await.last_activity > before);
}

#[tokio::test]
async fn test_restore_seeds_fields_from_snapshot() {
    let fx = fixture().await;
    let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let snapshot = SessionSnapshot {
        id: "work".into(),
        status: SessionStatus::Connected,
        last_activity: stamp,
        connected: true,
        logged_in: true,
        push_name: "Ana".into(),
        phone_number: "6281234".into(),
        connection_error: "stale socket".into(),
    };

    fx.session.restore(&snapshot).await;

    let state = fx.session.state().await;
    assert_eq!(state.status, SessionStatus::Disconnected);
    assert_eq!(state.last_activity, stamp);
    assert_eq!(state.connection_error, "stale socket");
}

#[tokio::test]
async fn test_restore_logged_out_snapshot_stays_logged_out() {
    let fx = fixture().await;
    let snapshot = SessionSnapshot {
        id: "work".into(),
        status: SessionStatus::LoggedOut,
        last_activity: Utc::now(),
        connected: false,
        logged_in: false,
        push_name: String::new(),
        phone_number: String::new(),
        connection_error: String::new(),
    };

    fx.session.restore(&snapshot).await;

    assert_eq!(fx.session.state().await.status, SessionStatus::LoggedOut);
}

#[tokio::test]
async fn test_close_releases_engine_and_is_idempotent() {
    let fx = fixture().await;
    login(&fx).await;

    fx.session.close().await;
    fx.session.close().await;

    assert!(fx.session.is_closed());
    assert!(fx.handle.is_released());
    assert!(!fx.handle.is_connected());
    assert_eq!(fx.handle.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_closed_session_rejects_operations() {
    let fx = fixture().await;
    fx.session.close().await;

    assert!(matches!(fx.session.connect().await, Err(SessionError::Closed)));
    assert!(matches!(fx.session.generate_qr().await, Err(SessionError::Closed)));
    assert!(matches!(
        fx.session.send_message("6281234", "hi").await,
        Err(SessionError::Closed)
    ));
    assert_eq!(fx.session.state().await.id, "work");
}
