//! Relay-session negotiation, persistence and request flow

use crate::support::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wallet_broker::relay_session::{DappInfo, PeerMeta, RelayEvent, RelaySession, SESSION_KEY};
use wallet_broker::{RelaySessionConfig, RelaySessionProvider, WalletProvider};
use wallet_broker_core::{
    AppState, ConnectionState, ErrorCode, MemorySessionStore, SessionStore, WalletError,
    WalletRequest,
};

fn config() -> RelaySessionConfig {
    RelaySessionConfig::new(
        "Example",
        "example",
        "https://example.com",
        "https://bridge.example.org",
    )
    .with_response_delay(Duration::from_millis(1))
}

fn dapp() -> DappInfo {
    DappInfo {
        peer_id: "dapp".into(),
        peer_meta: PeerMeta {
            name: "Example".into(),
            url: "https://example.com".into(),
            ..Default::default()
        },
    }
}

struct Fixture {
    opener: Arc<RecordingOpener>,
    transport: Arc<MockRelayTransport>,
    store: Arc<MemorySessionStore>,
    provider: Arc<RelaySessionProvider>,
}

fn fixture(transport: Arc<MockRelayTransport>) -> Fixture {
    fixture_with(config(), transport)
}

fn fixture_with(config: RelaySessionConfig, transport: Arc<MockRelayTransport>) -> Fixture {
    let (opener, _rx) = RecordingOpener::new(&["metamask"]);
    let store = Arc::new(MemorySessionStore::new());
    let provider =
        RelaySessionProvider::new(config, transport.clone(), store.clone(), opener.clone());
    Fixture {
        opener,
        transport,
        store,
        provider,
    }
}

#[tokio::test]
async fn test_concurrent_connects_share_one_negotiation() {
    let f = fixture(MockRelayTransport::new());
    let request = WalletRequest::new(Some(metamask()), 1);

    let first = tokio::spawn({
        let (provider, request) = (f.provider.clone(), request.clone());
        async move { provider.connect(&request).await }
    });
    let second = tokio::spawn({
        let (provider, request) = (f.provider.clone(), request.clone());
        async move { provider.connect(&request).await }
    });

    wait_until(|| f.transport.listens.lock().len() == 1).await;
    let uri = f.transport.listens.lock()[0].clone();
    f.transport.emit(RelayEvent::Connected { uri: uri.clone() });
    f.transport.emit(RelayEvent::SessionConnected(
        RelaySession::new(uri.clone(), dapp()).with_wallet(relay_wallet(1, &[ADDRESS])),
    ));

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.address.as_deref(), Some(ADDRESS));
    assert_eq!(a.peer_name.as_deref(), Some("MetaMask"));
    assert_eq!(f.transport.listens.lock().len(), 1);

    let status = f.provider.status();
    assert_eq!(status.state, ConnectionState::ConnectedToWallet);
    assert_eq!(status.connection_deeplink.as_deref(), Some(uri.as_str()));

    // wallet was launched with the relay URI embedded
    wait_until(|| f.opener.count() > 0).await;
    assert!(f.opener.opened()[0].as_str().starts_with("metamask://wc?uri=wc:"));
}

#[tokio::test]
async fn test_persisted_session_resumes_without_listen() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    let request = WalletRequest::new(Some(metamask()), 1);
    f.provider.connect(&request).await.unwrap();
    assert!(f.store.exists(SESSION_KEY).await.unwrap());
    drop(f.provider);

    // a restarted process sees only the stored bytes
    let (opener, _rx) = RecordingOpener::new(&["metamask"]);
    let transport = MockRelayTransport::new();
    let provider = RelaySessionProvider::new(config(), transport.clone(), f.store.clone(), opener);

    assert!(provider.reconnect().await.unwrap());
    assert!(transport.listens.lock().is_empty());
    assert_eq!(transport.reconnects.lock().len(), 1);

    let status = provider.status();
    assert_eq!(status.state, ConnectionState::ConnectedToWallet);
    assert_eq!(
        status.connected_wallet.unwrap().address.as_deref(),
        Some(ADDRESS)
    );
}

#[tokio::test]
async fn test_reconnect_without_session_does_nothing() {
    let f = fixture(MockRelayTransport::new());
    assert!(!f.provider.reconnect().await.unwrap());
    assert!(f.transport.reconnects.lock().is_empty());
    assert!(f.transport.listens.lock().is_empty());
    assert_eq!(f.provider.status().state, ConnectionState::Idle);
}

#[tokio::test]
async fn test_network_mismatch_returns_to_idle() {
    let f = fixture(MockRelayTransport::approving(5, &[ADDRESS]));
    let request = WalletRequest::new(Some(metamask()), 1);

    let err = f.provider.connect(&request).await.unwrap_err();
    assert!(err.is(ErrorCode::NetworkMismatch));
    assert_eq!(err.title(), "Network Mismatch");

    let status = f.provider.status();
    assert_eq!(status.state, ConnectionState::Idle);
    assert!(status.connected_wallet.is_none());
    assert!(!f.store.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test]
async fn test_address_mismatch_rejected() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    let request = WalletRequest::new(Some(metamask()), 1).with_address("0xdead");

    let err = f.provider.connect(&request).await.unwrap_err();
    assert!(err.is(ErrorCode::WalletMismatch));
    assert_eq!(err.message, "Please switch your wallet to 0xdead");
}

#[tokio::test]
async fn test_empty_account_list() {
    let f = fixture(MockRelayTransport::approving(1, &[]));
    let err = f
        .provider
        .connect(&WalletRequest::new(Some(metamask()), 1))
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::WalletContainsNoAccount));
}

#[tokio::test]
async fn test_refused_after_bridge_connect() {
    let f = fixture(MockRelayTransport::new());
    let request = WalletRequest::new(Some(metamask()), 1);
    let pending = tokio::spawn({
        let provider = f.provider.clone();
        async move { provider.connect(&request).await }
    });

    wait_until(|| f.transport.listens.lock().len() == 1).await;
    let uri = f.transport.listens.lock()[0].clone();
    f.transport.emit(RelayEvent::Connected { uri: uri.clone() });
    wait_until(|| f.provider.status().state == ConnectionState::ConnectedToRelay).await;
    f.transport.emit(RelayEvent::FailedToConnect { uri });

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is(ErrorCode::RefusedByWallet));
    assert_eq!(f.provider.status().state, ConnectionState::Idle);
}

#[tokio::test]
async fn test_sign_message_sends_personal_sign() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    f.transport.respond_with(Ok(json!("0xsig")));
    let request = WalletRequest::new(Some(metamask()), 1);

    let connected = Arc::new(parking_lot::Mutex::new(None));
    let sink = connected.clone();
    let signature = f
        .provider
        .sign_message(
            &request,
            "hello",
            Some(Box::new(move |info| *sink.lock() = info.address.clone())),
        )
        .await
        .unwrap();

    assert_eq!(signature, "0xsig");
    assert_eq!(connected.lock().as_deref(), Some(ADDRESS));
    assert_eq!(
        f.transport.requests.lock()[0],
        ("personal_sign".to_string(), json!(["hello", ADDRESS]))
    );
}

#[tokio::test]
async fn test_failed_request_maps_code_and_tears_down() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    f.transport.respond_with(Err(WalletError::with_message(
        ErrorCode::ConnectionFailed,
        "User rejected",
    )));
    let request = WalletRequest::new(Some(metamask()), 1);

    let err = f.provider.sign_message(&request, "hello", None).await.unwrap_err();
    assert!(err.is(ErrorCode::SigningMessageFailed));
    assert_eq!(err.message, "User rejected");
    assert_eq!(f.provider.status().state, ConnectionState::Idle);
    assert_eq!(f.transport.disconnects.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!f.store.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test]
async fn test_non_string_result_is_unexpected() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    f.transport.respond_with(Ok(json!({"r": "0x1"})));
    let err = f
        .provider
        .sign_message(&WalletRequest::new(Some(metamask()), 1), "hello", None)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::UnexpectedResponse));
}

#[tokio::test]
async fn test_backgrounded_wallet_disconnect_keeps_session() {
    let f = fixture(MockRelayTransport::approving(1, &[ADDRESS]));
    f.provider
        .connect(&WalletRequest::new(Some(metamask()), 1))
        .await
        .unwrap();
    let session = RelaySession::from_bytes(&f.store.load(SESSION_KEY).await.unwrap()).unwrap();

    f.provider.app_state_changed(AppState::Background).await;
    f.transport
        .emit(RelayEvent::SessionDisconnected(session.clone()));
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(f.provider.status().state, ConnectionState::ConnectedToWallet);
    assert!(f.store.exists(SESSION_KEY).await.unwrap());

    f.provider.app_state_changed(AppState::Foreground).await;
    f.transport.emit(RelayEvent::SessionDisconnected(session));
    wait_until(|| f.provider.status().state == ConnectionState::Idle).await;
    assert!(!f.store.exists(SESSION_KEY).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_response_delay_doubles_when_backgrounded() {
    let config = RelaySessionConfig::new(
        "Example",
        "example",
        "https://example.com",
        "https://bridge.example.org",
    );
    assert_eq!(config.response_delay(), Duration::from_millis(500));
    let f = fixture_with(config, MockRelayTransport::approving(1, &[ADDRESS]));
    let request = WalletRequest::new(Some(metamask()), 1);
    f.provider.connect(&request).await.unwrap();

    let started = tokio::time::Instant::now();
    f.provider.sign_message(&request, "hello", None).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");

    // the response arrives while backgrounded
    f.provider.app_state_changed(AppState::Background).await;
    let started = tokio::time::Instant::now();
    f.provider.sign_message(&request, "again", None).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
    assert_eq!(f.provider.status().state, ConnectionState::ConnectedToWallet);
}
