//! Handler selection, switching and consent gating

use crate::support::*;
use alloy_primitives::address;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wallet_broker::pairing_session::PairingEvent;
use wallet_broker::{
    AppHandoffConfig, AppHandoffProvider, EncryptedDeeplinkConfig, EncryptedDeeplinkProvider,
    PairingConfig, PairingSessionProvider, ProviderKind, RelaySessionConfig,
    RelaySessionProvider, WalletBroker,
};
use wallet_broker_core::{
    ConfigError, ConnectionState, ConnectionType, ErrorCode, EthereumTransactionRequest,
    MemorySessionStore, SolanaClusters, TransactionRequest, WalletRequest, WalletStatus,
};

struct Fixture {
    broker: WalletBroker,
    opener: Arc<RecordingOpener>,
    pairing: Arc<MockPairingTransport>,
    handoff: Arc<MockHandoffSdk>,
}

fn fixture(consent: Option<(ConnectionType, bool)>) -> (Fixture, Option<Arc<CountingConsent>>) {
    let (opener, _rx) =
        RecordingOpener::new(&["rainbow", "trust", "cbwallet", "phantom", "metamask"]);
    let pairing = MockPairingTransport::settling(&[&format!("eip155:1:{ADDRESS}")]);
    let handoff = MockHandoffSdk::new(1);

    let mut builder = WalletBroker::builder(opener.clone())
        .with_provider(PairingSessionProvider::new(
            PairingConfig::new("project", "Example", "https://example.com", "example://"),
            pairing.clone(),
            opener.clone(),
        ))
        .with_provider(Arc::new(AppHandoffProvider::new(
            AppHandoffConfig::new("example://coinbase"),
            handoff.clone(),
        )))
        .with_provider(Arc::new(EncryptedDeeplinkProvider::new(
            EncryptedDeeplinkConfig::new("https://example.com", "example://phantom"),
            SolanaClusters::single(Arc::new(MockSolanaRpc::default())),
            opener.clone(),
        )))
        .with_provider(RelaySessionProvider::new(
            RelaySessionConfig::new(
                "Example",
                "example",
                "https://example.com",
                "https://bridge.example.org",
            )
            .with_response_delay(Duration::from_millis(1)),
            MockRelayTransport::approving(1, &[ADDRESS]),
            Arc::new(MemorySessionStore::new()),
            opener.clone(),
        ));

    let counting = consent.map(|(kind, answer)| (kind, CountingConsent::new(answer, opener.clone())));
    if let Some((kind, counting)) = &counting {
        builder = builder.with_consent(kind.clone(), counting.clone());
    }

    (
        Fixture {
            broker: builder.build().unwrap(),
            opener,
            pairing,
            handoff,
        },
        counting.map(|(_, counting)| counting),
    )
}

fn transfer(wallet_request: WalletRequest) -> TransactionRequest {
    let tx = EthereumTransactionRequest::new(
        address!("00000000000000000000000000000000000000aa"),
        address!("00000000000000000000000000000000000000bb"),
    );
    TransactionRequest::ethereum(wallet_request, tx)
}

#[tokio::test]
async fn test_build_requires_pairing() {
    let (opener, _rx) = RecordingOpener::new(&[]);
    let result = WalletBroker::builder(opener)
        .with_provider(Arc::new(AppHandoffProvider::new(
            AppHandoffConfig::new("example://coinbase"),
            MockHandoffSdk::new(1),
        )))
        .build();
    assert!(matches!(result, Err(ConfigError::Missing("pairing"))));
}

#[tokio::test]
async fn test_consent_rejection_skips_wallet() {
    let (f, consent) = fixture(Some((ConnectionType::WalletConnectV2, false)));
    let consent = consent.unwrap();

    let err = f
        .broker
        .send(&transfer(WalletRequest::new(Some(rainbow()), 1)), None)
        .await
        .unwrap_err();

    assert!(err.is(ErrorCode::UserCanceled));
    assert_eq!(err.message, "User canceled");
    assert_eq!(consent.calls(), 1);
    assert_eq!(f.opener.count(), 0);
    assert!(f.pairing.proposals.lock().is_empty());
    assert!(f.pairing.requests.lock().is_empty());
    assert_eq!(f.broker.active_kind().await, None);
}

#[tokio::test]
async fn test_consent_runs_once_before_wallet() {
    let (f, consent) = fixture(Some((ConnectionType::WalletConnectV2, true)));
    let consent = consent.unwrap();

    let hash = f
        .broker
        .send(&transfer(WalletRequest::new(Some(rainbow()), 1)), None)
        .await
        .unwrap();

    assert_eq!(hash, "0xhash");
    assert_eq!(consent.calls(), 1);
    assert_eq!(*consent.opens_before_consent.lock(), [0]);
    assert!(f.opener.count() > 0);
    assert_eq!(f.pairing.requests.lock()[0].method, "eth_sendTransaction");
}

#[tokio::test]
async fn test_consent_only_for_its_connection_type() {
    let (f, consent) = fixture(Some((ConnectionType::WalletSegue, false)));
    let consent = consent.unwrap();

    f.broker
        .send(&transfer(WalletRequest::new(Some(rainbow()), 1)), None)
        .await
        .unwrap();
    assert_eq!(consent.calls(), 0);
}

#[tokio::test]
async fn test_switching_handler_disconnects_previous() {
    let (f, _) = fixture(None);
    f.broker
        .connect(&WalletRequest::new(Some(rainbow()), 1))
        .await
        .unwrap();
    assert_eq!(f.broker.active_kind().await, Some(ProviderKind::PairingSession));

    let info = f
        .broker
        .connect(&WalletRequest::new(Some(coinbase()), 1))
        .await
        .unwrap();
    assert_eq!(info.wallet, Some(coinbase()));
    assert_eq!(f.broker.active_kind().await, Some(ProviderKind::AppHandoff));

    let pairing = f.broker.provider(ProviderKind::PairingSession).unwrap();
    assert_eq!(pairing.status().state, ConnectionState::Idle);
    assert_eq!(*f.pairing.disconnects.lock(), ["topic-1"]);
    assert_eq!(
        f.broker.status().await.state,
        ConnectionState::ConnectedToWallet
    );
}

#[tokio::test]
async fn test_listener_follows_active_handler() {
    let (f, _) = fixture(None);
    let seen: Arc<Mutex<Vec<WalletStatus>>> = Arc::default();
    let sink = seen.clone();
    f.broker
        .set_status_listener(Some(Arc::new(move |status: &WalletStatus| {
            sink.lock().push(status.clone())
        })));

    f.broker
        .connect(&WalletRequest::new(Some(rainbow()), 1))
        .await
        .unwrap();
    assert_eq!(
        seen.lock().last().map(|status| status.state),
        Some(ConnectionState::ConnectedToWallet)
    );

    f.broker
        .connect(&WalletRequest::new(Some(coinbase()), 1))
        .await
        .unwrap();
    let count = seen.lock().len();

    // the previous handler is detached
    f.broker
        .provider(ProviderKind::PairingSession)
        .unwrap()
        .connect(&WalletRequest::new(None, 1))
        .await
        .unwrap();
    assert_eq!(seen.lock().len(), count);
}

#[tokio::test]
async fn test_same_handler_other_wallet_reconnects() {
    let (f, _) = fixture(None);
    let trust = wallet("trust", "walletConnectV2", "trust", &[]);

    f.broker
        .connect(&WalletRequest::new(Some(rainbow()), 1))
        .await
        .unwrap();
    let info = f
        .broker
        .connect(&WalletRequest::new(Some(trust.clone()), 1))
        .await
        .unwrap();

    assert_eq!(info.wallet, Some(trust));
    assert_eq!(f.pairing.proposals.lock().len(), 2);
    assert_eq!(*f.pairing.disconnects.lock(), ["topic-1"]);
}

#[tokio::test]
async fn test_joining_caller_for_other_wallet_is_rejected() {
    let (f, _) = fixture(None);
    *f.pairing.settle_with.lock() = None;
    let trust = wallet("trust", "walletConnectV2", "trust", &[]);
    let first = WalletRequest::new(Some(rainbow()), 1);
    let second = WalletRequest::new(Some(trust), 1)
        .with_address("0x000000000000000000000000000000000000dEaD");

    let (a, b, _) = tokio::join!(
        f.broker.connect(&first),
        f.broker.connect(&second),
        async {
            wait_until(|| f.pairing.proposals.lock().len() == 1).await;
            // the joining caller nudges the wallet a second time
            wait_until(|| f.opener.count() == 2).await;
            f.pairing.emit(PairingEvent::SessionSettled(settled(
                "topic-1",
                &[&format!("eip155:1:{ADDRESS}")],
            )));
        }
    );

    assert_eq!(a.unwrap().address.as_deref(), Some(ADDRESS));
    assert!(b.unwrap_err().is(ErrorCode::WalletMismatch));
    assert_eq!(f.pairing.proposals.lock().len(), 1);
}

#[tokio::test]
async fn test_modal_routes_to_pairing() {
    let (f, _) = fixture(None);
    f.broker
        .connect(&WalletRequest::new(Some(coinbase()), 1).with_modal(true))
        .await
        .unwrap();

    assert_eq!(f.broker.active_kind().await, Some(ProviderKind::PairingSession));
    assert_eq!(
        f.handoff.handshakes.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_relay_wallet_routes_to_relay() {
    let (f, _) = fixture(None);
    let info = f
        .broker
        .connect(&WalletRequest::new(Some(metamask()), 1))
        .await
        .unwrap();
    assert_eq!(info.address.as_deref(), Some(ADDRESS));
    assert_eq!(f.broker.active_kind().await, Some(ProviderKind::RelaySession));
}

#[tokio::test]
async fn test_debug_link_exposes_pairing_uri() {
    let (f, _) = fixture(None);
    f.broker.start_debug_link(1).await.unwrap();

    let status = f.broker.status().await;
    assert_eq!(status.state, ConnectionState::ConnectedToWallet);
    assert_eq!(status.connection_deeplink.as_deref(), Some(PAIRING_URI));
    assert_eq!(f.opener.count(), 0);
}

#[tokio::test]
async fn test_unregistered_handler_falls_back_to_pairing() {
    let (opener, _rx) = RecordingOpener::new(&["cbwallet"]);
    let broker = WalletBroker::builder(opener.clone())
        .with_provider(PairingSessionProvider::new(
            PairingConfig::new("project", "Example", "https://example.com", "example://"),
            MockPairingTransport::settling(&[&format!("eip155:1:{ADDRESS}")]),
            opener,
        ))
        .build()
        .unwrap();

    let _ = broker
        .connect(&WalletRequest::new(Some(coinbase()), 1))
        .await;
    assert_eq!(broker.active_kind().await, Some(ProviderKind::PairingSession));
}

#[tokio::test]
async fn test_inbound_urls_offered_to_handlers() {
    let (f, _) = fixture(None);
    assert!(f
        .broker
        .handle_response(&Url::parse("cbcallback://result").unwrap()));
    assert!(!f
        .broker
        .handle_response(&Url::parse("https://unknown.example/callback").unwrap()));
}
