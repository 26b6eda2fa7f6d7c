//! Handler contract and selection
//!
//! Every protocol handler implements [`WalletProvider`]. Which one serves a
//! request is decided by [`select_provider`], a pure function of the request
//! and what is installed on the device.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use url::Url;
use wallet_broker_core::{
    AddChainRequest, AppState, ConnectionType, ErrorCode, ExpectedIdentity, Result,
    TransactionRequest, TypedDataProvider, UrlOpener, WalletError, WalletInfo, WalletRequest,
    WalletStatus, WalletStatusListener,
};

/// Callback invoked with the resolved identity before an operation is sent
pub type OnConnected = Box<dyn FnOnce(&WalletInfo) + Send>;

/// Method a wallet must declare before `add_chain` is attempted
pub const ADD_CHAIN_METHOD: &str = "wallet_addEthereumChain";

/// The closed set of protocol handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Bridge-relayed sessions (WalletConnect v1)
    RelaySession,
    /// Pairing URI and settled sessions (WalletConnect v2), also the modal/QR path
    PairingSession,
    /// Native app-to-app handshake (Coinbase Wallet)
    AppHandoff,
    /// Encrypted deeplink round trips (Phantom)
    EncryptedDeeplink,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::RelaySession => "relay-session",
            ProviderKind::PairingSession => "pairing-session",
            ProviderKind::AppHandoff => "app-handoff",
            ProviderKind::EncryptedDeeplink => "encrypted-deeplink",
        }
    }

    /// Handler serving a declared connection protocol
    pub fn for_connection_type(kind: &ConnectionType) -> Option<Self> {
        match kind {
            ConnectionType::WalletConnect => Some(ProviderKind::RelaySession),
            ConnectionType::WalletConnectV2 | ConnectionType::WalletConnectModal => {
                Some(ProviderKind::PairingSession)
            }
            ConnectionType::WalletSegue => Some(ProviderKind::AppHandoff),
            ConnectionType::Phantom => Some(ProviderKind::EncryptedDeeplink),
            ConnectionType::MagicLink | ConnectionType::Custom(_) | ConnectionType::Unknown => {
                None
            }
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of handler selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub kind: ProviderKind,
    /// Protocol the target wallet declared, used to look up custom consent
    pub connection_type: ConnectionType,
}

/// Pick the handler for `request`.
///
/// 1. `use_modal` routes to the pairing handler.
/// 2. A target wallet's declared protocol routes to that protocol's handler.
/// 3. Anything else routes to the pairing handler in QR mode.
pub fn select_provider(request: &WalletRequest, opener: &dyn UrlOpener) -> Selection {
    if request.use_modal {
        return Selection {
            kind: ProviderKind::PairingSession,
            connection_type: ConnectionType::WalletConnectModal,
        };
    }

    if let Some(wallet) = &request.wallet {
        let connection_type = wallet.connection_type(opener);
        if let Some(kind) = ProviderKind::for_connection_type(&connection_type) {
            return Selection {
                kind,
                connection_type,
            };
        }
    }

    Selection {
        kind: ProviderKind::PairingSession,
        connection_type: ConnectionType::WalletConnectV2,
    }
}

/// Operations every protocol handler supports
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Establish or reuse a session, resolving with the verified identity
    async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo>;

    /// Return to `Idle`, failing every pending operation with `InvalidSession`
    async fn disconnect(&self);

    async fn sign_message(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String>;

    async fn sign_typed_data(
        &self,
        request: &WalletRequest,
        typed_data: &dyn TypedDataProvider,
        on_connected: Option<OnConnected>,
    ) -> Result<String>;

    async fn send(
        &self,
        request: &TransactionRequest,
        on_connected: Option<OnConnected>,
    ) -> Result<String>;

    async fn add_chain(
        &self,
        request: &WalletRequest,
        chain: &AddChainRequest,
        timeout: Option<Duration>,
        on_connected: Option<OnConnected>,
    ) -> Result<String>;

    fn status(&self) -> WalletStatus;

    /// Attach the single status listener; `None` detaches
    fn set_status_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>);

    /// Consume an inbound URL addressed to this handler
    fn handle_response(&self, url: &Url) -> bool;

    async fn app_state_changed(&self, state: AppState);
}

// ============================================================================
// Shared handler plumbing
// ============================================================================

/// Callers waiting on one in-flight negotiation
#[derive(Default)]
pub(crate) struct ConnectWaiters {
    waiters: Mutex<Vec<oneshot::Sender<Result<WalletInfo>>>>,
}

impl ConnectWaiters {
    pub(crate) fn push(&self) -> oneshot::Receiver<Result<WalletInfo>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Resolve every queued caller with the same outcome
    pub(crate) fn resolve(&self, result: Result<WalletInfo>) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    pub(crate) fn fail(&self, error: WalletError) {
        self.resolve(Err(error));
    }
}

/// Await a negotiation outcome; a dropped sender means the session went away
pub(crate) async fn await_connect(rx: oneshot::Receiver<Result<WalletInfo>>) -> Result<WalletInfo> {
    rx.await
        .unwrap_or_else(|_| Err(WalletError::new(ErrorCode::InvalidSession)))
}

/// Outcome for a caller that joined a negotiation started by someone else.
///
/// The settled identity was verified against the first caller only, so the
/// joining caller's wallet and expected identity are checked here.
pub(crate) fn verify_joined(
    request: &WalletRequest,
    outcome: Result<WalletInfo>,
) -> Result<WalletInfo> {
    let info = outcome?;
    if request.wallet.is_some() && info.wallet != request.wallet {
        return Err(WalletError::with_message(
            ErrorCode::WalletMismatch,
            "Another wallet is already connecting",
        ));
    }
    ExpectedIdentity::from(request).verify(&info)?;
    Ok(info)
}

/// Generation counter that aborts in-flight transport calls on disconnect
pub(crate) struct SessionEpoch {
    tx: watch::Sender<u64>,
}

impl Default for SessionEpoch {
    fn default() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }
}

impl SessionEpoch {
    pub(crate) fn invalidate(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Run `fut`, failing with `InvalidSession` if the epoch moves first
    pub(crate) async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            result = fut => result,
            _ = rx.changed() => Err(WalletError::new(ErrorCode::InvalidSession)),
        }
    }
}

pub(crate) fn notify_connected(on_connected: Option<OnConnected>, info: &WalletInfo) {
    if let Some(callback) = on_connected {
        callback(info);
    }
}

/// Fail fast when the wallet does not declare `wallet_addEthereumChain`
pub(crate) fn check_add_chain_capability(
    request: &WalletRequest,
    connected: Option<&WalletInfo>,
) -> Result<()> {
    let wallet = request
        .wallet
        .as_ref()
        .or_else(|| connected.and_then(|info| info.wallet.as_ref()));
    if wallet.is_some_and(|w| w.supports_method(ADD_CHAIN_METHOD)) {
        Ok(())
    } else {
        Err(WalletError::new(ErrorCode::AddChainNotSupported))
    }
}

/// Map a wallet's JSON-RPC result to the signed payload string
pub(crate) fn expect_string(value: serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        other => Err(WalletError::unexpected(format!(
            "Unexpected response payload: {other}"
        ))),
    }
}
