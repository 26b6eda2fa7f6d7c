//! Relay-session handler (WalletConnect v1)
//!
//! A bridge server relays encrypted JSON-RPC between us and the wallet app.
//! The approved session is persisted under [`SESSION_KEY`] so it survives a
//! process restart, and is replayed through the transport on foreground.
//!
//! ```text
//! Idle ──listen──► Listening ──Connected──► ConnectedToRelay ──SessionConnected──► ConnectedToWallet
//!   ▲                                            (launch wallet)        (verify identity, persist)
//!   └──────────────────── disconnect / failure / wallet disconnect ─────────────────────┘
//! ```

mod transport;

pub use transport::{
    DappInfo, PeerMeta, RelayEvent, RelaySession, RelayTransport, RelayUri, RelayWalletInfo,
};

use crate::config::RelaySessionConfig;
use crate::provider::{
    await_connect, check_add_chain_capability, expect_string, notify_connected, verify_joined,
    ConnectWaiters, OnConnected, ProviderKind, SessionEpoch, WalletProvider,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use wallet_broker_core::links::{strip_query, wallet_link};
use wallet_broker_core::{
    AddChainRequest, AppState, ConnectionState, ConnectionType, DeeplinkLauncher, ErrorCode,
    ExpectedIdentity, Result, SessionStore, StatusCell, TransactionRequest, TypedDataProvider,
    UrlOpener, Wallet, WalletError, WalletInfo, WalletRequest, WalletStatus, WalletStatusListener,
};

/// Store key of the persisted session record
pub const SESSION_KEY: &str = "relay.session";

#[derive(Default)]
struct RelayState {
    expected: ExpectedIdentity,
    expected_wallet: Option<Wallet>,
    uri: Option<String>,
    session: Option<RelaySession>,
}

/// Handler for bridge-relayed wallet sessions
pub struct RelaySessionProvider {
    config: RelaySessionConfig,
    transport: Arc<dyn RelayTransport>,
    store: Arc<dyn SessionStore>,
    /// Serializes store writes against the erase-on-teardown path
    store_lock: tokio::sync::Mutex<()>,
    launcher: Arc<DeeplinkLauncher>,
    status: StatusCell,
    state: Mutex<RelayState>,
    waiters: ConnectWaiters,
    epoch: SessionEpoch,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl RelaySessionProvider {
    /// Create the handler and start consuming transport events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: RelaySessionConfig,
        transport: Arc<dyn RelayTransport>,
        store: Arc<dyn SessionStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Arc<Self> {
        let events = transport.subscribe();
        let provider = Arc::new(Self {
            config,
            transport,
            store,
            store_lock: tokio::sync::Mutex::new(()),
            launcher: Arc::new(DeeplinkLauncher::new(opener)),
            status: StatusCell::new(),
            state: Mutex::new(RelayState::default()),
            waiters: ConnectWaiters::default(),
            epoch: SessionEpoch::default(),
            events: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::event_loop(Arc::downgrade(&provider), events));
        *provider.events.lock() = Some(handle);
        provider
    }

    pub fn launcher(&self) -> &DeeplinkLauncher {
        &self.launcher
    }

    /// Resume the in-memory session, else the persisted one.
    ///
    /// Returns `false` when there is nothing to resume. Never starts a new
    /// negotiation.
    pub async fn reconnect(&self) -> Result<bool> {
        let in_memory = self.state.lock().session.clone();
        let session = match in_memory {
            Some(session) => Some(session),
            None => self.persisted_session().await,
        };
        let Some(session) = session else {
            return Ok(false);
        };

        info!(uri = %strip_query(&session.uri), "Resuming relay session");
        self.transport
            .reconnect(&session)
            .await
            .map_err(|e| WalletError::with_message(ErrorCode::ConnectionFailed, e.message))?;

        if !self.status.state().is_connected() {
            self.status.transition(ConnectionState::Idle, ConnectionState::Listening);
            self.on_session_connected(session).await;
        }
        Ok(true)
    }

    async fn event_loop(this: Weak<Self>, mut events: broadcast::Receiver<RelayEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Relay event stream lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(this) = this.upgrade() else {
                break;
            };
            this.handle_event(event).await;
        }
        debug!("Relay event loop stopped");
    }

    async fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Connected { uri } => {
                if !self
                    .status
                    .transition(ConnectionState::Listening, ConnectionState::ConnectedToRelay)
                {
                    debug!("Ignoring bridge connect outside negotiation");
                    return;
                }
                info!(uri = %strip_query(&uri), "Connected to bridge");
                self.state.lock().uri = Some(uri.clone());
                self.status
                    .update(|status| status.connection_deeplink = Some(uri));
                self.nudge_wallet(false);
            }
            RelayEvent::FailedToConnect { uri } => {
                let error = {
                    let state = self.state.lock();
                    if state.session.is_some() {
                        WalletError::with_message(ErrorCode::ConnectionFailed, "Disconnected by wallet")
                    } else if state.uri.is_some() {
                        WalletError::new(ErrorCode::RefusedByWallet)
                    } else {
                        WalletError::with_message(
                            ErrorCode::ConnectionFailed,
                            "Failed to connect to server",
                        )
                    }
                };
                warn!(uri = %strip_query(&uri), code = %error.code, "Relay connection failed");
                self.teardown().await;
                self.waiters.fail(error);
            }
            RelayEvent::SessionConnected(session) => self.on_session_connected(session).await,
            RelayEvent::SessionUpdated(session) => {
                if self.status.state().is_connected() {
                    debug!("Relay session updated");
                    self.state.lock().session = Some(session.clone());
                    self.persist(&session).await;
                }
            }
            RelayEvent::SessionDisconnected(_) => {
                if self.launcher.is_background() {
                    debug!("Wallet disconnect while backgrounded, keeping session");
                    return;
                }
                info!("Wallet closed the relay session");
                self.teardown().await;
                self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
            }
        }
    }

    async fn on_session_connected(&self, session: RelaySession) {
        let Some(wallet_info) = session.wallet_info.clone() else {
            self.teardown().await;
            self.waiters
                .fail(WalletError::new(ErrorCode::WalletContainsNoAccount));
            return;
        };
        let Some(account) = wallet_info.accounts.first() else {
            self.teardown().await;
            self.waiters
                .fail(WalletError::new(ErrorCode::WalletContainsNoAccount));
            return;
        };

        let (expected, wallet) = {
            let state = self.state.lock();
            (state.expected.clone(), state.expected_wallet.clone())
        };
        let peer = wallet_info.peer_meta.as_ref();
        let info = WalletInfo::new(account.clone(), Some(wallet_info.chain_id), wallet).with_peer(
            peer.map(|meta| meta.name.clone()),
            peer.and_then(|meta| meta.icons.first().cloned()),
        );

        if let Err(error) = expected.verify(&info) {
            warn!(code = %error.code, "Relay wallet identity rejected");
            self.teardown().await;
            self.waiters.fail(error);
            return;
        }

        {
            let mut state = self.state.lock();
            state.uri = Some(session.uri.clone());
            state.session = Some(session.clone());
        }
        self.persist(&session).await;

        info!(
            address = %account,
            chain_id = wallet_info.chain_id,
            "Relay wallet connected"
        );
        let uri = session.uri.clone();
        self.status.update(|status| {
            status.state = ConnectionState::ConnectedToWallet;
            status.connected_wallet = Some(info.clone());
            status.connection_deeplink = Some(uri);
        });
        self.waiters.resolve(Ok(info));
    }

    /// Drop the session and return to `Idle`; waiters are left to the caller
    async fn teardown(&self) {
        self.epoch.invalidate();
        let session = {
            let mut state = self.state.lock();
            state.uri = None;
            state.expected = ExpectedIdentity::default();
            state.expected_wallet = None;
            state.session.take()
        };
        if let Some(session) = &session {
            if let Err(e) = self.transport.disconnect(session).await {
                warn!(error = %e, "Relay transport disconnect failed");
            }
        }
        {
            let _guard = self.store_lock.lock().await;
            if self.launcher.is_background() {
                debug!("Backgrounded, leaving persisted relay session intact");
            } else if let Err(e) = self.store.delete(SESSION_KEY).await {
                warn!(error = %e, "Failed to erase relay session");
            }
        }
        self.launcher.clear();
        self.status.reset();
    }

    async fn persist(&self, session: &RelaySession) {
        let _guard = self.store_lock.lock().await;
        let result = match session.to_bytes() {
            Ok(bytes) => self.store.store(SESSION_KEY, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist relay session");
        }
    }

    async fn persisted_session(&self) -> Option<RelaySession> {
        let bytes = {
            let _guard = self.store_lock.lock().await;
            self.store.load(SESSION_KEY).await.ok()?
        };
        match RelaySession::from_bytes(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable relay session");
                None
            }
        }
    }

    fn dapp_info(&self) -> DappInfo {
        DappInfo {
            peer_id: uuid::Uuid::new_v4().to_string(),
            peer_meta: PeerMeta {
                name: self.config.client_name.clone(),
                description: self.config.client_description.clone().unwrap_or_default(),
                icons: self.config.icon_url.iter().cloned().collect(),
                url: self.config.client_url.clone(),
                scheme: Some(self.config.scheme.clone()),
            },
        }
    }

    /// Open a fresh negotiation, or resume a persisted session
    async fn begin(&self) -> Result<()> {
        if let Some(session) = self.persisted_session().await {
            info!("Resuming persisted relay session");
            self.transport
                .reconnect(&session)
                .await
                .map_err(|e| WalletError::with_message(ErrorCode::ConnectionFailed, e.message))?;
            self.on_session_connected(session).await;
            return Ok(());
        }

        let uri = RelayUri::generate(&self.config.bridge_url).to_string();
        info!(uri = %strip_query(&uri), "Listening on relay bridge");
        self.state.lock().uri = Some(uri.clone());
        self.status
            .update(|status| status.connection_deeplink = Some(uri.clone()));
        self.transport
            .listen(&uri, &self.dapp_info())
            .await
            .map_err(|e| {
                warn!(error = %e, "Relay listen failed");
                WalletError::with_message(ErrorCode::ConnectionFailed, "Failed to connect to server")
            })
    }

    /// Launch the wallet app without waiting for the open to resolve.
    ///
    /// `stripped` uses the relay URI without its query string, which is how
    /// an already-paired wallet is brought to the front.
    fn nudge_wallet(&self, stripped: bool) {
        let Some(url) = self.wallet_url(stripped) else {
            return;
        };
        let launcher = self.launcher.clone();
        tokio::spawn(async move {
            if !launcher.launch(url).await {
                debug!("Relay wallet launch not opened");
            }
        });
    }

    fn wallet_url(&self, stripped: bool) -> Option<Url> {
        let connected = self.status.connected_wallet().and_then(|info| info.wallet);
        let (wallet, uri) = {
            let state = self.state.lock();
            (
                connected.or_else(|| state.expected_wallet.clone()),
                state.uri.clone(),
            )
        };
        let wallet = wallet?;
        let deeplink = uri.as_deref().map(|uri| if stripped { strip_query(uri) } else { uri });
        wallet_link(
            &wallet,
            deeplink,
            &ConnectionType::WalletConnect,
            self.launcher.opener().as_ref(),
        )
    }

    /// Hold a raw response back; twice as long when it arrives backgrounded
    fn response_delay(&self) -> Duration {
        let delay = self.config.response_delay();
        if self.launcher.is_background() {
            delay * 2
        } else {
            delay
        }
    }

    async fn run_request(
        &self,
        request: &WalletRequest,
        on_connected: Option<OnConnected>,
        method: &str,
        failure: ErrorCode,
        params: impl FnOnce(&RelaySession) -> Result<Value>,
    ) -> Result<String> {
        let info = self.connect(request).await?;
        notify_connected(on_connected, &info);
        self.nudge_wallet(true);

        let session = self
            .state
            .lock()
            .session
            .clone()
            .ok_or_else(|| WalletError::new(ErrorCode::InvalidSession))?;
        let params = params(&session)?;

        debug!(method, "Sending relay request");
        let result = self
            .epoch
            .guard(self.transport.send_request(&session, method, params))
            .await;
        tokio::time::sleep(self.response_delay()).await;

        match result.and_then(expect_string) {
            Ok(signed) => {
                info!(method, "Relay request completed");
                Ok(signed)
            }
            Err(error) => {
                warn!(method, error = %error, "Relay request failed");
                let error = match error.code {
                    ErrorCode::InvalidSession | ErrorCode::UnexpectedResponse => error,
                    _ => WalletError::with_message(failure, error.message),
                };
                self.teardown().await;
                self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
                Err(error)
            }
        }
    }
}

impl Drop for RelaySessionProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.events.lock().take() {
            handle.abort();
        }
    }
}

fn session_account(session: &RelaySession) -> Result<String> {
    session
        .account()
        .map(str::to_string)
        .ok_or_else(|| WalletError::new(ErrorCode::WalletContainsNoAccount))
}

#[async_trait]
impl WalletProvider for RelaySessionProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RelaySession
    }

    async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo> {
        if let Some(info) = self.status.connected_wallet() {
            if self.status.state().is_connected() {
                return Ok(info);
            }
        }

        if self
            .status
            .transition(ConnectionState::Idle, ConnectionState::Listening)
        {
            {
                let mut state = self.state.lock();
                state.expected = ExpectedIdentity::from(request);
                state.expected_wallet = request.wallet.clone();
            }
            let rx = self.waiters.push();
            if let Err(error) = self.begin().await {
                warn!(error = %error, "Relay negotiation failed to start");
                self.teardown().await;
                self.waiters.fail(error);
            }
            return await_connect(rx).await;
        }

        // Negotiation already in flight: wait for it and bring the wallet forward
        let rx = self.waiters.push();
        if let Some(info) = self.status.connected_wallet() {
            self.waiters.resolve(Ok(info));
        } else {
            debug!(waiting = self.waiters.len(), "Relay negotiation in flight, nudging wallet");
            self.nudge_wallet(false);
        }
        verify_joined(request, await_connect(rx).await)
    }

    async fn disconnect(&self) {
        info!("Disconnecting relay session");
        self.teardown().await;
        self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
    }

    async fn sign_message(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        self.run_request(
            request,
            on_connected,
            "personal_sign",
            ErrorCode::SigningMessageFailed,
            |session| Ok(json!([message, session_account(session)?])),
        )
        .await
    }

    async fn sign_typed_data(
        &self,
        request: &WalletRequest,
        typed_data: &dyn TypedDataProvider,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let payload = typed_data.typed_data_string().ok_or_else(|| {
            WalletError::with_message(ErrorCode::InvalidInput, "Typed data is incomplete")
        })?;
        self.run_request(
            request,
            on_connected,
            "eth_signTypedData",
            ErrorCode::SigningMessageFailed,
            |session| Ok(json!([session_account(session)?, payload])),
        )
        .await
    }

    async fn send(
        &self,
        request: &TransactionRequest,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let transaction = request.as_ethereum().ok_or_else(|| {
            WalletError::with_message(
                ErrorCode::InvalidInput,
                "Relay sessions only carry Ethereum transactions",
            )
        })?;
        let body = transaction.to_rpc_json();
        self.run_request(
            &request.wallet_request,
            on_connected,
            "eth_sendTransaction",
            ErrorCode::SigningTransactionFailed,
            |_| Ok(json!([body])),
        )
        .await
    }

    async fn add_chain(
        &self,
        request: &WalletRequest,
        chain: &AddChainRequest,
        _timeout: Option<Duration>,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        check_add_chain_capability(request, self.status.connected_wallet().as_ref())?;
        let chain = serde_json::to_value(chain)?;
        self.run_request(
            request,
            on_connected,
            crate::provider::ADD_CHAIN_METHOD,
            ErrorCode::AddChainFailed,
            |_| Ok(json!([chain])),
        )
        .await
    }

    fn status(&self) -> WalletStatus {
        self.status.get()
    }

    fn set_status_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>) {
        self.status.set_listener(listener);
    }

    fn handle_response(&self, _url: &Url) -> bool {
        false
    }

    async fn app_state_changed(&self, state: AppState) {
        self.launcher.set_app_state(state).await;
        let has_session = self.state.lock().session.is_some();
        if state == AppState::Foreground && has_session {
            if let Err(e) = self.reconnect().await {
                warn!(error = %e, "Relay session resume failed");
            }
        }
    }
}

impl std::fmt::Debug for RelaySessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySessionProvider")
            .field("status", &self.status)
            .field("bridge_url", &self.config.bridge_url)
            .finish()
    }
}
