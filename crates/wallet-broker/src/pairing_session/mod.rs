//! Pairing-session handler (WalletConnect v2)
//!
//! Connect creates (or reuses) a pairing URI, hands it to the target wallet
//! by deeplink or exposes it for QR display, proposes a session and waits for
//! the transport to report settlement. Every request gets a fresh correlation
//! id and is resolved only by the matching response event.

mod transport;

pub use transport::{
    AccountId, Metadata, PairingEvent, PairingTransport, ProposalNamespace, Redirects, RpcResult,
    SessionProposal, SessionRequest, SettledSession, DEFAULT_METHODS, EIP155,
};

use crate::config::PairingConfig;
use crate::provider::{
    await_connect, check_add_chain_capability, expect_string, notify_connected, verify_joined,
    ConnectWaiters, OnConnected, ProviderKind, WalletProvider, ADD_CHAIN_METHOD,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use wallet_broker_core::links::wallet_link;
use wallet_broker_core::{
    AddChainRequest, AppState, ConnectionState, ConnectionType, DeeplinkLauncher, ErrorCode,
    ExpectedIdentity, Result, StatusCell, TransactionRequest, TypedDataProvider, UrlOpener,
    Wallet, WalletError, WalletInfo, WalletRequest, WalletStatus, WalletStatusListener,
};

type PendingResponse = oneshot::Sender<Result<String>>;

#[derive(Default)]
struct PairingState {
    expected: ExpectedIdentity,
    requesting_wallet: Option<Wallet>,
    uri: Option<String>,
    session: Option<SettledSession>,
}

/// Handler for pairing-based wallet sessions, also serving the modal/QR path
pub struct PairingSessionProvider {
    config: PairingConfig,
    transport: Arc<dyn PairingTransport>,
    launcher: Arc<DeeplinkLauncher>,
    status: StatusCell,
    state: Mutex<PairingState>,
    waiters: ConnectWaiters,
    pending: DashMap<u64, PendingResponse>,
    next_id: AtomicU64,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl PairingSessionProvider {
    /// Create the handler and start consuming transport events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: PairingConfig,
        transport: Arc<dyn PairingTransport>,
        opener: Arc<dyn UrlOpener>,
    ) -> Arc<Self> {
        let events = transport.subscribe();
        let provider = Arc::new(Self {
            config,
            transport,
            launcher: Arc::new(DeeplinkLauncher::new(opener)),
            status: StatusCell::new(),
            state: Mutex::new(PairingState::default()),
            waiters: ConnectWaiters::default(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            events: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::event_loop(Arc::downgrade(&provider), events));
        *provider.events.lock() = Some(handle);
        provider
    }

    pub fn launcher(&self) -> &DeeplinkLauncher {
        &self.launcher
    }

    /// Requests awaiting a wallet response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    async fn event_loop(this: Weak<Self>, mut events: broadcast::Receiver<PairingEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pairing event stream lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(this) = this.upgrade() else {
                break;
            };
            this.handle_event(event).await;
        }
        debug!("Pairing event loop stopped");
    }

    async fn handle_event(&self, event: PairingEvent) {
        match event {
            PairingEvent::SessionSettled(session) => self.on_settled(session).await,
            PairingEvent::SessionRejected { reason } => {
                if !self.status.state().is_negotiating() {
                    debug!("Ignoring rejection outside negotiation");
                    return;
                }
                warn!(reason = %reason, "Wallet rejected session proposal");
                self.abandon_proposal().await;
                self.waiters
                    .fail(WalletError::with_message(ErrorCode::RefusedByWallet, reason));
            }
            PairingEvent::SessionResponse { id, result } => {
                let Some((_, pending)) = self.pending.remove(&id) else {
                    debug!(id, "Response for unknown request");
                    return;
                };
                let outcome = match result {
                    RpcResult::Success(value) => expect_string(value),
                    RpcResult::Error { code, message } => {
                        warn!(id, code, message = %message, "Wallet returned an error");
                        Err(WalletError::with_message(ErrorCode::ConnectionFailed, message))
                    }
                };
                let _ = pending.send(outcome);
            }
            PairingEvent::SessionDeleted { topic } => {
                let current = self
                    .state
                    .lock()
                    .session
                    .as_ref()
                    .is_some_and(|session| session.topic == topic);
                if current {
                    info!(topic = %topic, "Wallet deleted the session");
                    self.teardown().await;
                    self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
                }
            }
        }
    }

    async fn on_settled(&self, session: SettledSession) {
        if !self.status.state().is_negotiating() {
            debug!(topic = %session.topic, "Ignoring settlement outside negotiation");
            return;
        }

        let (expected, wallet) = {
            let mut state = self.state.lock();
            state.session = Some(session.clone());
            (state.expected.clone(), state.requesting_wallet.clone())
        };

        let Some(account) = session.first_account() else {
            self.teardown().await;
            self.waiters
                .fail(WalletError::new(ErrorCode::WalletContainsNoAccount));
            return;
        };

        let info = WalletInfo::new(account.address.clone(), account.chain_id(), wallet)
            .with_peer(
                Some(session.peer.name.clone()),
                session.peer.icons.first().cloned(),
            );
        if let Err(error) = expected.verify(&info) {
            warn!(code = %error.code, "Pairing wallet identity rejected");
            self.teardown().await;
            self.waiters.fail(error);
            return;
        }

        info!(
            topic = %session.topic,
            address = %account.address,
            chain = %account.blockchain(),
            "Pairing session settled"
        );
        self.status.update(|status| {
            status.state = ConnectionState::ConnectedToWallet;
            status.connected_wallet = Some(info.clone());
        });
        self.waiters.resolve(Ok(info));
    }

    /// Drop the session, fail every pending request and return to `Idle`
    async fn teardown(&self) {
        self.close(false).await;
    }

    /// Like [`Self::teardown`] but the pairing stays usable for the next
    /// proposal. Used when a proposal never produced a session.
    async fn abandon_proposal(&self) {
        self.close(true).await;
    }

    async fn close(&self, keep_pairing: bool) {
        let session = {
            let mut state = self.state.lock();
            if !keep_pairing {
                state.uri = None;
            }
            state.expected = ExpectedIdentity::default();
            state.requesting_wallet = None;
            state.session.take()
        };
        if let Some(session) = &session {
            if let Err(e) = self.transport.disconnect(&session.topic).await {
                warn!(topic = %session.topic, error = %e, "Pairing disconnect failed");
            }
        }

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.send(Err(WalletError::new(ErrorCode::InvalidSession)));
            }
        }

        self.launcher.clear();
        self.status.reset();
    }

    fn proposer(&self) -> Metadata {
        Metadata {
            name: self.config.client_name.clone(),
            description: self.config.client_description.clone(),
            url: self.config.client_url.clone(),
            icons: self.config.icon_urls.clone(),
            redirect: Some(Redirects {
                native: Some(self.config.redirect_native.clone()),
                universal: self.config.redirect_universal.clone(),
            }),
        }
    }

    async fn begin(&self, request: &WalletRequest) -> Result<()> {
        let existing = self.state.lock().uri.clone();
        let uri = match existing {
            Some(uri) => uri,
            None => {
                debug!("Creating pairing");
                self.transport
                    .create_pairing()
                    .await
                    .map_err(|e| WalletError::with_message(ErrorCode::ConnectionFailed, e.message))?
            }
        };
        self.state.lock().uri = Some(uri.clone());
        self.status
            .update(|status| status.connection_deeplink = Some(uri.clone()));

        if launches_wallet(request) && !self.open_wallet().await {
            return Err(WalletError::new(ErrorCode::LinkOpenFailed));
        }

        let methods = request.wallet.as_ref().and_then(|wallet| wallet.methods());
        let proposal =
            SessionProposal::eip155(request.negotiated_chain_id(), methods, self.proposer());
        info!(chain_id = request.negotiated_chain_id(), "Proposing pairing session");
        self.transport
            .propose_session(&uri, &proposal)
            .await
            .map_err(|e| WalletError::with_message(ErrorCode::ConnectionFailed, e.message))
    }

    /// Bring the wallet app forward with the pairing URI.
    ///
    /// While backgrounded the launch is queued for the next foreground and
    /// counted as opened.
    async fn open_wallet(&self) -> bool {
        let connected = self.status.connected_wallet().and_then(|info| info.wallet);
        let (wallet, uri) = {
            let state = self.state.lock();
            (
                connected.or_else(|| state.requesting_wallet.clone()),
                state.uri.clone(),
            )
        };
        let Some(url) = wallet.and_then(|wallet| {
            wallet_link(
                &wallet,
                uri.as_deref(),
                &ConnectionType::WalletConnectV2,
                self.launcher.opener().as_ref(),
            )
        }) else {
            warn!("No launchable link for pairing wallet");
            return false;
        };

        if self.launcher.is_background() {
            let launcher = self.launcher.clone();
            tokio::spawn(async move { launcher.launch(url).await });
            return true;
        }
        self.launcher.launch(url).await
    }

    async fn run_request(
        &self,
        request: &WalletRequest,
        on_connected: Option<OnConnected>,
        method: &str,
        failure: ErrorCode,
        timeout: Option<Duration>,
        params: impl FnOnce(&AccountId) -> Value,
    ) -> Result<String> {
        let info = self.connect(request).await?;
        notify_connected(on_connected, &info);

        if launches_wallet(request) && !self.open_wallet().await {
            self.fail_session().await;
            return Err(WalletError::new(ErrorCode::LinkOpenFailed));
        }

        let (topic, account) = {
            let state = self.state.lock();
            let session = state.session.as_ref();
            (
                session.map(|s| s.topic.clone()),
                session.and_then(SettledSession::first_account),
            )
        };
        let (Some(topic), Some(account)) = (topic, account) else {
            return Err(WalletError::new(ErrorCode::InvalidSession));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let session_request = SessionRequest {
            id,
            topic,
            method: method.to_string(),
            params: params(&account),
            chain_id: account.blockchain(),
        };
        debug!(id, method, "Publishing pairing request");
        if let Err(e) = self.transport.request(&session_request).await {
            self.pending.remove(&id);
            warn!(id, method, error = %e, "Pairing request failed to publish");
            self.fail_session().await;
            return Err(WalletError::with_message(failure, e.message));
        }

        let response = async {
            rx.await
                .unwrap_or_else(|_| Err(WalletError::new(ErrorCode::InvalidSession)))
        };
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(result) => result,
                Err(_) => {
                    self.pending.remove(&id);
                    warn!(id, method, "Wallet did not answer in time");
                    Err(WalletError::new(ErrorCode::AddChainFailed))
                }
            },
            None => response.await,
        };

        match &result {
            Ok(_) => info!(id, method, "Pairing request completed"),
            Err(error) => {
                warn!(id, method, error = %error, "Pairing request failed");
                self.fail_session().await;
            }
        }
        result
    }

    async fn fail_session(&self) {
        self.teardown().await;
        self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
    }
}

/// Modal requests show the URI themselves; only targeted wallets are launched
fn launches_wallet(request: &WalletRequest) -> bool {
    request.wallet.is_some() && !request.use_modal
}

impl Drop for PairingSessionProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.events.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl WalletProvider for PairingSessionProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PairingSession
    }

    async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo> {
        if let Some(info) = self.status.connected_wallet() {
            if request.wallet.is_some() && info.wallet != request.wallet {
                info!("Switching pairing wallet, closing previous session");
                self.disconnect().await;
            } else if self.status.state().is_connected() {
                return Ok(info);
            }
        }

        if !self
            .status
            .transition(ConnectionState::Idle, ConnectionState::Listening)
        {
            let rx = self.waiters.push();
            if let Some(info) = self.status.connected_wallet() {
                self.waiters.resolve(Ok(info));
            } else if launches_wallet(request) {
                debug!(waiting = self.waiters.len(), "Pairing in flight, nudging wallet");
                self.open_wallet().await;
            }
            return verify_joined(request, await_connect(rx).await);
        }

        {
            let mut state = self.state.lock();
            state.expected = ExpectedIdentity::from(request);
            state.requesting_wallet = request.wallet.clone();
        }
        let rx = self.waiters.push();
        if let Err(error) = self.begin(request).await {
            warn!(error = %error, "Pairing negotiation failed to start");
            self.abandon_proposal().await;
            self.waiters.fail(error);
        }
        await_connect(rx).await
    }

    async fn disconnect(&self) {
        info!("Disconnecting pairing session");
        self.fail_session().await;
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
            None,
            |account| json!([message, account.address]),
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
            WalletError::with_message(ErrorCode::InvalidInput, "invalid typedData")
        })?;
        self.run_request(
            request,
            on_connected,
            "eth_signTypedData",
            ErrorCode::SigningMessageFailed,
            None,
            |account| json!([account.address, payload]),
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
                "Pairing sessions only carry Ethereum transactions",
            )
        })?;
        let body = transaction.to_rpc_json();
        self.run_request(
            &request.wallet_request,
            on_connected,
            "eth_sendTransaction",
            ErrorCode::SigningTransactionFailed,
            None,
            |_| json!([body]),
        )
        .await
    }

    async fn add_chain(
        &self,
        request: &WalletRequest,
        chain: &AddChainRequest,
        timeout: Option<Duration>,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        check_add_chain_capability(request, self.status.connected_wallet().as_ref())?;
        let chain = serde_json::to_value(chain)?;
        self.run_request(
            request,
            on_connected,
            ADD_CHAIN_METHOD,
            ErrorCode::AddChainFailed,
            timeout,
            |_| json!([chain]),
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
    }
}

impl std::fmt::Debug for PairingSessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSessionProvider")
            .field("status", &self.status)
            .field("pending", &self.pending.len())
            .finish()
    }
}
