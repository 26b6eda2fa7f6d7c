//! Encrypted-deeplink handler (Phantom)
//!
//! Every exchange is a pair of deeplinks: an outbound launch carrying a
//! base58 NaCl-box payload, and an inbound callback URL whose last path
//! segment names the action it answers. Connect generates an ephemeral
//! keypair and learns the wallet's public key and an opaque session token;
//! later requests are sealed under the shared box with a fresh nonce.
//!
//! At most one completion is outstanding per callback action. A callback for
//! an action nobody is waiting on is left unhandled.

mod crypto;

pub use crypto::{DappKeyPair, SealedPayload, SharedSecret, KEY_SIZE, NONCE_SIZE};

use crate::config::EncryptedDeeplinkConfig;
use crate::provider::{
    await_connect, notify_connected, verify_joined, ConnectWaiters, OnConnected, ProviderKind,
    WalletProvider,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;
use wallet_broker_core::solana::cluster_name;
use wallet_broker_core::{
    AddChainRequest, AppState, ConnectionState, DeeplinkLauncher, ErrorCode, ExpectedIdentity,
    Result, SolanaClusters, StatusCell, TransactionRequest, TypedDataProvider, UrlOpener,
    WalletError, WalletInfo, WalletRequest, WalletStatus, WalletStatusListener,
};

/// Callback query parameters, keyed by name
pub type CallbackParams = HashMap<String, String>;

/// Inbound callback routes, one per outbound method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    OnConnect,
    OnSignMessage,
    OnSignTransaction,
    OnDisconnect,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::OnConnect => "onConnect",
            CallbackAction::OnSignMessage => "onSignMessage",
            CallbackAction::OnSignTransaction => "onSignTransaction",
            CallbackAction::OnDisconnect => "onDisconnect",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "onConnect" => Some(CallbackAction::OnConnect),
            "onSignMessage" => Some(CallbackAction::OnSignMessage),
            "onSignTransaction" => Some(CallbackAction::OnSignTransaction),
            "onDisconnect" => Some(CallbackAction::OnDisconnect),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session learned from the wallet's connect callback
struct DeeplinkSession {
    shared: Arc<SharedSecret>,
    token: String,
}

#[derive(Default)]
struct DeeplinkState {
    keypair: Option<DappKeyPair>,
    session: Option<DeeplinkSession>,
    expected: ExpectedIdentity,
    request: Option<WalletRequest>,
    connect_url: Option<Url>,
}

/// Handler for encrypted deeplink round trips
pub struct EncryptedDeeplinkProvider {
    config: EncryptedDeeplinkConfig,
    clusters: SolanaClusters,
    launcher: Arc<DeeplinkLauncher>,
    status: StatusCell,
    state: Mutex<DeeplinkState>,
    waiters: ConnectWaiters,
    pending: DashMap<CallbackAction, oneshot::Sender<CallbackParams>>,
}

impl EncryptedDeeplinkProvider {
    pub fn new(
        config: EncryptedDeeplinkConfig,
        clusters: SolanaClusters,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        Self {
            config,
            clusters,
            launcher: Arc::new(DeeplinkLauncher::new(opener)),
            status: StatusCell::new(),
            state: Mutex::new(DeeplinkState::default()),
            waiters: ConnectWaiters::default(),
            pending: DashMap::new(),
        }
    }

    pub fn launcher(&self) -> &DeeplinkLauncher {
        &self.launcher
    }

    /// Whether a completion is waiting on `action`
    pub fn is_pending(&self, action: CallbackAction) -> bool {
        self.pending.contains_key(&action)
    }

    fn redirect_link(&self, action: CallbackAction) -> String {
        format!(
            "{}/{}",
            self.config.redirect_base_url.trim_end_matches('/'),
            action
        )
    }

    fn method_url(&self, method: &str, params: &[(&str, &str)]) -> Result<Url> {
        let base = format!("{}/{method}", self.config.base_url.trim_end_matches('/'));
        Url::parse_with_params(&base, params)
            .map_err(|e| WalletError::unexpected(format!("Failed to create URL: {e}")))
    }

    fn connect_url(&self, chain_id: u64, public_key: &str) -> Result<Url> {
        self.method_url(
            "connect",
            &[
                ("app_url", self.config.app_url.as_str()),
                ("cluster", cluster_name(chain_id)),
                ("redirect_link", &self.redirect_link(CallbackAction::OnConnect)),
                ("dapp_encryption_public_key", public_key),
            ],
        )
    }

    /// Route a callback that belongs to this handler
    fn dispatch(&self, action: CallbackAction, params: CallbackParams) -> bool {
        if action == CallbackAction::OnConnect && self.status.state().is_negotiating() {
            self.on_connect(params);
            return true;
        }
        match self.pending.remove(&action) {
            Some((_, pending)) => {
                debug!(%action, "Delivering deeplink callback");
                let _ = pending.send(params);
                true
            }
            None => {
                debug!(%action, "No completion waiting on callback");
                false
            }
        }
    }

    fn on_connect(&self, params: CallbackParams) {
        match self.complete_connect(&params) {
            Ok(info) => {
                info!(
                    address = info.address.as_deref().unwrap_or_default(),
                    "Encrypted deeplink wallet connected"
                );
                self.status.update(|status| {
                    status.state = ConnectionState::ConnectedToWallet;
                    status.connected_wallet = Some(info.clone());
                    status.connection_deeplink = None;
                });
                self.waiters.resolve(Ok(info));
            }
            Err(error) => {
                warn!(code = %error.code, error = %error, "Wallet connect callback rejected");
                self.teardown();
                self.waiters.fail(error);
            }
        }
    }

    fn complete_connect(&self, params: &CallbackParams) -> Result<WalletInfo> {
        check_error(params)?;
        let wallet_key = required(params, "phantom_encryption_public_key")?;
        let nonce = required(params, "nonce")?;
        let data = required(params, "data")?;

        let mut state = self.state.lock();
        let keypair = state
            .keypair
            .as_ref()
            .ok_or_else(|| WalletError::new(ErrorCode::InvalidSession))?;
        let shared = keypair.shared_secret(wallet_key)?;
        let payload = shared.open(nonce, data)?;

        let address = string_field(&payload, "public_key")?;
        let token = string_field(&payload, "session")?;
        let (chain_id, wallet) = state
            .request
            .as_ref()
            .map(|request| (request.chain_id, request.wallet.clone()))
            .unwrap_or_default();

        let info = WalletInfo::new(address, Some(chain_id), wallet);
        state.expected.verify(&info)?;
        state.session = Some(DeeplinkSession {
            shared: Arc::new(shared),
            token,
        });
        Ok(info)
    }

    /// Forget keys and session, drop pending completions and return to `Idle`
    fn teardown(&self) {
        *self.state.lock() = DeeplinkState::default();
        // dropped senders resolve their callers with InvalidSession
        self.pending.clear();
        self.launcher.clear();
        self.status.reset();
    }

    /// Launch one encrypted request and wait for its callback.
    ///
    /// `payload` receives the session token. Resolves with the raw callback
    /// parameters and the box needed to open them.
    async fn round_trip(
        &self,
        method: &str,
        action: CallbackAction,
        payload: impl FnOnce(&str) -> Value,
    ) -> Result<(Arc<SharedSecret>, CallbackParams)> {
        let (shared, public_key, body) = {
            let state = self.state.lock();
            let (Some(session), Some(keypair)) = (&state.session, &state.keypair) else {
                return Err(WalletError::new(ErrorCode::InvalidSession));
            };
            (
                session.shared.clone(),
                keypair.public_key_base58(),
                payload(&session.token),
            )
        };

        let sealed = shared.seal(&body)?;
        let url = self.method_url(
            method,
            &[
                ("dapp_encryption_public_key", public_key.as_str()),
                ("nonce", &sealed.nonce),
                ("redirect_link", &self.redirect_link(action)),
                ("payload", &sealed.payload),
            ],
        )?;

        let (tx, rx) = oneshot::channel();
        if self.pending.insert(action, tx).is_some() {
            warn!(%action, "Replacing an unanswered deeplink request");
        }

        debug!(method, "Launching encrypted deeplink");
        if !self.launcher.launch(url).await {
            self.pending.remove(&action);
            return Err(WalletError::new(ErrorCode::LinkOpenFailed));
        }

        let params = rx
            .await
            .map_err(|_| WalletError::new(ErrorCode::InvalidSession))?;
        Ok((shared, params))
    }

    /// Connect, then run one round trip. Any failure ends the session.
    async fn run_request(
        &self,
        request: &WalletRequest,
        on_connected: Option<OnConnected>,
        method: &str,
        action: CallbackAction,
        payload: impl FnOnce(&str) -> Value,
    ) -> Result<Value> {
        let info = self.connect(request).await?;
        notify_connected(on_connected, &info);

        let outcome = self
            .round_trip(method, action, payload)
            .await
            .and_then(|(shared, params)| {
                check_error(&params)?;
                open_body(&shared, &params)
            });
        match &outcome {
            Ok(_) => info!(method, "Encrypted deeplink request completed"),
            Err(error) => {
                warn!(method, error = %error, "Encrypted deeplink request failed");
                self.teardown();
                self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
            }
        }
        outcome
    }

    async fn sign_utf8(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let encoded = bs58::encode(message.as_bytes()).into_string();
        let body = self
            .run_request(
                request,
                on_connected,
                "signMessage",
                CallbackAction::OnSignMessage,
                |session| json!({ "message": encoded, "session": session, "display": "utf8" }),
            )
            .await?;
        string_field(&body, "signature")
    }

    /// Ask the wallet to end its side of the session, then tear down locally
    pub async fn disconnect_wallet(&self) -> Result<()> {
        if !self.status.state().is_connected() {
            self.disconnect().await;
            return Ok(());
        }
        info!("Requesting wallet-side disconnect");
        let outcome = self
            .round_trip("disconnect", CallbackAction::OnDisconnect, |session| {
                json!({ "session": session })
            })
            .await
            .and_then(|(_, params)| check_error(&params));
        if let Err(error) = &outcome {
            warn!(error = %error, "Wallet-side disconnect failed");
        }
        self.disconnect().await;
        outcome
    }
}

fn check_error(params: &CallbackParams) -> Result<()> {
    match params.get("errorCode") {
        Some(code) => {
            let message = params
                .get("errorMessage")
                .map(String::as_str)
                .unwrap_or("Unknown error");
            Err(WalletError::unexpected(format!("{code}: {message}")))
        }
        None => Ok(()),
    }
}

fn open_body(shared: &SharedSecret, params: &CallbackParams) -> Result<Value> {
    shared.open(required(params, "nonce")?, required(params, "data")?)
}

fn required<'a>(params: &'a CallbackParams, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| WalletError::unexpected(format!("Missing {name} in wallet response")))
}

fn string_field(body: &Value, name: &str) -> Result<String> {
    body.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WalletError::unexpected(format!("Missing {name} in wallet response")))
}

#[async_trait]
impl WalletProvider for EncryptedDeeplinkProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EncryptedDeeplink
    }

    async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo> {
        if self.status.state().is_connected() {
            if let Some(info) = self.status.connected_wallet() {
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
            } else {
                let url = self.state.lock().connect_url.clone();
                if let Some(url) = url {
                    debug!(waiting = self.waiters.len(), "Connect in flight, relaunching wallet");
                    let launcher = self.launcher.clone();
                    tokio::spawn(async move { launcher.launch(url).await });
                }
            }
            return verify_joined(request, await_connect(rx).await);
        }

        let keypair = DappKeyPair::generate();
        let url = match self.connect_url(request.chain_id, &keypair.public_key_base58()) {
            Ok(url) => url,
            Err(error) => {
                self.teardown();
                return Err(error);
            }
        };
        {
            let mut state = self.state.lock();
            state.keypair = Some(keypair);
            state.expected = ExpectedIdentity::from(request);
            state.request = Some(request.clone());
            state.connect_url = Some(url.clone());
        }
        self.status
            .update(|status| status.connection_deeplink = Some(url.to_string()));

        let rx = self.waiters.push();
        info!(cluster = cluster_name(request.chain_id), "Launching wallet connect");
        if !self.launcher.launch(url).await {
            warn!("Wallet connect link could not be opened");
            self.teardown();
            self.waiters.fail(WalletError::new(ErrorCode::LinkOpenFailed));
        }
        await_connect(rx).await
    }

    async fn disconnect(&self) {
        info!("Disconnecting encrypted deeplink session");
        self.teardown();
        self.waiters.fail(WalletError::new(ErrorCode::InvalidSession));
    }

    async fn sign_message(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        self.sign_utf8(request, message, on_connected).await
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
        self.sign_utf8(request, &payload, on_connected).await
    }

    async fn send(
        &self,
        request: &TransactionRequest,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let transaction = request.as_solana().ok_or_else(|| {
            WalletError::with_message(
                ErrorCode::InvalidInput,
                "Encrypted deeplink sessions only carry Solana transactions",
            )
        })?;
        let encoded = bs58::encode(transaction).into_string();
        let body = self
            .run_request(
                &request.wallet_request,
                on_connected,
                "signTransaction",
                CallbackAction::OnSignTransaction,
                |session| json!({ "transaction": encoded, "session": session }),
            )
            .await?;

        let signed = string_field(&body, "transaction")?;
        let signed = bs58::decode(&signed).into_vec().map_err(|e| {
            WalletError::unexpected(format!("Invalid base58 transaction: {e}"))
        })?;

        let chain_id = request.wallet_request.chain_id;
        debug!(cluster = cluster_name(chain_id), "Broadcasting signed transaction");
        let signature = self
            .clusters
            .for_chain(chain_id)
            .send_transaction(&signed)
            .await
            .map_err(|e| WalletError::with_message(ErrorCode::SigningTransactionFailed, e.message))?;
        info!(signature = %signature, "Solana transaction broadcast");
        Ok(signature)
    }

    async fn add_chain(
        &self,
        _request: &WalletRequest,
        _chain: &AddChainRequest,
        _timeout: Option<Duration>,
        _on_connected: Option<OnConnected>,
    ) -> Result<String> {
        Err(WalletError::new(ErrorCode::AddChainNotSupported))
    }

    fn status(&self) -> WalletStatus {
        self.status.get()
    }

    fn set_status_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>) {
        self.status.set_listener(listener);
    }

    fn handle_response(&self, url: &Url) -> bool {
        if !is_callback(&self.config.redirect_base_url, url) {
            return false;
        }
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        let Some(action) = CallbackAction::parse(segment) else {
            warn!(url = %url, "Unsupported deeplink callback");
            return false;
        };
        let params: CallbackParams = url.query_pairs().into_owned().collect();
        self.dispatch(action, params)
    }

    async fn app_state_changed(&self, state: AppState) {
        self.launcher.set_app_state(state).await;
    }
}

/// Whether `url` sits under the redirect base: same scheme and authority,
/// and a path that extends the base path at a `/` boundary.
fn is_callback(base: &str, url: &Url) -> bool {
    let Ok(base) = Url::parse(base) else {
        return false;
    };
    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port() != base.port()
    {
        return false;
    }
    let prefix = base.path().trim_end_matches('/');
    url.path()
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

impl std::fmt::Debug for EncryptedDeeplinkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedDeeplinkProvider")
            .field("status", &self.status)
            .field("pending", &self.pending.len())
            .finish()
    }
}
