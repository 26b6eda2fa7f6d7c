//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use url::Url;
use wallet_broker::app_handoff::{
    ActionResult, HandoffAccount, HandoffAction, HandoffSdk, HandshakeResponse,
};
use wallet_broker::encrypted_deeplink::{DappKeyPair, SharedSecret};
use wallet_broker::pairing_session::{
    Metadata, PairingEvent, PairingTransport, RpcResult, SessionProposal, SessionRequest,
    SettledSession,
};
use wallet_broker::relay_session::{
    DappInfo, PeerMeta, RelayEvent, RelaySession, RelayTransport, RelayWalletInfo,
};
use wallet_broker_core::catalog::{Wallet, WalletConfig, WalletConnection};
use wallet_broker_core::{
    ConsentStatus, ErrorCode, Result, SolanaRpc, TransactionRequest, UrlOpener, UserConsent,
    WalletError,
};

pub const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";
pub const SOLANA_ADDRESS: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

// ============================================================================
// Wallets
// ============================================================================

/// Catalog entry declaring one protocol under `scheme:`
pub fn wallet(id: &str, kind: &str, scheme: &str, methods: &[&str]) -> Wallet {
    Wallet {
        id: Some(id.into()),
        name: Some(id.into()),
        config: Some(WalletConfig {
            connections: Some(vec![WalletConnection {
                kind: Some(kind.into()),
                native: Some(format!("{scheme}:")),
                universal: None,
            }]),
            methods: (!methods.is_empty())
                .then(|| methods.iter().map(|m| m.to_string()).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn metamask() -> Wallet {
    wallet("metamask", "walletConnect", "metamask", &[])
}

pub fn rainbow() -> Wallet {
    wallet(
        "rainbow",
        "walletConnectV2",
        "rainbow",
        &["personal_sign", "eth_sendTransaction", "wallet_addEthereumChain"],
    )
}

pub fn coinbase() -> Wallet {
    wallet("coinbase", "walletSegue", "cbwallet", &["wallet_addEthereumChain"])
}

pub fn phantom() -> Wallet {
    wallet("phantom", "phantom", "phantom", &[])
}

// ============================================================================
// URL opener
// ============================================================================

/// Records every opened URL and reports it on a channel
pub struct RecordingOpener {
    installed: HashSet<String>,
    opened: Mutex<Vec<Url>>,
    tx: mpsc::UnboundedSender<Url>,
}

impl RecordingOpener {
    /// Schemes listed are installed; `https` always opens
    pub fn new(installed: &[&str]) -> (Arc<Self>, mpsc::UnboundedReceiver<Url>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut installed: HashSet<String> = installed.iter().map(|s| s.to_string()).collect();
        installed.insert("https".into());
        (
            Arc::new(Self {
                installed,
                opened: Mutex::new(Vec::new()),
                tx,
            }),
            rx,
        )
    }

    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl UrlOpener for RecordingOpener {
    fn can_open(&self, url: &Url) -> bool {
        self.installed.contains(url.scheme())
    }

    async fn open(&self, url: &Url) -> bool {
        self.opened.lock().push(url.clone());
        let _ = self.tx.send(url.clone());
        true
    }
}

// ============================================================================
// Consent
// ============================================================================

/// Counts prompts and remembers how many deeplinks had been opened by then
pub struct CountingConsent {
    answer: bool,
    opener: Arc<RecordingOpener>,
    pub calls: AtomicUsize,
    pub opens_before_consent: Mutex<Vec<usize>>,
}

impl CountingConsent {
    pub fn new(answer: bool, opener: Arc<RecordingOpener>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            opener,
            calls: AtomicUsize::new(0),
            opens_before_consent: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserConsent for CountingConsent {
    async fn request_consent(&self, _request: &TransactionRequest) -> ConsentStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.opens_before_consent.lock().push(self.opener.count());
        self.answer.into()
    }
}

// ============================================================================
// Relay transport
// ============================================================================

/// Bridge stand-in; approves automatically when `approve_with` is set
pub struct MockRelayTransport {
    events: broadcast::Sender<RelayEvent>,
    pub approve_with: Mutex<Option<RelayWalletInfo>>,
    pub listens: Mutex<Vec<String>>,
    pub reconnects: Mutex<Vec<RelaySession>>,
    pub disconnects: AtomicUsize,
    pub requests: Mutex<Vec<(String, Value)>>,
    pub responses: Mutex<VecDeque<Result<Value>>>,
}

impl MockRelayTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            approve_with: Mutex::new(None),
            listens: Mutex::new(Vec::new()),
            reconnects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn approving(chain_id: u64, accounts: &[&str]) -> Arc<Self> {
        let transport = Self::new();
        *transport.approve_with.lock() = Some(relay_wallet(chain_id, accounts));
        transport
    }

    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    pub fn respond_with(&self, result: Result<Value>) {
        self.responses.lock().push_back(result);
    }
}

pub fn relay_wallet(chain_id: u64, accounts: &[&str]) -> RelayWalletInfo {
    RelayWalletInfo {
        approved: true,
        accounts: accounts.iter().map(|a| a.to_string()).collect(),
        chain_id,
        peer_id: "wallet-peer".into(),
        peer_meta: Some(PeerMeta {
            name: "MetaMask".into(),
            description: String::new(),
            icons: vec!["https://metamask.io/icon.png".into()],
            url: "https://metamask.io".into(),
            scheme: None,
        }),
    }
}

#[async_trait]
impl RelayTransport for MockRelayTransport {
    async fn listen(&self, uri: &str, dapp_info: &DappInfo) -> Result<()> {
        self.listens.lock().push(uri.to_string());
        let approval = self.approve_with.lock().clone();
        if let Some(wallet_info) = approval {
            self.emit(RelayEvent::Connected {
                uri: uri.to_string(),
            });
            let session = RelaySession::new(uri, dapp_info.clone()).with_wallet(wallet_info);
            self.emit(RelayEvent::SessionConnected(session));
        }
        Ok(())
    }

    async fn reconnect(&self, session: &RelaySession) -> Result<()> {
        self.reconnects.lock().push(session.clone());
        Ok(())
    }

    async fn disconnect(&self, _session: &RelaySession) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(
        &self,
        _session: &RelaySession,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.requests.lock().push((method.to_string(), params));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!("0xsigned")))
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Pairing transport
// ============================================================================

pub const PAIRING_URI: &str = "wc:7f6e5d4c@2?relay-protocol=irn&symKey=aa";

/// Sign-client stand-in; settles and answers automatically when configured
pub struct MockPairingTransport {
    events: broadcast::Sender<PairingEvent>,
    pub settle_with: Mutex<Option<SettledSession>>,
    pub answer_with: Mutex<Option<RpcResult>>,
    pub pairings: AtomicUsize,
    /// Number of upcoming proposals that fail to publish
    pub fail_proposals: AtomicUsize,
    pub proposals: Mutex<Vec<SessionProposal>>,
    pub requests: Mutex<Vec<SessionRequest>>,
    pub disconnects: Mutex<Vec<String>>,
}

impl MockPairingTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            settle_with: Mutex::new(None),
            answer_with: Mutex::new(None),
            pairings: AtomicUsize::new(0),
            fail_proposals: AtomicUsize::new(0),
            proposals: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
        })
    }

    /// Settles every proposal with `accounts` and answers every request
    pub fn settling(accounts: &[&str]) -> Arc<Self> {
        let transport = Self::new();
        *transport.settle_with.lock() = Some(settled("topic-1", accounts));
        *transport.answer_with.lock() = Some(RpcResult::Success(json!("0xhash")));
        transport
    }

    pub fn emit(&self, event: PairingEvent) {
        let _ = self.events.send(event);
    }
}

pub fn settled(topic: &str, accounts: &[&str]) -> SettledSession {
    SettledSession {
        topic: topic.into(),
        accounts: accounts.iter().map(|a| a.to_string()).collect(),
        peer: Metadata {
            name: "Rainbow".into(),
            description: String::new(),
            url: "https://rainbow.me".into(),
            icons: vec!["https://rainbow.me/icon.png".into()],
            redirect: None,
        },
    }
}

#[async_trait]
impl PairingTransport for MockPairingTransport {
    async fn create_pairing(&self) -> Result<String> {
        self.pairings.fetch_add(1, Ordering::SeqCst);
        Ok(PAIRING_URI.to_string())
    }

    async fn propose_session(&self, _pairing_uri: &str, proposal: &SessionProposal) -> Result<()> {
        self.proposals.lock().push(proposal.clone());
        let failing = self
            .fail_proposals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WalletError::new(ErrorCode::ConnectionFailed));
        }
        let session = self.settle_with.lock().clone();
        if let Some(session) = session {
            self.emit(PairingEvent::SessionSettled(session));
        }
        Ok(())
    }

    async fn request(&self, request: &SessionRequest) -> Result<()> {
        self.requests.lock().push(request.clone());
        let answer = self.answer_with.lock().clone();
        if let Some(result) = answer {
            self.emit(PairingEvent::SessionResponse {
                id: request.id,
                result,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, topic: &str) -> Result<()> {
        self.disconnects.lock().push(topic.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Handoff SDK
// ============================================================================

pub struct MockHandoffSdk {
    pub account: Mutex<Option<HandoffAccount>>,
    pub connected: AtomicBool,
    pub handshakes: AtomicUsize,
    pub resets: AtomicUsize,
    pub actions: Mutex<Vec<HandoffAction>>,
    pub results: Mutex<VecDeque<Vec<ActionResult>>>,
}

impl MockHandoffSdk {
    pub fn new(network_id: u64) -> Arc<Self> {
        Arc::new(Self {
            account: Mutex::new(Some(HandoffAccount {
                chain: "ethereum".into(),
                network_id,
                address: ADDRESS.into(),
            })),
            connected: AtomicBool::new(false),
            handshakes: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            actions: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
        })
    }

    pub fn queue(&self, results: Vec<ActionResult>) {
        self.results.lock().push_back(results);
    }
}

#[async_trait]
impl HandoffSdk for MockHandoffSdk {
    async fn initiate_handshake(&self, actions: Vec<HandoffAction>) -> Result<HandshakeResponse> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        self.actions.lock().extend(actions);
        self.connected.store(true, Ordering::SeqCst);
        Ok(HandshakeResponse {
            results: vec![ActionResult::Success(json!([ADDRESS]))],
            account: self.account.lock().clone(),
        })
    }

    async fn make_request(
        &self,
        actions: Vec<HandoffAction>,
        _account: Option<HandoffAccount>,
    ) -> Result<Vec<ActionResult>> {
        self.actions.lock().extend(actions);
        Ok(self
            .results
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![ActionResult::Success(json!("0xsigned"))]))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reset_session(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn handle_response(&self, url: &Url) -> bool {
        url.scheme() == "cbcallback"
    }
}

// ============================================================================
// Solana RPC
// ============================================================================

#[derive(Default)]
pub struct MockSolanaRpc {
    pub broadcasts: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl SolanaRpc for MockSolanaRpc {
    async fn send_transaction(&self, signed_tx: &[u8]) -> std::result::Result<String, WalletError> {
        if signed_tx.is_empty() {
            return Err(WalletError::new(ErrorCode::SigningTransactionFailed));
        }
        self.broadcasts.lock().push(signed_tx.to_vec());
        Ok(format!("sig-{}", signed_tx.len()))
    }
}

// ============================================================================
// Encrypted-deeplink wallet
// ============================================================================

pub fn query(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

/// Wallet side of the encrypted deeplink protocol
pub struct MockPhantom {
    keys: DappKeyPair,
    shared: Option<SharedSecret>,
    pub session: String,
}

impl MockPhantom {
    pub fn new() -> Self {
        Self {
            keys: DappKeyPair::generate(),
            shared: None,
            session: "session-token-1".into(),
        }
    }

    fn callback(launch: &Url, params: &[(&str, &str)]) -> Url {
        let redirect = query(launch)
            .remove("redirect_link")
            .expect("launch carries a redirect link");
        Url::parse_with_params(&redirect, params).unwrap()
    }

    /// Approve a connect launch as `address`
    pub fn approve_connect(&mut self, launch: &Url, address: &str) -> Url {
        let params = query(launch);
        let shared = self
            .keys
            .shared_secret(&params["dapp_encryption_public_key"])
            .unwrap();
        let sealed = shared
            .seal(&json!({ "public_key": address, "session": self.session }))
            .unwrap();
        self.shared = Some(shared);
        Self::callback(
            launch,
            &[
                ("phantom_encryption_public_key", &self.keys.public_key_base58()),
                ("nonce", &sealed.nonce),
                ("data", &sealed.payload),
            ],
        )
    }

    /// Decrypt the payload of a request launch
    pub fn read_request(&self, launch: &Url) -> Value {
        let params = query(launch);
        self.shared
            .as_ref()
            .expect("connected first")
            .open(&params["nonce"], &params["payload"])
            .unwrap()
    }

    /// Answer a request launch with an encrypted body
    pub fn answer(&self, launch: &Url, body: Value) -> Url {
        let sealed = self.shared.as_ref().expect("connected first").seal(&body).unwrap();
        Self::callback(launch, &[("nonce", &sealed.nonce), ("data", &sealed.payload)])
    }

    pub fn reject(launch: &Url, code: &str, message: &str) -> Url {
        Self::callback(launch, &[("errorCode", code), ("errorMessage", message)])
    }
}

/// Yield to spawned tasks until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
