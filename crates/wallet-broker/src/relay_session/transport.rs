//! Bridge relay transport boundary
//!
//! The socket protocol lives behind [`RelayTransport`]; the handler only sees
//! session records and the events below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use wallet_broker_core::{Result, StoreError};

/// Peer metadata exchanged during the relay handshake
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icons: Vec<String>,
    pub url: String,
    pub scheme: Option<String>,
}

/// Our side of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappInfo {
    pub peer_id: String,
    pub peer_meta: PeerMeta,
}

/// What the wallet reported when it approved the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayWalletInfo {
    pub approved: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
    pub chain_id: u64,
    pub peer_id: String,
    pub peer_meta: Option<PeerMeta>,
}

/// A relay session record, persisted verbatim for resumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySession {
    pub uri: String,
    pub dapp_info: DappInfo,
    pub wallet_info: Option<RelayWalletInfo>,
}

impl RelaySession {
    pub fn new(uri: impl Into<String>, dapp_info: DappInfo) -> Self {
        Self {
            uri: uri.into(),
            dapp_info,
            wallet_info: None,
        }
    }

    pub fn with_wallet(mut self, wallet_info: RelayWalletInfo) -> Self {
        self.wallet_info = Some(wallet_info);
        self
    }

    /// First approved account, the one every request is signed with
    pub fn account(&self) -> Option<&str> {
        self.wallet_info
            .as_ref()
            .and_then(|info| info.accounts.first())
            .map(String::as_str)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Relay URI handed to the wallet: `wc:{topic}@1?bridge={bridge}&key={key}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayUri {
    pub topic: String,
    pub bridge: String,
    /// 32-byte symmetric key, lower hex
    pub key: String,
}

impl RelayUri {
    /// Fresh topic and key for a new negotiation
    pub fn generate(bridge: impl Into<String>) -> Self {
        Self {
            topic: uuid::Uuid::new_v4().to_string(),
            bridge: bridge.into(),
            key: hex::encode(rand::random::<[u8; 32]>()),
        }
    }
}

impl std::fmt::Display for RelayUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bridge: String = url::form_urlencoded::byte_serialize(self.bridge.as_bytes()).collect();
        write!(f, "wc:{}@1?bridge={}&key={}", self.topic, bridge, self.key)
    }
}

/// Events pushed by the relay transport
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Socket to the bridge is open for `uri`
    Connected { uri: String },
    FailedToConnect { uri: String },
    /// Wallet approved the session
    SessionConnected(RelaySession),
    SessionUpdated(RelaySession),
    /// Wallet closed the session
    SessionDisconnected(RelaySession),
}

/// Bridge relay client
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open the bridge socket for a new session offer
    async fn listen(&self, uri: &str, dapp_info: &DappInfo) -> Result<()>;

    /// Resume a known session without a new offer
    async fn reconnect(&self, session: &RelaySession) -> Result<()>;

    async fn disconnect(&self, session: &RelaySession) -> Result<()>;

    /// Send one JSON-RPC request and await the wallet's raw result
    async fn send_request(
        &self,
        session: &RelaySession,
        method: &str,
        params: Value,
    ) -> Result<Value>;

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent>;
}
