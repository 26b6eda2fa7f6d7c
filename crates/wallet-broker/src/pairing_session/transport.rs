//! Pairing transport boundary and sign-protocol data structures

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use wallet_broker_core::Result;

/// Methods proposed when the target wallet declares none
pub const DEFAULT_METHODS: [&str; 3] = ["eth_sendTransaction", "personal_sign", "eth_signTypedData"];

pub const EIP155: &str = "eip155";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Redirects {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universal: Option<String>,
}

/// Peer metadata advertised by either side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirects>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposalNamespace {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Session offer published on a pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub required_namespaces: BTreeMap<String, ProposalNamespace>,
    pub optional_namespaces: BTreeMap<String, ProposalNamespace>,
    pub session_properties: BTreeMap<String, String>,
    pub proposer: Metadata,
}

impl SessionProposal {
    /// Single required `eip155` namespace on `chain_id`
    pub fn eip155(chain_id: u64, methods: Option<&[String]>, proposer: Metadata) -> Self {
        let methods = match methods {
            Some(methods) => methods.to_vec(),
            None => DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
        };
        let namespace = ProposalNamespace {
            chains: vec![format!("{EIP155}:{chain_id}")],
            methods,
            events: Vec::new(),
        };
        Self {
            required_namespaces: BTreeMap::from([(EIP155.to_string(), namespace)]),
            optional_namespaces: BTreeMap::new(),
            session_properties: BTreeMap::from([(
                "caip154-mandatory".to_string(),
                "true".to_string(),
            )]),
            proposer,
        }
    }
}

/// CAIP-10 account id: `{namespace}:{reference}:{address}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId {
    pub namespace: String,
    pub reference: String,
    pub address: String,
}

impl AccountId {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let namespace = parts.next().filter(|s| !s.is_empty())?;
        let reference = parts.next().filter(|s| !s.is_empty())?;
        let address = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            namespace: namespace.to_string(),
            reference: reference.to_string(),
            address: address.to_string(),
        })
    }

    /// CAIP-2 chain id, e.g. `eip155:1`
    pub fn blockchain(&self) -> String {
        format!("{}:{}", self.namespace, self.reference)
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.reference.parse().ok()
    }
}

/// Session the wallet approved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledSession {
    pub topic: String,
    /// CAIP-10 accounts across all settled namespaces
    pub accounts: Vec<String>,
    pub peer: Metadata,
}

impl SettledSession {
    pub fn first_account(&self) -> Option<AccountId> {
        self.accounts.iter().find_map(|raw| AccountId::parse(raw))
    }
}

/// One JSON-RPC call routed to the wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub id: u64,
    pub topic: String,
    pub method: String,
    pub params: Value,
    /// CAIP-2 chain the request targets
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcResult {
    Success(Value),
    Error { code: i64, message: String },
}

/// Events pushed by the pairing transport
#[derive(Debug, Clone, PartialEq)]
pub enum PairingEvent {
    SessionSettled(SettledSession),
    SessionRejected { reason: String },
    SessionResponse { id: u64, result: RpcResult },
    SessionDeleted { topic: String },
}

/// Pairing and sign client
#[async_trait]
pub trait PairingTransport: Send + Sync {
    /// Create a pairing and return its URI
    async fn create_pairing(&self) -> Result<String>;

    /// Publish a session proposal on the pairing
    async fn propose_session(&self, pairing_uri: &str, proposal: &SessionProposal) -> Result<()>;

    /// Publish a request; the answer arrives as [`PairingEvent::SessionResponse`]
    async fn request(&self, request: &SessionRequest) -> Result<()>;

    async fn disconnect(&self, topic: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<PairingEvent>;
}
