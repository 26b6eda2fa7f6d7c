//! Handoff SDK boundary
//!
//! The platform SDK owns the app switch and delivers results back through
//! its own URL callback; the handler only sees actions and results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use wallet_broker_core::{AddChainRequest, Result};

/// One JSON-RPC action carried by a handoff request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum HandoffAction {
    #[serde(rename = "eth_requestAccounts")]
    RequestAccounts,
    #[serde(rename = "personal_sign", rename_all = "camelCase")]
    PersonalSign { address: String, message: String },
    #[serde(rename = "eth_signTypedData_v3", rename_all = "camelCase")]
    SignTypedDataV3 {
        address: String,
        typed_data_json: String,
    },
    #[serde(rename = "eth_sendTransaction", rename_all = "camelCase")]
    SendTransaction {
        from_address: String,
        to_address: Option<String>,
        /// Decimal wei
        wei_value: String,
        data: String,
        gas_price_in_wei: Option<String>,
        gas_limit: Option<String>,
        chain_id: String,
    },
    #[serde(rename = "wallet_addEthereumChain")]
    AddEthereumChain(AddChainRequest),
}

impl HandoffAction {
    pub fn method(&self) -> &'static str {
        match self {
            HandoffAction::RequestAccounts => "eth_requestAccounts",
            HandoffAction::PersonalSign { .. } => "personal_sign",
            HandoffAction::SignTypedDataV3 { .. } => "eth_signTypedData_v3",
            HandoffAction::SendTransaction { .. } => "eth_sendTransaction",
            HandoffAction::AddEthereumChain(_) => "wallet_addEthereumChain",
        }
    }
}

/// Account the wallet shared during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffAccount {
    pub chain: String,
    pub network_id: u64,
    pub address: String,
}

/// Per-action outcome
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Success(Value),
    Failure { code: i64, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub results: Vec<ActionResult>,
    pub account: Option<HandoffAccount>,
}

/// Native app-to-app wallet SDK
#[async_trait]
pub trait HandoffSdk: Send + Sync {
    async fn initiate_handshake(&self, actions: Vec<HandoffAction>) -> Result<HandshakeResponse>;

    async fn make_request(
        &self,
        actions: Vec<HandoffAction>,
        account: Option<HandoffAccount>,
    ) -> Result<Vec<ActionResult>>;

    /// Whether the SDK still holds a usable session
    fn is_connected(&self) -> bool;

    fn reset_session(&self);

    /// Offer an inbound URL to the SDK
    fn handle_response(&self, url: &Url) -> bool;
}
