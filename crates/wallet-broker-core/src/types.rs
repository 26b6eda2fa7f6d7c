//! Request and identity types shared by the broker and every handler

use crate::catalog::Wallet;
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Chain id used when a request does not name one
pub const DEFAULT_CHAIN_ID: u64 = 1;

// ============================================================================
// Connection Request
// ============================================================================

/// What the application wants to connect to.
///
/// Compared by equality to detect wallet switches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    /// Target wallet; `None` means any wallet via the generic modal/QR flow
    pub wallet: Option<Wallet>,
    /// Expected account address
    pub address: Option<String>,
    /// Expected chain id; `0` means any chain
    pub chain_id: u64,
    /// Route through the protocol-agnostic modal
    pub use_modal: bool,
}

impl WalletRequest {
    pub fn new(wallet: Option<Wallet>, chain_id: u64) -> Self {
        Self {
            wallet,
            address: None,
            chain_id,
            use_modal: false,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_modal(mut self, use_modal: bool) -> Self {
        self.use_modal = use_modal;
        self
    }

    /// Chain id to negotiate, substituting the default for "any"
    pub fn negotiated_chain_id(&self) -> u64 {
        if self.chain_id == 0 {
            DEFAULT_CHAIN_ID
        } else {
            self.chain_id
        }
    }
}

// ============================================================================
// Transaction Request
// ============================================================================

/// Ethereum transaction descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumTransactionRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    #[serde(default)]
    pub data: Bytes,
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
    pub nonce: Option<u64>,
}

impl EthereumTransactionRequest {
    pub fn new(from: Address, to: Address) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_gas(mut self, gas: u64, gas_price: U256) -> Self {
        self.gas = Some(gas);
        self.gas_price = Some(gas_price);
        self
    }

    /// JSON-RPC `eth_sendTransaction` object with hex quantities
    pub fn to_rpc_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if let Some(from) = self.from {
            object.insert("from".into(), from.to_checksum(None).into());
        }
        if let Some(to) = self.to {
            object.insert("to".into(), to.to_checksum(None).into());
        }
        object.insert("data".into(), self.data.to_string().into());
        if let Some(value) = self.value {
            object.insert("value".into(), format!("0x{value:x}").into());
        }
        if let Some(gas) = self.gas {
            object.insert("gas".into(), format!("{gas:#x}").into());
        }
        if let Some(gas_price) = self.gas_price {
            object.insert("gasPrice".into(), format!("0x{gas_price:x}").into());
        }
        if let Some(nonce) = self.nonce {
            object.insert("nonce".into(), format!("{nonce:#x}").into());
        }
        serde_json::Value::Object(object)
    }
}

/// Chain-specific transaction payload; exactly one variant per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "transaction", rename_all = "snake_case")]
pub enum TransactionPayload {
    Ethereum(EthereumTransactionRequest),
    /// Serialized, unsigned Solana transaction
    Solana(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub wallet_request: WalletRequest,
    pub payload: TransactionPayload,
}

impl TransactionRequest {
    pub fn ethereum(wallet_request: WalletRequest, tx: EthereumTransactionRequest) -> Self {
        Self {
            wallet_request,
            payload: TransactionPayload::Ethereum(tx),
        }
    }

    pub fn solana(wallet_request: WalletRequest, tx: impl Into<Vec<u8>>) -> Self {
        Self {
            wallet_request,
            payload: TransactionPayload::Solana(tx.into()),
        }
    }

    pub fn as_ethereum(&self) -> Option<&EthereumTransactionRequest> {
        match &self.payload {
            TransactionPayload::Ethereum(tx) => Some(tx),
            TransactionPayload::Solana(_) => None,
        }
    }

    pub fn as_solana(&self) -> Option<&[u8]> {
        match &self.payload {
            TransactionPayload::Solana(tx) => Some(tx),
            TransactionPayload::Ethereum(_) => None,
        }
    }
}

// ============================================================================
// Add Chain Request
// ============================================================================

/// `wallet_addEthereumChain` parameters (EIP-3085)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainRequest {
    /// Hex chain id, e.g. `0xa`
    pub chain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_currency: Option<NativeCurrency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_explorer_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

impl AddChainRequest {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id: format!("{chain_id:#x}"),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.chain_name = Some(name.into());
        self
    }

    pub fn with_rpc_urls(mut self, urls: Vec<String>) -> Self {
        self.rpc_urls = Some(urls);
        self
    }

    pub fn with_native_currency(
        mut self,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u32,
    ) -> Self {
        self.native_currency = Some(NativeCurrency {
            name: name.into(),
            symbol: symbol.into(),
            decimals,
        });
        self
    }
}

// ============================================================================
// Wallet Identity
// ============================================================================

/// Identity of the connected wallet
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub wallet: Option<Wallet>,
    pub peer_name: Option<String>,
    pub peer_image_url: Option<String>,
}

impl WalletInfo {
    pub fn new(address: impl Into<String>, chain_id: Option<u64>, wallet: Option<Wallet>) -> Self {
        Self {
            address: Some(address.into()),
            chain_id,
            wallet,
            peer_name: None,
            peer_image_url: None,
        }
    }

    pub fn with_peer(mut self, name: Option<String>, image_url: Option<String>) -> Self {
        self.peer_name = name;
        self.peer_image_url = image_url;
        self
    }
}

/// Shorten an address for display: `0x1234...5678`
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Render `value / 10^decimals` without trailing zeros
pub fn format_units(value: U256, decimals: u8) -> String {
    if value.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / divisor;
    let fraction = value % divisor;

    if fraction.is_zero() {
        whole.to_string()
    } else {
        let fraction_str = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
        let trimmed = fraction_str.trim_end_matches('0');
        format!("{whole}.{trimmed}")
    }
}
