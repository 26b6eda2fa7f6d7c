//! Identity verification at the `ConnectedToWallet` transition

use crate::error::{ErrorCode, Result, WalletError};
use crate::types::{WalletInfo, WalletRequest};

/// Identity captured at the `connect()` call that started negotiation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpectedIdentity {
    pub chain_id: Option<u64>,
    pub address: Option<String>,
}

impl From<&WalletRequest> for ExpectedIdentity {
    fn from(request: &WalletRequest) -> Self {
        Self {
            chain_id: Some(request.chain_id),
            address: request.address.clone(),
        }
    }
}

impl ExpectedIdentity {
    /// Check the wallet's reported identity.
    ///
    /// Chain ids are compared only when both sides are nonzero; addresses
    /// compare case-insensitively. The network check runs first.
    pub fn verify(&self, info: &WalletInfo) -> Result<()> {
        if let (Some(expected), Some(reported)) = (self.chain_id, info.chain_id) {
            if expected != 0 && reported != 0 && expected != reported {
                return Err(network_mismatch());
            }
        }

        if let Some(expected) = self.address.as_deref() {
            let matches = info
                .address
                .as_deref()
                .is_some_and(|reported| reported.eq_ignore_ascii_case(expected));
            if !matches {
                return Err(WalletError::with_message(
                    ErrorCode::WalletMismatch,
                    format!("Please switch your wallet to {expected}"),
                )
                .with_title("Wallet Mismatch"));
            }
        }

        Ok(())
    }
}

fn network_mismatch() -> WalletError {
    WalletError::with_message(
        ErrorCode::NetworkMismatch,
        "Please switch network from the wallet",
    )
    .with_title("Network Mismatch")
}

/// Human network name used in mismatch prompts
pub fn network_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "Ethereum Mainnet",
        5 => "Goerli Test Network",
        11155111 => "Sepolia Test Network",
        _ => "the requested network",
    }
}
