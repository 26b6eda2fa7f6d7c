//! User consent before transaction sends
//!
//! The broker asks a [`UserConsent`] collaborator exactly once per `send`,
//! before any wallet-facing action. Debug and QR flows use
//! [`SkippedConsent`]; interactive hosts use [`SummaryConsent`] with their
//! own [`ConsentPrompt`].

use crate::types::{format_units, shorten_address, TransactionPayload, TransactionRequest};
use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a consent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Consented,
    Rejected,
}

impl ConsentStatus {
    pub fn is_consented(&self) -> bool {
        matches!(self, ConsentStatus::Consented)
    }
}

impl From<bool> for ConsentStatus {
    fn from(approved: bool) -> Self {
        if approved {
            ConsentStatus::Consented
        } else {
            ConsentStatus::Rejected
        }
    }
}

#[async_trait]
pub trait UserConsent: Send + Sync {
    async fn request_consent(&self, request: &TransactionRequest) -> ConsentStatus;
}

/// Auto-consents to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct SkippedConsent;

#[async_trait]
impl UserConsent for SkippedConsent {
    async fn request_consent(&self, _request: &TransactionRequest) -> ConsentStatus {
        ConsentStatus::Consented
    }
}

// ============================================================================
// Summary Consent
// ============================================================================

/// Human-readable description of a transaction awaiting approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub title: String,
    /// Recipient, shortened for display
    pub to: Option<String>,
    /// `gas * gasPrice` in Gwei
    pub estimated_gas: Option<String>,
    /// Value in ETH
    pub value: Option<String>,
    pub message: String,
}

impl TransactionSummary {
    pub const TITLE: &'static str = "Approve this transaction?";

    pub fn from_request(request: &TransactionRequest) -> Self {
        match &request.payload {
            TransactionPayload::Ethereum(tx) => {
                let estimated_gas = match (tx.gas, tx.gas_price) {
                    (Some(gas), Some(price)) => {
                        Some(format!("{} Gwei", format_units(U256::from(gas) * price, 9)))
                    }
                    _ => None,
                };
                let value = tx.value.map(|v| format!("{} ETH", format_units(v, 18)));
                let message = format!(
                    "Estimated gas: {}.  Transaction value: {}",
                    estimated_gas.as_deref().unwrap_or(""),
                    value.as_deref().unwrap_or("")
                );
                Self {
                    title: Self::TITLE.to_string(),
                    to: tx.to.map(|to| shorten_address(&to.to_string())),
                    estimated_gas,
                    value,
                    message,
                }
            }
            TransactionPayload::Solana(bytes) => Self {
                title: Self::TITLE.to_string(),
                to: None,
                estimated_gas: None,
                value: None,
                message: format!("Solana transaction ({} bytes)", bytes.len()),
            },
        }
    }
}

/// Host-provided approval dialog
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Present the summary and resolve with the user's answer
    async fn confirm(&self, summary: &TransactionSummary) -> bool;
}

/// Presents a gas/value summary and blocks on explicit approval
#[derive(Debug, Clone)]
pub struct SummaryConsent<P> {
    prompt: P,
}

impl<P: ConsentPrompt> SummaryConsent<P> {
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl<P: ConsentPrompt> UserConsent for SummaryConsent<P> {
    async fn request_consent(&self, request: &TransactionRequest) -> ConsentStatus {
        let summary = TransactionSummary::from_request(request);
        tracing::debug!(message = %summary.message, "Requesting transaction consent");
        self.prompt.confirm(&summary).await.into()
    }
}
