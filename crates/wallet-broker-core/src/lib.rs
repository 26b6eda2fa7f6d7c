//! # Wallet Broker Core
//!
//! Shared vocabulary for brokering wallet operations across connection
//! protocols.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Error/Status Model**: one tagged [`WalletError`] and the per-handler [`WalletStatus`]
//! - **Wallet Catalog**: read-only descriptors with per-protocol endpoints and capabilities
//! - **Typed Data**: deterministic EIP-712 payload canonicalization
//! - **Consent**: the collaborator consulted before every transaction send
//! - **Deeplinks**: wallet link construction and a launcher that defers launches while backgrounded
//! - **Session Storage**: keyed persistence for resumable sessions
//! - **Solana RPC**: broadcast of wallet-signed transactions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wallet_broker_core::{WalletCatalog, WalletRequest};
//! use wallet_broker_core::typed_data::{DomainTypedData, TypedDataProvider, TypedStruct};
//!
//! let catalog = WalletCatalog::from_path("wallets_config.json")?;
//! let request = WalletRequest::new(catalog.find("metamask").cloned(), 1);
//!
//! let typed = DomainTypedData::new("dYdX", 1, None)
//!     .with_message(TypedStruct::new("dYdX").field("action", "string", "dYdX Chain Onboarding"));
//! let payload = typed.typed_data_string();
//! ```

pub mod catalog;
pub mod consent;
pub mod deeplink;
pub mod error;
pub mod identity;
pub mod links;
pub mod solana;
pub mod status;
pub mod storage;
pub mod typed_data;
pub mod types;

pub use catalog::{ConnectionType, Wallet, WalletCatalog};
pub use consent::{ConsentStatus, SkippedConsent, SummaryConsent, UserConsent};
pub use deeplink::{AppState, DeeplinkLauncher, UrlOpener};
pub use error::{ConfigError, ErrorCode, Result, StoreError, WalletError};
pub use identity::ExpectedIdentity;
pub use solana::{SolanaClusters, SolanaRpc, SolanaRpcClient};
pub use status::{ConnectionState, StatusCell, WalletStatus, WalletStatusListener};
pub use storage::{FileSessionStore, MemorySessionStore, SessionStore};
pub use typed_data::{DomainTypedData, TypedDataProvider, TypedStruct};
pub use types::{
    AddChainRequest, EthereumTransactionRequest, TransactionPayload, TransactionRequest,
    WalletInfo, WalletRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
