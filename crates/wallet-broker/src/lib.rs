//! # Wallet Broker
//!
//! Lets an application connect, sign and send against an external wallet
//! without knowing which connection protocol the wallet speaks.
//!
//! ## Handlers
//!
//! - **Relay session** (WalletConnect v1): bridge-relayed sessions persisted across restarts
//! - **Pairing session** (WalletConnect v2): pairing URI, settled sessions and id-correlated requests
//! - **App handoff** (Coinbase Wallet): SDK-mediated app-to-app handshake
//! - **Encrypted deeplink** (Phantom): NaCl-box payloads carried over deeplink round trips
//!
//! ## Flow
//!
//! ```text
//! App ──► WalletBroker ──► select_provider ──► active handler ──► wallet app
//!  ▲                                                                  │
//!  └──────── status listener ◄── handler status ◄── callback URL ◄────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wallet_broker::{WalletBroker, PairingSessionProvider, PairingConfig};
//! use wallet_broker_core::{WalletCatalog, WalletRequest};
//!
//! let pairing = PairingSessionProvider::new(config, transport, opener.clone());
//! let broker = WalletBroker::builder(opener)
//!     .with_provider(pairing)
//!     .build()?;
//!
//! let catalog = WalletCatalog::from_path("wallets_config.json")?;
//! let request = WalletRequest::new(catalog.find("rainbow").cloned(), 1);
//! let signature = broker.sign_message(&request, "hello", None).await?;
//! ```

pub mod app_handoff;
pub mod broker;
pub mod config;
pub mod encrypted_deeplink;
pub mod pairing_session;
pub mod provider;
pub mod relay_session;

pub use app_handoff::{AppHandoffProvider, HandoffSdk};
pub use broker::{WalletBroker, WalletBrokerBuilder};
pub use config::{
    AppHandoffConfig, BrokerConfig, EncryptedDeeplinkConfig, PairingConfig, RelaySessionConfig,
};
pub use encrypted_deeplink::{CallbackAction, EncryptedDeeplinkProvider};
pub use pairing_session::{PairingSessionProvider, PairingTransport};
pub use provider::{select_provider, OnConnected, ProviderKind, Selection, WalletProvider};
pub use relay_session::{RelaySessionProvider, RelayTransport};

/// Re-export core types for convenience
pub use wallet_broker_core::{
    AppState, ConnectionState, ErrorCode, Result, TransactionRequest, WalletError, WalletInfo,
    WalletRequest, WalletStatus,
};
