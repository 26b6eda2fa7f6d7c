//! Wallet catalog
//!
//! The catalog is a JSON array of wallet descriptors loaded once at
//! configuration time. It is immutable after load and shared read-only.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wallet_broker_core::catalog::WalletCatalog;
//!
//! let catalog = WalletCatalog::from_path("wallets_config.json")?;
//! let rainbow = catalog.find("rainbow").expect("listed");
//! ```

use crate::deeplink::UrlOpener;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Connection protocol a wallet declares in its catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    WalletConnect,
    WalletConnectV2,
    WalletConnectModal,
    WalletSegue,
    Phantom,
    MagicLink,
    Custom(String),
    Unknown,
}

impl ConnectionType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "walletConnect" => ConnectionType::WalletConnect,
            "walletConnectV2" => ConnectionType::WalletConnectV2,
            "walletConnectModal" => ConnectionType::WalletConnectModal,
            "walletSegue" => ConnectionType::WalletSegue,
            "phantom" => ConnectionType::Phantom,
            "magicLink" => ConnectionType::MagicLink,
            other => ConnectionType::Custom(other.to_string()),
        }
    }

    /// Catalog spelling, `None` for [`ConnectionType::Unknown`]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConnectionType::WalletConnect => Some("walletConnect"),
            ConnectionType::WalletConnectV2 => Some("walletConnectV2"),
            ConnectionType::WalletConnectModal => Some("walletConnectModal"),
            ConnectionType::WalletSegue => Some("walletSegue"),
            ConnectionType::Phantom => Some("phantom"),
            ConnectionType::MagicLink => Some("magicLink"),
            ConnectionType::Custom(value) => Some(value),
            ConnectionType::Unknown => None,
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str().unwrap_or("unknown"))
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// A static catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Option<String>,
    pub name: Option<String>,
    pub homepage: Option<String>,
    pub chains: Option<Vec<String>>,
    pub app: Option<WalletApp>,
    pub mobile: Option<WalletEndpoints>,
    pub desktop: Option<WalletEndpoints>,
    pub metadata: Option<WalletMetadata>,
    pub config: Option<WalletConfig>,
    pub user_fields: Option<HashMap<String, String>>,
}

/// App store links per platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletApp {
    pub browser: Option<String>,
    pub ios: Option<String>,
    pub android: Option<String>,
    pub mac: Option<String>,
    pub windows: Option<String>,
    pub linux: Option<String>,
    pub native: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEndpoints {
    pub native: Option<String>,
    pub universal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMetadata {
    pub short_name: Option<String>,
    pub colors: Option<WalletColors>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletColors {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub displayable: Option<bool>,
    pub ios_min_version: Option<String>,
    /// Characters to percent-encode when embedding a URI in a wallet link
    pub encoding: Option<String>,
    pub backlinked: Option<bool>,
    pub image_url: Option<String>,
    pub connections: Option<Vec<WalletConnection>>,
    /// RPC methods the wallet declares support for
    pub methods: Option<Vec<String>>,
}

/// Per-protocol endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConnection {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub native: Option<String>,
    pub universal: Option<String>,
}

impl WalletConnection {
    /// The native scheme can be opened on this device
    pub fn installed(&self, opener: &dyn UrlOpener) -> bool {
        self.native
            .as_deref()
            .and_then(|native| Url::parse(native.trim()).ok())
            .is_some_and(|url| opener.can_open(&url))
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.kind
            .as_deref()
            .map(ConnectionType::parse)
            .unwrap_or(ConnectionType::Unknown)
    }
}

impl Wallet {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().or(self.id.as_deref()).unwrap_or("")
    }

    pub fn universal(&self) -> Option<&str> {
        self.mobile.as_ref()?.universal.as_deref()
    }

    pub fn native(&self) -> Option<&str> {
        self.mobile.as_ref()?.native.as_deref()
    }

    /// Store link used when the wallet is not installed
    pub fn app_link(&self) -> Option<&str> {
        self.app.as_ref()?.ios.as_deref()
    }

    fn connections(&self) -> &[WalletConnection] {
        self.config
            .as_ref()
            .and_then(|config| config.connections.as_deref())
            .unwrap_or(&[])
    }

    /// Endpoints declared for one protocol
    pub fn connection(&self, kind: &ConnectionType) -> Option<&WalletConnection> {
        let raw = kind.as_str()?;
        self.connections()
            .iter()
            .find(|connection| connection.kind.as_deref() == Some(raw))
    }

    pub fn installed(&self, opener: &dyn UrlOpener) -> bool {
        self.connections()
            .iter()
            .any(|connection| connection.installed(opener))
    }

    /// Protocol of the first installed connection (or a magic link entry)
    pub fn connection_type(&self, opener: &dyn UrlOpener) -> ConnectionType {
        self.connections()
            .iter()
            .find(|connection| {
                connection.installed(opener) || connection.kind.as_deref() == Some("magicLink")
            })
            .map(WalletConnection::connection_type)
            .unwrap_or(ConnectionType::Unknown)
    }

    pub fn methods(&self) -> Option<&[String]> {
        self.config.as_ref()?.methods.as_deref()
    }

    /// Declared RPC capability; wallets that declare nothing support nothing
    pub fn supports_method(&self, method: &str) -> bool {
        self.methods()
            .is_some_and(|methods| methods.iter().any(|m| m == method))
    }

    pub fn encoding(&self) -> Option<&str> {
        self.config.as_ref()?.encoding.as_deref()
    }

    /// Whether `app_version` meets the declared minimum.
    ///
    /// A wallet without a declared minimum is not enabled.
    pub fn min_version_satisfied(&self, app_version: &str) -> bool {
        match self
            .config
            .as_ref()
            .and_then(|config| config.ios_min_version.as_deref())
        {
            Some(min) => compare_versions(app_version, min) != std::cmp::Ordering::Less,
            None => false,
        }
    }
}

/// Dotted numeric version comparison, missing components count as zero
fn compare_versions(lhs: &str, rhs: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(lhs), parse(rhs));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

// ============================================================================
// Catalog
// ============================================================================

/// Read-only, ordered wallet catalog
#[derive(Debug, Clone, Default)]
pub struct WalletCatalog {
    wallets: Arc<Vec<Wallet>>,
}

impl WalletCatalog {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self {
            wallets: Arc::new(wallets),
        }
    }

    /// Parse a catalog document. Malformed input is a fatal error.
    pub fn from_slice(data: &[u8]) -> Result<Self, ConfigError> {
        let wallets: Vec<Wallet> =
            serde_json::from_slice(data).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        tracing::debug!(count = wallets.len(), "Loaded wallet catalog");
        Ok(Self::new(wallets))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_slice(&data)
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    pub fn find(&self, id: &str) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.id.as_deref() == Some(id))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
