//! Handler configuration
//!
//! Each handler reads its own section. The whole document can be loaded
//! from JSON with [`BrokerConfig::from_path`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;
use wallet_broker_core::solana::{DEVNET_RPC_URL, MAINNET_RPC_URL};
use wallet_broker_core::{ConfigError, SolanaClusters};

/// Phantom universal-link base
pub const PHANTOM_BASE_URL: &str = "https://phantom.app/ul/v1";

/// Relay-session (WalletConnect v1) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySessionConfig {
    pub client_name: String,
    pub client_description: Option<String>,
    pub icon_url: Option<String>,
    /// Host app scheme wallets return to
    pub scheme: String,
    pub client_url: String,
    pub bridge_url: String,
    /// Delay before surfacing a wallet response, doubled while backgrounded
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
}

fn default_response_delay_ms() -> u64 {
    500
}

impl RelaySessionConfig {
    pub fn new(
        client_name: impl Into<String>,
        scheme: impl Into<String>,
        client_url: impl Into<String>,
        bridge_url: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            client_description: None,
            icon_url: None,
            scheme: scheme.into(),
            client_url: client_url.into(),
            bridge_url: bridge_url.into(),
            response_delay_ms: default_response_delay_ms(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.client_description = Some(description.into());
        self
    }

    pub fn with_icon_url(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("relay.bridgeUrl", &self.bridge_url)?;
        require_url("relay.clientUrl", &self.client_url)
    }
}

/// Pairing-session (WalletConnect v2) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingConfig {
    pub project_id: String,
    pub client_name: String,
    pub client_description: String,
    pub client_url: String,
    #[serde(default)]
    pub icon_urls: Vec<String>,
    pub redirect_native: String,
    pub redirect_universal: Option<String>,
}

impl PairingConfig {
    pub fn new(
        project_id: impl Into<String>,
        client_name: impl Into<String>,
        client_url: impl Into<String>,
        redirect_native: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            client_name: client_name.into(),
            client_description: String::new(),
            client_url: client_url.into(),
            icon_urls: Vec::new(),
            redirect_native: redirect_native.into(),
            redirect_universal: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.client_description = description.into();
        self
    }

    pub fn with_icon_urls(mut self, icon_urls: Vec<String>) -> Self {
        self.icon_urls = icon_urls;
        self
    }

    pub fn with_redirect_universal(mut self, url: impl Into<String>) -> Self {
        self.redirect_universal = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::Missing("pairing.projectId"));
        }
        require_url("pairing.clientUrl", &self.client_url)?;
        if let Some(universal) = &self.redirect_universal {
            require_url("pairing.redirectUniversal", universal)?;
        }
        Ok(())
    }
}

/// App-handoff (Coinbase Wallet) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppHandoffConfig {
    /// URL the wallet app calls back into
    pub callback_url: String,
}

impl AppHandoffConfig {
    pub fn new(callback_url: impl Into<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("appHandoff.callbackUrl", &self.callback_url)
    }
}

/// Encrypted-deeplink (Phantom) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDeeplinkConfig {
    /// Shown by the wallet when asking for approval
    pub app_url: String,
    /// Prefix of every callback URL; the action is appended as a path segment
    pub redirect_base_url: String,
    #[serde(default = "default_phantom_base_url")]
    pub base_url: String,
    /// Endpoints used to broadcast signed transactions, tried in order
    #[serde(default = "default_mainnet_rpc_urls")]
    pub mainnet_rpc_urls: Vec<String>,
    #[serde(default = "default_devnet_rpc_urls")]
    pub devnet_rpc_urls: Vec<String>,
}

fn default_mainnet_rpc_urls() -> Vec<String> {
    vec![MAINNET_RPC_URL.to_string()]
}

fn default_devnet_rpc_urls() -> Vec<String> {
    vec![DEVNET_RPC_URL.to_string()]
}

fn default_phantom_base_url() -> String {
    PHANTOM_BASE_URL.to_string()
}

impl EncryptedDeeplinkConfig {
    pub fn new(app_url: impl Into<String>, redirect_base_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            redirect_base_url: redirect_base_url.into(),
            base_url: default_phantom_base_url(),
            mainnet_rpc_urls: default_mainnet_rpc_urls(),
            devnet_rpc_urls: default_devnet_rpc_urls(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_rpc_urls(mut self, mainnet: Vec<String>, devnet: Vec<String>) -> Self {
        self.mainnet_rpc_urls = mainnet;
        self.devnet_rpc_urls = devnet;
        self
    }

    /// Broadcasters for the configured endpoints
    pub fn clusters(&self) -> Result<SolanaClusters, ConfigError> {
        SolanaClusters::from_urls(&self.mainnet_rpc_urls, &self.devnet_rpc_urls)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("encryptedDeeplink.appUrl", &self.app_url)?;
        require_url("encryptedDeeplink.redirectBaseUrl", &self.redirect_base_url)?;
        require_url("encryptedDeeplink.baseUrl", &self.base_url)?;
        for (field, urls) in [
            ("encryptedDeeplink.mainnetRpcUrls", &self.mainnet_rpc_urls),
            ("encryptedDeeplink.devnetRpcUrls", &self.devnet_rpc_urls),
        ] {
            if urls.is_empty() {
                return Err(ConfigError::Missing(field));
            }
            for url in urls {
                require_url(field, url)?;
            }
        }
        Ok(())
    }
}

/// All handler sections; absent sections leave that handler unregistered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub relay: Option<RelaySessionConfig>,
    pub pairing: Option<PairingConfig>,
    pub app_handoff: Option<AppHandoffConfig>,
    pub encrypted_deeplink: Option<EncryptedDeeplinkConfig>,
}

impl BrokerConfig {
    pub fn from_slice(data: &[u8]) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_slice(data).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_slice(&data)
    }

    pub fn with_relay(mut self, config: RelaySessionConfig) -> Self {
        self.relay = Some(config);
        self
    }

    pub fn with_pairing(mut self, config: PairingConfig) -> Self {
        self.pairing = Some(config);
        self
    }

    pub fn with_app_handoff(mut self, config: AppHandoffConfig) -> Self {
        self.app_handoff = Some(config);
        self
    }

    pub fn with_encrypted_deeplink(mut self, config: EncryptedDeeplinkConfig) -> Self {
        self.encrypted_deeplink = Some(config);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(relay) = &self.relay {
            relay.validate()?;
        }
        if let Some(pairing) = &self.pairing {
            pairing.validate()?;
        }
        if let Some(handoff) = &self.app_handoff {
            handoff.validate()?;
        }
        if let Some(deeplink) = &self.encrypted_deeplink {
            deeplink.validate()?;
        }
        Ok(())
    }
}

fn require_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
}
