//! Connection broker
//!
//! Owns the registered handlers and keeps exactly one of them active. Every
//! operation first resolves which handler serves the request; switching
//! handlers disconnects the previous one and moves status forwarding over
//! before the new handler sees the request.

use crate::provider::{select_provider, OnConnected, ProviderKind, Selection, WalletProvider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use wallet_broker_core::{
    AddChainRequest, AppState, ConfigError, ConnectionType, ErrorCode, Result, SkippedConsent,
    TransactionRequest, TypedDataProvider, UrlOpener, UserConsent, WalletError, WalletInfo,
    WalletRequest, WalletStatus, WalletStatusListener,
};

/// Relays the active handler's status to the application's listener
#[derive(Default)]
struct StatusForwarder {
    target: Mutex<Option<Arc<dyn WalletStatusListener>>>,
}

impl StatusForwarder {
    fn publish(&self, status: &WalletStatus) {
        let target = self.target.lock().clone();
        if let Some(target) = target {
            target.status_changed(status);
        }
    }
}

impl WalletStatusListener for StatusForwarder {
    fn status_changed(&self, status: &WalletStatus) {
        self.publish(status);
    }
}

#[derive(Clone)]
struct ActiveHandler {
    provider: Arc<dyn WalletProvider>,
    /// Consent latched when this handler became active
    consent: Arc<dyn UserConsent>,
}

/// Builder for [`WalletBroker`]
pub struct WalletBrokerBuilder {
    opener: Arc<dyn UrlOpener>,
    providers: Vec<Arc<dyn WalletProvider>>,
    consents: HashMap<ConnectionType, Arc<dyn UserConsent>>,
}

impl WalletBrokerBuilder {
    /// Register a handler; a later registration of the same kind replaces it
    pub fn with_provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.providers.retain(|p| p.kind() != provider.kind());
        self.providers.push(provider);
        self
    }

    /// Consent shown before sends to wallets declaring `connection_type`
    pub fn with_consent(
        mut self,
        connection_type: ConnectionType,
        consent: Arc<dyn UserConsent>,
    ) -> Self {
        self.consents.insert(connection_type, consent);
        self
    }

    /// The pairing handler is mandatory: it serves the modal and QR fallback
    pub fn build(self) -> std::result::Result<WalletBroker, ConfigError> {
        if !self
            .providers
            .iter()
            .any(|p| p.kind() == ProviderKind::PairingSession)
        {
            return Err(ConfigError::Missing("pairing"));
        }
        info!(
            handlers = ?self.providers.iter().map(|p| p.kind().name()).collect::<Vec<_>>(),
            "Wallet broker ready"
        );
        Ok(WalletBroker {
            opener: self.opener,
            providers: self.providers,
            consents: self.consents,
            active: tokio::sync::Mutex::new(None),
            forwarder: Arc::new(StatusForwarder::default()),
        })
    }
}

/// Routes wallet operations to the handler for each request
pub struct WalletBroker {
    opener: Arc<dyn UrlOpener>,
    providers: Vec<Arc<dyn WalletProvider>>,
    consents: HashMap<ConnectionType, Arc<dyn UserConsent>>,
    /// Held only while the active handler is being resolved or switched
    active: tokio::sync::Mutex<Option<ActiveHandler>>,
    forwarder: Arc<StatusForwarder>,
}

impl WalletBroker {
    pub fn builder(opener: Arc<dyn UrlOpener>) -> WalletBrokerBuilder {
        WalletBrokerBuilder {
            opener,
            providers: Vec::new(),
            consents: HashMap::new(),
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&Arc<dyn WalletProvider>> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    /// Kind of the handler currently holding the session, if any
    pub async fn active_kind(&self) -> Option<ProviderKind> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.provider.kind())
    }

    /// Registered handler for `selection`, falling back to pairing
    fn resolve(&self, selection: &Selection) -> Option<Arc<dyn WalletProvider>> {
        self.provider(selection.kind)
            .or_else(|| {
                warn!(kind = %selection.kind, "Handler not registered, using pairing");
                self.provider(ProviderKind::PairingSession)
            })
            .cloned()
    }

    fn consent_for(&self, connection_type: &ConnectionType) -> Arc<dyn UserConsent> {
        self.consents
            .get(connection_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(SkippedConsent))
    }

    /// Make the handler for `request` active, switching if needed
    async fn activate(&self, request: &WalletRequest) -> Result<Arc<dyn WalletProvider>> {
        let selection = select_provider(request, self.opener.as_ref());
        let consent = self.consent_for(&selection.connection_type);
        self.activate_with(&selection, request, consent).await
    }

    async fn activate_with(
        &self,
        selection: &Selection,
        request: &WalletRequest,
        consent: Arc<dyn UserConsent>,
    ) -> Result<Arc<dyn WalletProvider>> {
        let provider = self
            .resolve(selection)
            .ok_or_else(|| WalletError::new(ErrorCode::InvalidSession))?;
        let mut active = self.active.lock().await;

        let current = active
            .as_ref()
            .filter(|current| current.provider.kind() == provider.kind());
        if current.is_none() {
            if let Some(previous) = active.take() {
                info!(
                    from = %previous.provider.kind(),
                    to = %provider.kind(),
                    "Switching wallet handler"
                );
                previous.provider.disconnect().await;
                previous.provider.set_status_listener(None);
            }
            provider.set_status_listener(Some(self.forwarder.clone()));
            self.forwarder.publish(&provider.status());
            *active = Some(ActiveHandler {
                provider: provider.clone(),
                consent,
            });
        } else if let Some(info) = provider.status().connected_wallet {
            if info.wallet != request.wallet {
                info!(kind = %provider.kind(), "Requested wallet differs from connected wallet");
                provider.disconnect().await;
            }
        }
        Ok(provider)
    }

    pub async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo> {
        let provider = self.activate(request).await?;
        provider.connect(request).await
    }

    /// Disconnect the active handler only
    pub async fn disconnect(&self) {
        let active = self.active.lock().await.clone();
        if let Some(active) = active {
            active.provider.disconnect().await;
        }
    }

    pub async fn sign_message(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let provider = self.activate(request).await?;
        provider.sign_message(request, message, on_connected).await
    }

    pub async fn sign_typed_data(
        &self,
        request: &WalletRequest,
        typed_data: &dyn TypedDataProvider,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let provider = self.activate(request).await?;
        provider
            .sign_typed_data(request, typed_data, on_connected)
            .await
    }

    /// Ask for consent, then send. Consent runs before any handler action.
    pub async fn send(
        &self,
        request: &TransactionRequest,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let wallet_request = &request.wallet_request;
        let selection = select_provider(wallet_request, self.opener.as_ref());
        let latched = self
            .active
            .lock()
            .await
            .as_ref()
            .filter(|active| active.provider.kind() == selection.kind)
            .map(|active| active.consent.clone());
        let consent = latched.unwrap_or_else(|| self.consent_for(&selection.connection_type));

        if !consent.request_consent(request).await.is_consented() {
            info!("User declined transaction");
            return Err(WalletError::with_message(
                ErrorCode::UserCanceled,
                "User canceled",
            ));
        }

        let provider = self
            .activate_with(&selection, wallet_request, consent)
            .await?;
        provider.send(request, on_connected).await
    }

    pub async fn add_chain(
        &self,
        request: &WalletRequest,
        chain: &AddChainRequest,
        timeout: Option<Duration>,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let provider = self.activate(request).await?;
        provider
            .add_chain(request, chain, timeout, on_connected)
            .await
    }

    /// Connect the pairing handler to any wallet, exposing its URI for QR
    /// display. Sends after this are not gated by consent.
    pub async fn start_debug_link(&self, chain_id: u64) -> Result<WalletInfo> {
        let request = WalletRequest::new(None, chain_id);
        let selection = Selection {
            kind: ProviderKind::PairingSession,
            connection_type: ConnectionType::WalletConnectV2,
        };
        debug!(chain_id, "Starting debug link");
        let provider = self
            .activate_with(&selection, &request, Arc::new(SkippedConsent))
            .await?;
        provider.connect(&request).await
    }

    /// Status of the active handler; `Idle` when none is active
    pub async fn status(&self) -> WalletStatus {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.provider.status())
            .unwrap_or_default()
    }

    /// Attach the application's status listener; `None` detaches
    pub fn set_status_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>) {
        *self.forwarder.target.lock() = listener;
    }

    /// Offer an inbound URL to every handler until one consumes it
    pub fn handle_response(&self, url: &Url) -> bool {
        let handled = self
            .providers
            .iter()
            .find(|provider| provider.handle_response(url))
            .map(|provider| provider.kind());
        match handled {
            Some(kind) => {
                debug!(kind = %kind, "Inbound URL handled");
                true
            }
            None => {
                debug!(url = %url, "No handler recognized inbound URL");
                false
            }
        }
    }

    /// Feed a host lifecycle transition to every handler
    pub async fn app_state_changed(&self, state: AppState) {
        debug!(?state, "App state changed");
        for provider in &self.providers {
            provider.app_state_changed(state).await;
        }
    }
}

impl std::fmt::Debug for WalletBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletBroker")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
