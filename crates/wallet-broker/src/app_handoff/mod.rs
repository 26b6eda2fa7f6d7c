//! App-handoff handler (Coinbase Wallet)
//!
//! A platform SDK performs the handshake and carries each request to the
//! wallet app and back. Nothing is persisted: a restarted process always
//! starts from a fresh handshake. One operation runs at a time.

mod sdk;

pub use sdk::{ActionResult, HandoffAccount, HandoffAction, HandoffSdk, HandshakeResponse};

use crate::config::AppHandoffConfig;
use crate::provider::{
    check_add_chain_capability, notify_connected, OnConnected, ProviderKind, WalletProvider,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use wallet_broker_core::identity::network_name;
use wallet_broker_core::{
    AddChainRequest, AppState, ConnectionState, ErrorCode, ExpectedIdentity, Result, StatusCell,
    TransactionRequest, TypedDataProvider, WalletError, WalletInfo, WalletRequest, WalletStatus,
    WalletStatusListener,
};

/// Handler for SDK-mediated wallet app handoff
pub struct AppHandoffProvider {
    config: AppHandoffConfig,
    sdk: Arc<dyn HandoffSdk>,
    status: StatusCell,
    account: Mutex<Option<HandoffAccount>>,
    /// Held for the whole of each connect or operation
    in_flight: tokio::sync::Mutex<()>,
}

impl AppHandoffProvider {
    pub fn new(config: AppHandoffConfig, sdk: Arc<dyn HandoffSdk>) -> Self {
        Self {
            config,
            sdk,
            status: StatusCell::new(),
            account: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.config.callback_url
    }

    async fn connect_locked(&self, request: &WalletRequest) -> Result<WalletInfo> {
        if self.status.connected_wallet().is_none() || !self.sdk.is_connected() {
            if self.status.state() != ConnectionState::Idle {
                debug!("Handoff session lost, starting over");
            }
            self.reset();
        }
        if let Some(info) = self.status.connected_wallet() {
            return Ok(info);
        }

        self.status.set_state(ConnectionState::Listening);
        info!("Starting wallet handshake");
        let response = match self
            .sdk
            .initiate_handshake(vec![HandoffAction::RequestAccounts])
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "Wallet handshake failed");
                self.reset();
                return Err(error);
            }
        };

        let Some(account) = response.account else {
            self.reset();
            return Err(WalletError::new(ErrorCode::WalletContainsNoAccount));
        };

        let info = WalletInfo::new(
            account.address.clone(),
            Some(account.network_id),
            request.wallet.clone(),
        );
        if let Err(error) = verify_handoff_identity(request, &info) {
            warn!(code = %error.code, "Handoff wallet identity rejected");
            self.reset();
            return Err(error);
        }

        info!(
            address = %account.address,
            network_id = account.network_id,
            "Handoff wallet connected"
        );
        *self.account.lock() = Some(account);
        self.status.update(|status| {
            status.state = ConnectionState::ConnectedToWallet;
            status.connected_wallet = Some(info.clone());
        });
        Ok(info)
    }

    fn reset(&self) {
        *self.account.lock() = None;
        self.status.reset();
    }

    async fn run_action(
        &self,
        request: &WalletRequest,
        on_connected: Option<OnConnected>,
        action: impl FnOnce(&WalletInfo) -> Result<HandoffAction>,
    ) -> Result<String> {
        let _guard = self.in_flight.lock().await;
        let info = self.connect_locked(request).await?;
        notify_connected(on_connected, &info);

        let action = action(&info)?;
        let method = action.method();
        debug!(method, "Sending handoff request");
        let outcome = match self.sdk.make_request(vec![action], None).await {
            Ok(results) => first_result(results),
            Err(error) => Err(error),
        };
        match &outcome {
            Ok(_) => info!(method, "Handoff request completed"),
            Err(error) => {
                warn!(method, error = %error, "Handoff request failed");
                self.reset();
            }
        }
        outcome
    }
}

/// Network mismatches name the network the wallet should switch to
fn verify_handoff_identity(request: &WalletRequest, info: &WalletInfo) -> Result<()> {
    if let Some(reported) = info.chain_id {
        if request.chain_id != 0 && reported != 0 && reported != request.chain_id {
            return Err(WalletError::with_message(
                ErrorCode::NetworkMismatch,
                format!(
                    "Set your wallet network to '{}'.",
                    network_name(request.chain_id)
                ),
            )
            .with_title("Network Mismatch"));
        }
    }
    ExpectedIdentity {
        chain_id: None,
        address: request.address.clone(),
    }
    .verify(info)
}

fn first_result(results: Vec<ActionResult>) -> Result<String> {
    match results.into_iter().next() {
        Some(ActionResult::Success(Value::String(signed))) => Ok(signed),
        Some(ActionResult::Success(other)) => Err(WalletError::unexpected(format!(
            "Unexpected response payload: {other}"
        ))),
        Some(ActionResult::Failure { code, message }) => Err(WalletError::unexpected(format!(
            "Unexpected response payload: {code}, {message}"
        ))),
        None => Err(WalletError::unexpected("Empty response from wallet")),
    }
}

fn account_address(info: &WalletInfo) -> String {
    info.address.clone().unwrap_or_default()
}

#[async_trait]
impl WalletProvider for AppHandoffProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AppHandoff
    }

    async fn connect(&self, request: &WalletRequest) -> Result<WalletInfo> {
        let _guard = self.in_flight.lock().await;
        self.connect_locked(request).await
    }

    async fn disconnect(&self) {
        info!("Disconnecting handoff session");
        self.sdk.reset_session();
        self.reset();
    }

    async fn sign_message(
        &self,
        request: &WalletRequest,
        message: &str,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        self.run_action(request, on_connected, |info| {
            Ok(HandoffAction::PersonalSign {
                address: account_address(info),
                message: message.to_string(),
            })
        })
        .await
    }

    async fn sign_typed_data(
        &self,
        request: &WalletRequest,
        typed_data: &dyn TypedDataProvider,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let typed_data_json = typed_data.typed_data_string().ok_or_else(|| {
            WalletError::with_message(ErrorCode::SigningMessageFailed, "Typed data is incomplete")
        })?;
        self.run_action(request, on_connected, |info| {
            Ok(HandoffAction::SignTypedDataV3 {
                address: account_address(info),
                typed_data_json,
            })
        })
        .await
    }

    async fn send(
        &self,
        request: &TransactionRequest,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        let transaction = request
            .as_ethereum()
            .filter(|tx| tx.from.is_some())
            .ok_or_else(|| {
                WalletError::with_message(
                    ErrorCode::SigningTransactionFailed,
                    "Unable to translate request to an Ethereum transaction",
                )
            })?;
        let chain_id = request.wallet_request.negotiated_chain_id().to_string();
        let action = HandoffAction::SendTransaction {
            from_address: transaction
                .from
                .map(|from| from.to_checksum(None))
                .unwrap_or_default(),
            to_address: transaction.to.map(|to| to.to_checksum(None)),
            wei_value: transaction.value.unwrap_or_default().to_string(),
            data: transaction.data.to_string(),
            gas_price_in_wei: transaction.gas_price.map(|price| price.to_string()),
            gas_limit: transaction.gas.map(|gas| gas.to_string()),
            chain_id,
        };
        self.run_action(&request.wallet_request, on_connected, |_| Ok(action))
            .await
    }

    async fn add_chain(
        &self,
        request: &WalletRequest,
        chain: &AddChainRequest,
        _timeout: Option<Duration>,
        on_connected: Option<OnConnected>,
    ) -> Result<String> {
        check_add_chain_capability(request, self.status.connected_wallet().as_ref())?;
        let action = HandoffAction::AddEthereumChain(chain.clone());
        self.run_action(request, on_connected, |_| Ok(action)).await
    }

    fn status(&self) -> WalletStatus {
        self.status.get()
    }

    fn set_status_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>) {
        self.status.set_listener(listener);
    }

    fn handle_response(&self, url: &Url) -> bool {
        self.sdk.handle_response(url)
    }

    async fn app_state_changed(&self, state: AppState) {
        debug!(?state, "Handoff app state changed");
    }
}

impl std::fmt::Debug for AppHandoffProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandoffProvider")
            .field("status", &self.status)
            .field("callback_url", &self.config.callback_url)
            .finish()
    }
}
