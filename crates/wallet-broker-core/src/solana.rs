//! Solana broadcast collaborator
//!
//! Only used to submit transactions a wallet has already signed.

use crate::error::{ConfigError, ErrorCode, WalletError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Submits signed transactions, resolving with the transaction signature
#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn send_transaction(&self, signed_tx: &[u8]) -> Result<String, WalletError>;
}

/// Broadcasters per Solana cluster
#[derive(Clone)]
pub struct SolanaClusters {
    pub mainnet: Arc<dyn SolanaRpc>,
    pub devnet: Arc<dyn SolanaRpc>,
}

impl SolanaClusters {
    /// JSON-RPC clients over the given endpoint lists, one list per cluster
    pub fn from_urls(mainnet: &[String], devnet: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            mainnet: Arc::new(SolanaRpcClient::new(mainnet.to_vec())?),
            devnet: Arc::new(SolanaRpcClient::new(devnet.to_vec())?),
        })
    }

    /// Same broadcaster for every cluster
    pub fn single(rpc: Arc<dyn SolanaRpc>) -> Self {
        Self {
            mainnet: rpc.clone(),
            devnet: rpc,
        }
    }

    /// Mainnet for chain id 1, devnet otherwise
    pub fn for_chain(&self, chain_id: u64) -> &Arc<dyn SolanaRpc> {
        if chain_id == 1 {
            &self.mainnet
        } else {
            &self.devnet
        }
    }
}

/// Cluster name used in wallet deeplinks
pub fn cluster_name(chain_id: u64) -> &'static str {
    if chain_id == 1 {
        "mainnet-beta"
    } else {
        "devnet"
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    /// Node-side failures are final; only transport failures move on to the next endpoint
    fn into_result(self) -> Result<T, WalletError> {
        match (self.result, self.error) {
            (_, Some(failure)) => Err(WalletError::with_message(
                ErrorCode::SigningTransactionFailed,
                format!("RPC error {}: {}", failure.code, failure.message),
            )),
            (Some(result), None) => Ok(result),
            (None, None) => Err(WalletError::unexpected("Missing result in RPC response")),
        }
    }
}

/// JSON-RPC client with endpoint failover
pub struct SolanaRpcClient {
    urls: Vec<String>,
    client: reqwest::Client,
    current_index: AtomicUsize,
    next_id: AtomicU64,
}

impl SolanaRpcClient {
    pub fn new(urls: Vec<String>) -> Result<Self, ConfigError> {
        if urls.is_empty() {
            return Err(ConfigError::Missing("at least one Solana RPC URL"));
        }
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Malformed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            urls,
            client,
            current_index: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn current_url(&self) -> &str {
        let idx = self.current_index.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    fn rotate_url(&self) {
        self.current_index.fetch_add(1, Ordering::Relaxed);
    }

    /// Call `method`, trying each endpoint once until one answers
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, WalletError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: &params,
        };

        let mut last_error = None;
        for _ in 0..self.urls.len() {
            let url = self.current_url();
            match self.post::<T>(url, &request).await {
                Ok(response) => return response.into_result(),
                Err(e) => {
                    warn!(url, method, error = %e, "Solana RPC endpoint unreachable");
                    last_error = Some(e);
                    self.rotate_url();
                }
            }
        }
        Err(WalletError::with_message(
            ErrorCode::SigningTransactionFailed,
            match last_error {
                Some(e) => format!("RPC request failed: {e}"),
                None => "All RPC endpoints failed".to_string(),
            },
        ))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        request: &RpcRequest<'_>,
    ) -> reqwest::Result<RpcResponse<T>> {
        self.client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl SolanaRpc for SolanaRpcClient {
    async fn send_transaction(&self, signed_tx: &[u8]) -> Result<String, WalletError> {
        let encoded = bs58::encode(signed_tx).into_string();
        let signature: String = self
            .call(
                "sendTransaction",
                serde_json::json!([
                    encoded,
                    {
                        "encoding": "base58",
                        "skipPreflight": false,
                        "preflightCommitment": "confirmed"
                    }
                ]),
            )
            .await?;
        info!(signature = %signature, "Broadcast Solana transaction");
        Ok(signature)
    }
}

impl std::fmt::Debug for SolanaRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpcClient")
            .field("urls", &self.urls)
            .field("current_index", &self.current_index.load(Ordering::Relaxed))
            .finish()
    }
}
