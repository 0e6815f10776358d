//! Bitcoin Core JSON-RPC client used by the node-backed collaborators.
//!
//! Every call runs under a per-call timeout. Transport failures and timeouts
//! are retried a bounded number of times with a doubling backoff; JSON-RPC error
//! objects returned by the node are surfaced immediately as [`RpcError`].

use crate::rpc::helpers::{build_auth_headers, hex_to_block};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::runtime::config::SyncConfig;
use anyhow::{anyhow, Result};
use bitcoin::{Block, BlockHash, Txid};
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};

/// Bitcoin Core error code for an out-of-range height parameter.
const RPC_INVALID_PARAMETER: i32 = -8;

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    Rejected {
        method: &'static str,
        code: i32,
        message: String,
    },
    HeightOutOfRange {
        height: u64,
    },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Rejected {
                method,
                code,
                message,
            } => write!(f, "rpc {method} rejected (code={code}): {message}"),
            RpcError::HeightOutOfRange { height } => {
                write!(f, "requested height {height} is above the current tip")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Subset of `getblockchaininfo` the live sync relies on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    #[serde(rename = "verificationprogress", default)]
    pub verification_progress: f64,
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

#[derive(Debug, Clone)]
pub struct NodeRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl NodeRpcClient {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::with_options(url, user, password, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_auth_headers(&user.into(), &password.into())?;
        let max_response_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        Self::with_options(
            config.rpc_url(),
            config.rpc_user(),
            config.rpc_password(),
            RpcClientOptions::from_config(config),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo> {
        self.call("getblockchaininfo", || rpc_params![]).await
    }

    pub async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", || rpc_params![]).await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<BlockHash> {
        self.call("getblockhash", || rpc_params![height])
            .await
            .map_err(|err| match err.downcast_ref::<RpcError>() {
                Some(RpcError::Rejected { code, .. }) if *code == RPC_INVALID_PARAMETER => {
                    RpcError::HeightOutOfRange { height }.into()
                }
                _ => err,
            })
    }

    pub async fn get_raw_block(&self, hash: &BlockHash) -> Result<Block> {
        let hex: String = self.call("getblock", || rpc_params![hash, 0u8]).await?;
        hex_to_block(&hex)
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<Txid>> {
        self.call("getrawmempool", || rpc_params![]).await
    }

    /// Estimated network hashes per second over `blocks` blocks ending at
    /// `height` (`-1` for the tip).
    pub async fn get_network_hashps(&self, blocks: u64, height: i64) -> Result<f64> {
        self.call("getnetworkhashps", || rpc_params![blocks, height])
            .await
    }

    async fn call<R, P>(&self, method: &'static str, params: P) -> Result<R>
    where
        R: DeserializeOwned,
        P: Fn() -> ArrayParams,
    {
        let mut backoff = self.options.retry_timer();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();
            let outcome = timeout(
                self.options.request_timeout,
                self.client.request::<R, _>(method, params()),
            )
            .await;

            let err: anyhow::Error = match outcome {
                Ok(Ok(value)) => {
                    self.metrics.record_success(start.elapsed());
                    tracing::trace!(method, attempt, "rpc call completed");
                    return Ok(value);
                }
                Ok(Err(JsonRpcError::Call(object))) => {
                    self.metrics.record_rejection(start.elapsed());
                    return Err(RpcError::Rejected {
                        method,
                        code: object.code(),
                        message: object.message().to_string(),
                    }
                    .into());
                }
                Ok(Err(JsonRpcError::RequestTimeout)) | Err(_) => {
                    self.metrics.record_timeout(start.elapsed());
                    RpcError::Timeout { method }.into()
                }
                Ok(Err(other)) => {
                    self.metrics.record_failure(start.elapsed());
                    anyhow!("rpc {method} call failed: {other}")
                }
            };

            if attempt >= self.options.max_attempts {
                tracing::debug!(method, attempt, error = %err, "rpc call exhausted retries");
                return Err(err);
            }

            let delay = backoff.on_failure();
            self.metrics.record_retry();
            tracing::debug!(
                method,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "rpc call failed; retrying"
            );
            sleep(delay).await;
        }
    }
}
