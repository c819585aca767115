//! Bitcoin Core JSON-RPC client backed by `reqwest`.
//!
//! Features:
//! - HTTP basic auth (`rpcuser` / `rpcpassword`)
//! - Automatic retry with exponential backoff for transient errors
//! - Typed wrappers for the calls ChainPush needs, exposed through
//!   [`NodeRpc`]

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chainpush_core::error::PushError;
use chainpush_core::node::{ChainTip, NodeRpc};

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration for [`BitcoindClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: String::new(),
            password: String::new(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }
}

/// The subset of `getblockheader` (verbose) that ChainPush reads.
#[derive(Debug, Clone, Deserialize)]
struct HeaderInfo {
    height: u64,
}

/// JSON-RPC client for a Bitcoin Core node.
pub struct BitcoindClient {
    url: String,
    user: String,
    password: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl BitcoindClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: config.url,
            user: config.user,
            password: config.password,
            http,
            retry: RetryPolicy::new(config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<Value, TransportError> {
        let mut builder = self.http.post(&self.url).json(req);
        if !self.user.is_empty() {
            builder = builder.basic_auth(&self.user, Some(&self.password));
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        // bitcoind reports RPC errors with a 4xx/5xx status and a JSON body
        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(parsed) => parsed.into_result().map_err(TransportError::Rpc),
            Err(_) if !status.is_success() => Err(TransportError::Http(format!(
                "HTTP {}: {body}",
                status.as_u16()
            ))),
            Err(e) => Err(TransportError::Deserialization(e)),
        }
    }

    /// Call `method` and return the raw `result` value, retrying transient failures.
    pub async fn call_raw(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, method, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Call `method` and deserialize its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let value = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ─── Typed calls ────────────────────────────────────────────────────────────

    pub async fn get_block_count(&self) -> Result<u64, TransportError> {
        self.call("getblockcount", vec![]).await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<String, TransportError> {
        self.call("getblockhash", vec![Value::from(height)]).await
    }

    /// Serialized block, hex-decoded (`getblock <hash> 0`).
    pub async fn get_raw_block(&self, hash: &str) -> Result<Vec<u8>, TransportError> {
        let hex: String = self
            .call("getblock", vec![Value::from(hash), Value::from(0)])
            .await?;
        decode_hex(&hex)
    }

    pub async fn get_block_height(&self, hash: &str) -> Result<u64, TransportError> {
        let info: HeaderInfo = self
            .call("getblockheader", vec![Value::from(hash), Value::from(true)])
            .await?;
        Ok(info.height)
    }

    /// Serialized transaction, hex-decoded (`getrawtransaction <txid> false`).
    pub async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, TransportError> {
        let hex: String = self
            .call(
                "getrawtransaction",
                vec![Value::from(txid), Value::from(false)],
            )
            .await?;
        decode_hex(&hex)
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<String>, TransportError> {
        self.call("getrawmempool", vec![]).await
    }

    pub async fn get_chain_tips(&self) -> Result<Vec<ChainTip>, TransportError> {
        self.call("getchaintips", vec![]).await
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, TransportError> {
    hex::decode(s).map_err(|e| TransportError::Other(format!("invalid hex from node: {e}")))
}

#[async_trait]
impl NodeRpc for BitcoindClient {
    async fn block_count(&self) -> Result<u64, PushError> {
        Ok(self.get_block_count().await?)
    }

    async fn block_hash(&self, height: u64) -> Result<String, PushError> {
        Ok(self.get_block_hash(height).await?)
    }

    async fn raw_block(&self, hash: &str) -> Result<Vec<u8>, PushError> {
        Ok(self.get_raw_block(hash).await?)
    }

    async fn block_height(&self, hash: &str) -> Result<u64, PushError> {
        Ok(self.get_block_height(hash).await?)
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Vec<u8>, PushError> {
        Ok(self.get_raw_transaction(txid).await?)
    }

    async fn mempool(&self) -> Result<Vec<String>, PushError> {
        Ok(self.get_raw_mempool().await?)
    }

    async fn chain_tips(&self) -> Result<Vec<ChainTip>, PushError> {
        Ok(self.get_chain_tips().await?)
    }
}
