//! JsonRpcLogSource - Ethereum JSON-RPC over HTTP
//!
//! `eth_blockNumber` と `eth_getLogs` だけを使う。接続の張り直しは
//! reqwest のコネクションプールに任せ、失敗は SourceError として呼び出し側
//! （EventSource のポーリングループ）に返す。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::Address;
use crate::ports::{LogFilter, LogSource, RawLog, SourceError};

pub struct JsonRpcLogSource {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLogSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Transport(format!(
                "{method}: http status {}",
                response.status()
            )));
        }
        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("{method}: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(SourceError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| SourceError::InvalidResponse(format!("{method}: missing result")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    log_index: Option<String>,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

fn quantity(raw: &str) -> Result<u64, SourceError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| SourceError::InvalidResponse(format!("quantity without 0x: {raw}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|_| SourceError::InvalidResponse(format!("bad quantity: {raw}")))
}

fn hex_bytes(raw: &str) -> Result<Vec<u8>, SourceError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|_| SourceError::InvalidResponse(format!("bad hex data: {raw}")))
}

fn topic(raw: &str) -> Result<[u8; 32], SourceError> {
    let bytes = hex_bytes(raw)?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| SourceError::InvalidResponse(format!("topic is not 32 bytes: {raw}")))
}

impl RpcLog {
    /// `None` for logs the node flagged as removed by a reorg.
    fn into_raw(self) -> Result<Option<RawLog>, SourceError> {
        if self.removed {
            return Ok(None);
        }
        let address = Address::parse(&self.address)
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        let topics = self
            .topics
            .iter()
            .map(|t| topic(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(RawLog {
            address,
            topics,
            data: hex_bytes(&self.data)?,
            block_number: self.block_number.as_deref().map(quantity).transpose()?.unwrap_or(0),
            log_index: self.log_index.as_deref().map(quantity).transpose()?.unwrap_or(0),
            tx_hash: self.transaction_hash.unwrap_or_default(),
        }))
    }
}

fn hex_topic(topic: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(topic))
}

#[async_trait]
impl LogSource for JsonRpcLogSource {
    async fn block_number(&self) -> Result<u64, SourceError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| SourceError::InvalidResponse("eth_blockNumber: not a string".into()))?;
        quantity(raw)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SourceError> {
        let topics: Vec<String> = filter.topics.iter().map(hex_topic).collect();
        let params = json!([{
            "address": filter.address.as_str(),
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "topics": [topics],
        }]);
        let result = self.call("eth_getLogs", params).await?;
        let logs: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| SourceError::InvalidResponse(format!("eth_getLogs: {e}")))?;
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(raw) = log.into_raw()? {
                out.push(raw);
            }
        }
        Ok(out)
    }
}
