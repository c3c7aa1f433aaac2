//! JSON-RPC plumbing for a NEAR node.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use etrap_evidence::anchor::AnchorError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct NearRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct NearRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    #[allow(dead_code)]
    #[serde(default)]
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<NearRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct NearRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub cause: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NearRpcClient {
    client: Client,
    endpoint: String,
}

impl NearRpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Well-known RPC endpoint for a network name.
    pub fn endpoint_for(network: &str) -> String {
        match network {
            "mainnet" => "https://rpc.mainnet.near.org".to_string(),
            "localnet" => "http://localhost:3030".to_string(),
            _ => "https://rpc.testnet.near.org".to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, AnchorError> {
        let request = NearRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| AnchorError::Network(format!("HTTP request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AnchorError::Network(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: NearRpcResponse = response
            .json()
            .await
            .map_err(|err| AnchorError::Network(format!("Failed to parse JSON: {err}")))?;

        if let Some(error) = rpc_response.error {
            let detail = error
                .cause
                .as_ref()
                .map(|cause| format!("{} ({cause})", error.message))
                .unwrap_or(error.message);
            return Err(AnchorError::Rpc {
                code: error.code,
                message: detail,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| AnchorError::Malformed("RPC response missing result field".to_string()))
    }

    /// View call on a contract method; args are JSON, base64-encoded on the
    /// wire, and the byte-array result is parsed back as JSON.
    pub async fn view_function(
        &self,
        contract_id: &str,
        method: &str,
        args: &Value,
    ) -> Result<Value, AnchorError> {
        let args_bytes = serde_json::to_vec(args)
            .map_err(|err| AnchorError::Malformed(format!("cannot encode args: {err}")))?;
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "call_function",
                    "finality": "final",
                    "account_id": contract_id,
                    "method_name": method,
                    "args_base64": BASE64.encode(args_bytes),
                }),
            )
            .await?;

        let bytes = result
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| AnchorError::Malformed("call_function result missing bytes".to_string()))?
            .iter()
            .map(|item| item.as_u64().map(|b| b as u8))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| AnchorError::Malformed("call_function bytes out of range".to_string()))?;

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| AnchorError::Malformed(format!("view result is not JSON: {err}")))
    }

    /// Current nonce of an access key.
    pub async fn access_key_nonce(
        &self,
        account_id: &str,
        public_key: &str,
    ) -> Result<u64, AnchorError> {
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "view_access_key",
                    "finality": "final",
                    "account_id": account_id,
                    "public_key": public_key,
                }),
            )
            .await?;
        result
            .get("nonce")
            .and_then(Value::as_u64)
            .ok_or_else(|| AnchorError::Malformed("access key response missing nonce".to_string()))
    }

    /// Hash of the latest final block, for transaction anchoring.
    pub async fn latest_block_hash(&self) -> Result<String, AnchorError> {
        let result = self.call("block", json!({"finality": "final"})).await?;
        result
            .pointer("/header/hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AnchorError::Malformed("block response missing header hash".to_string()))
    }

    /// Height of a block given its hash.
    pub async fn block_height(&self, block_hash: &str) -> Result<u64, AnchorError> {
        let result = self.call("block", json!({"block_id": block_hash})).await?;
        result
            .pointer("/header/height")
            .and_then(Value::as_u64)
            .ok_or_else(|| AnchorError::Malformed("block response missing height".to_string()))
    }

    /// Broadcast a signed transaction and wait for its outcome.
    pub async fn broadcast_tx_commit(&self, signed_tx_base64: &str) -> Result<Value, AnchorError> {
        self.call("broadcast_tx_commit", json!([signed_tx_base64])).await
    }
}
