use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::transport::{LedgerRequest, LedgerResponse, LedgerTransport, ResponseStatus};

/// JSON-RPC over HTTP to a rippled / clio node.
pub struct XrplRpc {
    api_url: String,
    client: reqwest::Client,
    retries: u32,
}

impl XrplRpc {
    pub fn new(api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self::with_client(api_url, client))
    }

    pub fn with_client(api_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_url: crate::utils::remove_trailing_slash(api_url),
            client,
            retries: 5,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<LedgerResponse> {
        let body = json!({ "method": method, "params": [params] });
        let response = self.client.post(&self.api_url).json(&body).send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("rate_limited"));
        }
        if !response.status().is_success() {
            return Err(anyhow!("{} returned HTTP {}", method, response.status()));
        }
        let parsed: Value = response.json().await?;
        parse_rpc_body(method, parsed)
    }
}

/// Split a JSON-RPC body into status and result.
fn parse_rpc_body(method: &str, body: Value) -> Result<LedgerResponse> {
    let result = body
        .get("result")
        .cloned()
        .ok_or_else(|| anyhow!("{} response has no result", method))?;
    let status = match result.get("status").and_then(Value::as_str) {
        Some("success") => ResponseStatus::Success,
        Some(_) => ResponseStatus::Error,
        None if result.get("error").is_some() => ResponseStatus::Error,
        None => ResponseStatus::Success,
    };
    Ok(LedgerResponse { status, result })
}

#[async_trait]
impl LedgerTransport for XrplRpc {
    async fn request(&self, request: &LedgerRequest) -> Result<LedgerResponse> {
        crate::utils::retry(self.retries, 500, || async {
            let response = self.call(request.method(), request.params()).await?;
            tracing::debug!(method = request.method(), status = ?response.status, "ledger request");
            Ok::<_, anyhow::Error>(response)
        })
        .await
    }

    async fn submit(&self, tx_blob: &str) -> Result<LedgerResponse> {
        let response = self.call("submit", json!({ "tx_blob": tx_blob })).await?;
        tracing::debug!(
            engine_result = response.engine_result().unwrap_or("none"),
            "submitted transaction"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_strips_trailing_slash() {
        let rpc = XrplRpc::new("https://s1.ripple.com:51234/").unwrap();
        assert_eq!(rpc.api_url(), "https://s1.ripple.com:51234");
    }

    #[test]
    fn test_parse_rpc_body_status() {
        let ok = parse_rpc_body(
            "account_info",
            json!({"result": {"status": "success", "account_data": {"Balance": "1"}}}),
        )
        .unwrap();
        assert!(ok.is_success());

        let err = parse_rpc_body("tx", json!({"result": {"status": "error", "error": "txnNotFound"}})).unwrap();
        assert_eq!(err.error_code(), Some("txnNotFound"));

        assert!(parse_rpc_body("fee", json!({"id": 1})).is_err());
    }
}
