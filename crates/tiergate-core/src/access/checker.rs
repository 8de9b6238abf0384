//! ============================================================================
//! Chain Reader - ERC-20 balance lookups over JSON-RPC
//! ============================================================================
//! Calls `balanceOf` and `decimals` on the gating token through an alloy
//! provider and scales the raw uint256 into a human-scale amount. No caching
//! happens here; that is the tier cache's job.
//! ============================================================================

use alloy::contract::Error as CallError;
use alloy::primitives::utils::format_units;
use alloy::primitives::U256;
use alloy::providers::RootProvider;
use alloy::rpc::client::RpcClient;
use alloy::sol;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::address::WalletAddress;
use crate::rpc_retry::{with_retry, RetryConfig};
use crate::types::GateError;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Token balance as read from the chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Human-scale amount (raw / 10^decimals)
    pub amount: f64,
    pub decimals: u8,
}

/// Source of token balances. Addresses are validated before they get here.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn token_balance(&self, wallet: &WalletAddress) -> Result<TokenBalance, GateError>;
}

/// Reads the gating token through an EVM JSON-RPC endpoint
pub struct EvmChainReader {
    token: IERC20::IERC20Instance<RootProvider>,
    /// Known decimals skip the `decimals()` call
    decimals: Option<u8>,
    retry: RetryConfig,
}

impl EvmChainReader {
    /// Create a reader for `token` at `rpc_url`, bounding each HTTP call by `timeout`
    pub fn new(
        rpc_url: &str,
        token: WalletAddress,
        timeout: Duration,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid RPC_URL '{}': {}", rpc_url, e))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build RPC client: {}", e))?;

        let transport = Http::with_client(client, url);
        let is_local = transport.guess_local();
        let provider: RootProvider = RootProvider::new(RpcClient::new(transport, is_local));

        Ok(Self {
            token: IERC20::new(token.address(), provider),
            decimals: None,
            retry,
        })
    }

    /// Use fixed decimals instead of asking the contract
    pub fn with_decimals(mut self, decimals: Option<u8>) -> Self {
        self.decimals = decimals;
        self
    }

    async fn fetch_decimals(&self) -> Result<u8, GateError> {
        if let Some(decimals) = self.decimals {
            return Ok(decimals);
        }

        with_retry(&self.retry, "decimals", move || async move {
            self.token.decimals().call().await.map_err(classify_call_error)
        })
        .await
    }
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn token_balance(&self, wallet: &WalletAddress) -> Result<TokenBalance, GateError> {
        debug!(
            "Checking token balance for wallet {} on {}",
            wallet,
            self.token.address()
        );

        let decimals = self.fetch_decimals().await?;
        let owner = wallet.address();
        let raw = with_retry(&self.retry, "balanceOf", move || async move {
            self.token.balanceOf(owner).call().await.map_err(classify_call_error)
        })
        .await?;
        let amount = normalize_amount(raw, decimals)?;

        debug!("Token balance for {}: {} ({} decimals)", wallet, amount, decimals);
        Ok(TokenBalance { amount, decimals })
    }
}

/// Sort a failed contract call into retryable and permanent error kinds
fn classify_call_error(err: CallError) -> GateError {
    match err {
        CallError::TransportError(err) => classify_transport_error(err),
        // Undecodable or empty return data: not an ERC-20, or a missing method
        other => GateError::Contract(other.to_string()),
    }
}

fn classify_transport_error(err: RpcError<TransportErrorKind>) -> GateError {
    match err {
        // -32005 and -32029 are provider rate limits; everything else is the call itself
        RpcError::ErrorResp(payload) => match payload.code {
            -32005 | -32029 => GateError::Network(format!("rate limit: {}", payload.message)),
            code => GateError::Contract(format!("eth_call error {}: {}", code, payload.message)),
        },
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            classify_http_status(http.status, &http.body)
        }
        RpcError::Transport(kind) => GateError::Network(format!("RPC request failed: {}", kind)),
        other => GateError::Contract(format!("Undecodable RPC response: {}", other)),
    }
}

/// 429 and 5xx are transient; any other status is a misconfigured endpoint
fn classify_http_status(status: u16, body: &str) -> GateError {
    match status {
        429 => GateError::Network(format!("RPC HTTP 429 rate limit: {}", body)),
        500..=599 => GateError::Network(format!("RPC HTTP {}: {}", status, body)),
        _ => GateError::Endpoint(format!("RPC HTTP {}: {}", status, body)),
    }
}

/// Convert a raw uint256 to raw / 10^decimals
fn normalize_amount(raw: U256, decimals: u8) -> Result<f64, GateError> {
    let scaled = format_units(raw, decimals).map_err(|e| {
        GateError::Contract(format!("Cannot scale balance by {} decimals: {}", decimals, e))
    })?;
    scaled
        .parse::<f64>()
        .map_err(|e| GateError::Contract(format!("Unreadable balance '{}': {}", scaled, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::hex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const TOKEN: &str = "0x0000000000000000000000000000000000000001";

    /// Serve every request with `reply(body)` and count the hits
    async fn serve<F>(reply: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let reply = Arc::new(reply);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = Arc::clone(&reply);
                tokio::spawn(async move {
                    let body = read_body(&mut stream).await;
                    let (status, payload) = reply(&body);
                    let response = format!(
                        "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        payload.len(),
                        payload
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (url, hits)
    }

    async fn read_body(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    return text[split + 4..].to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn request_id(request: &str) -> serde_json::Value {
        serde_json::from_str::<serde_json::Value>(request)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(serde_json::Value::from(0))
    }

    /// JSON-RPC success reply carrying one ABI word
    fn rpc_result(request: &str, word: U256) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": request_id(request),
            "result": format!("0x{}", hex::encode(word.to_be_bytes::<32>())),
        })
        .to_string()
    }

    fn rpc_error(request: &str, code: i64, message: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": request_id(request),
            "error": { "code": code, "message": message },
        })
        .to_string()
    }

    fn reader(url: &str, max_attempts: u32) -> EvmChainReader {
        EvmChainReader::new(
            url,
            WalletAddress::parse(TOKEN).unwrap(),
            Duration::from_secs(2),
            RetryConfig {
                max_attempts,
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_amount() {
        // 1234.5 tokens at 18 decimals
        let raw = U256::from(1_234_500_000_000_000_000_000u128);
        assert_eq!(normalize_amount(raw, 18).unwrap(), 1234.5);

        // 6 decimals
        assert_eq!(normalize_amount(U256::from(999_500_000u64), 6).unwrap(), 999.5);

        // zero decimals
        assert_eq!(normalize_amount(U256::from(7u64), 0).unwrap(), 7.0);

        // zero balance
        assert_eq!(normalize_amount(U256::ZERO, 18).unwrap(), 0.0);
    }

    #[test]
    fn test_normalize_amount_beyond_u128() {
        let raw = U256::from(1u64) << 128usize;
        let amount = normalize_amount(raw, 18).unwrap();
        let expected = 2f64.powi(128) / 1e18;
        assert!((amount - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_absurd_decimals_is_contract_error() {
        assert!(matches!(
            normalize_amount(U256::from(1u64), 200),
            Err(GateError::Contract(_))
        ));
    }

    #[test]
    fn test_http_status_classified() {
        assert!(matches!(classify_http_status(429, ""), GateError::Network(_)));
        assert!(matches!(classify_http_status(502, "bad gateway"), GateError::Network(_)));
        assert!(matches!(classify_http_status(503, ""), GateError::Network(_)));
        assert!(matches!(classify_http_status(401, "invalid key"), GateError::Endpoint(_)));
        assert!(matches!(classify_http_status(403, ""), GateError::Endpoint(_)));
        assert!(matches!(classify_http_status(404, ""), GateError::Endpoint(_)));
    }

    #[tokio::test]
    async fn test_reads_and_scales_balance() {
        let (url, hits) = serve(|body| {
            if body.contains("313ce567") {
                (200, rpc_result(body, U256::from(6u64)))
            } else if body.contains("70a08231")
                && body.contains("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
            {
                (200, rpc_result(body, U256::from(1_500_250_000u64)))
            } else {
                (400, "unexpected call".to_string())
            }
        })
        .await;

        let wallet = WalletAddress::parse(WALLET).unwrap();
        let balance = reader(&url, 1).token_balance(&wallet).await.unwrap();
        assert_eq!(balance.decimals, 6);
        assert_eq!(balance.amount, 1500.25);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fixed_decimals_skip_the_decimals_call() {
        let (url, hits) = serve(|body| (200, rpc_result(body, U256::from(42u64)))).await;

        let wallet = WalletAddress::parse(WALLET).unwrap();
        let balance = reader(&url, 1)
            .with_decimals(Some(0))
            .token_balance(&wallet)
            .await
            .unwrap();
        assert_eq!(balance.amount, 42.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_retried() {
        let (url, hits) = serve(|_| (401, "invalid key!".to_string())).await;

        let wallet = WalletAddress::parse(WALLET).unwrap();
        let result = reader(&url, 3)
            .with_decimals(Some(18))
            .token_balance(&wallet)
            .await;

        assert!(matches!(result, Err(GateError::Endpoint(_))), "{:?}", result);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (url, hits) = serve(|_| (503, "overloaded".to_string())).await;

        let wallet = WalletAddress::parse(WALLET).unwrap();
        let result = reader(&url, 3)
            .with_decimals(Some(18))
            .token_balance(&wallet)
            .await;

        assert!(matches!(result, Err(GateError::Network(_))), "{:?}", result);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rpc_error_object_is_contract_error() {
        let (url, hits) = serve(|body| (200, rpc_error(body, 3, "execution reverted"))).await;

        let wallet = WalletAddress::parse(WALLET).unwrap();
        let result = reader(&url, 3)
            .with_decimals(Some(18))
            .token_balance(&wallet)
            .await;

        assert!(matches!(result, Err(GateError::Contract(_))), "{:?}", result);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let token = WalletAddress::parse(TOKEN).unwrap();
        let reader = EvmChainReader::new(
            "http://127.0.0.1:1",
            token,
            Duration::from_millis(200),
            RetryConfig {
                max_attempts: 1,
                ..Default::default()
            },
        )
        .unwrap()
        .with_decimals(Some(18));

        let wallet = WalletAddress::parse(WALLET).unwrap();
        assert!(matches!(
            reader.token_balance(&wallet).await,
            Err(GateError::Network(_))
        ));
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        let token = WalletAddress::parse(TOKEN).unwrap();
        let reader = EvmChainReader::new(
            "not a url",
            token,
            Duration::from_secs(1),
            RetryConfig::default(),
        );
        assert!(reader.is_err());
    }
}
