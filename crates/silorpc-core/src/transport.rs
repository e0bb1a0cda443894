//! Outbound transport: a thin signed HTTP POST.
//!
//! The trait is the seam for tests and for deployments that want their own
//! client policy; no pooling or retry logic lives here beyond the shared
//! client's defaults.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use reqwest::header;
use std::time::Duration;

use silorpc_protocol::{CONTENT_TYPE_JSON, SIGNATURE_SCHEME};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {detail}")]
    Request { url: String, detail: String },
}

/// Raw response as the dispatch engine consumes it.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Delivers a signed RPC body to `address + path`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post(
        &self,
        address: &str,
        path: &str,
        body: Vec<u8>,
        signature: &str,
    ) -> Result<TransportResponse, TransportError>;
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn connect_timeout() -> Duration {
    Duration::from_secs(env_u64("SILORPC_HTTP_CONNECT_TIMEOUT_SECS", 3).max(1))
}

fn request_timeout() -> Duration {
    Duration::from_secs(env_u64("SILORPC_HTTP_TIMEOUT_SECS", 30).max(1))
}

fn keepalive() -> Duration {
    Duration::from_secs(env_u64("SILORPC_HTTP_TCP_KEEPALIVE_SECS", 60).max(1))
}

fn user_agent() -> String {
    format!("silorpc/{}", env!("CARGO_PKG_VERSION"))
}

/// Shared client honoring the deployment-level request timeout.
fn client() -> &'static reqwest::Client {
    static CLIENT: OnceCell<reqwest::Client> = OnceCell::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent(user_agent())
            .connect_timeout(connect_timeout())
            .tcp_keepalive(keepalive())
            .timeout(request_timeout())
            .build()
            .expect("http client")
    })
}

/// Production transport over the shared reqwest client.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransport;

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(
        &self,
        address: &str,
        path: &str,
        body: Vec<u8>,
        signature: &str,
    ) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", address.trim_end_matches('/'), path);
        let request_error = |detail: String| TransportError::Request {
            url: url.clone(),
            detail,
        };

        let response = client()
            .post(&url)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(
                header::AUTHORIZATION,
                format!("{} {}", SIGNATURE_SCHEME, signature),
            )
            .body(body)
            .send()
            .await
            .map_err(|err| request_error(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| request_error(err.to_string()))?
            .to_vec();
        Ok(TransportResponse { status, body })
    }
}
