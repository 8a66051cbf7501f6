//! Query transport
//!
//! One request in, one raw (base64-decoded) packet out. No retries and no
//! timeouts beyond the HTTP client's own.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use tally_common::api::{PacketKind, QueryRequest, QueryResponse, QUERY_PATH, VIEWER_HEADER};
use tracing::{debug, warn};

use crate::error::FetchError;

const USER_AGENT: &str = concat!("tally-fc/", env!("CARGO_PKG_VERSION"));

/// Sends query requests to the server
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Raw packet bytes for `request.kind`
    async fn fetch(&self, request: &QueryRequest) -> Result<Vec<u8>, FetchError>;
}

/// HTTP transport against a running query server
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
    viewer_id: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, viewer_id: Option<String>) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), QUERY_PATH),
            viewer_id,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn fetch(&self, request: &QueryRequest) -> Result<Vec<u8>, FetchError> {
        debug!(
            kind = %request.kind,
            ids = request.ids.as_ref().map(Vec::len),
            endpoint = %self.endpoint,
            "Querying tally-qs"
        );

        let mut builder = self.http_client.post(&self.endpoint).json(request);
        if let Some(viewer) = &self.viewer_id {
            builder = builder.header(VIEWER_HEADER, viewer);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(kind = %request.kind, "Query rejected: unauthorized");
            return Err(FetchError::Unauthorized);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(kind = %request.kind, status = status.as_u16(), "Query failed: {}", message);
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Network(format!("invalid response body: {}", e)))?;

        unwrap_packet(&body, request.kind)
    }
}

/// Base64-decode the packet field for `kind`
pub fn unwrap_packet(body: &QueryResponse, kind: PacketKind) -> Result<Vec<u8>, FetchError> {
    let encoded = body.packet(kind).ok_or(FetchError::MissingPacket(kind))?;
    Ok(general_purpose::STANDARD.decode(encoded)?)
}
