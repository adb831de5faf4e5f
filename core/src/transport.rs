/// Relay transport: the trait seam the scheduler talks through, plus the
/// HTTP implementation
use crate::error::{EngineError, Result};
use crate::protocol::{SyncRequest, SyncResponse};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

/// One request/response exchange with the relay. The trait is object-safe
/// so the scheduler can hold `Arc<dyn RelayTransport>` and tests can swap
/// in fakes.
pub trait RelayTransport: Send + Sync {
    fn exchange(&self, request: SyncRequest) -> BoxFuture<'_, Result<SyncResponse>>;
}

/// JSON-over-HTTP(S) POST to a fixed endpoint with a fixed connect/read
/// timeout. A timeout is a transport failure like any other.
pub struct HttpRelayTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelayTransport {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, endpoint })
    }
}

impl RelayTransport for HttpRelayTransport {
    fn exchange(&self, request: SyncRequest) -> BoxFuture<'_, Result<SyncResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(|e| EngineError::Transport(format!("relay request: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(EngineError::Transport(format!("relay returned {}", status)));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| EngineError::Transport(format!("relay body: {}", e)))?;

            // A malformed body is a protocol failure, distinguishable from
            // transport failures in logs but retried the same way.
            let parsed: SyncResponse = serde_json::from_slice(&body).map_err(|e| {
                debug!("undecodable relay response ({} bytes): {}", body.len(), e);
                EngineError::Protocol(format!("relay response: {}", e))
            })?;

            Ok(parsed)
        })
    }
}
