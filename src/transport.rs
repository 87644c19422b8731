use async_trait::async_trait;

use crate::error::SendError;
use crate::types::SignatureContext;

/// Injected batch sender.
///
/// The pipeline is agnostic to the underlying protocol: it hands over the
/// serialized batch (a JSON array of events) together with its
/// authentication material and only cares whether the attempt succeeded.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch_json: &[u8], ctx: &SignatureContext) -> Result<(), SendError>;
}

/// HTTP transport posting batches to the collection endpoint.
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch_json: &[u8], ctx: &SignatureContext) -> Result<(), SendError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .body(batch_json.to_vec())
            .header("Content-Type", "application/json")
            .header("timestamp", ctx.timestamp_millis.to_string());

        if let Some(ref signature) = ctx.signature {
            request = request.header("signature", signature.clone());
        }

        let response = request.send().await;
        match response {
            Ok(resp) => {
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(SendError::RemoteStatus(resp.status().as_u16()))
                }
            }
            Err(err) => {
                if err.is_timeout() {
                    Err(SendError::Timeout)
                } else {
                    Err(SendError::Network)
                }
            }
        }
    }
}
