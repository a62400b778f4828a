use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::secret::ApiKey;
use tokio_util::sync::CancellationToken;

/// Raw response body chunks, in arrival order. Ends when the connection closes.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// One outbound generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub api_key: ApiKey,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Upstream answered with a non-success status.
    #[error("API Error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("{0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// A chunked POST against a generation endpoint.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Sends the request and returns the body as a chunk stream once the
    /// response headers arrive. Returns `Cancelled` if `cancel` fires first.
    async fn open(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError>;
}
