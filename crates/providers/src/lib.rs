//! Upstream model access: the streaming transport and the event-stream decoder.

pub mod gemini;
pub mod sse;
pub mod transport;

pub use gemini::GeminiTransport;
pub use sse::{DecodedEvent, StreamDecoder};
pub use transport::{ChunkStream, GenerationRequest, StreamingTransport, TransportError};
