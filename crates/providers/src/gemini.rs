use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::settings::CoordinatorSettings;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::transport::{ChunkStream, GenerationRequest, StreamingTransport, TransportError};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

// ── Streaming response types ─────────────────────────────────────────

/// One `data:` payload of the `streamGenerateContent` event stream.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    #[serde(default)]
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Option<Vec<GeminiCandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Option<Vec<SafetyRating>>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    probability: Option<String>,
}

impl StreamPayload {
    /// Text of the first part of the first candidate, if non-empty.
    pub fn text_delta(&self) -> Option<&str> {
        self.candidates
            .as_ref()?
            .first()?
            .content
            .as_ref()?
            .parts
            .as_ref()?
            .first()?
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    pub fn prompt_feedback(&self) -> Option<&PromptFeedback> {
        self.prompt_feedback.as_ref()
    }
}

impl PromptFeedback {
    /// User-facing explanation of why the prompt was blocked.
    pub fn block_message(&self) -> String {
        let reason = self.block_reason.as_deref().unwrap_or("Unknown");
        let ratings = self
            .safety_ratings
            .as_ref()
            .map(|ratings| {
                ratings
                    .iter()
                    .map(|r| {
                        format!(
                            "{}: {}",
                            r.category.as_deref().unwrap_or("UNKNOWN"),
                            r.probability.as_deref().unwrap_or("UNKNOWN")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "N/A".to_string());
        format!(
            "[Content blocked due to: {}. Safety Ratings: {}]",
            reason, ratings
        )
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Best message for a failed call: the JSON `error.message`, then the
/// status reason phrase.
pub(crate) fn api_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Unknown API error".to_string())
}

// ── Client ───────────────────────────────────────────────────────────

/// Streaming transport against the Gemini `streamGenerateContent` endpoint.
pub struct GeminiTransport {
    http: Client,
    base_url: String,
    model: String,
}

impl GeminiTransport {
    pub fn new(settings: &CoordinatorSettings) -> Result<Self> {
        // Connect timeout only: an open stream may stay quiet for a long time.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl StreamingTransport for GeminiTransport {
    async fn open(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError> {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: request.prompt,
                }],
            }],
        };
        let send = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", request.api_key.expose())
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = send => resp.map_err(|e| TransportError::Network(e.to_string()))?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                body = resp.text() => body.unwrap_or_default(),
            };
            tracing::debug!(status = status.as_u16(), "gemini returned error status");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: api_error_message(status, &body),
            });
        }

        let stream = resp.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TransportError::Network(format!("stream read error: {}", e)))
        });
        Ok(stream.boxed())
    }
}
