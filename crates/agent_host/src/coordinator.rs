//! Generation coordinator.
//!
//! Drives one generation per panel instance:
//! `Fetching` (credential, page text) -> `Requesting` (open transport) ->
//! `Streaming` (decode chunks) -> `Completed | Errored | Aborted`.
//! The registry entry is owned by a [`GenerationGuard`] for the whole span and
//! released before the terminal notification goes out, so a panel may start
//! its next request as soon as it sees one.

use futures::StreamExt;
use providers::{DecodedEvent, GenerationRequest, StreamDecoder, StreamingTransport, TransportError};
use services::{CredentialError, CredentialStore, ExtractError, PageExtractor};
use shared::agent_api::InstanceId;
use shared::events::Notification;
use shared::settings::CoordinatorSettings;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notifier::NotificationHub;
use crate::prompts::compose_chat_prompt;
use crate::registry::{GenerationGuard, GenerationRegistry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("A request is already processing. Please wait or stop the current one.")]
    Busy,

    #[error("API Key not found. Please save it first.")]
    MissingApiKey,

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Upstream blocked the prompt; carries the user-facing explanation.
    #[error("{0}")]
    Blocked(String),

    #[error("Stream stalled: no data received for {0:?}")]
    Stalled(Duration),

    #[error("Generation cancelled")]
    Cancelled,
}

impl CoordinatorError {
    fn is_cancellation(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Cancelled | CoordinatorError::Transport(TransportError::Cancelled)
        )
    }
}

/// How a generation terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Errored(String),
    Aborted,
}

#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<GenerationRegistry>,
    hub: Arc<NotificationHub>,
    credentials: Arc<dyn CredentialStore>,
    extractor: Arc<dyn PageExtractor>,
    transport: Arc<dyn StreamingTransport>,
    stall_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<GenerationRegistry>,
        hub: Arc<NotificationHub>,
        credentials: Arc<dyn CredentialStore>,
        extractor: Arc<dyn PageExtractor>,
        transport: Arc<dyn StreamingTransport>,
    ) -> Self {
        Self {
            registry,
            hub,
            credentials,
            extractor,
            transport,
            stall_timeout: None,
        }
    }

    /// Apply runtime settings (currently the optional stall timeout).
    pub fn with_settings(mut self, settings: &CoordinatorSettings) -> Self {
        self.stall_timeout = settings.stall_timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<GenerationRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Start a generation for `instance_id`.
    ///
    /// A busy instance is rejected right away: the error notification is
    /// published before this returns and no handle is created. Otherwise the
    /// generation runs on its own task and reports through notifications.
    pub fn process_chat(
        &self,
        instance_id: InstanceId,
        message: String,
    ) -> Result<JoinHandle<GenerationOutcome>, CoordinatorError> {
        let guard = match self.registry.begin_guarded(&instance_id) {
            Ok(guard) => guard,
            Err(_) => {
                let err = CoordinatorError::Busy;
                tracing::warn!(instance = %instance_id, "rejecting chat request: busy");
                self.hub
                    .publish(Notification::error(instance_id, err.to_string()));
                return Err(err);
            }
        };
        tracing::info!(
            instance = %instance_id,
            generation = %guard.handle().generation_id,
            "generation accepted"
        );

        let this = self.clone();
        Ok(tokio::spawn(async move { this.run(guard, message).await }))
    }

    /// Signal the instance's generation to stop. `false` if none is running.
    pub fn stop_generation(&self, instance_id: &InstanceId) -> bool {
        match self.registry.cancel(instance_id) {
            Some(handle) => {
                let age_ms = (chrono::Utc::now() - handle.started_at).num_milliseconds();
                tracing::info!(
                    instance = %instance_id,
                    generation = %handle.generation_id,
                    age_ms,
                    "abort signal sent"
                );
                true
            }
            None => false,
        }
    }

    async fn run(self, guard: GenerationGuard, message: String) -> GenerationOutcome {
        let instance_id = guard.instance_id().clone();
        let cancel = guard.cancel_token();
        let start = Instant::now();

        let result = self.drive(&instance_id, &cancel, &message).await;

        // Free the instance before the terminal notification goes out.
        drop(guard);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(instance = %instance_id, elapsed_ms, "generation completed");
                self.hub.publish(Notification::ended(instance_id));
                GenerationOutcome::Completed
            }
            Err(e) if e.is_cancellation() => {
                tracing::info!(instance = %instance_id, elapsed_ms, "generation aborted");
                self.hub.publish(Notification::aborted(instance_id));
                GenerationOutcome::Aborted
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(instance = %instance_id, elapsed_ms, error = %message, "generation failed");
                self.hub
                    .publish(Notification::error(instance_id, message.clone()));
                GenerationOutcome::Errored(message)
            }
        }
    }

    async fn drive(
        &self,
        instance_id: &InstanceId,
        cancel: &CancellationToken,
        message: &str,
    ) -> Result<(), CoordinatorError> {
        // Fetching
        let api_key = until_cancelled(cancel, self.credentials.get())
            .await??
            .ok_or(CoordinatorError::MissingApiKey)?;
        let page = until_cancelled(cancel, self.extractor.get_content()).await??;
        tracing::debug!(
            instance = %instance_id,
            chars = page.content.len(),
            truncated = page.truncated,
            "page text ready"
        );

        // Requesting
        let request = GenerationRequest {
            api_key,
            prompt: compose_chat_prompt(&page.content, message),
        };
        let mut stream =
            until_cancelled(cancel, self.transport.open(request, cancel.clone())).await??;

        // Streaming
        let mut decoder = StreamDecoder::new();
        let mut chunks = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(CoordinatorError::Cancelled);
            }
            let next = match self.stall_timeout {
                Some(limit) => until_cancelled(cancel, tokio::time::timeout(limit, stream.next()))
                    .await?
                    .map_err(|_| CoordinatorError::Stalled(limit))?,
                None => until_cancelled(cancel, stream.next()).await?,
            };
            let Some(chunk) = next else { break };
            chunks += 1;
            for event in decoder.feed(&chunk?) {
                self.forward(instance_id, event)?;
            }
        }
        for event in decoder.finish() {
            self.forward(instance_id, event)?;
        }

        tracing::debug!(
            instance = %instance_id,
            chunks,
            skipped_frames = decoder.skipped_frames(),
            "stream closed"
        );
        Ok(())
    }

    fn forward(&self, instance_id: &InstanceId, event: DecodedEvent) -> Result<(), CoordinatorError> {
        match event {
            DecodedEvent::Started => {
                self.hub.publish(Notification::started(instance_id.clone()));
                Ok(())
            }
            DecodedEvent::Delta(text) => {
                self.hub.publish(Notification::delta(instance_id.clone(), text));
                Ok(())
            }
            DecodedEvent::Blocked(reason) => Err(CoordinatorError::Blocked(reason)),
        }
    }
}

/// Await `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, CoordinatorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoordinatorError::Cancelled),
        out = fut => Ok(out),
    }
}
