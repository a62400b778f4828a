//! Request dispatch: maps panel requests onto coordinator and credential
//! operations and produces the synchronous acknowledgments.

use anyhow::Result;
use shared::agent_api::{Request, Response};
use shared::secret::ApiKey;

use crate::coordinator::Coordinator;

pub struct Dispatcher {
    coordinator: Coordinator,
}

impl Dispatcher {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Handle one request. `None` means no synchronous answer; results for
    /// an accepted chat arrive as notifications.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        match request {
            Request::ProcessChat {
                instance_id,
                message,
            } => {
                let Some(instance_id) = instance_id else {
                    tracing::warn!("processChat without instance id ignored");
                    return None;
                };
                match self.coordinator.process_chat(instance_id, message) {
                    Ok(_task) => None,
                    Err(e) => Some(Response::failed(e.to_string())),
                }
            }
            Request::StopGeneration { instance_id } => {
                let Some(instance_id) = instance_id else {
                    return Some(Response::failed("Missing instance identifier."));
                };
                if self.coordinator.stop_generation(&instance_id) {
                    Some(Response::ok_with_message("Abort signal sent."))
                } else {
                    Some(Response::declined("No active generation to stop."))
                }
            }
            Request::SaveApiKey { api_key } => {
                let Some(key) = ApiKey::new(api_key) else {
                    return Some(Response::failed("Please enter an API key."));
                };
                match self.coordinator.credentials().set(key).await {
                    Ok(()) => Some(Response::ok()),
                    Err(e) => Some(Response::failed(e.to_string())),
                }
            }
            Request::GetApiKey => match self.coordinator.credentials().get().await {
                Ok(key) => Some(Response::api_key(key.map(|k| k.expose().to_string()))),
                Err(e) => Some(Response {
                    error: Some(e.to_string()),
                    ..Response::api_key(None)
                }),
            },
        }
    }

    /// JSON-in, JSON-out variant of [`handle`](Self::handle) for hosts that
    /// exchange requests as text.
    pub async fn handle_json(&self, raw: &str) -> Result<Option<String>> {
        let request: Request = serde_json::from_str(raw)?;
        match self.handle(request).await {
            Some(response) => Ok(Some(serde_json::to_string(&response)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotificationHub;
    use crate::registry::GenerationRegistry;
    use async_trait::async_trait;
    use providers::{ChunkStream, GenerationRequest, StreamingTransport, TransportError};
    use services::{ExtractError, MemoryCredentialStore, PageContent, PageExtractor};
    use shared::agent_api::InstanceId;
    use shared::events::NotificationKind;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct StaticPage;

    #[async_trait]
    impl PageExtractor for StaticPage {
        async fn get_content(&self) -> Result<PageContent, ExtractError> {
            Ok(PageContent {
                content: "page".into(),
                truncated: false,
            })
        }
    }

    /// Never answers, so generations stay live until stopped.
    struct SilentTransport;

    #[async_trait]
    impl StreamingTransport for SilentTransport {
        async fn open(
            &self,
            _request: GenerationRequest,
            cancel: CancellationToken,
        ) -> Result<ChunkStream, TransportError> {
            cancel.cancelled().await;
            Err(TransportError::Cancelled)
        }
    }

    fn dispatcher(credentials: MemoryCredentialStore) -> Dispatcher {
        Dispatcher::new(Coordinator::new(
            Arc::new(GenerationRegistry::new()),
            Arc::new(NotificationHub::new()),
            Arc::new(credentials),
            Arc::new(StaticPage),
            Arc::new(SilentTransport),
        ))
    }

    #[tokio::test]
    async fn test_stop_without_generation_is_noop() {
        let d = dispatcher(MemoryCredentialStore::new());
        let resp = d
            .handle(Request::StopGeneration {
                instance_id: Some(InstanceId::from("nobody")),
            })
            .await
            .unwrap();
        assert_eq!(resp, Response::declined("No active generation to stop."));

        let resp = d
            .handle(Request::StopGeneration { instance_id: None })
            .await
            .unwrap();
        assert_eq!(resp, Response::failed("Missing instance identifier."));
    }

    #[tokio::test]
    async fn test_process_then_stop() {
        let d = dispatcher(MemoryCredentialStore::with_key("k"));
        let id = InstanceId::from("panel");
        let mut rx = d.coordinator().hub().subscribe(&id);

        let chat = Request::ProcessChat {
            instance_id: Some(id.clone()),
            message: "hello".into(),
        };
        assert_eq!(d.handle(chat.clone()).await, None);

        let busy = d.handle(chat).await.unwrap();
        assert!(!busy.is_success());
        assert_eq!(
            busy.error.as_deref(),
            Some("A request is already processing. Please wait or stop the current one.")
        );

        let stop = d
            .handle(Request::StopGeneration {
                instance_id: Some(id.clone()),
            })
            .await
            .unwrap();
        assert_eq!(stop, Response::ok_with_message("Abort signal sent."));

        assert!(matches!(
            rx.recv().await.unwrap().kind,
            NotificationKind::Error { .. }
        ));
        assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Aborted);
        assert!(d.coordinator().registry().is_empty());
    }

    #[tokio::test]
    async fn test_process_chat_without_instance_is_ignored() {
        let d = dispatcher(MemoryCredentialStore::with_key("k"));
        let resp = d
            .handle(Request::ProcessChat {
                instance_id: None,
                message: "hi".into(),
            })
            .await;
        assert_eq!(resp, None);
        assert!(d.coordinator().registry().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_get_api_key_over_json() {
        let d = dispatcher(MemoryCredentialStore::new());

        let out = d.handle_json(r#"{"action":"getApiKey"}"#).await.unwrap();
        assert_eq!(out.as_deref(), Some("{}"));

        let out = d
            .handle_json(r#"{"action":"saveApiKey","apiKey":" AIza-xyz "}"#)
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some(r#"{"success":true}"#));

        let out = d.handle_json(r#"{"action":"getApiKey"}"#).await.unwrap();
        assert_eq!(out.as_deref(), Some(r#"{"apiKey":"AIza-xyz"}"#));

        let out = d
            .handle_json(r#"{"action":"saveApiKey","apiKey":"   "}"#)
            .await
            .unwrap();
        assert_eq!(
            out.as_deref(),
            Some(r#"{"success":false,"error":"Please enter an API key."}"#)
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_an_error() {
        let d = dispatcher(MemoryCredentialStore::new());
        assert!(d.handle_json(r#"{"action":"launchRockets"}"#).await.is_err());
    }
}
