//! Per-instance generation registry.
//!
//! Holds at most one live generation per panel instance. It is the only place
//! that knows whether an instance is generating.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::agent_api::InstanceId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live record of an in-flight generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    pub instance_id: InstanceId,
    /// Distinguishes successive generations of the same instance
    pub generation_id: Uuid,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl GenerationHandle {
    fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            generation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("instance {0} already has a generation in flight")]
    Busy(InstanceId),
}

#[derive(Debug, Default)]
pub struct GenerationRegistry {
    entries: Mutex<HashMap<InstanceId, GenerationHandle>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generation for `instance_id` unless one is already live.
    pub fn begin(&self, instance_id: &InstanceId) -> Result<GenerationHandle, RegistryError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(instance_id) {
            return Err(RegistryError::Busy(instance_id.clone()));
        }
        let handle = GenerationHandle::new(instance_id.clone());
        entries.insert(instance_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Like [`begin`](Self::begin), returning a guard that ends the
    /// generation when dropped.
    pub fn begin_guarded(
        self: &Arc<Self>,
        instance_id: &InstanceId,
    ) -> Result<GenerationGuard, RegistryError> {
        let handle = self.begin(instance_id)?;
        Ok(GenerationGuard {
            registry: Arc::clone(self),
            handle,
        })
    }

    /// Remove the entry for `instance_id`, if any.
    pub fn end(&self, instance_id: &InstanceId) {
        self.entries.lock().remove(instance_id);
    }

    /// Remove the entry only if it still belongs to `generation_id`.
    fn end_generation(&self, instance_id: &InstanceId, generation_id: Uuid) {
        let mut entries = self.entries.lock();
        if entries
            .get(instance_id)
            .is_some_and(|h| h.generation_id == generation_id)
        {
            entries.remove(instance_id);
        }
    }

    /// Signal cancellation and return the signalled handle, or `None` if
    /// nothing was running for the instance.
    pub fn cancel(&self, instance_id: &InstanceId) -> Option<GenerationHandle> {
        let entries = self.entries.lock();
        let handle = entries.get(instance_id)?;
        handle.cancel.cancel();
        Some(handle.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Owns a registry entry; dropping it frees the instance.
#[derive(Debug)]
pub struct GenerationGuard {
    registry: Arc<GenerationRegistry>,
    handle: GenerationHandle,
}

impl GenerationGuard {
    pub fn handle(&self) -> &GenerationHandle {
        &self.handle
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.handle.instance_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.handle.cancel_token()
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.registry
            .end_generation(&self.handle.instance_id, self.handle.generation_id);
    }
}
