//! Agent Host - background coordinator for page chat
//!
//! This crate owns everything between a panel's request and the model:
//! - Tracks at most one live generation per panel instance
//! - Fetches the credential and page text, builds the prompt
//! - Streams the model response and turns it into panel notifications
//! - Routes panel requests (chat, stop, key management)

pub mod coordinator;
pub mod dispatch;
pub mod notifier;
pub mod prompts;
pub mod registry;

pub use coordinator::{Coordinator, CoordinatorError, GenerationOutcome};
pub use dispatch::Dispatcher;
pub use notifier::NotificationHub;
pub use prompts::compose_chat_prompt;
pub use registry::{GenerationGuard, GenerationHandle, GenerationRegistry, RegistryError};
