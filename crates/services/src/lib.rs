//! Collaborators the coordinator consumes: page text and credential storage.

pub mod credential_store;
pub mod page_extractor;
pub mod settings_store;

pub use credential_store::{
    CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use page_extractor::{ExtractError, HtmlPageExtractor, PageContent, PageExtractor, PageSource};
