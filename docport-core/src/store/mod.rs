//! Interfaces to the host platform's document store and file storage.
//!
//! The pipeline only talks to these traits. [`memory`] holds in-process
//! implementations; [`fs`] persists them to a directory for the CLI.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::attachment::AttachmentDescriptor;
use crate::document::{Document, Mode};
use crate::errors::PortResult;

pub mod fs;
pub mod memory;

pub use fs::{DirectoryStore, LocalArtifactStore, LocalAttachmentStorage};
pub use memory::{MemoryArtifactStore, MemoryAttachmentStorage, MemoryStore};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Rows by exact `_id`.
    async fn find_by_ids(&self, ids: &[String]) -> PortResult<Vec<Document>>;

    /// Every mode of the given content identities, optionally limited to a locale.
    async fn find_by_apos_doc_ids(
        &self,
        apos_doc_ids: &[String],
        locale: Option<&str>,
    ) -> PortResult<Vec<Document>>;

    /// Rows of `doc_type` in `locale` whose `field` equals `value`, any mode.
    async fn find_by_field(
        &self,
        doc_type: &str,
        field: &str,
        value: &Value,
        locale: &str,
    ) -> PortResult<Vec<Document>>;

    async fn insert(&self, doc: Document) -> PortResult<Document>;

    /// Insert a page as the last child of `parent`.
    async fn insert_last_child(&self, doc: Document, parent: &Document) -> PortResult<Document>;

    /// Replace the row with the same `_id`.
    async fn update(&self, doc: Document) -> PortResult<Document>;

    async fn home_page(&self, locale: &str, mode: Mode) -> PortResult<Option<Document>>;

    async fn find_attachments(&self, ids: &[String]) -> PortResult<Vec<AttachmentDescriptor>>;

    async fn upsert_attachment(&self, attachment: AttachmentDescriptor) -> PortResult<()>;
}

/// Binary file storage backend.
#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    async fn fetch(&self, attachment: &AttachmentDescriptor) -> PortResult<Vec<u8>>;

    async fn store(&self, attachment: &AttachmentDescriptor, source: &Path) -> PortResult<()>;
}

/// Where finished export archives are published for download.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish `source` under `name` and return its download URL.
    async fn publish(&self, name: &str, source: &Path) -> PortResult<String>;

    async fn remove(&self, name: &str) -> PortResult<()>;
}
