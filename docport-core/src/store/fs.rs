use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::attachment::{is_safe_file_name, AttachmentDescriptor};
use crate::document::{Document, Mode};
use crate::errors::{PortError, PortResult};

use super::{ArtifactStore, AttachmentStorage, DocumentStore, MemoryStore};

const DOCUMENTS_FILE: &str = "documents.json";
const ATTACHMENTS_FILE: &str = "attachments.json";

/// A document store backed by two JSON files in a directory. Every write is
/// flushed back to disk so separate CLI invocations see each other's work.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    inner: MemoryStore,
}

impl DirectoryStore {
    /// Load the store at `root`, creating an empty one if nothing is there yet.
    pub async fn open(root: impl Into<PathBuf>) -> PortResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let documents: Vec<Document> = read_json_or_default(&root.join(DOCUMENTS_FILE)).await?;
        let attachments: Vec<AttachmentDescriptor> =
            read_json_or_default(&root.join(ATTACHMENTS_FILE)).await?;
        debug!(
            root = %root.display(),
            documents = documents.len(),
            attachments = attachments.len(),
            "Opened directory store"
        );
        Ok(Self {
            root,
            inner: MemoryStore::with_documents(documents).with_attachments(attachments),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.inner.documents().await
    }

    pub async fn persist(&self) -> PortResult<()> {
        let documents = serde_json::to_vec_pretty(&self.inner.documents().await)?;
        tokio::fs::write(self.root.join(DOCUMENTS_FILE), documents).await?;
        let attachments = serde_json::to_vec_pretty(&self.inner.attachments().await)?;
        tokio::fs::write(self.root.join(ATTACHMENTS_FILE), attachments).await?;
        Ok(())
    }
}

async fn read_json_or_default<T>(path: &Path) -> PortResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl DocumentStore for DirectoryStore {
    async fn find_by_ids(&self, ids: &[String]) -> PortResult<Vec<Document>> {
        self.inner.find_by_ids(ids).await
    }

    async fn find_by_apos_doc_ids(
        &self,
        apos_doc_ids: &[String],
        locale: Option<&str>,
    ) -> PortResult<Vec<Document>> {
        self.inner.find_by_apos_doc_ids(apos_doc_ids, locale).await
    }

    async fn find_by_field(
        &self,
        doc_type: &str,
        field: &str,
        value: &Value,
        locale: &str,
    ) -> PortResult<Vec<Document>> {
        self.inner.find_by_field(doc_type, field, value, locale).await
    }

    async fn insert(&self, doc: Document) -> PortResult<Document> {
        let doc = self.inner.insert(doc).await?;
        self.persist().await?;
        Ok(doc)
    }

    async fn insert_last_child(&self, doc: Document, parent: &Document) -> PortResult<Document> {
        let doc = self.inner.insert_last_child(doc, parent).await?;
        self.persist().await?;
        Ok(doc)
    }

    async fn update(&self, doc: Document) -> PortResult<Document> {
        let doc = self.inner.update(doc).await?;
        self.persist().await?;
        Ok(doc)
    }

    async fn home_page(&self, locale: &str, mode: Mode) -> PortResult<Option<Document>> {
        self.inner.home_page(locale, mode).await
    }

    async fn find_attachments(&self, ids: &[String]) -> PortResult<Vec<AttachmentDescriptor>> {
        self.inner.find_attachments(ids).await
    }

    async fn upsert_attachment(&self, attachment: AttachmentDescriptor) -> PortResult<()> {
        self.inner.upsert_attachment(attachment).await?;
        self.persist().await
    }
}

/// Attachment binaries stored as `{dir}/{id}-{name}.{ext}`.
#[derive(Debug, Clone)]
pub struct LocalAttachmentStorage {
    dir: PathBuf,
}

impl LocalAttachmentStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, attachment: &AttachmentDescriptor) -> PortResult<PathBuf> {
        let file_name = attachment.file_name();
        if !is_safe_file_name(&file_name) {
            return Err(PortError::Validation(format!(
                "unsafe attachment name '{}'",
                file_name
            )));
        }
        Ok(self.dir.join(file_name))
    }
}

#[async_trait]
impl AttachmentStorage for LocalAttachmentStorage {
    async fn fetch(&self, attachment: &AttachmentDescriptor) -> PortResult<Vec<u8>> {
        let path = self.path_for(attachment)?;
        tokio::fs::read(&path).await.map_err(|err| {
            PortError::Storage(format!("reading {}: {}", path.display(), err))
        })
    }

    async fn store(&self, attachment: &AttachmentDescriptor, source: &Path) -> PortResult<()> {
        let path = self.path_for(attachment)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::copy(source, &path).await.map_err(|err| {
            PortError::Storage(format!("writing {}: {}", path.display(), err))
        })?;
        Ok(())
    }
}

/// Publishes archives by copying them into a download directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn publish(&self, name: &str, source: &Path) -> PortResult<String> {
        if !is_safe_file_name(name) {
            return Err(PortError::Validation(format!("unsafe artifact name '{}'", name)));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let dest = self.dir.join(name);
        tokio::fs::copy(source, &dest).await?;
        Ok(format!("file://{}", dest.display()))
    }

    async fn remove(&self, name: &str) -> PortResult<()> {
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_store_persists_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).await.unwrap();
        let mut doc = Document::new("topic");
        doc.apos_doc_id = "t1".to_string();
        doc.relocate("en", Mode::Draft);
        store.insert(doc).await.unwrap();

        let reopened = DirectoryStore::open(dir.path()).await.unwrap();
        let found = reopened
            .find_by_ids(&["t1:en:draft".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn local_attachment_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("upload.bin");
        std::fs::write(&source, b"payload").unwrap();

        let storage = LocalAttachmentStorage::new(dir.path().join("uploads"));
        let attachment = AttachmentDescriptor::new("a1", "photo", "png");
        storage.store(&attachment, &source).await.unwrap();
        assert_eq!(storage.fetch(&attachment).await.unwrap(), b"payload");
    }
}
