use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::attachment::AttachmentDescriptor;
use crate::document::{Document, Mode};
use crate::errors::{PortError, PortResult};

use super::{ArtifactStore, AttachmentStorage, DocumentStore};

/// Document store kept entirely in memory. Types registered with
/// [`MemoryStore::rejecting`] fail every write, which stands in for
/// permission or validation failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<Vec<Document>>,
    attachments: RwLock<Vec<AttachmentDescriptor>>,
    rejected_types: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            docs: RwLock::new(documents),
            ..Self::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentDescriptor>) -> Self {
        self.attachments = RwLock::new(attachments);
        self
    }

    pub fn rejecting(mut self, doc_type: impl Into<String>) -> Self {
        self.rejected_types.insert(doc_type.into());
        self
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.docs.read().await.clone()
    }

    pub async fn attachments(&self) -> Vec<AttachmentDescriptor> {
        self.attachments.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.iter().find(|d| d.id == id).cloned()
    }

    fn check_writable(&self, doc: &Document) -> PortResult<()> {
        if self.rejected_types.contains(&doc.doc_type) {
            return Err(PortError::Forbidden {
                doc_type: doc.doc_type.clone(),
            });
        }
        if doc.id.is_empty() {
            return Err(PortError::Validation("document has no _id".to_string()));
        }
        Ok(())
    }
}

fn same_page_scope(a: &Document, b: &Document) -> bool {
    a.locale() == b.locale() && a.mode() == b.mode()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_ids(&self, ids: &[String]) -> PortResult<Vec<Document>> {
        let docs = self.docs.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| docs.iter().find(|d| &d.id == id).cloned())
            .collect())
    }

    async fn find_by_apos_doc_ids(
        &self,
        apos_doc_ids: &[String],
        locale: Option<&str>,
    ) -> PortResult<Vec<Document>> {
        let docs = self.docs.read().await;
        let mut found = Vec::new();
        for apos_doc_id in apos_doc_ids {
            let mut rows: Vec<Document> = docs
                .iter()
                .filter(|d| &d.apos_doc_id == apos_doc_id)
                .filter(|d| locale.map_or(true, |locale| d.locale() == Some(locale)))
                .cloned()
                .collect();
            rows.sort_by_key(|d| d.mode());
            found.extend(rows);
        }
        Ok(found)
    }

    async fn find_by_field(
        &self,
        doc_type: &str,
        field: &str,
        value: &Value,
        locale: &str,
    ) -> PortResult<Vec<Document>> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|d| d.doc_type == doc_type && d.locale() == Some(locale))
            .filter(|d| d.field(field) == Some(value))
            .cloned()
            .collect())
    }

    async fn insert(&self, doc: Document) -> PortResult<Document> {
        self.check_writable(&doc)?;
        let mut docs = self.docs.write().await;
        if docs.iter().any(|d| d.id == doc.id) {
            return Err(PortError::Store(format!("duplicate _id {}", doc.id)));
        }
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn insert_last_child(&self, mut doc: Document, parent: &Document) -> PortResult<Document> {
        self.check_writable(&doc)?;
        let parent_path = parent
            .field("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| parent.apos_doc_id.clone());
        let level = parent.field("level").and_then(Value::as_i64).unwrap_or(0) + 1;
        let prefix = format!("{}/", parent_path);

        let mut docs = self.docs.write().await;
        if docs.iter().any(|d| d.id == doc.id) {
            return Err(PortError::Store(format!("duplicate _id {}", doc.id)));
        }
        let rank = docs
            .iter()
            .filter(|d| same_page_scope(d, &doc) || same_page_scope(d, parent))
            .filter(|d| d.field("level").and_then(Value::as_i64) == Some(level))
            .filter(|d| {
                d.field("path")
                    .and_then(Value::as_str)
                    .map_or(false, |path| path.starts_with(&prefix))
            })
            .filter_map(|d| d.field("rank").and_then(Value::as_i64))
            .max()
            .map_or(0, |rank| rank + 1);

        doc.set_field("path", json!(format!("{}{}", prefix, doc.apos_doc_id)));
        doc.set_field("level", json!(level));
        doc.set_field("rank", json!(rank));
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, doc: Document) -> PortResult<Document> {
        self.check_writable(&doc)?;
        let mut docs = self.docs.write().await;
        let slot = docs
            .iter_mut()
            .find(|d| d.id == doc.id)
            .ok_or_else(|| PortError::NotFound(format!("document {}", doc.id)))?;
        *slot = doc.clone();
        Ok(doc)
    }

    async fn home_page(&self, locale: &str, mode: Mode) -> PortResult<Option<Document>> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .find(|d| {
                d.locale() == Some(locale)
                    && d.mode() == Some(mode)
                    && d.field("slug").and_then(Value::as_str) == Some("/")
            })
            .cloned())
    }

    async fn find_attachments(&self, ids: &[String]) -> PortResult<Vec<AttachmentDescriptor>> {
        let attachments = self.attachments.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| attachments.iter().find(|a| &a.id == id).cloned())
            .collect())
    }

    async fn upsert_attachment(&self, attachment: AttachmentDescriptor) -> PortResult<()> {
        let mut attachments = self.attachments.write().await;
        match attachments.iter_mut().find(|a| a.id == attachment.id) {
            Some(existing) => *existing = attachment,
            None => attachments.push(attachment),
        }
        Ok(())
    }
}

/// Attachment binaries keyed by attachment id.
#[derive(Debug, Default)]
pub struct MemoryAttachmentStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
}

impl MemoryAttachmentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.blobs.get_mut().insert(id.into(), bytes.into());
        self
    }

    /// Make every fetch of `id` fail.
    pub fn failing_on(mut self, id: impl Into<String>) -> Self {
        self.failing.insert(id.into());
        self
    }

    pub async fn blob(&self, id: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl AttachmentStorage for MemoryAttachmentStorage {
    async fn fetch(&self, attachment: &AttachmentDescriptor) -> PortResult<Vec<u8>> {
        if self.failing.contains(&attachment.id) {
            return Err(PortError::Storage(format!(
                "fetch of {} refused",
                attachment.id
            )));
        }
        self.blobs
            .read()
            .await
            .get(&attachment.id)
            .cloned()
            .ok_or_else(|| PortError::Storage(format!("no binary for {}", attachment.id)))
    }

    async fn store(&self, attachment: &AttachmentDescriptor, source: &Path) -> PortResult<()> {
        let bytes = tokio::fs::read(source).await?;
        self.blobs
            .write()
            .await
            .insert(attachment.id.clone(), bytes);
        Ok(())
    }
}

/// Published archives kept as bytes, addressed as `memory://exports/{name}`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn publish(&self, name: &str, source: &Path) -> PortResult<String> {
        let bytes = tokio::fs::read(source).await?;
        self.artifacts
            .write()
            .await
            .insert(name.to_string(), bytes);
        Ok(format!("memory://exports/{}", name))
    }

    async fn remove(&self, name: &str) -> PortResult<()> {
        self.artifacts.write().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(apos_doc_id: &str, slug: &str) -> Document {
        let mut doc = Document::new("default-page");
        doc.apos_doc_id = apos_doc_id.to_string();
        doc.relocate("en", Mode::Draft);
        doc.set_field("slug", json!(slug));
        doc
    }

    #[tokio::test]
    async fn pages_are_appended_under_parent() {
        let mut home = page("home", "/");
        home.set_field("path", json!("home"));
        home.set_field("level", json!(0));
        let store = MemoryStore::with_documents(vec![home.clone()]);

        let first = store
            .insert_last_child(page("p1", "/p1"), &home)
            .await
            .unwrap();
        let second = store
            .insert_last_child(page("p2", "/p2"), &home)
            .await
            .unwrap();

        assert_eq!(first.field("path"), Some(&json!("home/p1")));
        assert_eq!(first.field("rank"), Some(&json!(0)));
        assert_eq!(second.field("rank"), Some(&json!(1)));
        assert_eq!(second.field("level"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn rejected_types_fail_writes() {
        let store = MemoryStore::new().rejecting("secret");
        let mut doc = Document::new("secret");
        doc.apos_doc_id = "s".to_string();
        doc.relocate("en", Mode::Draft);
        let err = store.insert(doc).await.unwrap_err();
        assert!(matches!(err, PortError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn failing_attachment_fetch() {
        let storage = MemoryAttachmentStorage::new()
            .with_blob("a", b"bytes".to_vec())
            .failing_on("b");
        let ok = storage
            .fetch(&AttachmentDescriptor::new("a", "n", "txt"))
            .await
            .unwrap();
        assert_eq!(ok, b"bytes");
        assert!(storage
            .fetch(&AttachmentDescriptor::new("b", "n", "txt"))
            .await
            .is_err());
    }
}
