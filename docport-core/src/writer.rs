use std::path::Path;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::attachment::AttachmentDescriptor;
use crate::cleanup::TempPath;
use crate::document::Document;
use crate::errors::PortResult;
use crate::formats::{ArchiveFormat, ArchiveSink};
use crate::store::AttachmentStorage;

/// Attachment fetches in flight at once.
pub const ATTACHMENT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Set when at least one attachment payload could not be fetched.
    pub attachment_error: bool,
    pub written_attachments: usize,
    pub failed_attachments: Vec<String>,
}

/// Serializes documents, attachment metadata and attachment payloads into
/// one archive.
pub struct ArchiveWriter<'a> {
    format: &'a dyn ArchiveFormat,
    storage: &'a dyn AttachmentStorage,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(format: &'a dyn ArchiveFormat, storage: &'a dyn AttachmentStorage) -> Self {
        Self { format, storage }
    }

    /// Write the archive to `dest`. Documents are written before any
    /// attachment. A failed attachment fetch is recorded in the outcome and
    /// the rest of the archive is still produced; any encoding or I/O error
    /// fails the whole write and removes `dest`.
    pub async fn write(
        &self,
        dest: &Path,
        documents: &[Document],
        attachments: &[AttachmentDescriptor],
    ) -> PortResult<WriteOutcome> {
        let guard = TempPath::new(dest);
        let mut sink = self.format.open(dest)?;
        sink.write_documents(documents, attachments)?;

        let mut outcome = WriteOutcome::default();
        if self.format.info().include_attachments && !attachments.is_empty() {
            let shared = Mutex::new(sink);
            let results: Vec<PortResult<Option<String>>> = stream::iter(attachments)
                .map(|attachment| self.append_attachment(&shared, attachment))
                .buffer_unordered(ATTACHMENT_CONCURRENCY)
                .collect()
                .await;

            for result in results {
                match result? {
                    None => outcome.written_attachments += 1,
                    Some(failed) => {
                        outcome.attachment_error = true;
                        outcome.failed_attachments.push(failed);
                    }
                }
            }
            sink = shared.into_inner();
        }

        sink.finish()?;
        guard.keep();

        info!(
            format = %self.format.info().name,
            documents = documents.len(),
            attachments = outcome.written_attachments,
            failed_attachments = outcome.failed_attachments.len(),
            "Wrote archive"
        );
        Ok(outcome)
    }

    /// Fetch one payload and append it. `Ok(Some(id))` marks a fetch failure;
    /// `Err` is a sink failure.
    async fn append_attachment(
        &self,
        sink: &Mutex<Box<dyn ArchiveSink>>,
        attachment: &AttachmentDescriptor,
    ) -> PortResult<Option<String>> {
        let bytes = match self.storage.fetch(attachment).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(attachment = %attachment.id, "Failed to fetch attachment: {}", err);
                return Ok(Some(attachment.id.clone()));
            }
        };

        // Container streams interleave bytes, so appends are serialized.
        sink.lock().await.write_attachment(attachment, &bytes)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Mode;
    use crate::errors::PortError;
    use crate::formats::{ArchiveContents, FormatInfo, GzipFormat, ReadOptions};
    use crate::store::MemoryAttachmentStorage;
    use serde_json::json;

    /// Creates the output file, then fails at the chosen step.
    struct BrokenFormat {
        info: FormatInfo,
        fail_on_attachment: bool,
    }

    impl BrokenFormat {
        fn new(fail_on_attachment: bool) -> Self {
            Self {
                info: FormatInfo::new("broken", "Broken", "bin", &[]),
                fail_on_attachment,
            }
        }
    }

    struct BrokenSink {
        fail_on_attachment: bool,
    }

    impl ArchiveSink for BrokenSink {
        fn write_documents(
            &mut self,
            _documents: &[Document],
            _attachments: &[AttachmentDescriptor],
        ) -> PortResult<()> {
            Ok(())
        }

        fn write_attachment(
            &mut self,
            _attachment: &AttachmentDescriptor,
            _bytes: &[u8],
        ) -> PortResult<()> {
            if self.fail_on_attachment {
                return Err(PortError::archive("disk full"));
            }
            Ok(())
        }

        fn finish(self: Box<Self>) -> PortResult<()> {
            Err(PortError::archive("trailer not written"))
        }
    }

    impl ArchiveFormat for BrokenFormat {
        fn info(&self) -> &FormatInfo {
            &self.info
        }

        fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>> {
            std::fs::write(dest, b"partial")?;
            Ok(Box::new(BrokenSink {
                fail_on_attachment: self.fail_on_attachment,
            }))
        }

        fn read(
            &self,
            _src: &Path,
            _staging: &Path,
            _options: &ReadOptions,
        ) -> PortResult<ArchiveContents> {
            Ok(ArchiveContents::default())
        }
    }

    fn topic(id: &str) -> Document {
        let mut doc = Document::new("topic");
        doc.apos_doc_id = id.to_string();
        doc.relocate("en", Mode::Draft);
        doc.set_field("title", json!(id));
        doc
    }

    #[tokio::test]
    async fn fetch_failure_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tgz");
        let storage = MemoryAttachmentStorage::new()
            .with_blob("a1", b"one".to_vec())
            .with_blob("a3", b"three".to_vec())
            .failing_on("a2");
        let attachments = vec![
            AttachmentDescriptor::new("a1", "one", "txt"),
            AttachmentDescriptor::new("a2", "two", "txt"),
            AttachmentDescriptor::new("a3", "three", "txt"),
        ];
        let format = GzipFormat::new();

        let outcome = ArchiveWriter::new(&format, &storage)
            .write(&dest, &[topic("t1"), topic("t2")], &attachments)
            .await
            .unwrap();
        assert!(outcome.attachment_error);
        assert_eq!(outcome.written_attachments, 2);
        assert_eq!(outcome.failed_attachments, vec!["a2"]);

        let staging = dir.path().join("staging");
        let contents = format.read(&dest, &staging, &ReadOptions::default()).unwrap();
        assert_eq!(contents.documents.len(), 2);
        assert_eq!(contents.attachments.len(), 3);
        assert_eq!(contents.staged.len(), 2);
        assert!(!contents.staged.contains_key("a2"));
    }

    #[tokio::test]
    async fn no_attachments_means_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.tgz");
        let storage = MemoryAttachmentStorage::new();
        let format = GzipFormat::new();

        let outcome = ArchiveWriter::new(&format, &storage)
            .write(&dest, &[topic("t1")], &[])
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::default());
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn failed_finish_removes_partial_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let storage = MemoryAttachmentStorage::new();

        let err = ArchiveWriter::new(&BrokenFormat::new(false), &storage)
            .write(&dest, &[topic("t1")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Archive(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn failed_append_removes_partial_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let storage = MemoryAttachmentStorage::new().with_blob("a1", b"one".to_vec());
        let attachments = vec![AttachmentDescriptor::new("a1", "one", "txt")];

        let err = ArchiveWriter::new(&BrokenFormat::new(true), &storage)
            .write(&dest, &[topic("t1")], &attachments)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Archive(_)));
        assert!(!dest.exists());
    }
}
