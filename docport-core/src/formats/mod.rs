//! Pluggable archive encodings.
//!
//! Every format exposes the same capability: open a sink that accepts
//! documents then attachment payloads, and read an archive back into
//! [`ArchiveContents`]. The writer, reader and service only ever see
//! [`ArchiveFormat`]; concrete codecs are registered by name in a
//! [`FormatRegistry`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attachment::{is_safe_file_name, AttachmentDescriptor, ATTACHMENTS_DIR};
use crate::document::Document;
use crate::errors::{PortError, PortResult};

pub mod csv;
pub mod gzip;
mod rows;
pub mod xlsx;
pub mod zip;

pub use self::csv::CsvFormat;
pub use self::gzip::GzipFormat;
pub use self::xlsx::XlsxFormat;
pub use self::zip::ZipFormat;

/// Entry holding the document collection in container formats.
pub const DOCUMENTS_ENTRY: &str = "aposDocuments.json";
/// Entry holding attachment metadata in container formats.
pub const ATTACHMENTS_ENTRY: &str = "aposAttachments.json";

/// Declared capabilities of a format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatInfo {
    pub name: String,
    pub label: String,
    pub extension: String,
    pub mime_types: Vec<String>,
    pub include_attachments: bool,
}

impl FormatInfo {
    pub fn new(name: &str, label: &str, extension: &str, mime_types: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            extension: extension.to_string(),
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
            include_attachments: true,
        }
    }

    pub fn without_attachments(mut self) -> Self {
        self.include_attachments = false;
        self
    }
}

/// An archive being written. Documents go in first, then any number of
/// attachment payloads, then `finish` flushes the container.
pub trait ArchiveSink: Send {
    fn write_documents(
        &mut self,
        documents: &[Document],
        attachments: &[AttachmentDescriptor],
    ) -> PortResult<()>;

    fn write_attachment(&mut self, attachment: &AttachmentDescriptor, bytes: &[u8])
        -> PortResult<()>;

    fn finish(self: Box<Self>) -> PortResult<()>;
}

pub trait ArchiveFormat: Send + Sync {
    fn info(&self) -> &FormatInfo;

    /// Create `dest` and return a sink writing into it.
    fn open(&self, dest: &Path) -> PortResult<Box<dyn ArchiveSink>>;

    /// Decode `src`, extracting attachment payloads into `staging`.
    fn read(&self, src: &Path, staging: &Path, options: &ReadOptions) -> PortResult<ArchiveContents>;
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// When set, only documents whose `_id` or `aposDocId` is listed are kept.
    pub doc_ids: Option<HashSet<String>>,
}

impl ReadOptions {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            doc_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    fn keeps(&self, doc: &Document) -> bool {
        match &self.doc_ids {
            Some(ids) => ids.contains(&doc.id) || ids.contains(&doc.apos_doc_id),
            None => true,
        }
    }

    pub(crate) fn retain(&self, documents: &mut Vec<Document>) {
        documents.retain(|doc| self.keeps(doc));
    }
}

/// Decoded archive: documents, attachment metadata, and where each
/// attachment payload was staged on disk (keyed by attachment id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveContents {
    pub documents: Vec<Document>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub staged: BTreeMap<String, PathBuf>,
}

/// Accumulates entries of a container archive as they are visited.
pub(crate) struct EntryCollector<'a> {
    staging: &'a Path,
    documents: Option<Vec<Document>>,
    attachments: Vec<AttachmentDescriptor>,
    files: HashMap<String, PathBuf>,
}

impl<'a> EntryCollector<'a> {
    pub(crate) fn new(staging: &'a Path) -> Self {
        Self {
            staging,
            documents: None,
            attachments: Vec::new(),
            files: HashMap::new(),
        }
    }

    pub(crate) fn accept(&mut self, entry_path: &str, reader: &mut dyn Read) -> PortResult<()> {
        let path = normalize_entry_path(entry_path)?;
        let attachments_prefix = format!("{}/", ATTACHMENTS_DIR);

        if path == DOCUMENTS_ENTRY {
            self.documents = Some(serde_json::from_reader(reader)?);
        } else if path == ATTACHMENTS_ENTRY {
            self.attachments = serde_json::from_reader(reader)?;
        } else if let Some(file_name) = path.strip_prefix(&attachments_prefix) {
            if !is_safe_file_name(file_name) {
                return Err(PortError::archive(format!(
                    "unsafe attachment entry '{}'",
                    entry_path
                )));
            }
            std::fs::create_dir_all(self.staging)?;
            let target = self.staging.join(file_name);
            let mut out = std::fs::File::create(&target)?;
            std::io::copy(reader, &mut out)?;
            self.files.insert(file_name.to_string(), target);
        } else {
            tracing::debug!(entry = %entry_path, "Skipping unknown archive entry");
        }
        Ok(())
    }

    pub(crate) fn finish(self, options: &ReadOptions) -> PortResult<ArchiveContents> {
        let mut documents = self
            .documents
            .ok_or_else(|| PortError::archive(format!("missing {}", DOCUMENTS_ENTRY)))?;
        options.retain(&mut documents);

        let mut files = self.files;
        let staged = self
            .attachments
            .iter()
            .filter_map(|attachment| {
                files
                    .remove(&attachment.file_name())
                    .map(|path| (attachment.id.clone(), path))
            })
            .collect();

        Ok(ArchiveContents {
            documents,
            attachments: self.attachments,
            staged,
        })
    }
}

fn normalize_entry_path(path: &str) -> PortResult<String> {
    let candidate = Path::new(path);
    if candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PortError::archive(format!(
            "invalid path component in archive entry: {}",
            path
        )));
    }
    let parts: Vec<String> = candidate
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Formats available by name.
pub struct FormatRegistry {
    default: String,
    formats: Vec<Arc<dyn ArchiveFormat>>,
}

impl FormatRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            formats: Vec::new(),
        }
    }

    pub fn with_format<F>(mut self, format: F) -> Self
    where
        F: ArchiveFormat + 'static,
    {
        self.register(format);
        self
    }

    /// Add a format, replacing any existing one with the same name.
    pub fn register<F>(&mut self, format: F)
    where
        F: ArchiveFormat + 'static,
    {
        let name = format.info().name.clone();
        self.formats.retain(|f| f.info().name != name);
        self.formats.push(Arc::new(format));
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Look up a format by name; `None` selects the default.
    pub fn get(&self, name: Option<&str>) -> PortResult<Arc<dyn ArchiveFormat>> {
        let name = name.unwrap_or(&self.default);
        self.formats
            .iter()
            .find(|f| f.info().name == name)
            .cloned()
            .ok_or_else(|| PortError::UnsupportedFormat(name.to_string()))
    }

    /// Pick a format from an uploaded file's name, falling back to its MIME type.
    pub fn detect(&self, filename: &str, mime_type: Option<&str>) -> PortResult<Arc<dyn ArchiveFormat>> {
        let lower = filename.to_ascii_lowercase();
        let by_name = self.formats.iter().find(|f| {
            let info = f.info();
            lower.ends_with(&format!(".{}", info.extension))
                || (info.extension == "tgz" && lower.ends_with(".tar.gz"))
        });
        let by_mime = || {
            mime_type.and_then(|mime| {
                self.formats
                    .iter()
                    .find(|f| f.info().mime_types.iter().any(|m| m == mime))
            })
        };
        by_name
            .or_else(by_mime)
            .cloned()
            .ok_or_else(|| PortError::UnsupportedFormat(filename.to_string()))
    }

    pub fn list(&self) -> Vec<FormatInfo> {
        self.formats.iter().map(|f| f.info().clone()).collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        default_formats()
            .into_iter()
            .fold(Self::new("gzip"), |mut registry, format| {
                registry.formats.push(format);
                registry
            })
    }
}

pub fn default_formats() -> Vec<Arc<dyn ArchiveFormat>> {
    vec![
        Arc::new(GzipFormat::new()) as Arc<dyn ArchiveFormat>,
        Arc::new(ZipFormat::new()) as Arc<dyn ArchiveFormat>,
        Arc::new(CsvFormat::new()) as Arc<dyn ArchiveFormat>,
        Arc::new(XlsxFormat::new()) as Arc<dyn ArchiveFormat>,
    ]
}
