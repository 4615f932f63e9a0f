//! Content export/import for a document store.
//!
//! Export walks the selected documents' schemas to collect related documents
//! and attachments, then writes them into a portable archive (gzip'd tar, zip,
//! csv or xlsx). Import reads such an archive back and reconciles it against
//! the store by content identity or an explicit update key, across draft and
//! published modes and locales.

pub mod attachment;
pub mod cleanup;
pub mod config;
pub mod document;
pub mod errors;
pub mod formats;
pub mod import;
pub mod notify;
pub mod policy;
pub mod reader;
pub mod related;
pub mod rich_text;
pub mod schema;
pub mod service;
pub mod store;
pub mod walker;
pub mod writer;

pub use attachment::AttachmentDescriptor;
pub use cleanup::{CleanupRegistry, TempPath};
pub use config::PortConfig;
pub use document::{compose_id, Document, Mode};
pub use errors::{PortError, PortResult};
pub use formats::{ArchiveContents, ArchiveFormat, FormatInfo, FormatRegistry, ReadOptions};
pub use import::{DuplicateStatus, ImportOptions, ImportOutcome, ImportSummary};
pub use notify::{Notification, NotificationLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use policy::{AllowAll, DenyTypes, ExportPolicy};
pub use reader::ArchiveReader;
pub use related::RelatedResolver;
pub use schema::{Field, FieldKind, SchemaCatalog, SchemaRegistry};
pub use service::{ExportRequest, ExportResult, ImportRequest, ImportSource, PortService};
pub use store::{ArtifactStore, AttachmentStorage, DocumentStore};
pub use walker::{SchemaWalker, WalkTarget, MAX_RECURSION};
pub use writer::{ArchiveWriter, WriteOutcome, ATTACHMENT_CONCURRENCY};
