//! Export/import entry points tying the pipeline to its collaborators.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attachment::AttachmentDescriptor;
use crate::cleanup::{CleanupRegistry, TempPath};
use crate::config::PortConfig;
use crate::document::Document;
use crate::errors::{PortError, PortResult};
use crate::formats::{ArchiveContents, FormatInfo, FormatRegistry, ReadOptions};
use crate::import::{
    ImportOptions, ImportOutcome, ImportSummary, Reconciled, Reconciler, StagingArea,
};
use crate::notify::{Notification, NotificationLevel, Notifier, TracingNotifier};
use crate::policy::{AllowAll, ExportPolicy};
use crate::reader::ArchiveReader;
use crate::related::RelatedResolver;
use crate::schema::SchemaRegistry;
use crate::store::{ArtifactStore, AttachmentStorage, DocumentStore};
use crate::writer::ArchiveWriter;

#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Row ids (`_id`) of the documents to export.
    pub ids: Vec<String>,
    /// Related document types to follow; empty exports the seeds alone.
    pub related_types: Vec<String>,
    pub format: Option<String>,
    /// How long the artifact stays downloadable.
    pub expiration: Option<Duration>,
}

impl ExportRequest {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_related_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub url: String,
    pub artifact: String,
    pub format: String,
    pub documents: Vec<Document>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub attachment_error: bool,
    pub failed_attachments: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ImportSource {
    /// A freshly uploaded archive. The file is removed once the import is done.
    Upload {
        path: PathBuf,
        filename: String,
        mime_type: Option<String>,
    },
    /// An archive staged by an earlier import that stopped for a decision.
    Staged { token: String },
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    pub format: Option<String>,
    pub options: ImportOptions,
}

pub struct PortService {
    store: Arc<dyn DocumentStore>,
    attachments: Arc<dyn AttachmentStorage>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<dyn SchemaRegistry>,
    policy: Arc<dyn ExportPolicy>,
    notifier: Arc<dyn Notifier>,
    formats: FormatRegistry,
    config: PortConfig,
    cleanup: CleanupRegistry,
    staging: StagingArea,
}

impl PortService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        attachments: Arc<dyn AttachmentStorage>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<dyn SchemaRegistry>,
        config: PortConfig,
    ) -> Self {
        let cleanup = CleanupRegistry::new();
        let staging = StagingArea::new(
            config.staging_dir.clone(),
            cleanup.clone(),
            config.staging_expiration(),
        );
        Self {
            store,
            attachments,
            artifacts,
            registry,
            policy: Arc::new(AllowAll),
            notifier: Arc::new(TracingNotifier),
            formats: FormatRegistry::default(),
            config,
            cleanup,
            staging,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ExportPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    pub fn formats(&self) -> Vec<FormatInfo> {
        self.formats.list()
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Exportable relationship target types of `doc_type`.
    pub fn related_types(&self, doc_type: &str) -> Vec<String> {
        self.resolver().related_types(doc_type)
    }

    pub async fn export(&self, request: ExportRequest) -> PortResult<ExportResult> {
        match self.run_export(request).await {
            Ok(result) => {
                let notification = if result.attachment_error {
                    Notification::new(
                        NotificationLevel::Warning,
                        format!(
                            "Exported {} documents; {} attachments could not be included",
                            result.documents.len(),
                            result.failed_attachments.len()
                        ),
                    )
                } else {
                    Notification::new(
                        NotificationLevel::Success,
                        format!("Exported {} documents", result.documents.len()),
                    )
                };
                self.notifier.notify(notification.with_url(result.url.clone()));
                Ok(result)
            }
            Err(err) => {
                self.notifier.notify(Notification::new(
                    NotificationLevel::Error,
                    format!("Export failed: {}", err),
                ));
                Err(err)
            }
        }
    }

    async fn run_export(&self, request: ExportRequest) -> PortResult<ExportResult> {
        if request.ids.is_empty() {
            return Err(PortError::Validation("no documents to export".to_string()));
        }
        let format_name = request
            .format
            .as_deref()
            .unwrap_or(&self.config.default_format);
        let format = self.formats.get(Some(format_name))?;

        let seeds = self.store.find_by_ids(&request.ids).await?;
        if seeds.is_empty() {
            return Err(PortError::NotFound(format!(
                "documents {}",
                request.ids.join(", ")
            )));
        }
        if let Some(denied) = seeds.iter().find(|doc| !self.policy.can_export(&doc.doc_type)) {
            return Err(PortError::Forbidden {
                doc_type: denied.doc_type.clone(),
            });
        }

        let resolver = self.resolver();
        let related = resolver
            .resolve_related(&seeds, &request.related_types)
            .await?;
        let mut seen: HashSet<String> = HashSet::new();
        let documents: Vec<Document> = seeds
            .into_iter()
            .chain(related)
            .filter(|doc| seen.insert(doc.id.clone()))
            .collect();

        let attachments = if format.info().include_attachments {
            resolver.resolve_attachments(&documents).await?
        } else {
            Vec::new()
        };

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let artifact = format!(
            "docport-export-{}-{}.{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple(),
            format.info().extension
        );
        let dest = self.config.work_dir.join(&artifact);
        let temp = TempPath::new(&dest);

        let outcome = ArchiveWriter::new(format.as_ref(), self.attachments.as_ref())
            .write(&dest, &documents, &attachments)
            .await?;
        let url = self.artifacts.publish(&artifact, temp.path()).await?;
        drop(temp);

        let expiration = request
            .expiration
            .unwrap_or_else(|| self.config.export_expiration());
        self.schedule_artifact_removal(&artifact, expiration).await;

        info!(
            artifact = %artifact,
            documents = documents.len(),
            attachments = attachments.len(),
            attachment_error = outcome.attachment_error,
            "Export complete"
        );
        Ok(ExportResult {
            url,
            artifact,
            format: format.info().name.clone(),
            documents,
            attachments,
            attachment_error: outcome.attachment_error,
            failed_attachments: outcome.failed_attachments,
        })
    }

    async fn schedule_artifact_removal(&self, artifact: &str, expiration: Duration) {
        let artifacts = Arc::clone(&self.artifacts);
        let name = artifact.to_string();
        self.cleanup
            .schedule(format!("export:{}", artifact), expiration, async move {
                if let Err(err) = artifacts.remove(&name).await {
                    warn!(artifact = %name, "Failed to remove expired export: {}", err);
                }
            })
            .await;
    }

    pub async fn import(&self, request: ImportRequest) -> PortResult<ImportOutcome> {
        let result = self.run_import(request).await;
        match &result {
            Ok(ImportOutcome::Completed(summary)) => {
                let level = if summary.failed.is_empty() && summary.attachments_failed == 0 {
                    NotificationLevel::Success
                } else {
                    NotificationLevel::Warning
                };
                self.notifier.notify(Notification::new(
                    level,
                    format!(
                        "Imported {} documents, updated {}, {} duplicates, {} failed",
                        summary.inserted,
                        summary.updated,
                        summary.duplicates().count(),
                        summary.failed.len()
                    ),
                ));
            }
            Ok(ImportOutcome::LocaleDiffers {
                archive_locale,
                current_locale,
                ..
            }) => self.notifier.notify(Notification::new(
                NotificationLevel::Info,
                format!(
                    "Archive locale '{}' differs from '{}'",
                    archive_locale, current_locale
                ),
            )),
            Err(err) => self.notifier.notify(Notification::new(
                NotificationLevel::Error,
                format!("Import failed: {}", err),
            )),
        }
        result
    }

    async fn run_import(&self, request: ImportRequest) -> PortResult<ImportOutcome> {
        let ImportRequest {
            source,
            format,
            options,
        } = request;

        let (token, contents) = match source {
            ImportSource::Upload {
                path,
                filename,
                mime_type,
            } => {
                let upload = TempPath::new(path);
                let format = match format.as_deref() {
                    Some(name) => self.formats.get(Some(name))?,
                    None => self.formats.detect(&filename, mime_type.as_deref())?,
                };
                let (token, dir) = self.staging.allocate().await?;
                let contents = ArchiveReader::new(format)
                    .read(upload.path(), &dir, ReadOptions::default())
                    .await?;
                (token, contents)
            }
            ImportSource::Staged { token } => {
                let contents = self.staging.take(&token).await?;
                (token, contents)
            }
        };

        self.import_contents(token, contents, &options).await
    }

    async fn import_contents(
        &self,
        token: String,
        contents: ArchiveContents,
        options: &ImportOptions,
    ) -> PortResult<ImportOutcome> {
        let reconciler = self.reconciler();
        let reconciled = match reconciler
            .reconcile(contents.documents.clone(), options)
            .await
        {
            Ok(reconciled) => reconciled,
            Err(err) => {
                self.staging.discard(&token).await?;
                return Err(err);
            }
        };

        match reconciled {
            Reconciled::LocaleDiffers { archive_locale } => {
                self.staging.stash(&token, &contents).await?;
                info!(token = %token, archive_locale = %archive_locale, "Import waiting for locale decision");
                Ok(ImportOutcome::LocaleDiffers {
                    token,
                    archive_locale,
                    current_locale: options.locale.clone(),
                })
            }
            Reconciled::Done(mut summary) => {
                let (imported, failed) = reconciler
                    .import_attachments(self.attachments.as_ref(), &contents)
                    .await;
                summary.attachments_imported = imported;
                summary.attachments_failed = failed;

                if summary.has_duplicates() {
                    self.staging.stash(&token, &contents).await?;
                    summary.duplicates_token = Some(token);
                } else {
                    self.staging.discard(&token).await?;
                }
                Ok(ImportOutcome::Completed(summary))
            }
        }
    }

    /// Apply a staged import's content to the chosen duplicate identities.
    pub async fn overwrite_duplicates(
        &self,
        token: &str,
        apos_doc_ids: &[String],
        options: &ImportOptions,
    ) -> PortResult<ImportSummary> {
        let contents = self.staging.take(token).await?;
        let summary = self
            .reconciler()
            .overwrite(contents.documents, apos_doc_ids, options)
            .await?;
        self.staging.discard(token).await?;

        let level = if summary.failed.is_empty() {
            NotificationLevel::Success
        } else {
            NotificationLevel::Warning
        };
        self.notifier.notify(Notification::new(
            level,
            format!(
                "Overwrote {} documents, {} failed",
                summary.updated + summary.inserted,
                summary.failed.len()
            ),
        ));
        Ok(summary)
    }

    /// Abort pending deferred cleanups.
    pub async fn shutdown(&self) {
        self.cleanup.shutdown().await;
    }

    fn resolver(&self) -> RelatedResolver<'_> {
        RelatedResolver::new(
            self.store.as_ref(),
            self.registry.as_ref(),
            self.policy.as_ref(),
        )
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            self.store.as_ref(),
            self.registry.as_ref(),
            self.policy.as_ref(),
        )
    }
}
