//! Decides, per imported identity, whether to insert, update, or hold back
//! for a user decision, and performs the resulting store writes.
//!
//! Rows are grouped by content identity first, so draft and published rows
//! are always handled as one unit: a match found through either mode
//! anchors writes to both. A failure inside one unit is recorded and the
//! batch moves on.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::attachment::AttachmentDescriptor;
use crate::document::{Document, Mode};
use crate::errors::{PortError, PortResult};
use crate::formats::ArchiveContents;
use crate::policy::ExportPolicy;
use crate::schema::SchemaRegistry;
use crate::store::{AttachmentStorage, DocumentStore};

use super::{
    DuplicateStatus, FailedItem, ImportOptions, ImportSummary, Resolution, IMPORTED_FROM_LOCALE,
    KEY_SUFFIX,
};

/// Tree position fields owned by the target store.
const POSITION_FIELDS: [&str; 3] = ["path", "rank", "level"];

static SLUG_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

pub enum Reconciled {
    Done(ImportSummary),
    /// The archive holds documents of another locale and no override was
    /// requested. Nothing was written.
    LocaleDiffers { archive_locale: String },
}

/// All rows of one content identity.
#[derive(Debug, Clone)]
struct ImportUnit {
    apos_doc_id: String,
    doc_type: String,
    rows: BTreeMap<Mode, Document>,
    cross_locale: bool,
}

impl ImportUnit {
    fn title(&self) -> Option<String> {
        self.rows
            .values()
            .find_map(|row| row.title().map(str::to_string))
    }

    /// The imported row for `mode`, or the other mode's row when absent.
    fn row_for(&self, mode: Mode) -> Option<&Document> {
        self.rows.get(&mode).or_else(|| self.rows.get(&mode.other()))
    }

    fn label(&self) -> String {
        if self.apos_doc_id.is_empty() {
            self.title().unwrap_or_else(|| self.doc_type.clone())
        } else {
            self.apos_doc_id.clone()
        }
    }
}

#[derive(Default)]
struct Written {
    inserted: usize,
    updated: usize,
}

pub struct Reconciler<'a> {
    store: &'a dyn DocumentStore,
    registry: &'a dyn SchemaRegistry,
    policy: &'a dyn ExportPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        registry: &'a dyn SchemaRegistry,
        policy: &'a dyn ExportPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
        }
    }

    pub async fn reconcile(
        &self,
        documents: Vec<Document>,
        options: &ImportOptions,
    ) -> PortResult<Reconciled> {
        let units = match self.prepare(documents, options) {
            Ok(units) => units,
            Err(archive_locale) => return Ok(Reconciled::LocaleDiffers { archive_locale }),
        };

        let mut summary = ImportSummary::default();
        for unit in units {
            let doc_type = unit.doc_type.clone();
            match self.import_unit(&unit, options).await {
                Ok((resolution, written)) => {
                    summary.inserted += written.inserted;
                    summary.updated += written.updated;
                    summary.resolutions.push(resolution);
                }
                Err(err) => {
                    warn!(id = %unit.label(), doc_type = %doc_type, "Failed to import document: {}", err);
                    summary.failed.push(FailedItem {
                        id: unit.label(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            duplicates = summary.duplicates().count(),
            failed = summary.failed.len(),
            "Reconciled import"
        );
        Ok(Reconciled::Done(summary))
    }

    /// Apply the imported content of the chosen duplicate identities to both
    /// of their mode rows.
    pub async fn overwrite(
        &self,
        documents: Vec<Document>,
        apos_doc_ids: &[String],
        options: &ImportOptions,
    ) -> PortResult<ImportSummary> {
        let chosen: HashSet<&str> = apos_doc_ids.iter().map(String::as_str).collect();
        let options = ImportOptions {
            override_locale: true,
            ..options.clone()
        };
        let units = self
            .prepare(documents, &options)
            .unwrap_or_default()
            .into_iter()
            .filter(|unit| chosen.contains(unit.apos_doc_id.as_str()));

        let mut summary = ImportSummary::default();
        for unit in units {
            match self.overwrite_unit(&unit, &options).await {
                Ok(written) => {
                    summary.inserted += written.inserted;
                    summary.updated += written.updated;
                }
                Err(err) => {
                    warn!(id = %unit.apos_doc_id, "Failed to overwrite document: {}", err);
                    summary.failed.push(FailedItem {
                        id: unit.apos_doc_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    async fn overwrite_unit(&self, unit: &ImportUnit, options: &ImportOptions) -> PortResult<Written> {
        self.check_importable(&unit.doc_type)?;
        let existing = self
            .store
            .find_by_apos_doc_ids(&[unit.apos_doc_id.clone()], Some(&options.locale))
            .await?;
        self.write_pair(unit, &unit.apos_doc_id, existing, options)
            .await
    }

    /// Upsert attachment metadata and hand staged payloads to storage.
    /// Returns (imported, failed).
    pub async fn import_attachments(
        &self,
        storage: &dyn AttachmentStorage,
        contents: &ArchiveContents,
    ) -> (usize, usize) {
        let mut imported = 0;
        let mut failed = 0;
        for attachment in &contents.attachments {
            match self.import_attachment(storage, attachment, contents).await {
                Ok(()) => imported += 1,
                Err(err) => {
                    warn!(attachment = %attachment.id, "Failed to import attachment: {}", err);
                    failed += 1;
                }
            }
        }
        (imported, failed)
    }

    async fn import_attachment(
        &self,
        storage: &dyn AttachmentStorage,
        attachment: &AttachmentDescriptor,
        contents: &ArchiveContents,
    ) -> PortResult<()> {
        let source = contents.staged.get(&attachment.id).ok_or_else(|| {
            PortError::NotFound(format!("payload for attachment {}", attachment.id))
        })?;
        storage.store(attachment, source).await?;
        self.store.upsert_attachment(attachment.clone()).await
    }

    /// Group rows into identity units after the locale check. `Err` carries
    /// the foreign locale when one is found and no override was requested.
    fn prepare(
        &self,
        documents: Vec<Document>,
        options: &ImportOptions,
    ) -> Result<Vec<ImportUnit>, String> {
        let mut units: IndexMap<String, ImportUnit> = IndexMap::new();

        for (index, mut doc) in documents.into_iter().enumerate() {
            let mut cross_locale = false;
            if let Some(locale) = doc.locale().map(str::to_string) {
                if locale != options.locale {
                    if !options.override_locale {
                        return Err(locale);
                    }
                    doc.set_field(IMPORTED_FROM_LOCALE, Value::String(locale));
                    cross_locale = true;
                }
            }

            let group = if doc.apos_doc_id.is_empty() {
                format!("#row-{}", index)
            } else {
                doc.apos_doc_id.clone()
            };
            let unit = units.entry(group).or_insert_with(|| ImportUnit {
                apos_doc_id: doc.apos_doc_id.clone(),
                doc_type: doc.doc_type.clone(),
                rows: BTreeMap::new(),
                cross_locale: false,
            });
            unit.cross_locale |= cross_locale;

            match doc.mode() {
                Some(mode) => {
                    unit.rows.insert(mode, doc);
                }
                None => {
                    for mode in Mode::ALL {
                        unit.rows.entry(mode).or_insert_with(|| doc.clone());
                    }
                }
            }
        }

        let mut units: Vec<ImportUnit> = units.into_values().collect();
        if options.drafts_only {
            for unit in &mut units {
                if let Some(published) = unit.rows.remove(&Mode::Published) {
                    unit.rows.entry(Mode::Draft).or_insert(published);
                }
            }
        }
        Ok(units)
    }

    fn check_importable(&self, doc_type: &str) -> PortResult<()> {
        if self.policy.can_import(doc_type) {
            Ok(())
        } else {
            Err(PortError::Forbidden {
                doc_type: doc_type.to_string(),
            })
        }
    }

    async fn import_unit(
        &self,
        unit: &ImportUnit,
        options: &ImportOptions,
    ) -> PortResult<(Resolution, Written)> {
        self.check_importable(&unit.doc_type)?;
        let locale = options.locale.as_str();

        let resolution = |status| Resolution {
            apos_doc_id: unit.apos_doc_id.clone(),
            doc_type: unit.doc_type.clone(),
            title: unit.title(),
            status,
        };

        if let Some((field, value)) = key_of(unit, options) {
            let matches = self
                .store
                .find_by_field(&unit.doc_type, &field, &value, locale)
                .await?;
            if let Some(matched) = matches.first() {
                let target = matched.apos_doc_id.clone();
                debug!(key = %field, target = %target, "Import matched by update key");
                let existing = self
                    .store
                    .find_by_apos_doc_ids(&[target.clone()], Some(locale))
                    .await?;
                let written = self.write_pair(unit, &target, existing, options).await?;
                let mut resolution = resolution(DuplicateStatus::KeyMatched);
                resolution.apos_doc_id = target;
                return Ok((resolution, written));
            }
            debug!(key = %field, "Update key matched nothing, falling back to identity");
        }

        if !unit.apos_doc_id.is_empty() {
            let existing = self
                .store
                .find_by_apos_doc_ids(&[unit.apos_doc_id.clone()], Some(locale))
                .await?;
            if !existing.is_empty() {
                let status = if unit.cross_locale {
                    DuplicateStatus::DuplicateCrossLocale
                } else {
                    DuplicateStatus::DuplicateSameLocale
                };
                return Ok((resolution(status), Written::default()));
            }
        }

        let apos_doc_id = if unit.apos_doc_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            unit.apos_doc_id.clone()
        };
        let written = self.insert_new(unit, &apos_doc_id, options).await?;
        let mut resolution = resolution(DuplicateStatus::New);
        resolution.apos_doc_id = apos_doc_id;
        Ok((resolution, written))
    }

    /// Update every existing mode row of `target` with the imported content,
    /// and insert modes the import carries but the store lacks. With
    /// `drafts_only` only the draft row is written.
    async fn write_pair(
        &self,
        unit: &ImportUnit,
        target: &str,
        existing: Vec<Document>,
        options: &ImportOptions,
    ) -> PortResult<Written> {
        let mut written = Written::default();
        let by_mode: BTreeMap<Mode, Document> = existing
            .into_iter()
            .filter_map(|doc| doc.mode().map(|mode| (mode, doc)))
            .collect();

        for mode in Mode::ALL {
            // Drafts-only imports never touch the published row.
            if options.drafts_only && mode == Mode::Published {
                continue;
            }
            let Some(imported) = unit.row_for(mode) else {
                continue;
            };
            match by_mode.get(&mode) {
                Some(current) => {
                    self.store.update(merge(current, imported)).await?;
                    written.updated += 1;
                }
                None if unit.rows.contains_key(&mode) => {
                    let doc = self.new_row(imported, target, &options.locale, mode);
                    self.insert_row(doc, &options.locale, mode).await?;
                    written.inserted += 1;
                }
                None => {}
            }
        }
        Ok(written)
    }

    async fn insert_new(
        &self,
        unit: &ImportUnit,
        apos_doc_id: &str,
        options: &ImportOptions,
    ) -> PortResult<Written> {
        let mut written = Written::default();
        for (mode, row) in &unit.rows {
            let doc = self.new_row(row, apos_doc_id, &options.locale, *mode);
            self.insert_row(doc, &options.locale, *mode).await?;
            written.inserted += 1;
        }
        Ok(written)
    }

    fn new_row(&self, row: &Document, apos_doc_id: &str, locale: &str, mode: Mode) -> Document {
        let mut doc = row.clone();
        doc.apos_doc_id = apos_doc_id.to_string();
        doc.relocate(locale, mode);
        strip_key_columns(&mut doc);

        let has_slug = doc
            .field("slug")
            .and_then(Value::as_str)
            .map_or(false, |slug| !slug.is_empty());
        if !has_slug {
            let base = slugify(doc.title().unwrap_or(apos_doc_id));
            let slug = if self.registry.is_page_type(&doc.doc_type) {
                format!("/{}", base)
            } else {
                base
            };
            doc.set_field("slug", Value::String(slug));
        }
        doc
    }

    /// Pages go under the home page of the same locale and mode.
    async fn insert_row(&self, mut doc: Document, locale: &str, mode: Mode) -> PortResult<()> {
        if self.registry.is_page_type(&doc.doc_type) {
            if let Some(home) = self.store.home_page(locale, mode).await? {
                for field in POSITION_FIELDS {
                    doc.fields.remove(field);
                }
                self.store.insert_last_child(doc, &home).await?;
                return Ok(());
            }
            warn!(locale, mode = %mode, "No home page to anchor imported page");
        }
        self.store.insert(doc).await?;
        Ok(())
    }
}

/// The update key field and its non-empty value, if the unit has one.
fn key_of(unit: &ImportUnit, options: &ImportOptions) -> Option<(String, Value)> {
    let row = unit.row_for(Mode::Draft)?;
    let field = options.update_key.clone().or_else(|| {
        row.fields
            .keys()
            .find_map(|name| name.strip_suffix(KEY_SUFFIX).map(str::to_string))
    })?;

    let value = row
        .field(&format!("{}{}", field, KEY_SUFFIX))
        .filter(|value| !is_empty_key(value))
        .or_else(|| row.field(&field))
        .filter(|value| !is_empty_key(value))?
        .clone();
    Some((field, value))
}

/// Only a truly empty value counts as "no key"; whitespace is kept as-is.
fn is_empty_key(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn strip_key_columns(doc: &mut Document) {
    doc.fields.retain(|name, _| !name.ends_with(KEY_SUFFIX));
}

/// Existing row with the imported content laid over it. Identity, locale,
/// mode and tree position stay those of the existing row.
fn merge(existing: &Document, imported: &Document) -> Document {
    let mut merged = existing.clone();
    for (name, value) in &imported.fields {
        if name.ends_with(KEY_SUFFIX) || POSITION_FIELDS.contains(&name.as_str()) {
            continue;
        }
        merged.fields.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    SLUG_SEPARATOR_RE
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}
