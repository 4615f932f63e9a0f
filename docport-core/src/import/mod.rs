//! Import side: reconciling archive documents against the store, and the
//! staging area that keeps extracted archives while the user decides.

use serde::{Deserialize, Serialize};

pub mod reconcile;
pub mod staging;

pub use reconcile::{Reconciled, Reconciler};
pub use staging::StagingArea;

/// Field recording the locale a document was imported from.
pub const IMPORTED_FROM_LOCALE: &str = "importedFromLocale";
/// Column suffix naming the update key, e.g. `title:key`.
pub const KEY_SUFFIX: &str = ":key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Locale the import writes into.
    pub locale: String,
    /// Keep only draft rows; identities present only as published become drafts.
    #[serde(default)]
    pub drafts_only: bool,
    /// Field whose value identifies the target document instead of its identity.
    #[serde(default)]
    pub update_key: Option<String>,
    /// Import documents from another locale into `locale`.
    #[serde(default)]
    pub override_locale: bool,
}

impl ImportOptions {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            drafts_only: false,
            update_key: None,
            override_locale: false,
        }
    }

    pub fn drafts_only(mut self) -> Self {
        self.drafts_only = true;
        self
    }

    pub fn with_update_key(mut self, field: impl Into<String>) -> Self {
        self.update_key = Some(field.into());
        self
    }

    pub fn override_locale(mut self) -> Self {
        self.override_locale = true;
        self
    }
}

/// How one imported identity relates to what the store already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateStatus {
    New,
    DuplicateSameLocale,
    DuplicateCrossLocale,
    KeyMatched,
}

impl DuplicateStatus {
    /// Identity duplicates wait for an explicit overwrite decision.
    pub fn awaits_decision(&self) -> bool {
        matches!(
            self,
            DuplicateStatus::DuplicateSameLocale | DuplicateStatus::DuplicateCrossLocale
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub apos_doc_id: String,
    pub doc_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: DuplicateStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
}

/// Counts are per store row: a new identity imported in both modes counts
/// as two inserts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub resolutions: Vec<Resolution>,
    pub failed: Vec<FailedItem>,
    pub attachments_imported: usize,
    pub attachments_failed: usize,
    /// Set when identity duplicates were found; pass it to
    /// `overwrite_duplicates` to apply them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates_token: Option<String>,
}

impl ImportSummary {
    pub fn duplicates(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions
            .iter()
            .filter(|resolution| resolution.status.awaits_decision())
    }

    pub fn has_duplicates(&self) -> bool {
        self.duplicates().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ImportOutcome {
    Completed(ImportSummary),
    /// Nothing was written. Re-run with `override_locale` against the staged
    /// `token` to import into the current locale.
    LocaleDiffers {
        token: String,
        archive_locale: String,
        current_locale: String,
    },
}
