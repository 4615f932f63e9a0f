use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PortError;

/// Lifecycle state of a document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Draft,
    Published,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Draft, Mode::Published];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Draft => "draft",
            Mode::Published => "published",
        }
    }

    pub fn other(self) -> Mode {
        match self {
            Mode::Draft => Mode::Published,
            Mode::Published => Mode::Draft,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Mode::Draft),
            "published" => Ok(Mode::Published),
            other => Err(PortError::Validation(format!("unknown mode '{}'", other))),
        }
    }
}

/// A store row in its natural shape. Identity, locale, mode and type are
/// lifted out; everything else stays in `fields` so archives pass rows
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "aposDocId", default, skip_serializing_if = "String::is_empty")]
    pub apos_doc_id: String,
    #[serde(rename = "aposLocale", default, skip_serializing_if = "Option::is_none")]
    pub apos_locale: Option<String>,
    #[serde(rename = "aposMode", default, skip_serializing_if = "Option::is_none")]
    pub apos_mode: Option<Mode>,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Row id shared by the store and archives: `{aposDocId}:{locale}:{mode}`.
pub fn compose_id(apos_doc_id: &str, locale: &str, mode: Mode) -> String {
    format!("{}:{}:{}", apos_doc_id, locale, mode)
}

impl Document {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            apos_doc_id: String::new(),
            apos_locale: None,
            apos_mode: None,
            doc_type: doc_type.into(),
            fields: Map::new(),
        }
    }

    /// Locale part of `aposLocale`.
    pub fn locale(&self) -> Option<&str> {
        self.apos_locale
            .as_deref()
            .and_then(|value| value.split(':').next())
            .filter(|locale| !locale.is_empty())
    }

    /// Mode from `aposMode`, falling back to the suffix of `aposLocale`.
    pub fn mode(&self) -> Option<Mode> {
        self.apos_mode.or_else(|| {
            self.apos_locale
                .as_deref()
                .and_then(|value| value.split(':').nth(1))
                .and_then(|mode| mode.parse().ok())
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Point this row at `locale`/`mode`, rebuilding `_id` and `aposLocale`.
    pub fn relocate(&mut self, locale: &str, mode: Mode) {
        self.apos_locale = Some(format!("{}:{}", locale, mode));
        self.apos_mode = Some(mode);
        if !self.apos_doc_id.is_empty() {
            self.id = compose_id(&self.apos_doc_id, locale, mode);
        }
    }

    /// Same content, other mode.
    pub fn sibling(&self, mode: Mode) -> Document {
        let mut sibling = self.clone();
        let locale = self.locale().unwrap_or_default().to_string();
        sibling.relocate(&locale, mode);
        sibling
    }
}
