use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Directory prefix for attachment payloads inside container archives.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Attachment metadata row. Unknown keys pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub extension: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttachmentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extension: extension.into(),
            extra: Map::new(),
        }
    }

    /// Build a descriptor from an attachment field value as embedded in a document.
    pub fn from_field_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// `{id}-{name}.{extension}`
    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.id, self.name, self.extension)
    }

    /// Entry path inside a container archive.
    pub fn archive_path(&self) -> String {
        format!("{}/{}", ATTACHMENTS_DIR, self.file_name())
    }
}

/// A file name is safe to stage when it cannot escape its directory.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
