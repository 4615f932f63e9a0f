//! Field schemas for document and widget types.
//!
//! The schema registry is owned by the host platform; [`SchemaCatalog`] is a
//! loadable, in-memory registry for tools and tests.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{PortError, PortResult};

/// Wildcard type name standing in for every concrete page type.
pub const ANY_PAGE_TYPE: &str = "@apostrophecms/any-page-type";
/// Piece type referenced by images embedded in rich text.
pub const IMAGE_TYPE: &str = "@apostrophecms/image";
/// Widget type whose content carries inline document references.
pub const RICH_TEXT_WIDGET: &str = "@apostrophecms/rich-text";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldKind {
    Relationship {
        #[serde(rename = "withType")]
        with_type: String,
        #[serde(rename = "idsStorage", default, skip_serializing_if = "Option::is_none")]
        ids_storage: Option<String>,
    },
    Attachment,
    Array {
        #[serde(default)]
        schema: Vec<Field>,
    },
    Object {
        #[serde(default)]
        schema: Vec<Field>,
    },
    Area {
        #[serde(default)]
        widgets: Vec<String>,
    },
    RichText,
    #[serde(other)]
    Scalar,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn relationship(name: impl Into<String>, with_type: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Relationship {
                with_type: with_type.into(),
                ids_storage: None,
            },
        )
    }

    pub fn attachment(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Attachment)
    }

    pub fn array(name: impl Into<String>, schema: Vec<Field>) -> Self {
        Self::new(name, FieldKind::Array { schema })
    }

    pub fn object(name: impl Into<String>, schema: Vec<Field>) -> Self {
        Self::new(name, FieldKind::Object { schema })
    }

    pub fn area(name: impl Into<String>, widgets: &[&str]) -> Self {
        Self::new(
            name,
            FieldKind::Area {
                widgets: widgets.iter().map(|w| w.to_string()).collect(),
            },
        )
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar)
    }

    /// Key on the owning document holding linked identities. Relationship
    /// fields are named `_things`, their ids live in `thingsIds`.
    pub fn ids_storage(&self) -> String {
        match &self.kind {
            FieldKind::Relationship {
                ids_storage: Some(storage),
                ..
            } => storage.clone(),
            _ => format!("{}Ids", self.name.trim_start_matches('_')),
        }
    }
}

pub trait SchemaRegistry: Send + Sync {
    fn doc_schema(&self, doc_type: &str) -> Option<&[Field]>;
    fn widget_schema(&self, widget_type: &str) -> Option<&[Field]>;
    fn is_page_type(&self, doc_type: &str) -> bool;
}

/// Replace concrete page types with the wildcard page type.
pub fn normalize_type(registry: &dyn SchemaRegistry, doc_type: &str) -> String {
    if registry.is_page_type(doc_type) {
        ANY_PAGE_TYPE.to_string()
    } else {
        doc_type.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    #[serde(default)]
    pub page: bool,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub types: IndexMap<String, TypeSchema>,
    #[serde(default)]
    pub widgets: IndexMap<String, Vec<Field>>,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        let mut widgets = IndexMap::new();
        widgets.insert(
            RICH_TEXT_WIDGET.to_string(),
            vec![Field::new("content", FieldKind::RichText)],
        );
        Self {
            types: IndexMap::new(),
            widgets,
        }
    }
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: &str, fields: Vec<Field>) -> Self {
        self.types.insert(
            name.to_string(),
            TypeSchema {
                page: false,
                fields,
            },
        );
        self
    }

    pub fn with_page_type(mut self, name: &str, fields: Vec<Field>) -> Self {
        self.types
            .insert(name.to_string(), TypeSchema { page: true, fields });
        self
    }

    pub fn with_widget(mut self, name: &str, fields: Vec<Field>) -> Self {
        self.widgets.insert(name.to_string(), fields);
        self
    }

    /// Load a catalog from `.yaml`/`.yml` or `.json`. The rich-text widget is
    /// always registered, even when the file omits it.
    pub fn load(path: impl AsRef<Path>) -> PortResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let mut catalog: SchemaCatalog = if is_json {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml::from_str(&raw).map_err(|err| {
                PortError::Validation(format!("invalid schema file {}: {}", path.display(), err))
            })?
        };
        catalog
            .widgets
            .entry(RICH_TEXT_WIDGET.to_string())
            .or_insert_with(|| vec![Field::new("content", FieldKind::RichText)]);
        Ok(catalog)
    }
}

impl SchemaRegistry for SchemaCatalog {
    fn doc_schema(&self, doc_type: &str) -> Option<&[Field]> {
        self.types.get(doc_type).map(|schema| schema.fields.as_slice())
    }

    fn widget_schema(&self, widget_type: &str) -> Option<&[Field]> {
        self.widgets.get(widget_type).map(Vec::as_slice)
    }

    fn is_page_type(&self, doc_type: &str) -> bool {
        self.types
            .get(doc_type)
            .map(|schema| schema.page)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_storage_defaults_from_field_name() {
        assert_eq!(Field::relationship("_topics", "topic").ids_storage(), "topicsIds");

        let explicit = Field::new(
            "_related",
            FieldKind::Relationship {
                with_type: "topic".to_string(),
                ids_storage: Some("linked".to_string()),
            },
        );
        assert_eq!(explicit.ids_storage(), "linked");
    }

    #[test]
    fn parses_yaml_catalog() {
        let yaml = r#"
types:
  topic:
    fields:
      - name: title
        type: string
      - name: _topics
        type: relationship
        withType: topic
  default-page:
    page: true
    fields:
      - name: main
        type: area
        widgets: ["@apostrophecms/rich-text"]
widgets:
  gallery:
    - name: items
      type: array
      schema:
        - name: image
          type: attachment
"#;
        let catalog: SchemaCatalog = serde_yaml::from_str(yaml).unwrap();
        let topic = catalog.doc_schema("topic").unwrap();
        assert_eq!(topic[0].kind, FieldKind::Scalar);
        assert_eq!(
            topic[1].kind,
            FieldKind::Relationship {
                with_type: "topic".to_string(),
                ids_storage: None
            }
        );
        assert!(catalog.is_page_type("default-page"));
        assert!(!catalog.is_page_type("topic"));
        assert!(matches!(
            catalog.widget_schema("gallery").unwrap()[0].kind,
            FieldKind::Array { .. }
        ));
    }

    #[test]
    fn normalizes_page_types() {
        let catalog = SchemaCatalog::new()
            .with_type("topic", vec![])
            .with_page_type("default-page", vec![]);
        assert_eq!(normalize_type(&catalog, "default-page"), ANY_PAGE_TYPE);
        assert_eq!(normalize_type(&catalog, "topic"), "topic");
    }
}
