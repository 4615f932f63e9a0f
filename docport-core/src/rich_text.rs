//! Inline references embedded in rich-text widgets.
//!
//! Rich text links to documents and embeds images outside the schema shape.
//! This adapter pulls those references out and turns them into an ordinary
//! relationship-only document + schema, so the walker treats them like any
//! declared relationship.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::schema::{Field, FieldKind, IMAGE_TYPE};

static PERMALINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#apostrophe-permalink-([A-Za-z0-9_-]+)").expect("valid regex"));
static IMAGE_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/api/v1/@apostrophecms/image/([A-Za-z0-9_-]+)/src").expect("valid regex")
});

/// Content identities referenced from one rich-text widget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RichTextRefs {
    pub doc_ids: Vec<String>,
    pub image_ids: Vec<String>,
}

impl RichTextRefs {
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty() && self.image_ids.is_empty()
    }
}

/// Collect references from the widget's stored id lists and from the markup
/// in `content_field`.
pub fn extract_refs(widget: &Map<String, Value>, content_field: &str) -> RichTextRefs {
    let markup = widget
        .get(content_field)
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut doc_ids = string_list(widget.get("permalinkIds"));
    doc_ids.extend(capture_all(&PERMALINK_RE, markup));
    let mut image_ids = string_list(widget.get("imageIds"));
    image_ids.extend(capture_all(&IMAGE_SRC_RE, markup));

    RichTextRefs {
        doc_ids: dedupe(doc_ids),
        image_ids: dedupe(image_ids),
    }
}

/// A transient document/schema pair carrying one relationship field per
/// referenced type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticRelations {
    pub document: Map<String, Value>,
    pub schema: Vec<Field>,
}

/// `doc_types` maps referenced identities to their type; identities with no
/// known type are dropped.
pub fn synthesize(refs: &RichTextRefs, doc_types: &HashMap<String, String>) -> SyntheticRelations {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    let mut push = |doc_type: &str, id: &str| match grouped.iter_mut().find(|(t, _)| t == doc_type) {
        Some((_, ids)) => ids.push(id.to_string()),
        None => grouped.push((doc_type.to_string(), vec![id.to_string()])),
    };

    for id in &refs.doc_ids {
        if let Some(doc_type) = doc_types.get(id) {
            push(doc_type, id);
        }
    }
    for id in &refs.image_ids {
        push(IMAGE_TYPE, id);
    }

    let mut synthetic = SyntheticRelations::default();
    for (doc_type, ids) in grouped {
        let storage = format!("{}Ids", doc_type);
        synthetic.document.insert(
            storage.clone(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
        synthetic.schema.push(Field::new(
            format!("_{}", doc_type),
            FieldKind::Relationship {
                with_type: doc_type,
                ids_storage: Some(storage),
            },
        ));
    }
    synthetic
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn capture_all(re: &Regex, haystack: &str) -> Vec<String> {
    re.captures_iter(haystack)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn extracts_markup_and_stored_ids() {
        let widget = widget(json!({
            "type": "@apostrophecms/rich-text",
            "content": "<p><a href=\"#apostrophe-permalink-doc1?updateTitle=1\">x</a></p>\
                        <figure><img src=\"/api/v1/@apostrophecms/image/img1/src\" /></figure>\
                        <a href=\"#apostrophe-permalink-doc2\">y</a>",
            "permalinkIds": ["doc1"],
            "imageIds": ["img2"]
        }));

        let refs = extract_refs(&widget, "content");
        assert_eq!(refs.doc_ids, vec!["doc1", "doc2"]);
        assert_eq!(refs.image_ids, vec!["img2", "img1"]);
    }

    #[test]
    fn plain_text_has_no_refs() {
        let refs = extract_refs(&widget(json!({ "content": "<p>hello</p>" })), "content");
        assert!(refs.is_empty());
    }

    #[test]
    fn synthesizes_one_field_per_type() {
        let refs = RichTextRefs {
            doc_ids: vec!["a".into(), "b".into(), "ghost".into()],
            image_ids: vec!["i".into()],
        };
        let types: HashMap<String, String> = [
            ("a".to_string(), "topic".to_string()),
            ("b".to_string(), "topic".to_string()),
        ]
        .into_iter()
        .collect();

        let synthetic = synthesize(&refs, &types);
        assert_eq!(synthetic.schema.len(), 2);
        assert_eq!(synthetic.schema[0].ids_storage(), "topicIds");
        assert_eq!(synthetic.document["topicIds"], json!(["a", "b"]));
        assert_eq!(
            synthetic.document[&format!("{}Ids", IMAGE_TYPE)],
            json!(["i"])
        );
    }
}
