//! Schema-driven traversal of a document's field tree.
//!
//! The walker yields every nested value of the target kind, descending into
//! `array`, `object` and `area` fields. Descents are counted on the walker
//! itself; once the count passes [`MAX_RECURSION`] further descents are
//! skipped while everything already collected is still returned. Reusing one
//! walker across several documents makes the bound cumulative.

use serde_json::{Map, Value};

use crate::rich_text::{self, RichTextRefs};
use crate::schema::{Field, FieldKind, SchemaRegistry};

/// Ceiling on composite descents per walker. Not configurable.
pub const MAX_RECURSION: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkTarget {
    Relationship,
    Attachment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Discovered {
    Relationship {
        field: String,
        with_type: String,
        ids: Vec<String>,
    },
    Attachment(Value),
    /// Only produced when walking for relationships.
    RichText(RichTextRefs),
}

pub struct SchemaWalker<'a> {
    registry: &'a dyn SchemaRegistry,
    target: WalkTarget,
    recursions: usize,
}

impl<'a> SchemaWalker<'a> {
    pub fn new(registry: &'a dyn SchemaRegistry, target: WalkTarget) -> Self {
        Self {
            registry,
            target,
            recursions: 0,
        }
    }

    pub fn recursions(&self) -> usize {
        self.recursions
    }

    /// Count one descent. Returns false once the ceiling has been passed.
    pub fn descend(&mut self) -> bool {
        self.recursions += 1;
        self.recursions <= MAX_RECURSION
    }

    pub fn walk(&mut self, value: &Map<String, Value>, schema: &[Field]) -> Vec<Discovered> {
        let mut found = Vec::new();
        self.visit(value, schema, &mut found);
        found
    }

    fn visit(&mut self, value: &Map<String, Value>, schema: &[Field], found: &mut Vec<Discovered>) {
        for field in schema {
            match &field.kind {
                FieldKind::Array { schema: nested } => {
                    let items = match value.get(&field.name).and_then(Value::as_array) {
                        Some(items) if !items.is_empty() => items,
                        _ => continue,
                    };
                    if !self.descend() {
                        continue;
                    }
                    for item in items.iter().filter_map(Value::as_object) {
                        self.visit(item, nested, found);
                    }
                }
                FieldKind::Object { schema: nested } => {
                    let Some(object) = value.get(&field.name).and_then(Value::as_object) else {
                        continue;
                    };
                    if !self.descend() {
                        continue;
                    }
                    self.visit(object, nested, found);
                }
                FieldKind::Area { .. } => {
                    let widgets = match value
                        .get(&field.name)
                        .and_then(|area| area.get("items"))
                        .and_then(Value::as_array)
                    {
                        Some(widgets) if !widgets.is_empty() => widgets,
                        _ => continue,
                    };
                    if !self.descend() {
                        continue;
                    }
                    for widget in widgets.iter().filter_map(Value::as_object) {
                        let Some(widget_type) = widget.get("type").and_then(Value::as_str) else {
                            continue;
                        };
                        if let Some(widget_schema) = self.registry.widget_schema(widget_type) {
                            self.visit(widget, widget_schema, found);
                        }
                    }
                }
                FieldKind::Relationship { with_type, .. }
                    if self.target == WalkTarget::Relationship =>
                {
                    let ids = relationship_ids(value, field);
                    if !ids.is_empty() {
                        found.push(Discovered::Relationship {
                            field: field.name.clone(),
                            with_type: with_type.clone(),
                            ids,
                        });
                    }
                }
                FieldKind::Attachment if self.target == WalkTarget::Attachment => {
                    match value.get(&field.name) {
                        Some(attachment) if !attachment.is_null() => {
                            found.push(Discovered::Attachment(attachment.clone()))
                        }
                        _ => {}
                    }
                }
                FieldKind::RichText if self.target == WalkTarget::Relationship => {
                    let refs = rich_text::extract_refs(value, &field.name);
                    if !refs.is_empty() {
                        found.push(Discovered::RichText(refs));
                    }
                }
                _ => {}
            }
        }
    }
}

/// Linked identities come from the storage key; the embedded value is only
/// consulted when the storage key is absent, since it may be unpopulated.
fn relationship_ids(value: &Map<String, Value>, field: &Field) -> Vec<String> {
    if let Some(stored) = value.get(&field.ids_storage()).and_then(Value::as_array) {
        return stored
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    value
        .get(&field.name)
        .and_then(Value::as_array)
        .map(|linked| {
            linked
                .iter()
                .filter_map(|doc| {
                    doc.get("aposDocId")
                        .or_else(|| doc.get("_id"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaCatalog, RICH_TEXT_WIDGET};
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new()
            .with_type(
                "article",
                vec![
                    Field::scalar("title"),
                    Field::relationship("_topics", "topic"),
                    Field::attachment("cover"),
                    Field::array(
                        "links",
                        vec![Field::relationship("_target", "page"), Field::attachment("icon")],
                    ),
                    Field::object("meta", vec![Field::relationship("_author", "author")]),
                    Field::area("main", &[RICH_TEXT_WIDGET, "callout"]),
                ],
            )
            .with_widget("callout", vec![Field::relationship("_topics", "topic")])
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn collects_nested_relationships_in_schema_order() {
        let registry = catalog();
        let doc = object(json!({
            "title": "a",
            "topicsIds": ["t1", "t2"],
            "links": [{ "targetIds": ["p1"] }, { "targetIds": [] }],
            "meta": { "authorIds": ["au1"] },
            "main": { "items": [
                { "type": "callout", "topicsIds": ["t3"] },
                { "type": "unknown-widget", "topicsIds": ["nope"] },
                { "type": RICH_TEXT_WIDGET, "content": "<a href=\"#apostrophe-permalink-d1\">x</a>" }
            ]}
        }));

        let mut walker = SchemaWalker::new(&registry, WalkTarget::Relationship);
        let found = walker.walk(&doc, registry.doc_schema("article").unwrap());

        let ids: Vec<Vec<String>> = found
            .iter()
            .filter_map(|d| match d {
                Discovered::Relationship { ids, .. } => Some(ids.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            ids,
            vec![
                vec!["t1".to_string(), "t2".to_string()],
                vec!["p1".to_string()],
                vec!["au1".to_string()],
                vec!["t3".to_string()],
            ]
        );
        assert!(found
            .iter()
            .any(|d| matches!(d, Discovered::RichText(refs) if refs.doc_ids == vec!["d1"])));
        assert_eq!(walker.recursions(), 3);
    }

    #[test]
    fn populated_value_is_fallback_only() {
        let registry = catalog();
        let doc = object(json!({
            "_topics": [{ "_id": "t9:en:draft", "aposDocId": "t9" }]
        }));
        let mut walker = SchemaWalker::new(&registry, WalkTarget::Relationship);
        let found = walker.walk(&doc, registry.doc_schema("article").unwrap());
        assert_eq!(
            found,
            vec![Discovered::Relationship {
                field: "_topics".to_string(),
                with_type: "topic".to_string(),
                ids: vec!["t9".to_string()],
            }]
        );
    }

    #[test]
    fn collects_attachments_only_when_targeted() {
        let registry = catalog();
        let doc = object(json!({
            "cover": { "_id": "att1", "name": "cover", "extension": "jpg" },
            "links": [{ "icon": { "_id": "att2", "name": "icon", "extension": "png" } }, { "icon": null }],
            "topicsIds": ["t1"]
        }));

        let mut walker = SchemaWalker::new(&registry, WalkTarget::Attachment);
        let found = walker.walk(&doc, registry.doc_schema("article").unwrap());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| matches!(d, Discovered::Attachment(_))));
    }

    #[test]
    fn recursion_ceiling_keeps_shallow_results() {
        let registry = SchemaCatalog::new().with_type(
            "node",
            vec![Field::relationship("_links", "node"), Field::object("child", vec![])],
        );
        // A self-similar chain deeper than the ceiling.
        let mut schema = vec![Field::relationship("_links", "node")];
        let mut value = json!({ "linksIds": ["leaf"] });
        for depth in 0..(MAX_RECURSION + 5) {
            schema = vec![
                Field::relationship("_links", "node"),
                Field::object("child", schema),
            ];
            value = json!({ "linksIds": [format!("d{}", depth)], "child": value });
        }

        let mut walker = SchemaWalker::new(&registry, WalkTarget::Relationship);
        let found = walker.walk(value.as_object().unwrap(), &schema);
        assert_eq!(found.len(), MAX_RECURSION + 1);
        assert!(walker.recursions() > MAX_RECURSION);
        match &found[0] {
            Discovered::Relationship { ids, .. } => {
                assert_eq!(ids, &vec![format!("d{}", MAX_RECURSION + 4)])
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
