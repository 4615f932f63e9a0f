//! Discovery of the documents and attachments reachable from an export's
//! seed documents.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use crate::attachment::AttachmentDescriptor;
use crate::document::Document;
use crate::errors::PortResult;
use crate::policy::ExportPolicy;
use crate::rich_text;
use crate::schema::{normalize_type, Field, FieldKind, SchemaRegistry};
use crate::store::DocumentStore;
use crate::walker::{Discovered, SchemaWalker, WalkTarget, MAX_RECURSION};

pub struct RelatedResolver<'a> {
    store: &'a dyn DocumentStore,
    registry: &'a dyn SchemaRegistry,
    policy: &'a dyn ExportPolicy,
}

impl<'a> RelatedResolver<'a> {
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

    /// Every document reachable from `seeds` through relationships whose
    /// target type is listed in `related_types` and exportable. Seeds are
    /// never part of the result. All modes of a related identity are
    /// returned, in discovery order.
    ///
    /// One walker is shared across the whole resolution: composite fields
    /// and hops into related documents both count toward
    /// [`MAX_RECURSION`], and once it is passed related documents are still
    /// collected but no longer walked.
    pub async fn resolve_related(
        &self,
        seeds: &[Document],
        related_types: &[String],
    ) -> PortResult<Vec<Document>> {
        if related_types.is_empty() {
            return Ok(Vec::new());
        }

        let mut walker = SchemaWalker::new(self.registry, WalkTarget::Relationship);
        let mut visited: HashSet<String> = seeds.iter().map(|doc| doc.id.clone()).collect();
        let mut queue: VecDeque<(Document, bool)> =
            seeds.iter().cloned().map(|doc| (doc, true)).collect();
        let mut related = Vec::new();

        while let Some((doc, is_seed)) = queue.pop_front() {
            if !is_seed && !walker.descend() {
                debug!(id = %doc.id, "Recursion ceiling reached, not walking further");
                continue;
            }

            let ids = self
                .relationship_targets(&mut walker, &doc, related_types)
                .await?;
            if ids.is_empty() {
                continue;
            }

            let fetched = self.store.find_by_apos_doc_ids(&ids, doc.locale()).await?;
            for candidate in fetched {
                if !self.type_allowed(&candidate.doc_type, related_types) {
                    continue;
                }
                if visited.insert(candidate.id.clone()) {
                    related.push(candidate.clone());
                    queue.push_back((candidate, false));
                }
            }
        }

        debug!(
            seeds = seeds.len(),
            related = related.len(),
            recursions = walker.recursions(),
            "Resolved related documents"
        );
        Ok(related)
    }

    /// Content identities `doc` links to through allowed relationships,
    /// including references embedded in rich text.
    async fn relationship_targets(
        &self,
        walker: &mut SchemaWalker<'a>,
        doc: &Document,
        related_types: &[String],
    ) -> PortResult<Vec<String>> {
        let Some(schema) = self.registry.doc_schema(&doc.doc_type) else {
            return Ok(Vec::new());
        };

        let mut pending: VecDeque<Discovered> = walker.walk(&doc.fields, schema).into();
        let mut ids: Vec<String> = Vec::new();

        while let Some(found) = pending.pop_front() {
            match found {
                Discovered::Relationship { with_type, ids: linked, .. } => {
                    if self.type_allowed(&with_type, related_types) {
                        ids.extend(linked);
                    }
                }
                Discovered::RichText(refs) => {
                    let doc_types = self.lookup_types(&refs.doc_ids, doc.locale()).await?;
                    let synthetic = rich_text::synthesize(&refs, &doc_types);
                    pending.extend(walker.walk(&synthetic.document, &synthetic.schema));
                }
                Discovered::Attachment(_) => {}
            }
        }

        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        Ok(ids)
    }

    async fn lookup_types(
        &self,
        apos_doc_ids: &[String],
        locale: Option<&str>,
    ) -> PortResult<HashMap<String, String>> {
        if apos_doc_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs = self.store.find_by_apos_doc_ids(apos_doc_ids, locale).await?;
        Ok(docs
            .into_iter()
            .map(|doc| (doc.apos_doc_id, doc.doc_type))
            .collect())
    }

    fn type_allowed(&self, doc_type: &str, related_types: &[String]) -> bool {
        let normalized = normalize_type(self.registry, doc_type);
        let listed = related_types
            .iter()
            .any(|allowed| allowed == doc_type || *allowed == normalized);
        listed && self.policy.can_export(doc_type)
    }

    /// Metadata for every attachment referenced by `documents`, first
    /// occurrence first. Store metadata wins over the copy embedded in the
    /// document; the embedded copy is used when the store has none.
    pub async fn resolve_attachments(
        &self,
        documents: &[Document],
    ) -> PortResult<Vec<AttachmentDescriptor>> {
        let mut order: Vec<String> = Vec::new();
        let mut embedded: HashMap<String, Option<AttachmentDescriptor>> = HashMap::new();

        for doc in documents {
            let Some(schema) = self.registry.doc_schema(&doc.doc_type) else {
                continue;
            };
            let mut walker = SchemaWalker::new(self.registry, WalkTarget::Attachment);
            for found in walker.walk(&doc.fields, schema) {
                let Discovered::Attachment(value) = found else {
                    continue;
                };
                let Some(id) = value.get("_id").and_then(Value::as_str) else {
                    continue;
                };
                if !embedded.contains_key(id) {
                    order.push(id.to_string());
                    embedded.insert(id.to_string(), AttachmentDescriptor::from_field_value(&value));
                }
            }
        }

        if order.is_empty() {
            return Ok(Vec::new());
        }

        let mut stored: HashMap<String, AttachmentDescriptor> = self
            .store
            .find_attachments(&order)
            .await?
            .into_iter()
            .map(|attachment| (attachment.id.clone(), attachment))
            .collect();

        let mut attachments = Vec::with_capacity(order.len());
        for id in order {
            match stored
                .remove(&id)
                .or_else(|| embedded.remove(&id).flatten())
            {
                Some(attachment) => attachments.push(attachment),
                None => warn!(attachment = %id, "No metadata for referenced attachment"),
            }
        }
        Ok(attachments)
    }

    /// Distinct exportable relationship target types declared by a type's
    /// schema, page types reported as the wildcard page type.
    pub fn related_types(&self, doc_type: &str) -> Vec<String> {
        let mut types = Vec::new();
        if let Some(schema) = self.registry.doc_schema(doc_type) {
            self.collect_types(schema, 0, &mut types);
        }
        types
    }

    fn collect_types(&self, schema: &[Field], depth: usize, types: &mut Vec<String>) {
        if depth > MAX_RECURSION {
            return;
        }
        for field in schema {
            match &field.kind {
                FieldKind::Relationship { with_type, .. } => {
                    let normalized = normalize_type(self.registry, with_type);
                    if self.policy.can_export(with_type) && !types.contains(&normalized) {
                        types.push(normalized);
                    }
                }
                FieldKind::Array { schema } | FieldKind::Object { schema } => {
                    self.collect_types(schema, depth + 1, types);
                }
                FieldKind::Area { widgets } => {
                    for widget in widgets {
                        if let Some(widget_schema) = self.registry.widget_schema(widget) {
                            self.collect_types(widget_schema, depth + 1, types);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Mode;
    use crate::policy::{AllowAll, DenyTypes};
    use crate::schema::{SchemaCatalog, ANY_PAGE_TYPE};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new()
            .with_type("topic", vec![Field::relationship("_topics", "topic")])
            .with_type(
                "article",
                vec![
                    Field::relationship("_topics", "topic"),
                    Field::relationship("_pages", ANY_PAGE_TYPE),
                    Field::relationship("_secrets", "secret"),
                    Field::array("links", vec![Field::relationship("_authors", "author")]),
                ],
            )
            .with_page_type("default-page", vec![])
    }

    fn doc(doc_type: &str, apos_doc_id: &str, mode: Mode, fields: serde_json::Value) -> Document {
        let mut doc = Document::new(doc_type);
        doc.apos_doc_id = apos_doc_id.to_string();
        doc.relocate("en", mode);
        if let serde_json::Value::Object(map) = fields {
            doc.fields = map;
        }
        doc
    }

    #[tokio::test]
    async fn self_reference_terminates() {
        let registry = catalog();
        let topic = doc("topic", "t1", Mode::Draft, json!({ "topicsIds": ["t1"] }));
        let store = MemoryStore::with_documents(vec![
            topic.clone(),
            doc("topic", "t1", Mode::Published, json!({ "topicsIds": ["t1"] })),
        ]);
        let resolver = RelatedResolver::new(&store, &registry, &AllowAll);

        let related = resolver
            .resolve_related(&[topic], &["topic".to_string()])
            .await
            .unwrap();
        // Only the published sibling; the seed itself never comes back.
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, "t1:en:published");
    }

    #[tokio::test]
    async fn filters_by_listed_and_exportable_types() {
        let registry = catalog();
        let article = doc(
            "article",
            "a1",
            Mode::Draft,
            json!({ "topicsIds": ["t1"], "pagesIds": ["p1"], "secretsIds": ["s1"] }),
        );
        let store = MemoryStore::with_documents(vec![
            doc("topic", "t1", Mode::Draft, json!({})),
            doc("default-page", "p1", Mode::Draft, json!({})),
            doc("secret", "s1", Mode::Draft, json!({})),
        ]);
        let policy = DenyTypes::new(["secret"]);
        let resolver = RelatedResolver::new(&store, &registry, &policy);

        let related = resolver
            .resolve_related(
                &[article],
                &[ANY_PAGE_TYPE.to_string(), "secret".to_string()],
            )
            .await
            .unwrap();
        let ids: Vec<_> = related.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["p1:en:draft"]);
    }

    #[tokio::test]
    async fn lists_declared_related_types() {
        let registry = catalog();
        let store = MemoryStore::new();
        let policy = DenyTypes::new(["secret"]);
        let resolver = RelatedResolver::new(&store, &registry, &policy);
        assert_eq!(
            resolver.related_types("article"),
            vec!["topic", ANY_PAGE_TYPE, "author"]
        );
        assert!(resolver.related_types("unknown").is_empty());
    }
}
