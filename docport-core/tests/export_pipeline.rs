use std::sync::Arc;
use std::time::Duration;

use docport::formats::{GzipFormat, ZipFormat};
use docport::schema::{IMAGE_TYPE, RICH_TEXT_WIDGET};
use docport::store::{MemoryAttachmentStorage, MemoryStore};
use docport::{
    AllowAll, ArchiveFormat, DenyTypes, ExportRequest, Mode, NotificationLevel, PortError,
    ReadOptions, RelatedResolver,
};
use docport_test_utils::{attachment, sample_catalog, DocBuilder, TestEnv};
use serde_json::json;

fn read_artifact(
    format: &dyn ArchiveFormat,
    env: &TestEnv,
    path: &std::path::Path,
) -> docport::ArchiveContents {
    format
        .read(path, &env.dir.join("read-back"), &ReadOptions::default())
        .unwrap()
}

#[tokio::test]
async fn single_document_without_related_types() {
    let topic = DocBuilder::new("topic", "t1").title("Topic 1").build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![topic.clone()]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["t1:en:draft"]))
        .await
        .unwrap();

    assert_eq!(result.format, "gzip");
    assert!(result.url.starts_with("memory://exports/"));
    assert!(result.artifact.ends_with(".tgz"));
    assert_eq!(result.documents, vec![topic.clone()]);
    assert!(result.attachments.is_empty());
    assert!(!result.attachment_error);
    // The archive is assembled in the work dir and handed off on publish.
    assert!(env.dir.entries("work").unwrap().is_empty());

    let path = env.artifact_file(&result.artifact).await.unwrap();
    let contents = read_artifact(&GzipFormat::new(), &env, &path);
    assert_eq!(contents.documents, vec![topic]);
    assert!(contents.attachments.is_empty());

    let notifications = env.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Success);
    assert_eq!(notifications[0].url.as_deref(), Some(result.url.as_str()));
}

#[tokio::test]
async fn shared_related_document_is_exported_once() {
    let shared = DocBuilder::new("topic", "shared").title("Shared").build();
    let first = DocBuilder::new("article", "a1")
        .field("topicsIds", json!(["shared"]))
        .build();
    let second = DocBuilder::new("article", "a2")
        .field("topicsIds", json!(["shared"]))
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![first, second, shared]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(
            ExportRequest::new(["a1:en:draft", "a2:en:draft"]).with_related_types(["topic"]),
        )
        .await
        .unwrap();

    let ids: Vec<&str> = result.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a1:en:draft", "a2:en:draft", "shared:en:draft"]);
}

#[tokio::test]
async fn related_types_not_requested_are_not_followed() {
    let shared = DocBuilder::new("topic", "shared").build();
    let article = DocBuilder::new("article", "a1")
        .field("topicsIds", json!(["shared"]))
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![article, shared]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["a1:en:draft"]).with_related_types([IMAGE_TYPE]))
        .await
        .unwrap();
    assert_eq!(result.documents.len(), 1);
}

#[tokio::test]
async fn self_reference_appears_once() {
    let topic = DocBuilder::new("topic", "t1")
        .field("topicsIds", json!(["t1"]))
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![topic.clone()]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["t1:en:draft"]).with_related_types(["topic"]))
        .await
        .unwrap();
    assert_eq!(result.documents, vec![topic]);
}

#[tokio::test]
async fn document_without_relations_has_nothing_related() {
    let registry = sample_catalog();
    let topic = DocBuilder::new("topic", "t1").title("plain").build();
    let store = MemoryStore::with_documents(vec![topic.clone()]);
    let resolver = RelatedResolver::new(&store, &registry, &AllowAll);

    let related = resolver
        .resolve_related(&[topic.clone()], &["topic".to_string(), "article".to_string()])
        .await
        .unwrap();
    let attachments = resolver.resolve_attachments(&[topic]).await.unwrap();
    assert!(related.is_empty());
    assert!(attachments.is_empty());
}

#[tokio::test]
async fn attachment_fetch_failure_still_produces_archive() {
    let (cover, cover_value) = attachment("att1", "cover", "jpg");
    let (icon, icon_value) = attachment("att2", "icon", "png");
    let article = DocBuilder::new("article", "a1")
        .title("With attachments")
        .field("cover", cover_value)
        .field(
            "main",
            json!({ "items": [{ "type": "callout", "icon": icon_value }] }),
        )
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![article]).with_attachments(vec![cover, icon]),
        MemoryAttachmentStorage::new()
            .with_blob("att2", b"icon-bytes".to_vec())
            .failing_on("att1"),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["a1:en:draft"]))
        .await
        .unwrap();
    assert!(result.attachment_error);
    assert_eq!(result.failed_attachments, vec!["att1"]);
    assert_eq!(result.attachments.len(), 2);

    let path = env.artifact_file(&result.artifact).await.unwrap();
    let contents = read_artifact(&GzipFormat::new(), &env, &path);
    assert_eq!(contents.documents.len(), 1);
    assert_eq!(contents.attachments.len(), 2);
    assert_eq!(contents.staged.len(), 1);
    let staged = contents.staged.get("att2").unwrap();
    assert_eq!(std::fs::read(staged).unwrap(), b"icon-bytes");

    let last = env.notifier.notifications().pop().unwrap();
    assert_eq!(last.level, NotificationLevel::Warning);
}

#[tokio::test]
async fn rich_text_references_are_followed() {
    let (image_file, image_value) = attachment("att9", "photo", "jpg");
    let article = DocBuilder::new("article", "a1")
        .field(
            "main",
            json!({ "items": [{
                "type": RICH_TEXT_WIDGET,
                "content": "<a href=\"#apostrophe-permalink-t2\">t2</a>\
                            <img src=\"/api/v1/@apostrophecms/image/img1/src\">"
            }]}),
        )
        .build();
    let topic = DocBuilder::new("topic", "t2").build();
    let image = DocBuilder::new(IMAGE_TYPE, "img1")
        .field("attachment", image_value)
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![article, topic, image]),
        MemoryAttachmentStorage::new().with_blob("att9", b"jpeg".to_vec()),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["a1:en:draft"]).with_related_types(["topic", IMAGE_TYPE]))
        .await
        .unwrap();

    let ids: Vec<&str> = result.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a1:en:draft", "t2:en:draft", "img1:en:draft"]);
    assert_eq!(result.attachments, vec![image_file]);
    assert!(!result.attachment_error);
}

#[tokio::test]
async fn container_formats_round_trip() {
    let (descriptor, cover_value) = attachment("att1", "cover", "jpg");
    let (draft, published) = DocBuilder::new("article", "a1")
        .title("Round trip")
        .field("tags", json!(["a", "b"]))
        .field("meta", json!({ "weight": 3 }))
        .field("cover", cover_value)
        .build_pair();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![draft.clone(), published.clone()])
            .with_attachments(vec![descriptor.clone()]),
        MemoryAttachmentStorage::new().with_blob("att1", b"cover-bytes".to_vec()),
    )
    .unwrap();

    let formats: Vec<(&str, Box<dyn ArchiveFormat>)> = vec![
        ("gzip", Box::new(GzipFormat::new())),
        ("zip", Box::new(ZipFormat::new())),
    ];
    for (name, format) in formats {
        let result = env
            .service
            .export(ExportRequest::new(["a1:en:draft", "a1:en:published"]).with_format(name))
            .await
            .unwrap();
        assert!(!result.attachment_error, "{}", name);

        let path = env.artifact_file(&result.artifact).await.unwrap();
        let contents = format
            .read(
                &path,
                &env.dir.join(&format!("read-{}", name)),
                &ReadOptions::default(),
            )
            .unwrap();
        assert_eq!(contents.documents, vec![draft.clone(), published.clone()], "{}", name);
        assert_eq!(contents.attachments, vec![descriptor.clone()], "{}", name);
        let staged = contents.staged.get("att1").unwrap();
        assert_eq!(std::fs::read(staged).unwrap(), b"cover-bytes", "{}", name);
    }
}

#[tokio::test]
async fn exporting_twice_decodes_identically() {
    let topic = DocBuilder::new("topic", "t1").title("Same").build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![topic]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let mut decoded = Vec::new();
    for _ in 0..2 {
        let result = env
            .service
            .export(ExportRequest::new(["t1:en:draft"]))
            .await
            .unwrap();
        let path = env.artifact_file(&result.artifact).await.unwrap();
        decoded.push(read_artifact(&GzipFormat::new(), &env, &path).documents);
    }
    assert_eq!(decoded[0], decoded[1]);
}

#[tokio::test]
async fn row_formats_skip_attachments() {
    let (_, cover_value) = attachment("att1", "cover", "jpg");
    let article = DocBuilder::new("article", "a1")
        .field("cover", cover_value)
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![article]),
        MemoryAttachmentStorage::new().failing_on("att1"),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["a1:en:draft"]).with_format("csv"))
        .await
        .unwrap();
    assert!(result.artifact.ends_with(".csv"));
    assert!(result.attachments.is_empty());
    assert!(!result.attachment_error);
}

#[tokio::test]
async fn rejected_requests_publish_nothing() {
    let topic = DocBuilder::new("topic", "t1").build();
    let env = TestEnv::with_policy(
        MemoryStore::with_documents(vec![topic]),
        MemoryAttachmentStorage::new(),
        Arc::new(DenyTypes::new(["topic"])),
    )
    .unwrap();

    let forbidden = env
        .service
        .export(ExportRequest::new(["t1:en:draft"]))
        .await
        .unwrap_err();
    assert!(matches!(forbidden, PortError::Forbidden { .. }));

    let empty = env.service.export(ExportRequest::default()).await.unwrap_err();
    assert!(matches!(empty, PortError::Validation(_)));

    let unknown = env
        .service
        .export(ExportRequest::new(["t1:en:draft"]).with_format("rar"))
        .await
        .unwrap_err();
    assert!(matches!(unknown, PortError::UnsupportedFormat(_)));

    assert!(env.artifacts.names().await.is_empty());
    let last = env.notifier.notifications().pop().unwrap();
    assert_eq!(last.level, NotificationLevel::Error);
}

#[tokio::test]
async fn artifacts_expire() {
    let topic = DocBuilder::new("topic", "t1").build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![topic]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["t1:en:draft"]).with_expiration(Duration::from_millis(30)))
        .await
        .unwrap();
    assert_eq!(env.artifacts.names().await, vec![result.artifact.clone()]);
    assert_eq!(
        env.service.cleanup().pending().await,
        vec![format!("export:{}", result.artifact)]
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(env.artifacts.names().await.is_empty());
    assert!(env.service.cleanup().pending().await.is_empty());
}

#[tokio::test]
async fn published_siblings_of_related_documents_are_included() {
    let (draft, published) = DocBuilder::new("topic", "t1").title("Both").build_pair();
    let article = DocBuilder::new("article", "a1")
        .mode(Mode::Published)
        .field("topicsIds", json!(["t1"]))
        .build();
    let env = TestEnv::new(
        MemoryStore::with_documents(vec![article, draft, published]),
        MemoryAttachmentStorage::new(),
    )
    .unwrap();

    let result = env
        .service
        .export(ExportRequest::new(["a1:en:published"]).with_related_types(["topic"]))
        .await
        .unwrap();
    let ids: Vec<&str> = result.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a1:en:published", "t1:en:draft", "t1:en:published"]);
}
