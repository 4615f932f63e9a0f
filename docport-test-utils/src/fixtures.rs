use serde_json::{json, Value};

use docport::schema::{Field, SchemaCatalog, ANY_PAGE_TYPE, IMAGE_TYPE, RICH_TEXT_WIDGET};
use docport::{AttachmentDescriptor, Document, Mode};

pub const HOME_PAGE_TYPE: &str = "@apostrophecms/home-page";

/// Topics relate to topics, articles relate to topics, pages and images and
/// carry an attachment plus an area with rich text and callouts.
pub fn sample_catalog() -> SchemaCatalog {
    SchemaCatalog::default()
        .with_type(
            "topic",
            vec![
                Field::scalar("title"),
                Field::relationship("_topics", "topic"),
            ],
        )
        .with_type(
            "article",
            vec![
                Field::scalar("title"),
                Field::relationship("_topics", "topic"),
                Field::relationship("_pages", ANY_PAGE_TYPE),
                Field::relationship("_images", IMAGE_TYPE),
                Field::attachment("cover"),
                Field::area("main", &[RICH_TEXT_WIDGET, "callout"]),
            ],
        )
        .with_type(IMAGE_TYPE, vec![Field::attachment("attachment")])
        .with_widget(
            "callout",
            vec![Field::relationship("_topics", "topic"), Field::attachment("icon")],
        )
        .with_page_type(HOME_PAGE_TYPE, vec![Field::scalar("title")])
        .with_page_type(
            "default-page",
            vec![Field::scalar("title"), Field::relationship("_topics", "topic")],
        )
}

/// Builds a store row; defaults to locale `en`, draft mode.
pub struct DocBuilder {
    doc: Document,
    locale: String,
    mode: Mode,
}

impl DocBuilder {
    pub fn new(doc_type: &str, apos_doc_id: &str) -> Self {
        let mut doc = Document::new(doc_type);
        doc.apos_doc_id = apos_doc_id.to_string();
        Self {
            doc,
            locale: "en".to_string(),
            mode: Mode::Draft,
        }
    }

    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn title(self, title: &str) -> Self {
        self.field("title", json!(title))
    }

    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.doc.set_field(name, value);
        self
    }

    pub fn build(mut self) -> Document {
        self.doc.relocate(&self.locale, self.mode);
        self.doc
    }

    /// Both mode rows of the same content.
    pub fn build_pair(self) -> (Document, Document) {
        let draft = self.mode(Mode::Draft).build();
        let published = draft.sibling(Mode::Published);
        (draft, published)
    }
}

pub fn home_page(locale: &str, mode: Mode) -> Document {
    DocBuilder::new(HOME_PAGE_TYPE, "home")
        .locale(locale)
        .mode(mode)
        .title("Home")
        .field("slug", json!("/"))
        .field("path", json!("home"))
        .field("level", json!(0))
        .field("rank", json!(0))
        .build()
}

/// Attachment metadata and the value a document embeds for it.
pub fn attachment(id: &str, name: &str, extension: &str) -> (AttachmentDescriptor, Value) {
    let descriptor = AttachmentDescriptor::new(id, name, extension);
    let value = json!({ "_id": id, "name": name, "extension": extension });
    (descriptor, value)
}
