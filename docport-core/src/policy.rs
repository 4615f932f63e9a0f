use std::collections::HashSet;

/// Externally provided answer to "may this type be exported/imported".
pub trait ExportPolicy: Send + Sync {
    fn can_export(&self, doc_type: &str) -> bool;

    fn can_import(&self, doc_type: &str) -> bool {
        self.can_export(doc_type)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ExportPolicy for AllowAll {
    fn can_export(&self, _doc_type: &str) -> bool {
        true
    }
}

/// Every type is eligible except the listed ones.
#[derive(Debug, Clone, Default)]
pub struct DenyTypes {
    denied: HashSet<String>,
}

impl DenyTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl ExportPolicy for DenyTypes {
    fn can_export(&self, doc_type: &str) -> bool {
        !self.denied.contains(doc_type)
    }
}
