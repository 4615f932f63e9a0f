use std::path::Path;
use std::sync::Arc;

use tokio::task;
use tracing::info;

use crate::cleanup::TempPath;
use crate::errors::{PortError, PortResult};
use crate::formats::{ArchiveContents, ArchiveFormat, ReadOptions};

/// Decodes an archive off the async runtime. Attachment payloads land in a
/// staging directory that is removed again if decoding fails.
pub struct ArchiveReader {
    format: Arc<dyn ArchiveFormat>,
}

impl ArchiveReader {
    pub fn new(format: Arc<dyn ArchiveFormat>) -> Self {
        Self { format }
    }

    pub async fn read(
        &self,
        src: &Path,
        staging: &Path,
        options: ReadOptions,
    ) -> PortResult<ArchiveContents> {
        let guard = TempPath::new(staging);
        let format = Arc::clone(&self.format);
        let src_path = src.to_path_buf();
        let staging_path = staging.to_path_buf();

        let contents = task::spawn_blocking(move || format.read(&src_path, &staging_path, &options))
            .await
            .map_err(|err| PortError::archive(format!("archive reader task failed: {}", err)))??;
        guard.keep();

        info!(
            format = %self.format.info().name,
            documents = contents.documents.len(),
            attachments = contents.attachments.len(),
            staged = contents.staged.len(),
            "Read archive"
        );
        Ok(contents)
    }
}
