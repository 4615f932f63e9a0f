use std::path::PathBuf;
use std::sync::Arc;

use docport::store::{MemoryArtifactStore, MemoryAttachmentStorage, MemoryStore};
use docport::{
    AllowAll, ExportPolicy, ImportOptions, ImportRequest, ImportSource, PortConfig, PortService,
    RecordingNotifier,
};

use crate::fixtures::sample_catalog;
use crate::temp::Scratch;

/// A service over in-memory collaborators, with handles kept for assertions.
pub struct TestEnv {
    pub dir: Scratch,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryAttachmentStorage>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: PortService,
}

impl TestEnv {
    pub fn new(store: MemoryStore, storage: MemoryAttachmentStorage) -> anyhow::Result<Self> {
        Self::with_policy(store, storage, Arc::new(AllowAll))
    }

    pub fn with_policy(
        store: MemoryStore,
        storage: MemoryAttachmentStorage,
        policy: Arc<dyn ExportPolicy>,
    ) -> anyhow::Result<Self> {
        let dir = Scratch::create()?;
        let config = PortConfig {
            work_dir: dir.work_dir(),
            staging_dir: dir.staging_dir(),
            ..PortConfig::default()
        };

        let store = Arc::new(store);
        let storage = Arc::new(storage);
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = PortService::new(
            store.clone(),
            storage.clone(),
            artifacts.clone(),
            Arc::new(sample_catalog()),
            config,
        )
        .with_policy(policy)
        .with_notifier(notifier.clone());

        Ok(Self {
            dir,
            store,
            storage,
            artifacts,
            notifier,
            service,
        })
    }

    pub fn upload(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        Ok(self.dir.write_upload(filename, bytes)?)
    }

    /// Save a published artifact back to disk so it can be re-imported.
    pub async fn artifact_file(&self, artifact: &str) -> anyhow::Result<PathBuf> {
        let bytes = self
            .artifacts
            .get(artifact)
            .await
            .ok_or_else(|| anyhow::anyhow!("artifact {} not published", artifact))?;
        self.upload(artifact, &bytes)
    }

    pub fn upload_request(&self, path: PathBuf, filename: &str, options: ImportOptions) -> ImportRequest {
        ImportRequest {
            source: ImportSource::Upload {
                path,
                filename: filename.to_string(),
                mime_type: None,
            },
            format: None,
            options,
        }
    }
}
