use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::attachment::is_safe_file_name;
use crate::cleanup::CleanupRegistry;
use crate::errors::{PortError, PortResult};
use crate::formats::ArchiveContents;

const CONTENTS_FILE: &str = "contents.json";

/// Extracted imports waiting for a user decision, addressed by an opaque
/// token so callers never see filesystem paths. The decoded contents are
/// persisted next to the staged payloads, so a token stays usable from
/// another process until it expires.
#[derive(Clone)]
pub struct StagingArea {
    root: PathBuf,
    cleanup: CleanupRegistry,
    expiration: Duration,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, cleanup: CleanupRegistry, expiration: Duration) -> Self {
        Self {
            root: root.into(),
            cleanup,
            expiration,
        }
    }

    /// Reserve a fresh token and its directory.
    pub async fn allocate(&self) -> PortResult<(String, PathBuf)> {
        let token = Uuid::new_v4().to_string();
        let dir = self.root.join(&token);
        tokio::fs::create_dir_all(&dir).await?;
        Ok((token, dir))
    }

    pub fn dir(&self, token: &str) -> PortResult<PathBuf> {
        if !is_safe_file_name(token) {
            return Err(PortError::Validation(format!("invalid import token '{}'", token)));
        }
        Ok(self.root.join(token))
    }

    /// Keep `contents` under `token` and schedule the directory's removal.
    pub async fn stash(&self, token: &str, contents: &ArchiveContents) -> PortResult<()> {
        let dir = self.dir(token)?;
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(CONTENTS_FILE), serde_json::to_vec(contents)?).await?;

        let expired = dir.clone();
        let task_token = token.to_string();
        self.cleanup
            .schedule(staging_task(token), self.expiration, async move {
                remove_dir(&expired).await;
                debug!(token = %task_token, "Staged import expired");
            })
            .await;
        Ok(())
    }

    /// Load the contents staged under `token`.
    pub async fn take(&self, token: &str) -> PortResult<ArchiveContents> {
        let path = self.dir(token)?.join(CONTENTS_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortError::NotFound(format!("staged import '{}'", token)))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Drop a staged import now.
    pub async fn discard(&self, token: &str) -> PortResult<()> {
        let dir = self.dir(token)?;
        self.cleanup.cancel(&staging_task(token)).await;
        remove_dir(&dir).await;
        Ok(())
    }
}

fn staging_task(token: &str) -> String {
    format!("staging:{}", token)
}

async fn remove_dir(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), "Failed to remove staged import: {}", err);
        }
    }
}
