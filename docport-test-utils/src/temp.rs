//! Scratch tree a test environment runs in, laid out the way the service
//! expects its working directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

const WORK: &str = "work";
const STAGING: &str = "staging";
const UPLOADS: &str = "uploads";

/// Removed with everything under it when dropped.
pub struct Scratch {
    root: PathBuf,
}

impl Scratch {
    pub fn create() -> io::Result<Self> {
        let root = std::env::temp_dir().join(format!("docport-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Where exports assemble their archives.
    pub fn work_dir(&self) -> PathBuf {
        self.join(WORK)
    }

    /// Where imports extract archives awaiting a decision.
    pub fn staging_dir(&self) -> PathBuf {
        self.join(STAGING)
    }

    /// Place an uploaded file, as the upload handler would before import.
    pub fn write_upload(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let uploads = self.join(UPLOADS);
        fs::create_dir_all(&uploads)?;
        let path = uploads.join(filename);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Sorted entry names under `area`; a directory never created is empty.
    pub fn entries(&self, area: &str) -> io::Result<Vec<String>> {
        let mut names = match fs::read_dir(self.join(area)) {
            Ok(dir) => dir
                .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<io::Result<Vec<_>>>()?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        names.sort();
        Ok(names)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_of_missing_area_are_empty() {
        let scratch = Scratch::create().unwrap();
        assert!(scratch.entries(WORK).unwrap().is_empty());
    }

    #[test]
    fn uploads_are_listed_and_removed_on_drop() {
        let scratch = Scratch::create().unwrap();
        scratch.write_upload("b.csv", b"type\n").unwrap();
        let path = scratch.write_upload("a.tgz", b"").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"");
        assert_eq!(scratch.entries(UPLOADS).unwrap(), vec!["a.tgz", "b.csv"]);

        let root = scratch.root().to_path_buf();
        drop(scratch);
        assert!(!root.exists());
    }
}
