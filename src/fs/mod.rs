// Filesystem layout and primitives for consensus metadata.
//
// One record file per replication group lives at
// `<root>/consensus-meta/<group_id>`. FsManager resolves those paths and
// provides the directory and file primitives the metadata store needs;
// the record framing itself lives in `record`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConsensusError, Result};

pub mod record;

/// Directory under the filesystem root holding one record per group.
pub const META_DIR_NAME: &str = "consensus-meta";

/// Resolves metadata paths from a filesystem root and exposes the small
/// set of directory/file operations the metadata store performs.
#[derive(Debug, Clone)]
pub struct FsManager {
    root: PathBuf,
}

impl FsManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all consensus metadata records.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR_NAME)
    }

    /// Path of the metadata record for one replication group.
    pub fn meta_path(&self, group_id: &str) -> PathBuf {
        self.meta_dir().join(group_id)
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn file_size(&self, path: &Path) -> Result<u64> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ConsensusError::NotFound(format!("file not found: {}", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ConsensusError::NotFound(format!("file not found: {}", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Create `dir` (and any missing parents) if it does not exist.
    /// Returns whether it was created; on `true` the caller is responsible
    /// for fsyncing the parent directory.
    pub fn create_dir_if_missing(&self, dir: &Path) -> Result<bool> {
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(dir)?;
        tracing::debug!(dir = %dir.display(), "created directory");
        Ok(true)
    }

    /// Fsync a directory so that entry creations and renames inside it are
    /// durable.
    pub fn sync_dir(&self, dir: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            fs::File::open(dir)?.sync_all()?;
        }
        #[cfg(not(unix))]
        {
            let _ = dir;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_meta_paths() {
        let fs_manager = FsManager::new("/data/replica-0");
        assert_eq!(
            fs_manager.meta_dir(),
            PathBuf::from("/data/replica-0/consensus-meta")
        );
        assert_eq!(
            fs_manager.meta_path("group-1"),
            PathBuf::from("/data/replica-0/consensus-meta/group-1")
        );
    }

    #[test]
    fn test_create_dir_if_missing() {
        let tmp = TempDir::new().unwrap();
        let fs_manager = FsManager::new(tmp.path());
        let dir = fs_manager.meta_dir();

        assert!(fs_manager.create_dir_if_missing(&dir).unwrap());
        assert!(!fs_manager.create_dir_if_missing(&dir).unwrap());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_delete_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let fs_manager = FsManager::new(tmp.path());
        let err = fs_manager
            .delete_file(&fs_manager.meta_path("absent"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_file_size_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let fs_manager = FsManager::new(tmp.path());
        let err = fs_manager
            .file_size(&fs_manager.meta_path("absent"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
