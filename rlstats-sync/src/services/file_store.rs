//! Durable storage for uploaded replay files

use async_trait::async_trait;
use rlstats_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Accepts raw replay bytes and returns a durable reference to them
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, bytes: &[u8], file_name: &str, external_id: &str) -> Result<String>;
}

/// Stores files under `<root>/replays/`
///
/// A file that already exists under the same name is kept as is and its path
/// returned.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(root_folder: &Path) -> Self {
        Self {
            dir: root_folder.join("replays"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Keep only the final path component, so names like `../x` stay inside the store
fn safe_file_name(file_name: &str) -> Result<String> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .ok_or_else(|| Error::InvalidInput(format!("Unusable file name '{}'", file_name)))?;
    Ok(name.to_string())
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(&self, bytes: &[u8], file_name: &str, external_id: &str) -> Result<String> {
        let name = safe_file_name(file_name)?;
        let path = self.dir.join(&name);

        if tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), external_id, "File already stored");
            return Ok(path.display().to_string());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), external_id, bytes = bytes.len(), "Stored replay file");

        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_writes_once() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());

        let first = store.store(b"first", "match.replay", "abc").await.unwrap();
        let second = store.store(b"second", "match.replay", "abc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_path_components_are_stripped() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());

        let stored = store.store(b"x", "../../escape.replay", "abc").await.unwrap();
        assert!(Path::new(&stored).starts_with(store.dir()));

        assert!(store.store(b"x", "..", "abc").await.is_err());
    }
}
