//! Filesystem blob store built on `cap_std`.
//!
//! Keys are relative, `/`-separated paths resolved inside one capability
//! directory, so a key can never escape the configured root. Writes land in a
//! staging file first and are renamed into place.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{BlobStore, BlobStoreError};

/// Blob store rooted at a local directory.
///
/// # Examples
///
/// ```rust,no_run
/// use lesion_bank::outbound::storage::FilesystemBlobStore;
///
/// let store = FilesystemBlobStore::open("/srv/lesion-bank/blobs", "https://files.example.org")?;
/// assert_eq!(
///     lesion_bank::domain::ports::BlobStore::public_url(&store, "subjects/sub-1/a.nii.gz"),
///     "https://files.example.org/subjects/sub-1/a.nii.gz"
/// );
/// # Ok::<(), lesion_bank::domain::ports::BlobStoreError>(())
/// ```
#[derive(Clone)]
pub struct FilesystemBlobStore {
    root: Arc<Dir>,
    public_base_url: String,
}

impl FilesystemBlobStore {
    /// Open (creating if needed) `root` and serve URLs under `public_base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobStoreError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open(
        root: impl AsRef<Path>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, BlobStoreError> {
        let root = root.as_ref();
        Dir::create_ambient_dir_all(root, ambient_authority())
            .map_err(|err| io_error(&root.display().to_string(), &err))?;
        let dir = Dir::open_ambient_dir(root, ambient_authority())
            .map_err(|err| io_error(&root.display().to_string(), &err))?;
        Ok(Self {
            root: Arc::new(dir),
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    async fn blocking<T, F>(&self, key: &str, work: F) -> Result<T, BlobStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Dir, &Path) -> Result<T, BlobStoreError> + Send + 'static,
    {
        let relative = relative_path(key)?;
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || work(&root, &relative))
            .await
            .map_err(|err| BlobStoreError::io(err.to_string()))?
    }
}

fn io_error(key: &str, error: &io::Error) -> BlobStoreError {
    if error.kind() == io::ErrorKind::NotFound {
        BlobStoreError::not_found(key)
    } else {
        BlobStoreError::io(format!("{key}: {error}"))
    }
}

/// Validate `key` and turn it into a relative path.
fn relative_path(key: &str) -> Result<PathBuf, BlobStoreError> {
    let path = Path::new(key);
    let normal = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if normal {
        Ok(path.to_path_buf())
    } else {
        Err(BlobStoreError::invalid_key(key))
    }
}

fn write_atomically(dir: &Dir, path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        dir.create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = path.with_file_name(format!(".{file_name}.tmp-{}", Uuid::new_v4().simple()));
    dir.write(&staging, bytes)?;
    dir.rename(&staging, dir, path).inspect_err(|_| {
        let _cleanup = dir.remove_file(&staging);
    })
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let owned = key.to_owned();
        self.blocking(key, move |dir, path| {
            dir.read(path).map_err(|err| io_error(&owned, &err))
        })
        .await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        let owned = key.to_owned();
        let size = bytes.len();
        self.blocking(key, move |dir, path| {
            write_atomically(dir, path, &bytes).map_err(|err| io_error(&owned, &err))
        })
        .await?;
        debug!(key, size, "stored blob");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        let owned = key.to_owned();
        self.blocking(key, move |dir, path| match dir.remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&owned, &err)),
        })
        .await
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: FilesystemBlobStore,
    }

    #[fixture]
    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let store =
            FilesystemBlobStore::open(dir.path().join("blobs"), "https://files.test/").expect("open");
        Harness { _dir: dir, store }
    }

    #[rstest]
    #[tokio::test]
    async fn stores_nested_keys(harness: Harness) {
        let key = "subjects/sub-1/roi/sub-1_file-1_roi.nii.gz";
        harness.store.put(key, vec![1, 2, 3]).await.expect("put");

        assert_eq!(harness.store.get(key).await.expect("get"), vec![1, 2, 3]);
    }

    #[rstest]
    #[tokio::test]
    async fn overwrites_replace_previous_bytes(harness: Harness) {
        harness.store.put("a.npy", vec![1]).await.expect("first put");
        harness.store.put("a.npy", vec![2, 2]).await.expect("second put");

        assert_eq!(harness.store.get("a.npy").await.expect("get"), vec![2, 2]);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_blobs_are_not_found(harness: Harness) {
        let error = harness.store.get("absent.nii").await.expect_err("missing");
        assert_eq!(error, BlobStoreError::not_found("absent.nii"));
    }

    #[rstest]
    #[tokio::test]
    async fn deleting_twice_is_harmless(harness: Harness) {
        harness.store.put("gone.csv", vec![0]).await.expect("put");
        harness.store.delete("gone.csv").await.expect("first delete");
        harness.store.delete("gone.csv").await.expect("second delete");

        assert!(harness.store.get("gone.csv").await.is_err());
    }

    #[rstest]
    #[case("")]
    #[case("/etc/passwd")]
    #[case("subjects/../../escape")]
    #[case("./relative")]
    #[tokio::test]
    async fn rejects_keys_outside_the_root(harness: Harness, #[case] key: &str) {
        let error = harness.store.put(key, vec![0]).await.expect_err("invalid");
        assert_eq!(error, BlobStoreError::invalid_key(key));
    }

    #[rstest]
    fn public_urls_join_the_base(harness: Harness) {
        assert_eq!(
            harness.store.public_url("generated_content/t_roi.nii.gz"),
            "https://files.test/generated_content/t_roi.nii.gz"
        );
    }
}
