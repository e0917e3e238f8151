//! Disk-backed content-addressable store.
//!
//! Every key maps to one file under the root via the configured
//! PathTransform. There is no index: the path is the index. The store keeps
//! no locks; two writers on the same key race and the last one wins.

use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};

use ggnet_core::config::StorageConfig;

use crate::path::{cas_path_transform, transform_for, PathKey, PathTransform};

/// Root used when none is configured.
pub const DEFAULT_ROOT: &str = "ggnetwork";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key {0:?} does not map to a path inside the store")]
    InvalidKey(String),

    #[error("failed to {op} {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { op, path, source }
    }
}

#[derive(Debug, Clone)]
pub struct StoreOpts {
    /// Folder containing everything the store writes.
    pub root: PathBuf,
    pub transform: PathTransform,
}

impl Default for StoreOpts {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            transform: cas_path_transform,
        }
    }
}

impl From<&StorageConfig> for StoreOpts {
    fn from(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            transform: transform_for(config.path_scheme),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    transform: PathTransform,
}

impl Store {
    pub fn new(opts: StoreOpts) -> Self {
        let root = if opts.root.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_ROOT)
        } else {
            opts.root
        };
        Self {
            root,
            transform: opts.transform,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive where `key` lives, root included.
    pub fn path_for(&self, key: &str) -> PathKey {
        (self.transform)(key).with_root(&self.root)
    }

    /// Like path_for, but refuses keys that would escape the root.
    fn resolve(&self, key: &str) -> Result<PathKey, StoreError> {
        let path_key = self.path_for(key);
        let single_normal = |name: &str| {
            let mut components = Path::new(name).components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            )
        };
        if path_key.segments.iter().all(|s| single_normal(s)) && single_normal(&path_key.filename)
        {
            Ok(path_key)
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    /// Whether a file exists for `key`.
    ///
    /// Any stat failure reads as absent, including permission errors.
    pub async fn has(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(path_key) => fs::metadata(path_key.full_path_with_root()).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Persist everything `reader` yields under `key`, replacing any previous
    /// content. Returns the number of bytes written.
    pub async fn write<R>(&self, key: &str, reader: &mut R) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path_key = self.resolve(key)?;
        let dir = path_key.dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(StoreError::io("create directory", &dir))?;

        let path = path_key.full_path_with_root();
        let mut file = File::create(&path)
            .await
            .map_err(StoreError::io("create", &path))?;
        let n = tokio::io::copy(reader, &mut file)
            .await
            .map_err(StoreError::io("write", &path))?;
        file.flush().await.map_err(StoreError::io("flush", &path))?;
        file.sync_all().await.map_err(StoreError::io("sync", &path))?;

        tracing::info!(bytes = n, path = %path.display(), "written to disk");
        Ok(n)
    }

    /// Full contents stored under `key`.
    pub async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(key)?.full_path_with_root();
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::io("read", path)(e)),
        }
    }

    /// Open `key` for streaming. Returns the file size and a handle.
    pub async fn open(&self, key: &str) -> Result<(u64, File), StoreError> {
        let path = self.resolve(key)?.full_path_with_root();
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StoreError::io("open", path)(e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(StoreError::io("stat", &path))?
            .len();
        Ok((size, file))
    }

    /// Remove `key`, then every ancestor directory it leaves empty, stopping
    /// below the root.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?.full_path_with_root();
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StoreError::io("delete", path)(e)),
        }

        self.prune_empty_ancestors(&path).await?;
        tracing::info!(path = %path.display(), "deleted from disk");
        Ok(())
    }

    async fn prune_empty_ancestors(&self, file: &Path) -> Result<(), StoreError> {
        let mut dir = file.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            match fs::remove_dir(d).await {
                Ok(()) => tracing::trace!(dir = %d.display(), "pruned empty directory"),
                Err(e) if is_prune_stop(&e) => break,
                Err(e) => return Err(StoreError::io("remove directory", d)(e)),
            }
            dir = d.parent();
        }
        Ok(())
    }

    /// Remove the root and everything below it.
    pub async fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("clear", &self.root)(e)),
        }
    }
}

/// Conditions that end directory pruning without being an error.
fn is_prune_stop(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::DirectoryNotEmpty
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::NotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::identity_path_transform;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("ggnet-store-test-{}-{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn temp_store() -> Store {
        Store::new(StoreOpts {
            root: temp_root(),
            transform: cas_path_transform,
        })
    }

    #[tokio::test]
    async fn write_read_delete_many() {
        let store = temp_store();

        for i in 0..50 {
            let key = format!("foo_{i}");
            let data = format!("some png bytes {i}").into_bytes();

            let n = store.write(&key, &mut &data[..]).await.unwrap();
            assert_eq!(n, data.len() as u64);
            assert!(store.has(&key).await);

            let read = store.read(&key).await.unwrap();
            assert_eq!(&read[..], &data[..]);

            store.delete(&key).await.unwrap();
            assert!(!store.has(&key).await, "expected to NOT have key {key}");
        }

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn write_truncates_previous_content() {
        let store = temp_store();
        store.write("k", &mut &b"a much longer payload"[..]).await.unwrap();
        store.write("k", &mut &b"short"[..]).await.unwrap();
        assert_eq!(&store.read("k").await.unwrap()[..], b"short");
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn layout_matches_path_key() {
        let store = temp_store();
        store.write("momsbestpicture", &mut &b"pic"[..]).await.unwrap();

        let expected = store
            .root()
            .join("68044/29f74/181a6/3c50c/3d81d/733a1/2f14a/353ff")
            .join("6804429f74181a63c50c3d81d733a12f14a353ff");
        assert!(expected.is_file());
        assert_eq!(store.path_for("momsbestpicture").full_path_with_root(), expected);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = temp_store();
        assert!(matches!(store.read("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.open("nope").await, Err(StoreError::NotFound(_))));
        assert!(!store.has("nope").await);
    }

    #[tokio::test]
    async fn delete_prunes_to_root() {
        let store = temp_store();
        store.write("lonely", &mut &b"x"[..]).await.unwrap();
        let first = store.path_for("lonely").first_dir().unwrap();
        assert!(first.is_dir());

        store.delete("lonely").await.unwrap();
        assert!(!first.exists());
        assert!(store.root().is_dir(), "root itself must survive pruning");
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn delete_keeps_siblings() {
        let store = Store::new(StoreOpts {
            root: temp_root(),
            transform: |key| PathKey {
                root: PathBuf::new(),
                segments: vec!["shared".into(), "dir".into()],
                filename: key.to_string(),
            },
        });
        store.write("a", &mut &b"1"[..]).await.unwrap();
        store.write("b", &mut &b"2"[..]).await.unwrap();

        store.delete("a").await.unwrap();
        assert!(!store.has("a").await);
        assert!(store.has("b").await);
        assert!(store.root().join("shared/dir").is_dir());

        store.delete("b").await.unwrap();
        assert!(!store.root().join("shared").exists());

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn clear_is_recursive() {
        let store = temp_store();
        store.write("one", &mut &b"1"[..]).await.unwrap();
        store.write("two", &mut &b"2"[..]).await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.root().exists());
        assert!(!store.has("one").await);

        // Clearing an absent root is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn open_reports_size() {
        let store = temp_store();
        store.write("sized", &mut &b"12345"[..]).await.unwrap();
        let (size, _file) = store.open("sized").await.unwrap();
        assert_eq!(size, 5);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn identity_keys_cannot_escape_root() {
        let store = Store::new(StoreOpts {
            root: temp_root(),
            transform: identity_path_transform,
        });
        for key in ["..", "", "a/../../b", "/etc"] {
            assert!(
                matches!(store.write(key, &mut &b"x"[..]).await, Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
        store.write("plain", &mut &b"ok"[..]).await.unwrap();
        assert!(store.root().join("plain/plain").is_file());
        store.clear().await.unwrap();
    }

    #[test]
    fn empty_root_falls_back_to_default() {
        let store = Store::new(StoreOpts {
            root: PathBuf::new(),
            transform: cas_path_transform,
        });
        assert_eq!(store.root(), Path::new(DEFAULT_ROOT));
    }

    #[test]
    fn prune_stop_set_is_explicit() {
        assert!(is_prune_stop(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_prune_stop(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(is_prune_stop(&io::Error::from(io::ErrorKind::DirectoryNotEmpty)));
        assert!(!is_prune_stop(&io::Error::from(io::ErrorKind::Other)));
    }
}
