use bytes::Bytes;
use parking_lot::RwLock;
use std::{collections::BTreeMap, io, path::PathBuf, sync::Arc};

/// A flat key/value store of descriptor blobs.
pub trait BlobStore: Send + Sync + 'static {
    fn keys(&self) -> io::Result<Vec<String>>;
    fn get(&self, key: &str) -> io::Result<Option<Bytes>>;
}

/// Blobs stored as the regular files of one directory, keyed by file name.
///
/// A missing directory holds no blobs.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl BlobStore for DirectoryBlobStore {
    fn keys(&self) -> io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                keys.push(name.to_string());
            }
        }
        Ok(keys)
    }

    fn get(&self, key: &str) -> io::Result<Option<Bytes>> {
        match std::fs::read(self.root.join(key)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A shared in-memory store. Clones see the same blobs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, blob: impl Into<Bytes>) {
        self.blobs.write().insert(key.into(), blob.into());
    }

    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.blobs.write().remove(key)
    }

    pub fn clear(&self) {
        self.blobs.write().clear();
    }
}

impl BlobStore for InMemoryBlobStore {
    fn keys(&self) -> io::Result<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }

    fn get(&self, key: &str) -> io::Result<Option<Bytes>> {
        Ok(self.blobs.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_has_no_keys() {
        let store = DirectoryBlobStore::new("/definitely/not/a/real/dir");
        assert!(store.keys().unwrap().is_empty());
        assert!(store.get("services.dsc").unwrap().is_none());
    }

    #[test]
    fn directory_store_lists_files_by_name() {
        let root = std::env::temp_dir().join(format!("stubrpc-blobs-{}", std::process::id()));
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("services.dsc"), [1, 2, 3]).unwrap();

        let store = DirectoryBlobStore::new(&root);
        assert_eq!(store.keys().unwrap(), ["services.dsc"]);
        assert_eq!(store.get("services.dsc").unwrap().unwrap().as_ref(), &[1, 2, 3]);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn in_memory_clones_share_content() {
        let store = InMemoryBlobStore::new();
        let view = store.clone();

        store.put("a.dsc", vec![1]);
        assert_eq!(view.keys().unwrap(), ["a.dsc"]);

        view.remove("a.dsc");
        assert!(store.get("a.dsc").unwrap().is_none());
    }
}
