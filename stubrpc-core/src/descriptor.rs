//! # Descriptor Store
//!
//! Turns stored `FileDescriptorSet` blobs into a linked [`Schema`] the service builder can
//! serve.
//!
//! Files are linked one at a time, in order, against the files linked before them. A file
//! may therefore only import files that appear earlier (in an earlier blob, or earlier in
//! the same set, as `protoc --include_imports` writes them). The protobuf well-known types
//! are always available.
mod blob;

pub use blob::{BlobStore, DirectoryBlobStore, InMemoryBlobStore};

use bytes::Bytes;
use prost::Message;
use prost_reflect::{DescriptorPool, FileDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorSet;
use tracing::debug;

/// Blob keys with one of these suffixes are loaded, everything else is ignored.
pub const DESCRIPTOR_SUFFIXES: [&str; 2] = [".dsc", ".desc"];

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor blob '{key}' is not a valid FileDescriptorSet: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: prost::DecodeError,
    },
    #[error("Failed to link proto file '{file}': {source}")]
    Link {
        file: String,
        #[source]
        source: prost_reflect::DescriptorError,
    },
    #[error("Failed to read descriptor blobs: {0}")]
    Io(#[from] std::io::Error),
}

/// A linked set of proto files, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Schema {
    pool: DescriptorPool,
    files: Vec<FileDescriptor>,
}

impl Schema {
    /// An empty schema: only the well-known types, no services.
    pub fn empty() -> Self {
        Self {
            pool: DescriptorPool::global(),
            files: Vec::new(),
        }
    }

    /// The pool every loaded file lives in, well-known types included.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The files that were loaded, in link order.
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Every service declared by the loaded files.
    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        self.files.iter().flat_map(|file| file.services())
    }

    /// All files of the pool as a `FileDescriptorSet`, dependencies included.
    pub fn file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.pool.file_descriptor_protos().cloned().collect(),
        }
    }
}

/// Anything a [`Schema`] can be loaded from.
pub trait SchemaSource: Send + Sync + 'static {
    fn load(&self) -> Result<Schema, DescriptorError>;
}

/// Loads every descriptor blob held by a [`BlobStore`].
#[derive(Debug, Clone)]
pub struct DescriptorStore<B> {
    blobs: B,
}

impl<B: BlobStore> DescriptorStore<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Reads the descriptor blobs in key order and links them into a fresh [`Schema`].
    ///
    /// Keys are sorted so the link order does not depend on the store's listing order.
    pub fn load_all(&self) -> Result<Schema, DescriptorError> {
        let mut keys: Vec<String> = self
            .blobs
            .keys()?
            .into_iter()
            .filter(|key| is_descriptor_key(key))
            .collect();
        keys.sort();

        let mut linker = Linker::new();
        for key in keys {
            // A blob removed between listing and reading is skipped.
            if let Some(bytes) = self.blobs.get(&key)? {
                linker.add_set(&key, &bytes)?;
            }
        }

        Ok(linker.finish())
    }
}

impl<B: BlobStore> SchemaSource for DescriptorStore<B> {
    fn load(&self) -> Result<Schema, DescriptorError> {
        self.load_all()
    }
}

/// A schema source over descriptor sets held in memory.
///
/// Sets are linked in the order they were given; errors name them `set-<index>`.
#[derive(Debug, Clone, Default)]
pub struct RawDescriptorSets {
    sets: Vec<Bytes>,
}

impl RawDescriptorSets {
    pub fn new<I, T>(sets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Self {
            sets: sets.into_iter().map(Into::into).collect(),
        }
    }
}

impl SchemaSource for RawDescriptorSets {
    fn load(&self) -> Result<Schema, DescriptorError> {
        let mut linker = Linker::new();
        for (index, bytes) in self.sets.iter().enumerate() {
            linker.add_set(&format!("set-{index}"), bytes)?;
        }
        Ok(linker.finish())
    }
}

pub fn is_descriptor_key(key: &str) -> bool {
    DESCRIPTOR_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

struct Linker {
    pool: DescriptorPool,
    files: Vec<FileDescriptor>,
}

impl Linker {
    fn new() -> Self {
        Self {
            pool: DescriptorPool::global(),
            files: Vec::new(),
        }
    }

    fn add_set(&mut self, key: &str, bytes: &[u8]) -> Result<(), DescriptorError> {
        let set = FileDescriptorSet::decode(bytes).map_err(|source| DescriptorError::Corrupt {
            key: key.to_string(),
            source,
        })?;

        for file in set.file {
            let name = file.name().to_string();

            if self.pool.get_file_by_name(&name).is_some() {
                debug!(file = %name, blob = key, "Proto file already linked, skipping");
                continue;
            }

            self.pool
                .add_file_descriptor_proto(file)
                .map_err(|source| DescriptorError::Link {
                    file: name.clone(),
                    source,
                })?;

            if let Some(linked) = self.pool.get_file_by_name(&name) {
                self.files.push(linked);
            }
        }

        Ok(())
    }

    fn finish(self) -> Schema {
        Schema {
            pool: self.pool,
            files: self.files,
        }
    }
}
