//! # Reload Controller
//!
//! Owns the live [`ServiceGraph`] and replaces it atomically.
//!
//! A reload loads the schema source and builds the next graph while the current one keeps
//! serving. Only the final swap of one `Arc` happens under the write lock. Calls hold their
//! own `Arc<ServiceGraph>`, so a call that started before a swap completes against the graph
//! it started on, and every call that starts after it sees the new graph only.
use crate::descriptor::{DescriptorError, SchemaSource};
use crate::service::{BuildError, ServiceBuilder, ServiceGraph};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("A schema source was already initialized")]
    AlreadyInitialized,
    #[error("No schema source was initialized, call init_schema_source first")]
    NotInitialized,
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to load the schema: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("Failed to build services: {0}")]
    Build(#[from] BuildError),
}

pub struct ReloadController {
    builder: ServiceBuilder,
    source: OnceLock<Box<dyn SchemaSource>>,
    live: RwLock<Option<Arc<ServiceGraph>>>,
    /// Serialises reloads, never held by calls.
    reloading: Mutex<u64>,
}

impl std::fmt::Debug for ReloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadController")
            .field("initialized", &self.source.get().is_some())
            .field("live", &*self.live.read())
            .finish_non_exhaustive()
    }
}

impl ReloadController {
    pub fn new(builder: ServiceBuilder) -> Self {
        Self {
            builder,
            source: OnceLock::new(),
            live: RwLock::new(None),
            reloading: Mutex::new(0),
        }
    }

    /// Installs the schema source and performs the initial load.
    ///
    /// Only the first call installs a source. A failing initial load is returned; the
    /// source stays installed so a later [`ReloadController::reload`] can retry.
    pub fn init_schema_source(&self, source: impl SchemaSource) -> Result<(), ReloadError> {
        let mut generation = self.reloading.lock();

        if self.source.set(Box::new(source)).is_err() {
            return Err(ConfigurationError::AlreadyInitialized.into());
        }

        self.swap(&mut generation)
    }

    /// Reloads the schema source and swaps in the new graph.
    ///
    /// On failure the previous graph keeps serving.
    pub fn reload(&self) -> Result<(), ReloadError> {
        let mut generation = self.reloading.lock();
        self.swap(&mut generation)
    }

    /// The graph new calls are served from.
    pub fn current(&self) -> Result<Arc<ServiceGraph>, ConfigurationError> {
        self.live
            .read()
            .clone()
            .ok_or(ConfigurationError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.source.get().is_some()
    }

    fn swap(&self, generation: &mut u64) -> Result<(), ReloadError> {
        let source = self.source.get().ok_or(ConfigurationError::NotInitialized)?;

        let graph = source
            .load()
            .map_err(ReloadError::from)
            .and_then(|schema| Ok(self.builder.build(schema, *generation + 1)?))
            .inspect_err(|e| error!(error = %e, "Schema reload failed, keeping the live services"))?;

        *generation += 1;
        info!(
            generation = *generation,
            services = ?graph.service_names(),
            "Loaded gRPC services"
        );

        *self.live.write() = Some(Arc::new(graph));
        Ok(())
    }
}
