//! Top-level runtime composing the event bus, capability registry, storage,
//! and module loader (§4.5).

use crate::capability::CapabilityRegistry;
use crate::event_bus::EventBus;
use crate::kv_store::KeyValueStore;
use crate::loader::{LoaderError, ModuleLoader, ModuleRegistry};
use log::info;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum RuntimeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// Owns the event bus, capability registry, key-value store, and module
/// loader for one running instance. `start`/`stop` are idempotent.
pub struct ForgeRuntime {
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<CapabilityRegistry>,
    pub storage: Arc<KeyValueStore>,
    pub loader: ModuleLoader,
    started: bool,
}

impl ForgeRuntime {
    pub fn new(
        module_dir: impl Into<PathBuf>,
        storage_dir: Option<&Path>,
        module_registry: ModuleRegistry,
    ) -> Result<Self, RuntimeError> {
        let module_dir = module_dir.into();
        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(CapabilityRegistry::new());
        let storage_dir = storage_dir
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| module_dir.join("_storage"));
        let storage = Arc::new(KeyValueStore::new(storage_dir)?);
        let loader = ModuleLoader::new(
            module_dir,
            registry.clone(),
            event_bus.clone(),
            storage.clone(),
            module_registry,
        );
        Ok(Self {
            event_bus,
            registry,
            storage,
            loader,
            started: false,
        })
    }

    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Ok(());
        }
        self.loader.load_all()?;
        self.loader.enable_all()?;
        self.started = true;
        info!("runtime started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.loader.disable_all();
        self.started = false;
        info!("runtime stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_stop_are_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rt = ForgeRuntime::new(tmp.path(), None, ModuleRegistry::new()).unwrap();
        rt.start().unwrap();
        assert!(rt.is_started());
        rt.start().unwrap();
        rt.stop();
        assert!(!rt.is_started());
        rt.stop();
    }
}
