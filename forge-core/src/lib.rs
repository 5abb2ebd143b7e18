//! Capability-versioned module runtime: registry, loader, event bus, and
//! per-module atomic storage.

pub mod capability;
pub mod event_bus;
pub mod kv_store;
pub mod loader;
pub mod manifest;
pub mod runtime;

pub use capability::{CapabilityRegistry, ProviderHandle, RegistryError};
pub use event_bus::{EventBus, Handler, Unsubscribe};
pub use kv_store::{KeyValueStore, KvError};
pub use loader::{
    order_from_graph, LoaderError, Module, ModuleContext, ModuleHandle, ModuleLoader,
    ModuleRegistry, ModuleState,
};
pub use manifest::ModuleManifest;
pub use runtime::{ForgeRuntime, RuntimeError};
