//! Module discovery, dependency ordering, and lifecycle (§4.4).
//!
//! The original loads each module's entry point by dynamically importing
//! arbitrary source at runtime. Rust modules are compiled in, so discovery
//! instead resolves a manifest's `entry` string (`"ctor_name"`) against a
//! [`ModuleRegistry`] of constructors registered ahead of time by the host
//! binary — same manifest grammar, static linking instead of dynamic import.

use crate::capability::CapabilityRegistry;
use crate::event_bus::EventBus;
use crate::kv_store::KeyValueStore;
use crate::manifest::ModuleManifest;
use log::info;
use miette::Diagnostic;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Everything a module gets at `on_load` time.
pub struct ModuleContext {
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<CapabilityRegistry>,
    pub storage: Arc<KeyValueStore>,
    pub manifest: ModuleManifest,
    pub module_path: PathBuf,
}

/// A loadable unit. `on_load`/`on_enable`/`on_disable` default to no-ops so
/// a module only implements the hooks it cares about.
pub trait Module: Send {
    fn on_load(&mut self, _ctx: &ModuleContext) {}
    fn on_enable(&mut self) {}
    fn on_disable(&mut self) {}
}

pub type ModuleHandle = Arc<Mutex<Box<dyn Module>>>;
pub type ModuleConstructor = fn() -> Box<dyn Module>;

#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse manifest at {0}: {1}")]
    BadManifest(PathBuf, #[source] serde_json::Error),
    #[error("module '{0}' declares entry '{1}' which is not registered")]
    UnknownEntry(String, String),
    #[error("circular dependency detected among modules: {0:?}")]
    CircularDependency(Vec<String>),
    #[error("module '{0}' is not loaded")]
    NotLoaded(String),
    #[error(transparent)]
    Registry(#[from] crate::capability::RegistryError),
}

/// Maps manifest `entry` strings to constructors. Populated by the host
/// binary before `ModuleLoader::load_all` is called.
#[derive(Default)]
pub struct ModuleRegistry {
    ctors: HashMap<String, ModuleConstructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: impl Into<String>, ctor: ModuleConstructor) {
        self.ctors.insert(entry.into(), ctor);
    }

    fn construct(&self, entry: &str) -> Option<Box<dyn Module>> {
        self.ctors.get(entry).map(|ctor| ctor())
    }
}

pub struct ModuleState {
    pub manifest: ModuleManifest,
    pub path: PathBuf,
    pub instance: ModuleHandle,
    pub enabled: bool,
}

/// Discovers module directories (each containing a `module.json`),
/// constructs and loads them in dependency order, and manages enable/disable
/// lifecycle.
pub struct ModuleLoader {
    module_dir: PathBuf,
    registry: Arc<CapabilityRegistry>,
    event_bus: Arc<EventBus>,
    storage: Arc<KeyValueStore>,
    module_registry: ModuleRegistry,
    modules: HashMap<String, ModuleState>,
    enable_order: Vec<String>,
}

impl ModuleLoader {
    pub fn new(
        module_dir: impl Into<PathBuf>,
        registry: Arc<CapabilityRegistry>,
        event_bus: Arc<EventBus>,
        storage: Arc<KeyValueStore>,
        module_registry: ModuleRegistry,
    ) -> Self {
        Self {
            module_dir: module_dir.into(),
            registry,
            event_bus,
            storage,
            module_registry,
            modules: HashMap::new(),
            enable_order: Vec::new(),
        }
    }

    /// Lists module directory names containing a `module.json`.
    pub fn discover(&self) -> Result<Vec<String>, LoaderError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.module_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && path.join("module.json").is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_manifest(path: &Path) -> Result<ModuleManifest, LoaderError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| LoaderError::BadManifest(path.to_path_buf(), e))
    }

    /// Discovers, constructs, and calls `on_load` on every module, in
    /// dependency order (providers before consumers), then binds each
    /// module's declared capabilities into the registry.
    pub fn load_all(&mut self) -> Result<(), LoaderError> {
        let names = self.discover()?;
        let mut manifests: HashMap<String, ModuleManifest> = HashMap::new();
        let mut paths: HashMap<String, PathBuf> = HashMap::new();
        for name in &names {
            let path = self.module_dir.join(name);
            let manifest = Self::read_manifest(&path.join("module.json"))?;
            paths.insert(name.clone(), path);
            manifests.insert(name.clone(), manifest);
        }
        let order = dependency_order(&manifests)?;
        for name in order {
            let manifest = manifests.remove(&name).expect("name came from manifests");
            let path = paths.remove(&name).expect("name came from paths");
            let mut instance = self
                .module_registry
                .construct(&manifest.entry)
                .ok_or_else(|| LoaderError::UnknownEntry(name.clone(), manifest.entry.clone()))?;
            let ctx = ModuleContext {
                event_bus: self.event_bus.clone(),
                registry: self.registry.clone(),
                storage: self.storage.clone(),
                manifest: manifest.clone(),
                module_path: path.clone(),
            };
            instance.on_load(&ctx);
            let provides = manifest.provides.clone();
            let handle: ModuleHandle = Arc::new(Mutex::new(instance));
            for cap in &provides {
                self.registry.bind(cap, handle.clone())?;
            }
            info!("loaded module '{}'", name);
            self.modules.insert(
                name,
                ModuleState {
                    manifest,
                    path,
                    instance: handle,
                    enabled: false,
                },
            );
        }
        Ok(())
    }

    pub fn enable_all(&mut self) -> Result<(), LoaderError> {
        let manifests: HashMap<String, ModuleManifest> = self
            .modules
            .iter()
            .map(|(n, s)| (n.clone(), s.manifest.clone()))
            .collect();
        let order = dependency_order(&manifests)?;
        for name in order {
            self.enable_module(&name)?;
        }
        Ok(())
    }

    pub fn enable_module(&mut self, name: &str) -> Result<(), LoaderError> {
        let state = self
            .modules
            .get_mut(name)
            .ok_or_else(|| LoaderError::NotLoaded(name.to_string()))?;
        if state.enabled {
            return Ok(());
        }
        state.instance.lock().unwrap().on_enable();
        state.enabled = true;
        self.enable_order.push(name.to_string());
        info!("enabled module '{}'", name);
        Ok(())
    }

    pub fn disable_all(&mut self) {
        let order: Vec<String> = self.enable_order.drain(..).rev().collect();
        for name in order {
            self.disable_module(&name);
        }
    }

    pub fn disable_module(&mut self, name: &str) {
        if let Some(state) = self.modules.get_mut(name) {
            if state.enabled {
                state.instance.lock().unwrap().on_disable();
                state.enabled = false;
                info!("disabled module '{}'", name);
            }
        }
    }

    pub fn modules(&self) -> &HashMap<String, ModuleState> {
        &self.modules
    }

    /// Capability-name -> providing-module graph, for diagnostics.
    pub fn dependency_graph(&self) -> HashMap<String, Vec<String>> {
        let manifests: HashMap<String, ModuleManifest> = self
            .modules
            .iter()
            .map(|(n, s)| (n.clone(), s.manifest.clone()))
            .collect();
        build_edges(&manifests)
    }
}

fn provides_map(manifests: &HashMap<String, ModuleManifest>) -> HashMap<String, String> {
    let mut names: Vec<&String> = manifests.keys().collect();
    names.sort();
    let mut map = HashMap::new();
    for name in names {
        let manifest = &manifests[name];
        for cap in &manifest.provides {
            let cap_name = cap.split('@').next().unwrap_or(cap);
            // last-writer-wins over a name-sorted walk, so duplicate
            // providers of the same capability resolve the same way on
            // every run rather than depending on HashMap's randomized
            // iteration order.
            map.insert(cap_name.to_string(), name.clone());
        }
    }
    map
}

fn build_edges(manifests: &HashMap<String, ModuleManifest>) -> HashMap<String, Vec<String>> {
    let provides = provides_map(manifests);
    let mut edges: HashMap<String, Vec<String>> =
        manifests.keys().map(|n| (n.clone(), Vec::new())).collect();
    for (name, manifest) in manifests {
        for req in &manifest.requires {
            let cap_name = req.split('@').next().unwrap_or(req);
            if let Some(provider) = provides.get(cap_name) {
                if provider != name {
                    edges.get_mut(name).unwrap().push(provider.clone());
                }
            }
        }
    }
    edges
}

/// Kahn's algorithm over the requires-edges graph: a module with no
/// remaining unresolved dependency is emitted next, so a capability's
/// provider always lands before its consumer. Ties broken lexicographically
/// for determinism. Duplicate providers of the same capability resolve by
/// last-writer-wins, matching the original's dict-overwrite behavior — not
/// treated as an error.
fn dependency_order(manifests: &HashMap<String, ModuleManifest>) -> Result<Vec<String>, LoaderError> {
    let mut edges = build_edges(manifests);
    let mut result = Vec::with_capacity(manifests.len());
    let mut remaining: HashSet<String> = manifests.keys().cloned().collect();
    while !remaining.is_empty() {
        let mut candidates: Vec<&String> = remaining
            .iter()
            .filter(|n| edges.get(*n).map(|d| d.is_empty()).unwrap_or(true))
            .collect();
        if candidates.is_empty() {
            let mut stuck: Vec<String> = remaining.into_iter().collect();
            stuck.sort();
            return Err(LoaderError::CircularDependency(stuck));
        }
        candidates.sort();
        let chosen = candidates[0].clone();
        remaining.remove(&chosen);
        edges.remove(&chosen);
        for deps in edges.values_mut() {
            deps.retain(|d| d != &chosen);
        }
        result.push(chosen);
    }
    Ok(result)
}

/// Runs the same Kahn's-algorithm ordering directly over a raw
/// module -> [dependency, …] graph, for the admin API's `/api/validate`
/// endpoint where callers submit an arbitrary graph rather than manifests
/// already on disk.
pub fn order_from_graph(graph: &HashMap<String, Vec<String>>) -> Result<Vec<String>, LoaderError> {
    let mut edges: HashMap<String, Vec<String>> = graph.clone();
    for deps in edges.values() {
        for dep in deps {
            edges.entry(dep.clone()).or_default();
        }
    }
    let mut result = Vec::with_capacity(edges.len());
    let mut remaining: HashSet<String> = edges.keys().cloned().collect();
    while !remaining.is_empty() {
        let mut candidates: Vec<&String> = remaining
            .iter()
            .filter(|n| edges.get(*n).map(|d| d.is_empty()).unwrap_or(true))
            .collect();
        if candidates.is_empty() {
            let mut stuck: Vec<String> = remaining.into_iter().collect();
            stuck.sort();
            return Err(LoaderError::CircularDependency(stuck));
        }
        candidates.sort();
        let chosen = candidates[0].clone();
        remaining.remove(&chosen);
        edges.remove(&chosen);
        for deps in edges.values_mut() {
            deps.retain(|d| d != &chosen);
        }
        result.push(chosen);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(provides: &[&str], requires: &[&str]) -> ModuleManifest {
        ModuleManifest {
            name: "x".into(),
            entry: "x".into(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            version: None,
        }
    }

    #[test]
    fn providers_come_before_consumers() {
        let mut manifests = HashMap::new();
        manifests.insert("consumer".to_string(), manifest(&[], &["svc@1.0"]));
        manifests.insert("provider".to_string(), manifest(&["svc@1.0.0"], &[]));
        let order = dependency_order(&manifests).unwrap();
        let p = order.iter().position(|n| n == "provider").unwrap();
        let c = order.iter().position(|n| n == "consumer").unwrap();
        assert!(p < c);
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut manifests = HashMap::new();
        manifests.insert("zeta".to_string(), manifest(&[], &[]));
        manifests.insert("alpha".to_string(), manifest(&[], &[]));
        let order = dependency_order(&manifests).unwrap();
        assert_eq!(order, vec!["alpha", "zeta"]);
    }

    #[test]
    fn circular_dependency_is_reported() {
        let mut manifests = HashMap::new();
        manifests.insert("a".to_string(), manifest(&["a@1.0.0"], &["b@1.0"]));
        manifests.insert("b".to_string(), manifest(&["b@1.0.0"], &["a@1.0"]));
        assert!(matches!(
            dependency_order(&manifests),
            Err(LoaderError::CircularDependency(_))
        ));
    }

    #[test]
    fn duplicate_providers_last_writer_wins_is_not_an_error() {
        let mut manifests = HashMap::new();
        manifests.insert("first".to_string(), manifest(&["svc@1.0.0"], &[]));
        manifests.insert("second".to_string(), manifest(&["svc@2.0.0"], &[]));
        manifests.insert("consumer".to_string(), manifest(&[], &["svc@1.0"]));
        assert!(dependency_order(&manifests).is_ok());
    }

    #[test]
    fn order_from_graph_orders_dependencies_first() {
        let mut graph = HashMap::new();
        graph.insert("consumer".to_string(), vec!["provider".to_string()]);
        graph.insert("provider".to_string(), vec![]);
        let order = order_from_graph(&graph).unwrap();
        let p = order.iter().position(|n| n == "provider").unwrap();
        let c = order.iter().position(|n| n == "consumer").unwrap();
        assert!(p < c);
    }

    #[test]
    fn order_from_graph_reports_cycles() {
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), vec!["b".to_string()]);
        graph.insert("b".to_string(), vec!["a".to_string()]);
        assert!(matches!(
            order_from_graph(&graph),
            Err(LoaderError::CircularDependency(_))
        ));
    }
}
