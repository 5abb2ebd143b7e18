//! Capability-versioned provider registry (§4.1).

use miette::Diagnostic;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A handle to whatever object a module bound as the provider of a capability.
/// Downcast it to the concrete capability trait/struct the consumer expects.
pub type ProviderHandle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("malformed capability version or range: {0}")]
    BadVersion(String),
}

/// A dotted numeric version, e.g. `1.2.3`. Compared component-wise; a missing
/// trailing component is treated as `0` so `1.2` == `1.2.0`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        if s.is_empty() {
            return Err(RegistryError::BadVersion(s.to_string()));
        }
        let mut parts = Vec::new();
        for part in s.split('.') {
            let n: u64 = part
                .parse()
                .map_err(|_| RegistryError::BadVersion(s.to_string()))?;
            parts.push(n);
        }
        Ok(Version(parts))
    }

    fn major_minor_bump(&self) -> Version {
        let major = self.0.first().copied().unwrap_or(0);
        Version(vec![major + 1, 0])
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strs: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", strs.join("."))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
}

enum Query {
    Latest,
    Exact(Version),
    Range(Vec<(CmpOp, Version)>),
}

fn split_capability(spec: &str) -> (&str, &str) {
    match spec.split_once('@') {
        Some((name, rest)) => (name, rest),
        None => (spec, ""),
    }
}

fn parse_query(spec: &str) -> Result<(String, Query), RegistryError> {
    let (name, version_spec) = split_capability(spec);
    if version_spec.is_empty() {
        return Ok((name.to_string(), Query::Latest));
    }
    if let Some(base) = version_spec.strip_prefix('^') {
        let base = Version::parse(base)?;
        let upper = base.major_minor_bump();
        return Ok((
            name.to_string(),
            Query::Range(vec![(CmpOp::Ge, base), (CmpOp::Lt, upper)]),
        ));
    }
    if version_spec
        .chars()
        .next()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false)
    {
        let v = Version::parse(version_spec)?;
        return Ok((name.to_string(), Query::Exact(v)));
    }
    let mut clauses = Vec::new();
    for clause in version_spec.split(',') {
        let clause = clause.trim();
        let (op, rest) = if let Some(r) = clause.strip_prefix(">=") {
            (CmpOp::Ge, r)
        } else if let Some(r) = clause.strip_prefix("<=") {
            (CmpOp::Le, r)
        } else if let Some(r) = clause.strip_prefix("==") {
            (CmpOp::Eq, r)
        } else if let Some(r) = clause.strip_prefix('>') {
            (CmpOp::Gt, r)
        } else if let Some(r) = clause.strip_prefix('<') {
            (CmpOp::Lt, r)
        } else {
            return Err(RegistryError::BadVersion(spec.to_string()));
        };
        clauses.push((op, Version::parse(rest.trim())?));
    }
    if clauses.is_empty() {
        return Err(RegistryError::BadVersion(spec.to_string()));
    }
    Ok((name.to_string(), Query::Range(clauses)))
}

fn satisfies(v: &Version, query: &Query) -> bool {
    match query {
        Query::Latest => true,
        Query::Exact(want) => v == want,
        Query::Range(clauses) => clauses.iter().all(|(op, bound)| match op {
            CmpOp::Ge => v >= bound,
            CmpOp::Le => v <= bound,
            CmpOp::Gt => v > bound,
            CmpOp::Lt => v < bound,
            CmpOp::Eq => v == bound,
        }),
    }
}

struct Entry {
    version: Version,
    provider: ProviderHandle,
    order: u64,
}

/// Registry mapping capability names and versions to providers. Thread-safe
/// for concurrent bind/unbind/get.
pub struct CapabilityRegistry {
    providers: Mutex<HashMap<String, Vec<Entry>>>,
    counter: AtomicU64,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Binds `provider` to `capability` (must be `name@exact.version`).
    pub fn bind(&self, capability: &str, provider: ProviderHandle) -> Result<(), RegistryError> {
        let (name, version_str) = split_capability(capability);
        let version = Version::parse(version_str)?;
        let order = self.counter.fetch_add(1, AtomicOrdering::SeqCst);
        let mut providers = self.providers.lock().unwrap();
        let list = providers.entry(name.to_string()).or_default();
        list.push(Entry {
            version,
            provider,
            order,
        });
        list.sort_by(|a, b| a.version.cmp(&b.version).then(a.order.cmp(&b.order)));
        Ok(())
    }

    /// Removes every binding whose version equals `version` and whose
    /// provider is the same object (by pointer identity) as `provider`.
    pub fn unbind(&self, capability: &str, provider: &ProviderHandle) -> Result<(), RegistryError> {
        let (name, version_str) = split_capability(capability);
        let version = Version::parse(version_str)?;
        let mut providers = self.providers.lock().unwrap();
        if let Some(list) = providers.get_mut(name) {
            list.retain(|e| !(e.version == version && Arc::ptr_eq(&e.provider, provider)));
        }
        Ok(())
    }

    /// Resolves `query` to the best matching provider, or `None` if nothing
    /// matches. Ties are broken by earliest insertion.
    pub fn get(&self, query: &str) -> Result<Option<ProviderHandle>, RegistryError> {
        let (name, parsed) = parse_query(query)?;
        let providers = self.providers.lock().unwrap();
        let Some(list) = providers.get(&name) else {
            return Ok(None);
        };
        let mut best: Option<&Entry> = None;
        for entry in list.iter().filter(|e| satisfies(&e.version, &parsed)) {
            best = match best {
                None => Some(entry),
                Some(b) if entry.version > b.version => Some(entry),
                Some(b) if entry.version == b.version && entry.order < b.order => Some(entry),
                Some(b) => Some(b),
            };
        }
        Ok(best.map(|e| e.provider.clone()))
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        let providers = self.providers.lock().unwrap();
        providers
            .iter()
            .map(|(name, list)| (name.clone(), list.iter().map(|e| e.version.to_string()).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(n: i32) -> ProviderHandle {
        Arc::new(n)
    }

    #[test]
    fn latest_picks_highest_version_earliest_insertion_on_tie() {
        let reg = CapabilityRegistry::new();
        let a = handle(1);
        let b = handle(2);
        reg.bind("svc@1.0.0", a.clone()).unwrap();
        reg.bind("svc@2.0.0", b.clone()).unwrap();
        let got = reg.get("svc").unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &b));
    }

    #[test]
    fn caret_range_bounds_to_minor_series() {
        let reg = CapabilityRegistry::new();
        let a = handle(1);
        let b = handle(2);
        reg.bind("svc@1.2.0", a.clone()).unwrap();
        reg.bind("svc@2.0.0", b.clone()).unwrap();
        let got = reg.get("svc@^1.0").unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &a));
    }

    #[test]
    fn unbind_matches_identity_not_just_value() {
        let reg = CapabilityRegistry::new();
        let a = handle(5);
        let b = handle(5);
        reg.bind("svc@1.0.0", a.clone()).unwrap();
        reg.unbind("svc@1.0.0", &b).unwrap();
        assert!(reg.get("svc").unwrap().is_some());
        reg.unbind("svc@1.0.0", &a).unwrap();
        assert!(reg.get("svc").unwrap().is_none());
    }

    #[test]
    fn bad_version_is_rejected() {
        let reg = CapabilityRegistry::new();
        assert!(reg.bind("svc@not-a-version", handle(1)).is_err());
        assert!(reg.get("svc@not-a-version").is_err());
    }

    #[test]
    fn comma_combined_range() {
        let reg = CapabilityRegistry::new();
        let a = handle(1);
        reg.bind("svc@1.5.0", a.clone()).unwrap();
        assert!(reg.get("svc@>=1.0,<2.0").unwrap().is_some());
        assert!(reg.get("svc@>=2.0,<3.0").unwrap().is_none());
    }
}
