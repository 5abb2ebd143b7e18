//! On-disk module manifest format (`module.json`).

use serde::Deserialize;

/// Declares a module's identity, entry point, and capability edges.
/// `provides`/`requires` entries are `name@version` strings, the same
/// format `CapabilityRegistry` parses.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub entry: String,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let m: ModuleManifest =
            serde_json::from_str(r#"{"name": "demo", "entry": "entry:Demo"}"#).unwrap();
        assert_eq!(m.name, "demo");
        assert!(m.provides.is_empty());
        assert!(m.requires.is_empty());
    }

    #[test]
    fn parses_full_manifest() {
        let m: ModuleManifest = serde_json::from_str(
            r#"{"name": "demo", "entry": "entry:Demo", "provides": ["svc@1.0.0"], "requires": ["other@^1.0"], "version": "1.0.0"}"#,
        )
        .unwrap();
        assert_eq!(m.provides, vec!["svc@1.0.0"]);
        assert_eq!(m.requires, vec!["other@^1.0"]);
    }
}
