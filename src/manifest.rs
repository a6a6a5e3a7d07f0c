//! Component manifest: component identifier -> compiled client asset.
//!
//! Loaded once from the server bundle's `manifest` export and never mutated
//! afterwards. Lookups are lenient: an unknown identifier resolves to an empty
//! descriptor so a stale build degrades instead of failing the request.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Client-side assets for one component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path of the client entry chunk, relative to the asset root
    #[serde(default)]
    pub client: String,
    /// Stylesheets the component needs, in load order
    #[serde(default)]
    pub css: Vec<String>,
}

static EMPTY: ManifestEntry = ManifestEntry {
    client: String::new(),
    css: Vec::new(),
};

/// Read-only mapping from component identifier to its assets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: HashMap<String, ManifestEntry>) -> Self {
        Self { entries }
    }

    /// Parse the JSON form exported by the server bundle
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow!("Invalid component manifest: {}", e))
    }

    /// Look up a component, falling back to an empty descriptor on a miss
    pub fn get(&self, comp: &str) -> &ManifestEntry {
        self.entries.get(comp).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, comp: &str) -> bool {
        self.entries.contains_key(comp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, ManifestEntry)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_bundle_manifest() {
        let manifest = Manifest::from_json(
            r#"{
                "Button": { "client": "button.js", "css": ["button.css", "base.css"] },
                "Layout": { "client": "layout.js" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("Button").client, "button.js");
        assert_eq!(manifest.get("Button").css, vec!["button.css", "base.css"]);
        assert!(manifest.get("Layout").css.is_empty());
    }

    #[test]
    fn test_unknown_component_is_empty() {
        let manifest =
            Manifest::from_json(r#"{"Button": {"client": "button.js", "css": []}}"#).unwrap();

        assert!(!manifest.contains("Missing"));
        assert_eq!(manifest.get("Missing"), &ManifestEntry::default());
    }

    #[test]
    fn test_rejects_malformed_manifest() {
        let result = Manifest::from_json(r#"["not", "a", "map"]"#);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid component manifest"));
    }
}
