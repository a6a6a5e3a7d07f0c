//! Render request entries.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Component props as handed to the script context
pub type Props = serde_json::Map<String, serde_json::Value>;

/// One component to render, along with its props.
///
/// Missing or `null` props become an empty map when the entry is built, so
/// every consumer sees a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct Entry {
    comp: String,
    props: Props,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(alias = "Comp")]
    comp: String,
    #[serde(default, alias = "Props")]
    props: Option<Props>,
}

impl From<RawEntry> for Entry {
    fn from(raw: RawEntry) -> Self {
        Entry::new(raw.comp, raw.props)
    }
}

impl Entry {
    pub fn new(comp: impl Into<String>, props: Option<Props>) -> Self {
        Self {
            comp: comp.into(),
            props: props.unwrap_or_default(),
        }
    }

    /// Component identifier, the key into the manifest
    pub fn comp(&self) -> &str {
        &self.comp
    }

    pub fn props(&self) -> &Props {
        &self.props
    }
}

/// Parse a JSON array of entries, e.g. a request body
pub fn parse_entries(json: &str) -> Result<Vec<Entry>> {
    serde_json::from_str(json).map_err(|e| anyhow::anyhow!("Invalid entries JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_props_become_empty_map() {
        let entries = parse_entries(r#"[{"comp": "A"}, {"comp": "B", "props": null}]"#).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries[0].props().is_empty());
        assert!(entries[1].props().is_empty());
    }

    #[test]
    fn test_accepts_capitalized_fields() {
        let entries = parse_entries(r#"[{"Comp": "Button", "Props": {"label": "Hi"}}]"#).unwrap();

        assert_eq!(entries[0].comp(), "Button");
        assert_eq!(entries[0].props()["label"], json!("Hi"));
    }

    #[test]
    fn test_serializes_for_script_context() {
        let entry = Entry::new("Button", None);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value, json!({"comp": "Button", "props": {}}));
    }

    #[test]
    fn test_props_are_kept_as_given() {
        let mut deep = json!("leaf");
        for _ in 0..40 {
            deep = json!([deep]);
        }
        let json = json!([{
            "comp": "Button",
            "props": {
                "constructor": "Foo",
                "prototype": {"x": 1},
                "__proto__": {"admin": true},
                "deep": deep
            }
        }]);

        let entries = parse_entries(&json.to_string()).unwrap();

        assert_eq!(entries[0].props()["constructor"], json!("Foo"));
        assert_eq!(entries[0].props()["__proto__"], json!({"admin": true}));
        assert_eq!(entries[0].props()["deep"], deep);
    }

    #[test]
    fn test_rejects_malformed_entries() {
        let result = parse_entries(r#"[{"props": {}}]"#);
        assert!(result.unwrap_err().to_string().contains("Invalid entries JSON"));
    }
}
