//! Source map JSON document (revision 3).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn version_3() -> u32 {
    3
}

/// A parsed `.map` document.
///
/// Unknown keys (`sourcesContent`, `x_*` extensions) are preserved so a
/// rewritten map serializes back without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapJson {
    #[serde(default = "version_3")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MapJson {
    fn default() -> Self {
        Self {
            version: 3,
            file: None,
            source_root: None,
            sources: Vec::new(),
            names: Vec::new(),
            mappings: String::new(),
            extra: Map::new(),
        }
    }
}

impl MapJson {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Accept either a JSON object or a string holding JSON text, since
    /// workers may send the map either way.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        match value {
            Value::String(text) => Self::parse(&text),
            other => serde_json::from_value(other),
        }
    }

    pub fn to_text(&self) -> String {
        // A struct of strings and JSON values always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let map = MapJson::parse(r#"{"version":3,"sources":["a.scss"],"mappings":"AAAA"}"#).unwrap();
        assert_eq!(map.sources, vec!["a.scss"]);
        assert_eq!(map.file, None);
    }

    #[test]
    fn test_extra_keys_survive() {
        let text = r#"{"version":3,"file":"a.css","sources":[],"names":[],"mappings":"","sourcesContent":["x"]}"#;
        let map = MapJson::parse(text).unwrap();
        assert!(map.extra.contains_key("sourcesContent"));
        assert!(map.to_text().contains("sourcesContent"));
    }

    #[test]
    fn test_from_string_value() {
        let value = Value::String(r#"{"sources":["b.scss"]}"#.into());
        let map = MapJson::from_value(value).unwrap();
        assert_eq!(map.sources, vec!["b.scss"]);
        assert_eq!(map.version, 3);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(MapJson::parse("not json").is_err());
        assert!(MapJson::parse(r#"{"sources": 5}"#).is_err());
    }
}
