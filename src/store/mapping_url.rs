//! `sourceMappingURL` comment lookup.

use std::sync::LazyLock;

use regex::Regex;

static SOURCE_MAPPING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*#\s*sourceMappingURL=(.+)\s+\*/").unwrap());

/// Map reference from a `/*# sourceMappingURL=... */` comment in CSS text.
pub fn source_mapping_url(css: &str) -> Option<&str> {
    SOURCE_MAPPING
        .captures(css)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found() {
        let css = "a { color: red; }\n\n/*# sourceMappingURL=main.css.map */\n";
        assert_eq!(source_mapping_url(css), Some("main.css.map"));
    }

    #[test]
    fn test_relative_dir() {
        let css = "/*# sourceMappingURL=../maps/main.css.map */";
        assert_eq!(source_mapping_url(css), Some("../maps/main.css.map"));
    }

    #[test]
    fn test_missing() {
        assert_eq!(source_mapping_url("a { color: red; }"), None);
        // Needs whitespace before the closing marker.
        assert_eq!(source_mapping_url("/*# sourceMappingURL=x.map*/"), None);
    }
}
