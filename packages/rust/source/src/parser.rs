//! Parser for subscription bodies.
//!
//! A subscription is a YAML (or JSON, which is valid YAML) document with a
//! top-level `proxies` sequence. Every entry must be a mapping; everything
//! else in the document is ignored.

use clashbuilder_shared::{ClashBuilderError, NodeRecord, Result, value_kind};
use serde_yaml::Value;

/// Extract the node list from a subscription body fetched from `locator`.
///
/// `proxies: null` yields an empty list; a missing key or any other shape is
/// malformed content.
pub fn parse_node_list(body: &str, locator: &str) -> Result<Vec<NodeRecord>> {
    let doc: Value = serde_yaml::from_str(body)
        .map_err(|e| ClashBuilderError::source_fetch(locator, format!("invalid YAML: {e}")))?;

    let Value::Mapping(mut doc) = doc else {
        return Err(ClashBuilderError::source_fetch(
            locator,
            format!("expected a mapping at the top level, found {}", value_kind(&doc)),
        ));
    };

    let proxies = doc
        .remove("proxies")
        .ok_or_else(|| ClashBuilderError::source_fetch(locator, "missing 'proxies' key"))?;

    let entries = match proxies {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(entries) => entries,
        other => {
            return Err(ClashBuilderError::source_fetch(
                locator,
                format!("'proxies' must be a sequence, found {}", value_kind(&other)),
            ));
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Value::Mapping(attrs) => Ok(NodeRecord(attrs)),
            other => Err(ClashBuilderError::source_fetch(
                locator,
                format!("proxies[{i}] must be a mapping, found {}", value_kind(&other)),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATOR: &str = "https://sub.example.com/clash";

    #[test]
    fn parses_nodes_in_order() {
        let body = "\
port: 7890
proxies:
  - {name: HK-01, type: ss, server: 1.1.1.1, port: 443}
  - {name: US-East-1, type: vmess, server: 2.2.2.2, port: 443}
proxy-groups: []
";
        let nodes = parse_node_list(body, LOCATOR).unwrap();
        let names: Vec<_> = nodes.iter().filter_map(NodeRecord::name).collect();
        assert_eq!(names, vec!["HK-01", "US-East-1"]);
        assert_eq!(
            nodes[1].attributes().get("type").and_then(Value::as_str),
            Some("vmess")
        );
    }

    #[test]
    fn accepts_json_bodies() {
        let body = r#"{"proxies": [{"name": "SG-Premium", "type": "trojan"}]}"#;
        let nodes = parse_node_list(body, LOCATOR).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn null_proxies_is_empty() {
        assert!(parse_node_list("proxies:\n", LOCATOR).unwrap().is_empty());
        assert!(parse_node_list("proxies: []\n", LOCATOR).unwrap().is_empty());
    }

    #[test]
    fn malformed_bodies_are_source_errors() {
        for body in [
            "just a string",
            "port: 7890\n",
            "proxies: {name: x}\n",
            "proxies:\n  - plain-string\n",
            "proxies: [unclosed\n",
        ] {
            let err = parse_node_list(body, LOCATOR).unwrap_err();
            assert_eq!(err.kind(), "source-fetch", "body: {body}");
            assert!(err.to_string().contains(LOCATOR));
        }
    }
}
