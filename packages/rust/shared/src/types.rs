//! Core domain types shared by the pipeline crates.

use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::error::ClashBuilderError;

// ---------------------------------------------------------------------------
// NodeRecord
// ---------------------------------------------------------------------------

/// One proxy node as delivered by the subscription.
///
/// The attribute set is open-ended and passed through untouched; only
/// `name` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRecord(pub Mapping);

impl NodeRecord {
    /// The node's display name, if present and textual.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Borrow the raw attribute mapping.
    pub fn attributes(&self) -> &Mapping {
        &self.0
    }
}

impl From<Mapping> for NodeRecord {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

// ---------------------------------------------------------------------------
// RegionKeywordMap
// ---------------------------------------------------------------------------

/// A named region and the keywords that select its nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Ordered region → keywords mapping.
///
/// Declaration order from the source document is kept; it drives the order
/// of buckets, providers and groups. Region names are unique and keywords
/// are non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionKeywordMap {
    regions: Vec<Region>,
}

impl RegionKeywordMap {
    /// Build a map from `(region, keywords)` pairs, validating invariants.
    pub fn try_from_pairs<I, K, W>(pairs: I) -> Result<Self, ClashBuilderError>
    where
        I: IntoIterator<Item = (K, Vec<W>)>,
        K: Into<String>,
        W: Into<String>,
    {
        let mut map = Self::default();
        for (name, keywords) in pairs {
            map.push(name.into(), keywords.into_iter().map(Into::into).collect())
                .map_err(ClashBuilderError::validation)?;
        }
        Ok(map)
    }

    fn push(&mut self, name: String, keywords: Vec<String>) -> Result<(), String> {
        if self.regions.iter().any(|r| r.name == name) {
            return Err(format!("duplicate region '{name}'"));
        }
        if keywords.iter().any(|k| k.is_empty()) {
            return Err(format!("region '{name}' has an empty keyword"));
        }
        self.regions.push(Region { name, keywords });
        Ok(())
    }

    /// Iterate regions in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Region names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegionKeywordMap {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

impl Serialize for RegionKeywordMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.regions.len()))?;
        for region in &self.regions {
            map.serialize_entry(&region.name, &region.keywords)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RegionKeywordMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RegionMapVisitor;

        impl<'de> Visitor<'de> for RegionMapVisitor {
            type Value = RegionKeywordMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of region name to a list of keywords")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = RegionKeywordMap::default();
                while let Some((name, keywords)) = access.next_entry::<String, Vec<String>>()? {
                    map.push(name, keywords).map_err(serde::de::Error::custom)?;
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(RegionMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// RuleMode
// ---------------------------------------------------------------------------

/// Which fixed allow/deny fragment is appended after the user rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    #[default]
    Whitelist,
    Blacklist,
    #[serde(alias = "")]
    None,
}

impl RuleMode {
    /// File stem of the mode fragment, or `None` when no fragment applies.
    pub fn file_stem(self) -> Option<&'static str> {
        match self {
            Self::Whitelist => Some("whitelist"),
            Self::Blacklist => Some("blacklist"),
            Self::None => None,
        }
    }
}

impl fmt::Display for RuleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem().unwrap_or("none"))
    }
}

impl FromStr for RuleMode {
    type Err = ClashBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whitelist" => Ok(Self::Whitelist),
            "blacklist" => Ok(Self::Blacklist),
            "" | "none" => Ok(Self::None),
            other => Err(ClashBuilderError::validation(format!(
                "unknown rule mode '{other}': expected whitelist, blacklist or none"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// PatternList
// ---------------------------------------------------------------------------

/// User-defined rule glob patterns, in precedence order.
///
/// Accepts either a single string or a list when deserialized; a single
/// pattern becomes a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct PatternList(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for PatternList {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(p) => Self(vec![p]),
            OneOrMany::Many(ps) => Self(ps),
        }
    }
}

impl PatternList {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for PatternList {
    fn from(patterns: Vec<String>) -> Self {
        Self(patterns)
    }
}

impl From<&str> for PatternList {
    fn from(pattern: &str) -> Self {
        Self(vec![pattern.to_string()])
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Human-readable name of a YAML value's kind, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_requires_text() {
        let node: NodeRecord = serde_yaml::from_str("name: HK-01\ntype: ss\n").unwrap();
        assert_eq!(node.name(), Some("HK-01"));

        let node: NodeRecord = serde_yaml::from_str("name: 42\n").unwrap();
        assert_eq!(node.name(), None);

        let node: NodeRecord = serde_yaml::from_str("server: 1.2.3.4\n").unwrap();
        assert_eq!(node.name(), None);
    }

    #[test]
    fn region_map_keeps_declaration_order() {
        let json = r#"{"US": ["us"], "HK": ["hk"], "JP": ["jp", "japan"]}"#;
        let map: RegionKeywordMap = serde_json::from_str(json).unwrap();
        let names: Vec<&str> = map.names().collect();
        assert_eq!(names, vec!["US", "HK", "JP"]);

        let back = serde_json::to_string(&map).unwrap();
        assert_eq!(back, r#"{"US":["us"],"HK":["hk"],"JP":["jp","japan"]}"#);
    }

    #[test]
    fn region_map_rejects_duplicates_and_empty_keywords() {
        let dup = "HK: [hk]\nHK: [hong kong]\n";
        assert!(serde_yaml::from_str::<RegionKeywordMap>(dup).is_err());

        let empty = r#"{"HK": ["hk", ""]}"#;
        let err = serde_json::from_str::<RegionKeywordMap>(empty).unwrap_err();
        assert!(err.to_string().contains("empty keyword"));

        assert!(RegionKeywordMap::try_from_pairs([("A", vec!["a"]), ("A", vec!["b"])]).is_err());
    }

    #[test]
    fn region_map_allows_empty_keyword_list() {
        let map = RegionKeywordMap::try_from_pairs([("EMPTY", Vec::<String>::new())]).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.iter().next().unwrap().keywords.is_empty());
    }

    #[test]
    fn rule_mode_parsing() {
        assert_eq!("whitelist".parse::<RuleMode>().unwrap(), RuleMode::Whitelist);
        assert_eq!("BLACKLIST".parse::<RuleMode>().unwrap(), RuleMode::Blacklist);
        assert_eq!("".parse::<RuleMode>().unwrap(), RuleMode::None);
        assert!("greylist".parse::<RuleMode>().is_err());

        let mode: RuleMode = serde_json::from_str(r#""""#).unwrap();
        assert_eq!(mode, RuleMode::None);
        assert_eq!(RuleMode::None.file_stem(), None);
        assert_eq!(RuleMode::Blacklist.to_string(), "blacklist");
    }

    #[test]
    fn pattern_list_normalizes_single_string() {
        let one: PatternList = serde_json::from_str(r#""*.yaml""#).unwrap();
        assert_eq!(one.0, vec!["*.yaml".to_string()]);

        let many: PatternList = serde_json::from_str(r#"["a.yaml", "b/*"]"#).unwrap();
        assert_eq!(many.0.len(), 2);

        assert_eq!(serde_json::to_string(&one).unwrap(), r#"["*.yaml"]"#);
    }
}
