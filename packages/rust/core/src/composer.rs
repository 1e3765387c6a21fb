//! Final document composition.
//!
//! The document is built by successive shallow merges: a key written by a
//! later step replaces the earlier value wholesale and keeps its original
//! position; every other key is preserved. Nothing is deep-merged.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument};

use clashbuilder_shared::{ClashBuilderError, GroupsConfig, RegionKeywordMap, Result, value_kind};

use crate::partition::bucket_file;

pub const PROXY_PROVIDERS_KEY: &str = "proxy-providers";
pub const PROXY_GROUPS_KEY: &str = "proxy-groups";
pub const RULES_KEY: &str = "rules";

/// Selection policy of generated groups: pick the lowest-latency member.
const GROUP_TYPE: &str = "url-test";

// ---------------------------------------------------------------------------
// ConfigDocument
// ---------------------------------------------------------------------------

/// The merged configuration, keys in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigDocument(Mapping);

impl ConfigDocument {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `rules` sequence, if present.
    pub fn rules(&self) -> Option<&Vec<Value>> {
        self.get(RULES_KEY).and_then(Value::as_sequence)
    }

    /// Top-level keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.0.keys()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn into_mapping(self) -> Mapping {
        self.0
    }
}

// ---------------------------------------------------------------------------
// ProxySection
// ---------------------------------------------------------------------------

/// Generated `proxy-providers` and `proxy-groups` for a profile's regions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySection {
    /// Region name → file-backed provider.
    pub providers: Mapping,
    /// One `url-test` group per region.
    pub groups: Vec<Value>,
}

impl ProxySection {
    /// One provider and one group per region, in region order.
    ///
    /// Provider paths point at the bucket documents and are written relative
    /// to the proxy client's working directory (`./<proxies_dir>/...`).
    pub fn generate(
        profile: &str,
        regions: &RegionKeywordMap,
        proxies_dir: &str,
        groups: &GroupsConfig,
    ) -> Self {
        let mut providers = Mapping::new();
        let mut group_list = Vec::with_capacity(regions.len());

        for region in regions.names() {
            let file = bucket_file(proxies_dir, profile, region);
            let path = if file.is_absolute() {
                file.display().to_string()
            } else {
                format!("./{}", file.display())
            };

            let mut provider = Mapping::new();
            provider.insert("type".into(), "file".into());
            provider.insert("path".into(), path.into());
            providers.insert(region.into(), Value::Mapping(provider));

            let mut group = Mapping::new();
            group.insert("name".into(), region.into());
            group.insert("type".into(), GROUP_TYPE.into());
            group.insert("use".into(), Value::Sequence(vec![region.into()]));
            group.insert("url".into(), groups.probe_url.as_str().into());
            if let Some(interval) = groups.interval {
                group.insert("interval".into(), interval.into());
            }
            group_list.push(Value::Mapping(group));
        }

        Self {
            providers,
            groups: group_list,
        }
    }

    fn into_mapping(self) -> Mapping {
        let mut section = Mapping::new();
        section.insert(PROXY_PROVIDERS_KEY.into(), Value::Mapping(self.providers));
        section.insert(PROXY_GROUPS_KEY.into(), Value::Sequence(self.groups));
        section
    }
}

// ---------------------------------------------------------------------------
// DocumentComposer
// ---------------------------------------------------------------------------

/// Incremental builder for a [`ConfigDocument`].
#[derive(Debug, Clone, Default)]
pub struct DocumentComposer {
    doc: Mapping,
}

impl DocumentComposer {
    /// Start from the base template.
    pub fn new(base: Mapping) -> Self {
        Self { doc: base }
    }

    /// Shallow-merge `fragment` into the document.
    ///
    /// Fails when a key holds a non-null value of a different shape on both
    /// sides (mapping vs. sequence vs. scalar); `source_name` identifies the
    /// fragment in the error.
    #[instrument(skip_all, fields(source = source_name, keys = fragment.len()))]
    pub fn merge(&mut self, source_name: &str, fragment: Mapping) -> Result<&mut Self> {
        for (key, incoming) in &fragment {
            if let Some(existing) = self.doc.get(key) {
                check_compatible(key, existing, incoming, source_name)?;
            }
        }

        for (key, value) in fragment {
            if self.doc.contains_key(&key) {
                debug!(key = %key_label(&key), "overriding key");
            }
            self.doc.insert(key, value);
        }
        Ok(self)
    }

    /// Merge the generated `proxy-providers` / `proxy-groups`.
    pub fn merge_proxy_section(&mut self, section: ProxySection) -> Result<&mut Self> {
        self.merge("generated proxy section", section.into_mapping())
    }

    /// Set `rules`, discarding whatever the document held before.
    pub fn set_rules(&mut self, rules: Vec<Value>) -> &mut Self {
        if let Some(previous) = self.doc.get(RULES_KEY) {
            debug!(
                previous = previous.as_sequence().map_or(0, Vec::len),
                "replacing existing rules"
            );
        }
        self.doc.insert(RULES_KEY.into(), Value::Sequence(rules));
        self
    }

    pub fn finish(self) -> ConfigDocument {
        ConfigDocument(self.doc)
    }
}

/// Compose a full document in one call: base, rule providers, proxy
/// section, then rules.
pub fn compose(
    base: Mapping,
    providers: Mapping,
    providers_name: &str,
    section: ProxySection,
    rules: Vec<Value>,
) -> Result<ConfigDocument> {
    let mut composer = DocumentComposer::new(base);
    composer
        .merge(providers_name, providers)?
        .merge_proxy_section(section)?
        .set_rules(rules);
    Ok(composer.finish())
}

/// Coarse shape used for merge compatibility. `None` for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Mapping,
    Sequence,
    Scalar,
}

fn shape(value: &Value) -> Option<Shape> {
    match value {
        Value::Null => None,
        Value::Mapping(_) => Some(Shape::Mapping),
        Value::Sequence(_) => Some(Shape::Sequence),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(Shape::Scalar),
        Value::Tagged(tagged) => shape(&tagged.value),
    }
}

fn check_compatible(key: &Value, existing: &Value, incoming: &Value, source: &str) -> Result<()> {
    match (shape(existing), shape(incoming)) {
        (Some(a), Some(b)) if a != b => Err(ClashBuilderError::composition(
            key_label(key),
            source,
            format!(
                "existing value is a {}, incoming value is a {}",
                value_kind(existing),
                value_kind(incoming)
            ),
        )),
        _ => Ok(()),
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| value_kind(other).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    fn regions() -> RegionKeywordMap {
        RegionKeywordMap::try_from_pairs([("HK", vec!["hk"]), ("US", vec!["us"])]).unwrap()
    }

    fn section() -> ProxySection {
        ProxySection::generate("home", &regions(), "proxies", &GroupsConfig::default())
    }

    #[test]
    fn proxy_section_shape() {
        let section = section();
        assert_eq!(section.providers.len(), 2);

        let hk = section.providers.get("HK").unwrap();
        assert_eq!(hk.get("type").and_then(Value::as_str), Some("file"));
        assert_eq!(hk.get("path").and_then(Value::as_str), Some("./proxies/home_HK.yaml"));

        let us_group = &section.groups[1];
        assert_eq!(us_group.get("name").and_then(Value::as_str), Some("US"));
        assert_eq!(us_group.get("type").and_then(Value::as_str), Some("url-test"));
        assert_eq!(us_group.get("use"), Some(&Value::Sequence(vec!["US".into()])));
        assert_eq!(
            us_group.get("url").and_then(Value::as_str),
            Some("http://www.gstatic.com/generate_204")
        );
        assert!(us_group.get("interval").is_none());
    }

    #[test]
    fn proxy_section_honours_group_settings() {
        let groups = GroupsConfig {
            probe_url: "https://cp.cloudflare.com/".into(),
            interval: Some(300),
        };
        let section = ProxySection::generate("home", &regions(), "proxies", &groups);
        let group = &section.groups[0];
        assert_eq!(group.get("url").and_then(Value::as_str), Some("https://cp.cloudflare.com/"));
        assert_eq!(group.get("interval").and_then(Value::as_u64), Some(300));
    }

    #[test]
    fn later_keys_override_in_place() {
        let base = yaml("port: 7890\nmode: rule\nlog-level: info\n");
        let mut composer = DocumentComposer::new(base);
        composer.merge("overlay", yaml("mode: global\nipv6: true\n")).unwrap();
        let doc = composer.finish();

        let keys: Vec<&str> = doc.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["port", "mode", "log-level", "ipv6"]);
        assert_eq!(doc.get("mode").and_then(Value::as_str), Some("global"));
    }

    #[test]
    fn overlapping_mappings_are_replaced_not_deep_merged() {
        let base = yaml("dns:\n  enable: true\n  listen: 0.0.0.0:53\n");
        let mut composer = DocumentComposer::new(base);
        composer.merge("overlay", yaml("dns:\n  enable: false\n")).unwrap();
        let doc = composer.finish();

        let dns = doc.get("dns").and_then(Value::as_mapping).unwrap();
        assert_eq!(dns.len(), 1);
        assert_eq!(dns.get("enable").and_then(Value::as_bool), Some(false));
    }

    #[test]
    fn empty_fragment_leaves_base_untouched() {
        let base = yaml("port: 7890\ndns:\n  enable: true\nproxies: []\n");
        let mut composer = DocumentComposer::new(base.clone());
        composer.merge("rule-providers.yaml", Mapping::new()).unwrap();
        assert_eq!(composer.finish().into_mapping(), base);
    }

    #[test]
    fn conflicting_shapes_are_composition_errors() {
        let base = yaml("proxy-providers:\n  - legacy\n");
        let err = compose(base, Mapping::new(), "rule-providers.yaml", section(), vec![]).unwrap_err();
        assert_eq!(err.kind(), "composition");
        assert!(err.to_string().contains("proxy-providers"));
        assert!(err.to_string().contains("generated proxy section"));

        let mut composer = DocumentComposer::new(yaml("rule-providers: disabled\n"));
        let err = composer
            .merge("rule-providers.yaml", yaml("rule-providers:\n  ads: {type: http}\n"))
            .unwrap_err();
        assert!(err.to_string().contains("rule-providers.yaml"));
    }

    #[test]
    fn null_values_merge_with_anything() {
        let base = yaml("proxy-groups:\nrule-providers: ~\n");
        let doc = compose(
            base,
            yaml("rule-providers:\n  ads: {type: http}\n"),
            "rule-providers.yaml",
            section(),
            vec![],
        )
        .unwrap();
        assert!(doc.get("rule-providers").unwrap().is_mapping());
        assert_eq!(doc.get(PROXY_GROUPS_KEY).and_then(Value::as_sequence).map(Vec::len), Some(2));
    }

    #[test]
    fn rules_replace_base_rules_entirely() {
        let base = yaml("rules:\n  - MATCH,DIRECT\n  - GEOIP,CN,DIRECT\nport: 7890\n");
        let rules: Vec<Value> = vec!["DOMAIN,example.com,HK".into()];
        let doc = compose(base, Mapping::new(), "rule-providers.yaml", section(), rules.clone()).unwrap();
        assert_eq!(doc.rules(), Some(&rules));

        let doc = compose(yaml("rules: [MATCH,DIRECT]\n"), Mapping::new(), "p", section(), vec![]).unwrap();
        assert_eq!(doc.rules(), Some(&Vec::new()));
    }

    #[test]
    fn compose_orders_generated_keys_after_base() {
        let base = yaml("port: 7890\n");
        let providers = yaml("rule-providers:\n  ads: {type: http}\n");
        let doc = compose(base, providers, "rule-providers.yaml", section(), vec![]).unwrap();
        let keys: Vec<&str> = doc.keys().filter_map(Value::as_str).collect();
        assert_eq!(
            keys,
            vec!["port", "rule-providers", "proxy-providers", "proxy-groups", "rules"]
        );
    }
}
