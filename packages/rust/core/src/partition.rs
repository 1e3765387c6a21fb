//! Region partitioning: split the fetched node list into per-region buckets.
//!
//! Each bucket is persisted as its own document so the generated
//! `proxy-providers` section can reference it by path.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use clashbuilder_shared::{NodeRecord, RegionKeywordMap, Result};
use clashbuilder_store::DocumentStore;

use crate::matcher::KeywordMatcher;

/// Nodes selected for one region, in subscription order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBucket {
    pub region: String,
    pub nodes: Vec<NodeRecord>,
}

/// A bucket that has been written to disk.
#[derive(Debug, Clone)]
pub struct PersistedBucket {
    pub region: String,
    pub node_count: usize,
    pub path: PathBuf,
}

/// On-disk shape of a bucket document.
#[derive(Serialize)]
struct BucketDocument<'a> {
    proxies: &'a [NodeRecord],
}

/// Split `nodes` into one bucket per region, in region declaration order.
///
/// A node lands in every region whose keywords match its name, so buckets may
/// overlap. Nodes without a textual `name` match nothing.
#[instrument(skip_all, fields(nodes = nodes.len(), regions = regions.len()))]
pub fn partition(nodes: &[NodeRecord], regions: &RegionKeywordMap) -> Vec<RegionBucket> {
    let unnamed = nodes.iter().filter(|n| n.name().is_none()).count();
    if unnamed > 0 {
        debug!(unnamed, "nodes without a textual name are excluded from all regions");
    }

    regions
        .iter()
        .map(|region| {
            let matcher = KeywordMatcher::new(&region.keywords);
            let selected: Vec<NodeRecord> = nodes
                .iter()
                .filter(|node| node.name().is_some_and(|name| matcher.matches(name)))
                .cloned()
                .collect();
            debug!(region = %region.name, count = selected.len(), "region partitioned");
            RegionBucket {
                region: region.name.clone(),
                nodes: selected,
            }
        })
        .collect()
}

/// Relative path of a region's bucket document: `<dir>/<profile>_<region>.yaml`.
pub fn bucket_file(proxies_dir: &str, profile: &str, region: &str) -> PathBuf {
    Path::new(proxies_dir).join(format!("{profile}_{region}.yaml"))
}

/// Write one `{proxies: [...]}` document per bucket.
///
/// Existing bucket files are overwritten. Files written before a later
/// failure are left in place.
#[instrument(skip_all, fields(profile = %profile, buckets = buckets.len()))]
pub fn persist_buckets(
    store: &DocumentStore,
    proxies_dir: &str,
    profile: &str,
    buckets: &[RegionBucket],
) -> Result<Vec<PersistedBucket>> {
    let mut persisted = Vec::with_capacity(buckets.len());

    for bucket in buckets {
        let file = bucket_file(proxies_dir, profile, &bucket.region);
        let path = store.write_document(
            &file,
            &BucketDocument {
                proxies: &bucket.nodes,
            },
        )?;
        info!(region = %bucket.region, count = bucket.nodes.len(), path = %path.display(), "wrote region bucket");
        persisted.push(PersistedBucket {
            region: bucket.region.clone(),
            node_count: bucket.nodes.len(),
            path,
        });
    }

    Ok(persisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::{Mapping, Value};

    fn node(name: &str) -> NodeRecord {
        let mut attrs = Mapping::new();
        attrs.insert("name".into(), name.into());
        attrs.insert("type".into(), "ss".into());
        NodeRecord(attrs)
    }

    fn names(bucket: &RegionBucket) -> Vec<&str> {
        bucket.nodes.iter().filter_map(NodeRecord::name).collect()
    }

    fn sample_nodes() -> Vec<NodeRecord> {
        ["HK-01", "US-East-1", "SG-Premium", "hk-us-relay", "United States 2"]
            .into_iter()
            .map(node)
            .collect()
    }

    fn sample_regions() -> RegionKeywordMap {
        RegionKeywordMap::try_from_pairs([
            ("HK", vec!["hk"]),
            ("US", vec!["us", "united states"]),
            ("JP", vec!["jp"]),
        ])
        .unwrap()
    }

    #[test]
    fn buckets_follow_region_order_and_node_order() {
        let buckets = partition(&sample_nodes(), &sample_regions());
        let regions: Vec<&str> = buckets.iter().map(|b| b.region.as_str()).collect();
        assert_eq!(regions, vec!["HK", "US", "JP"]);

        assert_eq!(names(&buckets[0]), vec!["HK-01", "hk-us-relay"]);
        assert_eq!(names(&buckets[1]), vec!["US-East-1", "hk-us-relay", "United States 2"]);
        assert!(buckets[2].nodes.is_empty());
    }

    #[test]
    fn partition_is_sound_and_complete() {
        let nodes = sample_nodes();
        let regions = sample_regions();
        let buckets = partition(&nodes, &regions);

        for (bucket, region) in buckets.iter().zip(regions.iter()) {
            for n in &nodes {
                let name = n.name().unwrap();
                let expected = region
                    .keywords
                    .iter()
                    .any(|k| name.to_lowercase().contains(&k.to_lowercase()));
                assert_eq!(bucket.nodes.contains(n), expected, "{name} in {}", region.name);
            }
        }
    }

    #[test]
    fn empty_keyword_list_yields_empty_bucket() {
        let regions = RegionKeywordMap::try_from_pairs([("ALL", Vec::<String>::new())]).unwrap();
        let buckets = partition(&sample_nodes(), &regions);
        assert_eq!(buckets.len(), 1);
        assert!(buckets[0].nodes.is_empty());
    }

    #[test]
    fn unnamed_nodes_are_excluded() {
        let mut no_name = Mapping::new();
        no_name.insert("server".into(), "hk.example.com".into());
        let mut numeric_name = Mapping::new();
        numeric_name.insert("name".into(), Value::from(852));

        let nodes = vec![NodeRecord(no_name), NodeRecord(numeric_name), node("HK-02")];
        let buckets = partition(&nodes, &sample_regions());
        assert_eq!(names(&buckets[0]), vec!["HK-02"]);
    }

    #[test]
    fn no_nodes_gives_empty_buckets() {
        let buckets = partition(&[], &sample_regions());
        assert_eq!(buckets.len(), 3);
        assert!(buckets.iter().all(|b| b.nodes.is_empty()));
    }

    #[test]
    fn persists_one_document_per_region() {
        let tmp = std::env::temp_dir().join(format!("cb-partition-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&tmp).unwrap();
        let store = DocumentStore::new(&tmp);

        let buckets = partition(&sample_nodes(), &sample_regions());
        let persisted = persist_buckets(&store, "proxies", "home", &buckets).unwrap();

        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[0].path, tmp.join("proxies/home_HK.yaml"));
        assert_eq!(persisted[1].node_count, 3);

        let doc = store.load_mapping("proxies/home_US.yaml").unwrap();
        assert_eq!(doc.len(), 1);
        let proxies = doc.get("proxies").and_then(Value::as_sequence).unwrap();
        assert_eq!(proxies.len(), 3);
        assert_eq!(proxies[0].get("name").and_then(Value::as_str), Some("US-East-1"));

        let empty = store.load_mapping("proxies/home_JP.yaml").unwrap();
        assert_eq!(empty.get("proxies"), Some(&Value::Sequence(vec![])));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
