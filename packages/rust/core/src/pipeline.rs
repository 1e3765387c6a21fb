//! End-to-end build pipeline: subscription → regions → proxy section → rules → config.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use url::Url;

use clashbuilder_shared::{
    AppConfig, ClashBuilderError, GroupsConfig, LayoutConfig, PatternList, Profile,
    RegionKeywordMap, Result, RuleMode,
};
use clashbuilder_source::{NodeSource, SourceOptions, SubscriptionSource};
use clashbuilder_store::DocumentStore;

use crate::composer::{ConfigDocument, DocumentComposer, ProxySection};
use crate::partition::{PersistedBucket, partition, persist_buckets};
use crate::rules::RuleAggregator;

/// Fully resolved inputs of one build.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Profile name; prefixes bucket file names.
    pub profile: String,
    /// Subscription locator.
    pub sub_url: Url,
    /// Ordered region → keywords mapping.
    pub regions: RegionKeywordMap,
    /// Allow/deny fragment appended after user rules.
    pub mode: RuleMode,
    /// User-defined rule glob patterns.
    pub user_defined: PatternList,
    /// Directory every relative path resolves against.
    pub base_dir: PathBuf,
    /// Output document path (relative to `base_dir` unless absolute).
    pub target_path: PathBuf,
    /// Template and output locations.
    pub layout: LayoutConfig,
    /// Generated group settings.
    pub groups: GroupsConfig,
}

/// Command-line values that take precedence over the profile and config file.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub base_dir: Option<PathBuf>,
    pub mode: Option<RuleMode>,
    pub user_defined: Option<PatternList>,
}

impl BuildSpec {
    /// Merge overrides, profile and app config (in that precedence order).
    pub fn resolve(profile: Profile, config: &AppConfig, overrides: BuildOverrides) -> Self {
        let base_dir = overrides
            .base_dir
            .unwrap_or_else(|| PathBuf::from(&config.defaults.base_dir));
        let mode = overrides
            .mode
            .or(profile.mode)
            .unwrap_or(config.defaults.mode);
        let user_defined = overrides
            .user_defined
            .or(profile.user_defined)
            .unwrap_or_else(|| config.defaults.user_defined.clone());

        Self {
            profile: profile.name,
            sub_url: profile.sub_url,
            regions: profile.region_keywords,
            mode,
            user_defined,
            base_dir,
            target_path: PathBuf::from(profile.target_path),
            layout: config.layout.clone(),
            groups: config.groups.clone(),
        }
    }
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    /// Where the config document was written.
    pub output_path: PathBuf,
    /// Nodes returned by the source.
    pub node_count: usize,
    /// Per-region bucket documents, in region order.
    pub buckets: Vec<PersistedBucket>,
    /// Rules from user-defined fragments.
    pub user_rule_count: usize,
    /// Rules from the mode fragment.
    pub mode_rule_count: usize,
    /// Length of the final `rules` sequence.
    pub rule_count: usize,
    /// Hex SHA-256 of the written document.
    pub sha256: String,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, report: &BuildReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &BuildReport) {}
}

/// Build from the profile's subscription URL.
pub async fn build(
    spec: &BuildSpec,
    opts: &SourceOptions,
    progress: &dyn ProgressReporter,
) -> Result<BuildReport> {
    let source = SubscriptionSource::new(spec.sub_url.clone(), opts)?;
    run(spec, &source, progress).await
}

/// Run the full pipeline against `source`.
///
/// 1. Fetch nodes
/// 2. Partition into regions, write bucket documents
/// 3. Base template + rule providers + proxy section
/// 4. Aggregate rules
/// 5. Set rules, write the config document
///
/// Bucket documents written in step 2 stay on disk if a later step fails;
/// the config document is only written once everything else succeeded.
#[instrument(skip_all, fields(profile = %spec.profile, mode = %spec.mode))]
pub async fn run<S: NodeSource>(
    spec: &BuildSpec,
    source: &S,
    progress: &dyn ProgressReporter,
) -> Result<BuildReport> {
    let start = Instant::now();
    let store = DocumentStore::new(&spec.base_dir);

    info!(source = source.locator(), base_dir = %spec.base_dir.display(), "starting build");

    // --- Phase 1: Fetch ---
    progress.phase("Fetching nodes");
    let nodes = source.fetch().await?;
    if nodes.is_empty() {
        warn!(source = source.locator(), "node source returned no nodes, all regions will be empty");
    }
    info!(count = nodes.len(), "nodes fetched");

    // --- Phase 2: Partition ---
    progress.phase("Partitioning nodes by region");
    let buckets = partition(&nodes, &spec.regions);
    let persisted = persist_buckets(&store, &spec.layout.proxies_dir, &spec.profile, &buckets)?;

    // --- Phase 3: Proxy section ---
    progress.phase("Composing proxy section");
    let base = store
        .load_mapping(&spec.layout.base_template)
        .map_err(|e| ClashBuilderError::template_load(store.resolve(&spec.layout.base_template), e))?;
    let aggregator = RuleAggregator::new(&store, &spec.layout);
    let providers = aggregator.load_rule_providers(&spec.layout.rule_providers)?;

    let mut composer = DocumentComposer::new(base);
    composer
        .merge(&spec.layout.rule_providers, providers)?
        .merge_proxy_section(ProxySection::generate(
            &spec.profile,
            &spec.regions,
            &spec.layout.proxies_dir,
            &spec.groups,
        ))?;

    // --- Phase 4: Rules ---
    progress.phase("Aggregating rules");
    let rules = aggregator.aggregate(&spec.user_defined, spec.mode)?;
    let user_rule_count = rules.user_rule_count();
    let mode_rule_count = rules.mode_rule_count();
    let rule_count = rules.len();
    composer.set_rules(rules.rules);

    // --- Phase 5: Emit ---
    progress.phase("Writing configuration");
    let document = composer.finish();
    let (output_path, sha256) = write_config(&store, &spec.target_path, &document)?;

    let report = BuildReport {
        output_path,
        node_count: nodes.len(),
        buckets: persisted,
        user_rule_count,
        mode_rule_count,
        rule_count,
        sha256,
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        output = %report.output_path.display(),
        nodes = report.node_count,
        rules = report.rule_count,
        elapsed_ms = report.elapsed.as_millis(),
        "build complete"
    );

    Ok(report)
}

/// Write the final document and return its path and content digest.
fn write_config(
    store: &DocumentStore,
    target: &Path,
    document: &ConfigDocument,
) -> Result<(PathBuf, String)> {
    let yaml = serde_yaml::to_string(document).map_err(|e| {
        ClashBuilderError::persist(store.resolve(target), format!("YAML serialization failed: {e}"))
    })?;
    let path = store.write_text(target, &yaml)?;

    let mut hasher = Sha256::new();
    hasher.update(yaml.as_bytes());
    Ok((path, format!("{:x}", hasher.finalize())))
}
