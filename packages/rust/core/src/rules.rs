//! Rule aggregation.
//!
//! Proxy clients evaluate rules first-match-wins, so the order produced here
//! is the routing policy:
//!
//! 1. user-defined fragments, pattern by pattern in the given order, files
//!    within one pattern sorted lexicographically by relative path;
//! 2. the mode fragment (`whitelist` / `blacklist`), if a mode is selected.
//!
//! Fragments are concatenated as-is: no deduplication, no reordering.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, instrument};

use clashbuilder_shared::{
    ClashBuilderError, LayoutConfig, PatternList, Result, RuleMode, value_kind,
};
use clashbuilder_store::DocumentStore;

/// Where a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    User,
    Mode(RuleMode),
}

/// One loaded fragment's contribution to the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSummary {
    pub origin: RuleOrigin,
    pub path: PathBuf,
    pub count: usize,
}

/// Ordered concatenation of every loaded fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedRuleSet {
    pub rules: Vec<Value>,
    pub fragments: Vec<FragmentSummary>,
}

impl AggregatedRuleSet {
    /// Append a fragment's rules after everything loaded so far.
    pub fn push(&mut self, origin: RuleOrigin, path: PathBuf, rules: Vec<Value>) {
        self.fragments.push(FragmentSummary {
            origin,
            path,
            count: rules.len(),
        });
        self.rules.extend(rules);
    }

    /// Append another aggregate after this one.
    pub fn extend(&mut self, other: AggregatedRuleSet) {
        self.rules.extend(other.rules);
        self.fragments.extend(other.fragments);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules contributed by user-defined fragments.
    pub fn user_rule_count(&self) -> usize {
        self.count_where(|o| o == RuleOrigin::User)
    }

    /// Rules contributed by the mode fragment.
    pub fn mode_rule_count(&self) -> usize {
        self.count_where(|o| matches!(o, RuleOrigin::Mode(_)))
    }

    fn count_where(&self, pred: impl Fn(RuleOrigin) -> bool) -> usize {
        self.fragments
            .iter()
            .filter(|f| pred(f.origin))
            .map(|f| f.count)
            .sum()
    }
}

/// Loads and concatenates rule fragments from a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct RuleAggregator<'a> {
    store: &'a DocumentStore,
    user_rules_dir: PathBuf,
    mode_dir: PathBuf,
}

impl<'a> RuleAggregator<'a> {
    pub fn new(store: &'a DocumentStore, layout: &LayoutConfig) -> Self {
        Self {
            store,
            user_rules_dir: PathBuf::from(&layout.user_rules_dir),
            mode_dir: PathBuf::from(&layout.mode_dir),
        }
    }

    /// Aggregate user fragments matched by `patterns`, then the `mode` fragment.
    #[instrument(skip_all, fields(patterns = patterns.0.len(), %mode))]
    pub fn aggregate(&self, patterns: &PatternList, mode: RuleMode) -> Result<AggregatedRuleSet> {
        let mut set = AggregatedRuleSet::default();

        for pattern in patterns.iter() {
            set.extend(self.aggregate_pattern(pattern)?);
        }
        info!(count = set.len(), "user-defined rules loaded");

        if let Some(fragment) = self.mode_fragment(mode)? {
            set.extend(fragment);
        }

        info!(
            total = set.len(),
            user = set.user_rule_count(),
            mode = set.mode_rule_count(),
            "rule aggregation complete"
        );
        Ok(set)
    }

    /// Load every user fragment one pattern matches, in sorted order.
    pub fn aggregate_pattern(&self, pattern: &str) -> Result<AggregatedRuleSet> {
        let mut set = AggregatedRuleSet::default();
        let files = self.resolve_pattern(pattern)?;
        if files.is_empty() {
            debug!(pattern, "pattern matched no rule files");
        }

        for file in files {
            let relative = self.user_rules_dir.join(&file);
            debug!(file = %file, "loading user-defined rules");
            let rules = self
                .store
                .load_mapping(&relative)
                .map_err(|e| ClashBuilderError::fragment_load(self.store.resolve(&relative), e))
                .and_then(|doc| {
                    extract_rules(doc).map_err(|reason| {
                        ClashBuilderError::fragment_load(self.store.resolve(&relative), reason)
                    })
                })?;
            info!(file = %file, count = rules.len(), "loaded user-defined rules");
            set.push(RuleOrigin::User, self.store.resolve(&relative), rules);
        }
        Ok(set)
    }

    /// The fragment for `mode`, or `None` when no mode is selected.
    pub fn mode_fragment(&self, mode: RuleMode) -> Result<Option<AggregatedRuleSet>> {
        let Some(stem) = mode.file_stem() else {
            debug!("no rule mode selected");
            return Ok(None);
        };

        let relative = self.mode_dir.join(format!("{stem}.yaml"));
        let path = self.store.resolve(&relative);
        let doc = self
            .store
            .load_mapping(&relative)
            .map_err(|e| ClashBuilderError::template_load(&path, e))?;
        let rules = extract_rules(doc).map_err(|reason| ClashBuilderError::template_load(&path, reason))?;
        info!(%mode, count = rules.len(), "loaded mode rules");

        let mut set = AggregatedRuleSet::default();
        set.push(RuleOrigin::Mode(mode), path, rules);
        Ok(Some(set))
    }

    /// Relative paths under the user rules directory matching `pattern`, sorted.
    pub fn resolve_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = glob_to_regex(pattern).ok_or_else(|| {
            ClashBuilderError::validation(format!("invalid rule glob pattern '{pattern}'"))
        })?;

        let files = self.store.list_files(&self.user_rules_dir)?;
        Ok(files
            .into_iter()
            .filter(|f| regex.is_match(f))
            .filter(|f| hidden_segments_allowed(pattern, f))
            .collect())
    }

    /// Load the rule-provider fragment verbatim.
    ///
    /// Only the top-level shape is validated; the content is configuration
    /// data merged straight into the final document.
    pub fn load_rule_providers(&self, path: impl AsRef<Path>) -> Result<Mapping> {
        let path = path.as_ref();
        let doc = self
            .store
            .load_mapping(path)
            .map_err(|e| ClashBuilderError::template_load(self.store.resolve(path), e))?;
        debug!(keys = doc.len(), "loaded rule providers");
        Ok(doc)
    }
}

/// Take the `rules` sequence out of a fragment. Absent or null is empty.
fn extract_rules(mut doc: Mapping) -> std::result::Result<Vec<Value>, String> {
    match doc.remove("rules") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(rules)) => Ok(rules),
        Some(other) => Err(format!(
            "'rules' must be a sequence, found {}",
            value_kind(&other)
        )),
    }
}

/// A dot-prefixed segment of `path` only matches a pattern segment that
/// itself starts with `.`.
///
/// Without `**` the pattern and a matching path have the same segments, so
/// they are compared position by position. With `**` a hidden segment must
/// be matched by one of the pattern's dot-prefixed segments.
fn hidden_segments_allowed(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();

    if pattern_segments.iter().any(|seg| seg.contains("**")) {
        return path.split('/').filter(|seg| seg.starts_with('.')).all(|hidden| {
            pattern_segments.iter().any(|p| {
                p.starts_with('.') && glob_to_regex(p).is_some_and(|r| r.is_match(hidden))
            })
        });
    }

    path.split('/')
        .zip(&pattern_segments)
        .all(|(seg, p)| !seg.starts_with('.') || p.starts_with('.'))
}

/// Convert a glob pattern to an anchored regex.
///
/// `*` and `?` stay within one path segment, `**` spans segments and
/// `**/` also matches zero directories.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*/", "(?:.*/)?")
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", "[^/]");
    Regex::new(&format!("^{escaped}$")).ok()
}
