//! Shared types, error model, and configuration for clashbuilder.
//!
//! This crate is the foundation depended on by all other clashbuilder crates.
//! It provides:
//! - [`ClashBuilderError`], the unified error type
//! - Domain types ([`NodeRecord`], [`RegionKeywordMap`], [`RuleMode`], [`PatternList`])
//! - Configuration ([`AppConfig`], config loading) and build [`Profile`]s

pub mod config;
pub mod error;
pub mod profile;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_PROBE_URL, DefaultsConfig, GroupsConfig, LayoutConfig, SourceConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ClashBuilderError, Result};
pub use profile::{Profile, load_profile};
pub use types::{NodeRecord, PatternList, Region, RegionKeywordMap, RuleMode, value_kind};
