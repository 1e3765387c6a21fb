//! Application configuration for clashbuilder.
//!
//! User config lives at `~/.clashbuilder/clashbuilder.toml`.
//! CLI flags override profile values, which override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClashBuilderError, Result};
use crate::types::{PatternList, RuleMode};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "clashbuilder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".clashbuilder";

/// Health-check endpoint used by generated `url-test` groups.
pub const DEFAULT_PROBE_URL: &str = "http://www.gstatic.com/generate_204";

// ---------------------------------------------------------------------------
// Config structs (matching clashbuilder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Template and output file locations, relative to the base directory.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Generated proxy-group settings.
    #[serde(default)]
    pub groups: GroupsConfig,

    /// Node source (subscription fetch) settings.
    #[serde(default)]
    pub source: SourceConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory all template, rule and bucket paths resolve against.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Allow/deny fragment appended after user rules.
    #[serde(default)]
    pub mode: RuleMode,

    /// Glob patterns selecting user-defined rule fragments.
    #[serde(default = "default_user_defined")]
    pub user_defined: PatternList,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            mode: RuleMode::default(),
            user_defined: default_user_defined(),
        }
    }
}

fn default_base_dir() -> String {
    ".".into()
}
fn default_user_defined() -> PatternList {
    PatternList(vec!["*".into()])
}

/// `[layout]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Base template merged first.
    #[serde(default = "default_base_template")]
    pub base_template: String,

    /// Rule-provider fragment merged verbatim.
    #[serde(default = "default_rule_providers")]
    pub rule_providers: String,

    /// Directory the user-defined glob patterns are resolved in.
    #[serde(default = "default_user_rules_dir")]
    pub user_rules_dir: String,

    /// Directory holding `whitelist.yaml` / `blacklist.yaml`.
    #[serde(default = "default_mode_dir")]
    pub mode_dir: String,

    /// Directory the per-region bucket documents are written to.
    #[serde(default = "default_proxies_dir")]
    pub proxies_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            base_template: default_base_template(),
            rule_providers: default_rule_providers(),
            user_rules_dir: default_user_rules_dir(),
            mode_dir: default_mode_dir(),
            proxies_dir: default_proxies_dir(),
        }
    }
}

fn default_base_template() -> String {
    "base.yaml".into()
}
fn default_rule_providers() -> String {
    "rule-providers.yaml".into()
}
fn default_user_rules_dir() -> String {
    "rules/user-defined".into()
}
fn default_mode_dir() -> String {
    "rules".into()
}
fn default_proxies_dir() -> String {
    "proxies".into()
}

/// `[groups]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupsConfig {
    /// URL the proxy client probes to rank group members.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Probe interval in seconds. Omitted from groups when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            probe_url: default_probe_url(),
            interval: None,
        }
    }
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.into()
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Request timeout for the subscription fetch.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent sent with the subscription request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    concat!("clashbuilder/", env!("CARGO_PKG_VERSION")).into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.clashbuilder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ClashBuilderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.clashbuilder/clashbuilder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ClashBuilderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ClashBuilderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ClashBuilderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ClashBuilderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ClashBuilderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
