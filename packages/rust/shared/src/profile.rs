//! Build profiles: one subscription, its region split and the output path.
//!
//! Profiles are JSON by default; `.yaml` / `.yml` files are read as YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClashBuilderError, Result};
use crate::types::{PatternList, RegionKeywordMap, RuleMode};

/// A build profile as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Identifies this profile; prefixes the generated bucket file names.
    pub name: String,
    /// Subscription locator returning the node list.
    pub sub_url: Url,
    /// Ordered region → keyword mapping.
    pub region_keywords: RegionKeywordMap,
    /// Where the merged document is written.
    pub target_path: String,
    /// Overrides `[defaults].mode` for this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RuleMode>,
    /// Overrides `[defaults].user_defined` for this profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defined: Option<PatternList>,
}

impl Profile {
    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClashBuilderError::validation("profile name must not be empty"));
        }
        if self.name.contains(['/', '\\']) {
            return Err(ClashBuilderError::validation(format!(
                "profile name '{}' must not contain path separators",
                self.name
            )));
        }
        if let Some(region) = self
            .region_keywords
            .names()
            .find(|r| r.is_empty() || r.contains(['/', '\\']))
        {
            return Err(ClashBuilderError::validation(format!(
                "region name '{region}' must be non-empty and free of path separators"
            )));
        }
        if self.target_path.trim().is_empty() {
            return Err(ClashBuilderError::validation("target_path must not be empty"));
        }
        match self.sub_url.scheme() {
            "http" | "https" | "file" => Ok(()),
            other => Err(ClashBuilderError::validation(format!(
                "unsupported sub_url scheme '{other}'"
            ))),
        }
    }
}

/// Load and validate a profile from `path`.
pub fn load_profile(path: &Path) -> Result<Profile> {
    let content = std::fs::read_to_string(path).map_err(|e| ClashBuilderError::io(path, e))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let profile: Profile = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| {
            ClashBuilderError::config(format!("failed to parse {}: {e}", path.display()))
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            ClashBuilderError::config(format!("failed to parse {}: {e}", path.display()))
        })?
    };

    profile.validate()?;
    tracing::debug!(
        name = %profile.name,
        regions = profile.region_keywords.len(),
        "loaded profile"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cb-profile-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const JSON_PROFILE: &str = r#"{
        "name": "home",
        "sub_url": "https://sub.example.com/clash?token=abc",
        "region_keywords": {"HK": ["hk", "hong kong"], "US": ["us"]},
        "target_path": "config.yaml"
    }"#;

    #[test]
    fn parses_json_profile() {
        let tmp = temp_dir();
        let path = tmp.join("builder-config.json");
        std::fs::write(&path, JSON_PROFILE).unwrap();

        let profile = load_profile(&path).unwrap();
        assert_eq!(profile.name, "home");
        assert_eq!(profile.sub_url.host_str(), Some("sub.example.com"));
        assert_eq!(profile.region_keywords.names().collect::<Vec<_>>(), vec!["HK", "US"]);
        assert!(profile.mode.is_none());
        assert!(profile.user_defined.is_none());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parses_yaml_profile_with_overrides() {
        let tmp = temp_dir();
        let path = tmp.join("profile.yml");
        std::fs::write(
            &path,
            "name: work\nsub_url: file:///tmp/nodes.yaml\nregion_keywords:\n  SG: [sg]\n\
             target_path: out/config.yaml\nmode: none\nuser_defined: office.yaml\n",
        )
        .unwrap();

        let profile = load_profile(&path).unwrap();
        assert_eq!(profile.mode, Some(RuleMode::None));
        assert_eq!(profile.user_defined, Some(PatternList::from("office.yaml")));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_invalid_profiles() {
        let tmp = temp_dir();

        let path = tmp.join("bad-scheme.json");
        std::fs::write(&path, JSON_PROFILE.replace("https://", "ftp://")).unwrap();
        let err = load_profile(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported sub_url scheme"));

        let path = tmp.join("bad-name.json");
        std::fs::write(&path, JSON_PROFILE.replace("\"home\"", "\"../home\"")).unwrap();
        assert!(load_profile(&path).is_err());

        let path = tmp.join("missing-field.json");
        std::fs::write(&path, r#"{"name": "x"}"#).unwrap();
        let err = load_profile(&path).unwrap_err();
        assert_eq!(err.kind(), "config");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
