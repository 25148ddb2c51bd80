//! Engine configuration, loaded from TOML.
//!
//! Configuration is read once at startup; tiers resolved from it are
//! snapshotted into each session at creation, so later edits never
//! reach in-flight sessions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::event::CommandSpec;
use crate::tier::{TierPolicy, TierPreset};

/// Per-tier limit overrides. Any field left out keeps the preset value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierOverride {
    pub allow_execution: Option<bool>,
    pub max_files: Option<usize>,
    pub allow_cross_module: Option<bool>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory holding the per-session journals and snapshots.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
    /// Tier applied when a session request names none.
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
    /// Verification command recorded into each session at start.
    #[serde(default = "default_verify_command")]
    pub verify_command: CommandSpec,
    /// Named tier overrides, keyed by preset name.
    #[serde(default)]
    pub tiers: HashMap<String, TierOverride>,
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("journal")
}

fn default_tier_name() -> String {
    TierPreset::Medium.as_str().to_string()
}

fn default_verify_command() -> CommandSpec {
    CommandSpec::new("cargo", vec!["test".to_string()])
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            journal_dir: default_journal_dir(),
            default_tier: default_tier_name(),
            verify_command: default_verify_command(),
            tiers: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let body = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&body)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        config.resolve_tier(&config.default_tier)?;
        Ok(config)
    }

    /// Resolve a tier name to concrete limits: preset values with any
    /// configured overrides applied on top.
    pub fn resolve_tier(&self, name: &str) -> Result<TierPolicy, EngineError> {
        let preset = TierPreset::parse(name)
            .ok_or_else(|| EngineError::Config(format!("unknown tier: {name}")))?;
        let mut policy = preset.policy();
        if let Some(over) = self.tiers.get(name) {
            if let Some(allow) = over.allow_execution {
                policy.allow_execution = allow;
            }
            if let Some(max) = over.max_files {
                policy.max_files = max;
            }
            if let Some(cross) = over.allow_cross_module {
                policy.allow_cross_module = cross;
            }
        }
        Ok(policy)
    }

    pub fn default_tier_policy(&self) -> Result<TierPolicy, EngineError> {
        self.resolve_tier(&self.default_tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        let tier = config.default_tier_policy().expect("tier");
        assert_eq!(tier.name, "medium");
        assert!(tier.allow_execution);
    }

    #[test]
    fn overrides_apply_on_top_of_presets() {
        let config: EngineConfig = toml::from_str(
            r#"
            default_tier = "high"

            [tiers.high]
            max_files = 128
            "#,
        )
        .expect("parse");
        let tier = config.resolve_tier("high").expect("tier");
        assert_eq!(tier.max_files, 128);
        assert!(tier.allow_cross_module);
    }

    #[test]
    fn unknown_tier_names_are_config_errors() {
        let config = EngineConfig::default();
        let err = config.resolve_tier("maximum").expect_err("must fail");
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            r#"
            journal_dir = "/var/lib/warden/journal"
            default_tier = "low"
            verify_command = { program = "cargo", args = ["test", "--workspace"] }
            "#,
        )
        .expect("write");
        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.journal_dir, PathBuf::from("/var/lib/warden/journal"));
        assert_eq!(config.verify_command.args, vec!["test", "--workspace"]);
    }

    #[test]
    fn bad_default_tier_fails_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "default_tier = \"turbo\"\n").expect("write");
        assert!(EngineConfig::load(&path).is_err());
    }
}
