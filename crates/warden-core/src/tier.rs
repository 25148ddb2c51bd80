//! Persona policy tiers: named bundles of autonomy limits.
//!
//! A tier is snapshotted into the session at creation; later changes to
//! global configuration never retroactively alter an in-flight session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete limits a tier grants a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub name: String,
    /// Whether write/execute effects are permitted at all.
    pub allow_execution: bool,
    /// Maximum number of files a single change may touch.
    pub max_files: usize,
    /// Whether a change may span more than one top-level module.
    pub allow_cross_module: bool,
}

impl TierPolicy {
    pub fn new(
        name: impl Into<String>,
        allow_execution: bool,
        max_files: usize,
        allow_cross_module: bool,
    ) -> Self {
        Self {
            name: name.into(),
            allow_execution,
            max_files,
            allow_cross_module,
        }
    }
}

/// Built-in autonomy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPreset {
    Low,
    Medium,
    High,
}

impl TierPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// The limits each preset maps to. Low autonomy is observation-only.
    pub fn policy(self) -> TierPolicy {
        match self {
            Self::Low => TierPolicy::new("low", false, 4, false),
            Self::Medium => TierPolicy::new("medium", true, 16, false),
            Self::High => TierPolicy::new("high", true, 64, true),
        }
    }
}

impl fmt::Display for TierPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
