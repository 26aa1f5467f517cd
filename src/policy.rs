//! Per-project policy model.
//!
//! A policy is a flat map from detector name to optional overrides.
//! Everything unset inherits the server default, so a missing entry, a
//! `null`, and an empty object all mean the same thing. Invalid JSON is
//! logged and degrades to the null policy rather than failing the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How verdicts are applied for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMode {
    /// Verdicts are returned to the caller as computed.
    #[default]
    Enforce,
    /// The caller always sees `allow`; the true verdict is only recorded.
    Shadow,
}

impl std::fmt::Display for ProjectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectMode::Enforce => f.write_str("enforce"),
            ProjectMode::Shadow => f.write_str("shadow"),
        }
    }
}

impl std::str::FromStr for ProjectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enforce" => Ok(ProjectMode::Enforce),
            "shadow" => Ok(ProjectMode::Shadow),
            _ => Err(format!("invalid project mode '{s}', expected 'enforce' or 'shadow'")),
        }
    }
}

/// Authenticated per-project context resolved from an API key.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub project_id: String,
    pub mode: ProjectMode,
    pub fail_open: bool,
    pub policy: Option<ProjectPolicy>,
}

/// Per-detector overrides. Any unset field falls back to the server default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_tools: Option<Vec<String>>,
}

impl DetectorOverride {
    /// True when every field is unset (the zero-overrides value).
    pub fn is_empty(&self) -> bool {
        *self == DetectorOverride::default()
    }
}

/// A project's detector policy: detector name → overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPolicy {
    #[serde(flatten)]
    pub overrides: HashMap<String, DetectorOverride>,
}

impl ProjectPolicy {
    /// Look up the overrides for a detector. Missing entries return the
    /// zero-overrides value so callers never branch on absence.
    pub fn get(&self, detector: &str) -> DetectorOverride {
        self.overrides.get(detector).cloned().unwrap_or_default()
    }

    /// Whether a detector is enabled for this project. Defaults to true.
    pub fn is_enabled(&self, detector: &str) -> bool {
        self.overrides
            .get(detector)
            .and_then(|o| o.enabled)
            .unwrap_or(true)
    }

    /// The block threshold for a detector, or the server default.
    pub fn effective_block_threshold(&self, detector: &str, default: f64) -> f64 {
        self.overrides
            .get(detector)
            .and_then(|o| o.block_threshold)
            .unwrap_or(default)
    }

    /// The flag threshold for a detector, or the server default.
    pub fn effective_flag_threshold(&self, detector: &str, default: f64) -> f64 {
        self.overrides
            .get(detector)
            .and_then(|o| o.flag_threshold)
            .unwrap_or(default)
    }

    /// Parse a policy from its stored JSON document.
    ///
    /// Tolerates `null`, `{}`, per-detector `null`, and unknown keys inside
    /// an override. Invalid JSON or a non-object top level logs a warning
    /// and returns `None` (server defaults everywhere).
    pub fn parse(json: &str) -> Option<ProjectPolicy> {
        if json.trim().is_empty() {
            return None;
        }
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "invalid detector config JSON, using server defaults");
                return None;
            }
        };
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Object(map) => {
                let mut overrides = HashMap::with_capacity(map.len());
                for (name, raw) in map {
                    let entry = match raw {
                        serde_json::Value::Null => DetectorOverride::default(),
                        other => serde_json::from_value(other).unwrap_or_else(|e| {
                            tracing::warn!(
                                detector = %name,
                                error = %e,
                                "unparseable detector override, using defaults"
                            );
                            DetectorOverride::default()
                        }),
                    };
                    overrides.insert(name, entry);
                }
                Some(ProjectPolicy { overrides })
            }
            _ => {
                tracing::warn!("detector config is not a JSON object, using server defaults");
                None
            }
        }
    }
}
