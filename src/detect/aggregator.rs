//! Verdict aggregation.
//!
//! Order-insensitive: the strongest outcome across all triggered workers
//! wins. Thresholds resolve per worker — the policy override if set, the
//! server default otherwise.

use serde::{Deserialize, Serialize};

use crate::detect::{DetectorCategory, DetectorResult};
use crate::policy::{ProjectMode, ProjectPolicy};

/// Enforcement decision for the payload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Allow,
    Flag,
    Block,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Flag => "flag",
            Verdict::Block => "block",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Verdict::Allow),
            "flag" => Ok(Verdict::Flag),
            "block" => Ok(Verdict::Block),
            _ => Err(format!("unknown verdict '{s}'")),
        }
    }
}

/// Enforcement decision for the tool pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolVerdict {
    #[default]
    Safe,
    NeedsConfirmation,
    Unsafe,
}

impl ToolVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolVerdict::Safe => "safe",
            ToolVerdict::NeedsConfirmation => "needs_confirmation",
            ToolVerdict::Unsafe => "unsafe",
        }
    }
}

impl std::fmt::Display for ToolVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server default thresholds for the payload pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub block: f64,
    pub flag: f64,
}

/// Aggregate payload-pipeline results into a verdict and a reason.
///
/// Each triggered worker contributes `block` at or above its effective
/// block threshold, `flag` at or above its effective flag threshold, and
/// nothing otherwise. Precedence: block > flag > allow. The reason names
/// every triggered worker in the order the engine presented them.
pub fn aggregate_payload(
    results: &[DetectorResult],
    policy: Option<&ProjectPolicy>,
    defaults: Thresholds,
) -> (Verdict, String) {
    let mut verdict = Verdict::Allow;
    let mut triggered_names = Vec::new();

    for result in results {
        if !result.triggered {
            continue;
        }
        triggered_names.push(result.name.as_str());

        let block_threshold = policy
            .map(|p| p.effective_block_threshold(&result.name, defaults.block))
            .unwrap_or(defaults.block);
        let flag_threshold = policy
            .map(|p| p.effective_flag_threshold(&result.name, defaults.flag))
            .unwrap_or(defaults.flag);

        if result.confidence >= block_threshold {
            verdict = Verdict::Block;
        } else if result.confidence >= flag_threshold && verdict == Verdict::Allow {
            verdict = Verdict::Flag;
        }
    }

    let reason = if triggered_names.is_empty() {
        String::new()
    } else {
        format!("triggered: {}", triggered_names.join(", "))
    };
    (verdict, reason)
}

/// Aggregate tool-pipeline results into a verdict and a reason.
///
/// A triggered result at or above the unsafe threshold contributes
/// `needs_confirmation` when it is the risk-tier worker asking for user
/// confirmation, and `unsafe` otherwise. Triggers below the threshold are
/// recorded but contribute nothing (audit visibility). Precedence:
/// unsafe > needs_confirmation > safe. The reason joins the details of
/// every triggered result with `"; "`.
pub fn aggregate_tool(results: &[DetectorResult], unsafe_threshold: f64) -> (ToolVerdict, String) {
    let mut verdict = ToolVerdict::Safe;
    let mut details = Vec::new();

    for result in results {
        if !result.triggered {
            continue;
        }
        details.push(result.details.as_str());

        if result.confidence < unsafe_threshold {
            continue;
        }
        let confirmation_gate = result.category == DetectorCategory::RiskTier.as_str()
            && result.details.contains("requires user confirmation");
        if confirmation_gate {
            if verdict == ToolVerdict::Safe {
                verdict = ToolVerdict::NeedsConfirmation;
            }
        } else {
            verdict = ToolVerdict::Unsafe;
        }
    }

    (verdict, details.join("; "))
}

/// Project the computed verdict onto the response for shadow-mode projects.
///
/// Returns `(response_verdict, is_shadow)`. In shadow mode the caller
/// always sees `allow`; the event record keeps the computed verdict.
pub fn apply_shadow(verdict: Verdict, mode: ProjectMode) -> (Verdict, bool) {
    match mode {
        ProjectMode::Enforce => (verdict, false),
        ProjectMode::Shadow => (Verdict::Allow, true),
    }
}
