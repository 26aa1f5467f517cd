//! Detection primitives: the worker contract, deadlines, and results.
//!
//! Every detector — the payload scanners, the remote classifier, and the
//! five tool evaluators — implements the same [`Detector`] trait and is
//! dispatched by the [`engine`]. There is no subclass hierarchy; workers
//! are discriminated by a stable string name and a category tag, and the
//! engine composes a flat list filtered by the project policy.

pub mod aggregator;
pub mod builtin;
pub mod classifier;
pub mod engine;
pub mod patterns;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::request::CheckRequest;

/// A wall-clock deadline handed to every worker.
///
/// Cancellation is cooperative: workers check [`expired`](Self::expired)
/// between expensive steps (regex patterns, trace entries) and return
/// promptly with whatever they have. The engine cannot forcibly terminate
/// a worker; a non-compliant one simply never contributes.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// A deadline at a specific instant.
    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    /// The underlying instant, for `sleep_until`.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// The earlier of two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        if other.at < self.at { other } else { self }
    }
}

/// Category tag carried alongside a detector's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorCategory {
    PromptInjection,
    Pii,
    SecretLeak,
    Classifier,
    ToolPolicy,
    RiskTier,
    Precondition,
    ArgumentValidation,
    ContextualRules,
    InformationFlow,
}

impl DetectorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorCategory::PromptInjection => "prompt_injection",
            DetectorCategory::Pii => "pii",
            DetectorCategory::SecretLeak => "secret_leak",
            DetectorCategory::Classifier => "classifier",
            DetectorCategory::ToolPolicy => "tool_policy",
            DetectorCategory::RiskTier => "risk_tier",
            DetectorCategory::Precondition => "precondition",
            DetectorCategory::ArgumentValidation => "argument_validation",
            DetectorCategory::ContextualRules => "contextual_rules",
            DetectorCategory::InformationFlow => "information_flow",
        }
    }
}

impl std::fmt::Display for DetectorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single worker's answer.
///
/// Invariant: `triggered == false` implies `confidence == 0.0`. The
/// constructors enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorResult {
    pub name: String,
    pub category: String,
    pub triggered: bool,
    pub confidence: f64,
    pub details: String,
}

impl DetectorResult {
    /// A non-triggered result with zero confidence.
    pub fn clear(name: &str, category: DetectorCategory) -> Self {
        Self {
            name: name.to_string(),
            category: category.as_str().to_string(),
            triggered: false,
            confidence: 0.0,
            details: String::new(),
        }
    }

    /// A triggered result. Confidence is clamped to [0, 1].
    pub fn triggered(
        name: &str,
        category: DetectorCategory,
        confidence: f64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            category: category.as_str().to_string(),
            triggered: true,
            confidence: confidence.clamp(0.0, 1.0),
            details: details.into(),
        }
    }

    /// A non-triggered result recording a worker error.
    pub fn from_error(name: &str, category: DetectorCategory, error: &DetectorError) -> Self {
        Self {
            name: name.to_string(),
            category: category.as_str().to_string(),
            triggered: false,
            confidence: 0.0,
            details: format!("detector error: {error}"),
        }
    }
}

/// The standard payload-pipeline detector set: the regex scanners plus
/// the remote classifier when an endpoint is configured.
pub fn standard_payload_detectors(classifier_url: Option<&str>) -> Vec<std::sync::Arc<dyn Detector>> {
    let mut detectors: Vec<std::sync::Arc<dyn Detector>> = vec![
        std::sync::Arc::new(builtin::PromptInjectionDetector::new()),
        std::sync::Arc::new(builtin::PiiDetector::new()),
        std::sync::Arc::new(builtin::SecretLeakDetector::new()),
        std::sync::Arc::new(builtin::ToolPolicyDetector),
    ];
    if let Some(url) = classifier_url {
        detectors.push(std::sync::Arc::new(classifier::RemoteClassifier::new(url)));
    }
    detectors
}

/// The uniform worker contract.
///
/// Implementations must honor the deadline, never mutate the request, and
/// be safe to invoke concurrently from multiple requests. Errors are
/// surfaced but never become verdicts.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable detector name, used as the policy key.
    fn name(&self) -> &str;

    /// Category tag recorded alongside every result.
    fn category(&self) -> DetectorCategory;

    /// Evaluate the request within the deadline.
    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError>;
}
