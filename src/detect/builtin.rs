//! Built-in payload detectors.
//!
//! The regex catalogs are pluggable data; these are the workers that run
//! them, plus the tool allow/block list detector that consumes the lists
//! the engine attaches from the project policy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::detect::patterns::PatternCatalog;
use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;

/// Scans payloads for prompt-injection attempts.
pub struct PromptInjectionDetector {
    catalog: Arc<PatternCatalog>,
}

impl PromptInjectionDetector {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(PatternCatalog::prompt_injection()),
        }
    }
}

impl Default for PromptInjectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for PromptInjectionDetector {
    fn name(&self) -> &str {
        "prompt_injection"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::PromptInjection
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let outcome = self.catalog.scan(&request.payload, deadline);
        if outcome.is_clean() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            outcome.confidence,
            format!("injection patterns matched: {}", outcome.matched.join(", ")),
        ))
    }
}

/// Scans payloads for personally identifiable information.
pub struct PiiDetector {
    catalog: Arc<PatternCatalog>,
}

impl PiiDetector {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(PatternCatalog::pii()),
        }
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for PiiDetector {
    fn name(&self) -> &str {
        "pii"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::Pii
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let outcome = self.catalog.scan(&request.payload, deadline);
        if outcome.is_clean() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            outcome.confidence,
            format!("PII classes found: {}", outcome.matched.join(", ")),
        ))
    }
}

/// Scans payloads for leaked credentials and key material.
pub struct SecretLeakDetector {
    catalog: Arc<PatternCatalog>,
}

impl SecretLeakDetector {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(PatternCatalog::secrets()),
        }
    }
}

impl Default for SecretLeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for SecretLeakDetector {
    fn name(&self) -> &str {
        "secret_leak"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::SecretLeak
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let outcome = self.catalog.scan(&request.payload, deadline);
        if outcome.is_clean() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            outcome.confidence,
            format!("secret patterns matched: {}", outcome.matched.join(", ")),
        ))
    }
}

/// Checks tool invocations against the project's allow/block lists.
///
/// The lists are not part of the wire request; the engine attaches them
/// from this detector's policy override before dispatch.
pub struct ToolPolicyDetector;

#[async_trait]
impl Detector for ToolPolicyDetector {
    fn name(&self) -> &str {
        "tool_policy"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::ToolPolicy
    }

    async fn evaluate(
        &self,
        _deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let Some(tool_name) = request.tool_name() else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };

        if let Some(blocked) = &request.blocked_tools
            && blocked.iter().any(|t| t == tool_name)
        {
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                0.95,
                format!("tool '{tool_name}' is on the project block list"),
            ));
        }

        if let Some(allowed) = &request.allowed_tools
            && !allowed.is_empty()
            && !allowed.iter().any(|t| t == tool_name)
        {
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                0.9,
                format!("tool '{tool_name}' is not on the project allow list"),
            ));
        }

        Ok(DetectorResult::clear(self.name(), self.category()))
    }
}
