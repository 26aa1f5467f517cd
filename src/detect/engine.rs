//! Parallel detection engine.
//!
//! Fans one tokio task out per enabled worker and collects results over a
//! channel whose capacity equals the task count, so a worker that misses
//! the deadline can still deposit its result without blocking and be
//! collected by the channel's drop. The engine returns whatever arrived by
//! the deadline; late workers are excluded silently, worker errors become
//! non-triggered results, and nothing is retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::detect::{Deadline, Detector, DetectorResult};
use crate::policy::ProjectPolicy;
use crate::request::CheckRequest;

/// Results plus the measured wall-clock elapsed time.
#[derive(Debug)]
pub struct EngineOutput {
    /// One result per worker that reported in time. No ordering guarantee;
    /// callers persisting detector arrays must record the order observed.
    pub results: Vec<DetectorResult>,
    pub elapsed: Duration,
}

/// Dispatches a flat list of workers under a single wall-clock deadline.
pub struct DetectionEngine {
    detectors: Vec<Arc<dyn Detector>>,
    timeout: Duration,
}

impl DetectionEngine {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, timeout: Duration) -> Self {
        Self { detectors, timeout }
    }

    /// Names of all registered workers, for response completeness checks.
    pub fn detector_names(&self) -> Vec<String> {
        self.detectors
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Run all policy-enabled workers against the request.
    pub async fn run(
        &self,
        request: Arc<CheckRequest>,
        policy: Option<&ProjectPolicy>,
    ) -> EngineOutput {
        self.run_with_deadline(request, policy, None).await
    }

    /// [`run`](Self::run) bounded additionally by a caller deadline.
    pub async fn run_with_deadline(
        &self,
        request: Arc<CheckRequest>,
        policy: Option<&ProjectPolicy>,
        caller_deadline: Option<Deadline>,
    ) -> EngineOutput {
        let started = Instant::now();

        let mut deadline = Deadline::after(self.timeout);
        if let Some(caller) = caller_deadline {
            deadline = deadline.min(caller);
        }

        let selected: Vec<&Arc<dyn Detector>> = self
            .detectors
            .iter()
            .filter(|d| policy.map(|p| p.is_enabled(d.name())).unwrap_or(true))
            .collect();

        if selected.is_empty() {
            return EngineOutput {
                results: Vec::new(),
                elapsed: started.elapsed(),
            };
        }

        // Capacity equals the task count: a late deposit never blocks, it
        // is simply dropped with the receiver.
        let (tx, mut rx) = mpsc::channel::<DetectorResult>(selected.len());

        let expected = selected.len();
        for detector in selected {
            let detector = Arc::clone(detector);
            let request = self.request_for(&detector, &request, policy);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = match detector.evaluate(&deadline, &request).await {
                    Ok(result) => result,
                    Err(error) => {
                        tracing::warn!(
                            detector = detector.name(),
                            error = %error,
                            "detector failed"
                        );
                        DetectorResult::from_error(detector.name(), detector.category(), &error)
                    }
                };
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected);
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline.instant()));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(result) => {
                        results.push(result);
                        if results.len() == expected {
                            break;
                        }
                    }
                    None => break,
                },
                _ = &mut sleep => {
                    tracing::debug!(
                        received = results.len(),
                        expected,
                        "detector deadline reached, returning partial results"
                    );
                    break;
                }
            }
        }

        EngineOutput {
            results,
            elapsed: started.elapsed(),
        }
    }

    /// The request a specific worker sees. Workers whose policy override
    /// carries tool allow/block lists get a shallow clone with the lists
    /// attached; everyone else shares the original.
    fn request_for(
        &self,
        detector: &Arc<dyn Detector>,
        request: &Arc<CheckRequest>,
        policy: Option<&ProjectPolicy>,
    ) -> Arc<CheckRequest> {
        let Some(policy) = policy else {
            return Arc::clone(request);
        };
        let overrides = policy.get(detector.name());
        if overrides.allowed_tools.is_none() && overrides.blocked_tools.is_none() {
            return Arc::clone(request);
        }
        let mut attached = (**request).clone();
        attached.allowed_tools = overrides.allowed_tools;
        attached.blocked_tools = overrides.blocked_tools;
        Arc::new(attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorCategory, builtin::ToolPolicyDetector};
    use crate::error::DetectorError;
    use crate::policy::{DetectorOverride, ProjectPolicy};
    use crate::request::ToolCall;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Configurable stub worker for engine tests.
    struct StubDetector {
        name: &'static str,
        delay: Duration,
        triggered: bool,
        confidence: f64,
        fail: bool,
    }

    impl StubDetector {
        fn fast(name: &'static str) -> Self {
            Self {
                name,
                delay: Duration::from_millis(1),
                triggered: false,
                confidence: 0.0,
                fail: false,
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::fast(name)
            }
        }

        fn firing(name: &'static str, confidence: f64) -> Self {
            Self {
                triggered: true,
                confidence,
                ..Self::fast(name)
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::fast(name)
            }
        }
    }

    #[async_trait]
    impl Detector for StubDetector {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> DetectorCategory {
            DetectorCategory::Classifier
        }

        async fn evaluate(
            &self,
            _deadline: &Deadline,
            _request: &CheckRequest,
        ) -> Result<DetectorResult, DetectorError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(DetectorError::Internal("stub failure".to_string()));
            }
            if self.triggered {
                Ok(DetectorResult::triggered(
                    self.name,
                    self.category(),
                    self.confidence,
                    "stub fired",
                ))
            } else {
                Ok(DetectorResult::clear(self.name, self.category()))
            }
        }
    }

    fn engine_of(detectors: Vec<Arc<dyn Detector>>, timeout: Duration) -> DetectionEngine {
        DetectionEngine::new(detectors, timeout)
    }

    #[tokio::test]
    async fn test_all_workers_report() {
        let engine = engine_of(
            vec![
                Arc::new(StubDetector::fast("a")),
                Arc::new(StubDetector::firing("b", 0.9)),
            ],
            Duration::from_secs(1),
        );
        let output = engine.run(Arc::new(CheckRequest::default()), None).await;
        assert_eq!(output.results.len(), 2);

        // No worker name appears twice.
        let mut names: Vec<&str> = output.results.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 2);
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let engine = engine_of(
            vec![
                Arc::new(StubDetector::fast("fast")),
                Arc::new(StubDetector::slow("slow", Duration::from_secs(1))),
            ],
            Duration::from_millis(5),
        );
        let started = Instant::now();
        let output = engine.run(Arc::new(CheckRequest::default()), None).await;
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].name, "fast");
        // Bounded by the deadline, not the slow worker.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_worker_error_surfaces_as_result() {
        let engine = engine_of(
            vec![Arc::new(StubDetector::failing("broken"))],
            Duration::from_secs(1),
        );
        let output = engine.run(Arc::new(CheckRequest::default()), None).await;
        assert_eq!(output.results.len(), 1);
        let result = &output.results[0];
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
        assert!(result.details.starts_with("detector error: "));
    }

    #[tokio::test]
    async fn test_policy_disables_worker_before_dispatch() {
        let engine = engine_of(
            vec![
                Arc::new(StubDetector::fast("keep")),
                Arc::new(StubDetector::fast("drop")),
            ],
            Duration::from_secs(1),
        );
        let mut overrides = HashMap::new();
        overrides.insert(
            "drop".to_string(),
            DetectorOverride {
                enabled: Some(false),
                ..DetectorOverride::default()
            },
        );
        let policy = ProjectPolicy { overrides };
        let output = engine
            .run(Arc::new(CheckRequest::default()), Some(&policy))
            .await;
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].name, "keep");
    }

    #[tokio::test]
    async fn test_empty_worker_list() {
        let engine = engine_of(Vec::new(), Duration::from_secs(1));
        let output = engine.run(Arc::new(CheckRequest::default()), None).await;
        assert!(output.results.is_empty());
    }

    #[tokio::test]
    async fn test_tool_lists_attached_from_policy() {
        let engine = engine_of(vec![Arc::new(ToolPolicyDetector)], Duration::from_secs(1));
        let mut overrides = HashMap::new();
        overrides.insert(
            "tool_policy".to_string(),
            DetectorOverride {
                blocked_tools: Some(vec!["shell".to_string()]),
                ..DetectorOverride::default()
            },
        );
        let policy = ProjectPolicy { overrides };
        let request = CheckRequest {
            tool_call: Some(ToolCall {
                function_name: "shell".to_string(),
                arguments_json: "{}".to_string(),
            }),
            ..CheckRequest::default()
        };
        let output = engine.run(Arc::new(request), Some(&policy)).await;
        assert_eq!(output.results.len(), 1);
        assert!(output.results[0].triggered);
        assert!(output.results[0].details.contains("block list"));
    }
}
