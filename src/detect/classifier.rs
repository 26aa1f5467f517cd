//! Remote ML-classifier worker.
//!
//! A thin JSON-over-HTTP client treated as a black box: it posts the
//! payload to the configured endpoint and maps the returned score onto a
//! detector result. Enabled only when `GUARD_CLASSIFIER_URL` is set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    /// Probability in [0, 1] that the text is malicious.
    score: f64,
    /// Optional label naming the predicted class.
    #[serde(default)]
    label: Option<String>,
}

/// Detector backed by a remote classification service.
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
    threshold: f64,
}

impl RemoteClassifier {
    /// Build a classifier worker against `url`. The per-request timeout is
    /// always derived from the engine deadline, not fixed here.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            threshold: 0.5,
        }
    }
}

#[async_trait]
impl Detector for RemoteClassifier {
    fn name(&self) -> &str {
        "ml_classifier"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::Classifier
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            // Out of budget before the call: report nothing rather than
            // racing a doomed request.
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }

        let body = ClassifyRequest {
            text: &request.payload,
            action: request.action.as_str(),
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(remaining)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectorError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| DetectorError::Rpc(e.to_string()))?;

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::Rpc(e.to_string()))?;

        let score = parsed.score.clamp(0.0, 1.0);
        if score >= self.threshold {
            let label = parsed.label.unwrap_or_else(|| "malicious".to_string());
            Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                score,
                format!("classifier predicted '{label}' at {score:.2}"),
            ))
        } else {
            Ok(DetectorResult::clear(self.name(), self.category()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_expired_deadline_skips_rpc() {
        // Points at a non-routable address; must not be contacted.
        let detector = RemoteClassifier::new("http://192.0.2.1:9/classify");
        let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
        let result = detector
            .evaluate(&expired, &CheckRequest::default())
            .await
            .unwrap();
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rpc_error() {
        let detector = RemoteClassifier::new("http://127.0.0.1:1/classify");
        let deadline = Deadline::after(Duration::from_millis(200));
        let err = detector
            .evaluate(&deadline, &CheckRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::Rpc(_)));
    }
}
