//! The five tool-policy evaluators.
//!
//! Each implements the detector contract and reads the resolved
//! [`ToolDefinition`](crate::tools::ToolDefinition) the service attaches
//! to the request. All of them short-circuit between steps once the
//! deadline expires and report whatever they found so far.

pub mod arguments;
pub mod contextual;
pub mod info_flow;
pub mod precondition;
pub mod risk_tier;

use std::sync::Arc;

pub use arguments::ArgumentEvaluator;
pub use contextual::ContextualRulesEvaluator;
pub use info_flow::InformationFlowEvaluator;
pub use precondition::PreconditionEvaluator;
pub use risk_tier::RiskTierEvaluator;

use crate::detect::Detector;

/// The full evaluator set, in the order they are registered.
pub fn standard_evaluators() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(RiskTierEvaluator),
        Arc::new(PreconditionEvaluator),
        Arc::new(ArgumentEvaluator::new()),
        Arc::new(ContextualRulesEvaluator),
        Arc::new(InformationFlowEvaluator),
    ]
}
