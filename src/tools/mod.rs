//! Declarative tool policy: definitions, the cached registry, and the
//! five evaluators that consult them.

pub mod definition;
pub mod evaluators;
pub mod registry;

pub use definition::{
    ArgumentPolicy, ContextualRules, InformationFlow, RateLimitRule, RiskTier, ToolDefinition,
};
pub use registry::ToolRegistry;
