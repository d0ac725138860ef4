//! AI Integration Layer
//!
//! Text-generation backends, phase routing with cost governance, the
//! prompt/template catalog, and the safety gate for generated markdown.

pub mod guardrail;
pub mod prompt;
pub mod provider;
pub mod router;
pub mod validation;

pub use guardrail::CostGuardrail;
pub use prompt::{PromptBuilder, PromptSection, PromptTemplate, TEMPLATE_VERSION, TemplateCatalog};
pub use provider::{
    Backends, ErrorCategory, ErrorClassifier, GenerationRequest, LlmError, LlmProvider,
    LlmResponse, OllamaProvider, OpenAiProvider, ProviderConfig, ProviderKey, ProviderRegistry,
    SharedProvider, TokenUsage, create_provider,
};
pub use router::{Backend, CallRecord, Phase, ProviderRouter, RoutingLog};
pub use validation::{MarkdownValidator, ValidationIssue, ValidationResult};
