//! Error Types
//!
//! Every fallible operation returns [`DossierError`]. Callers branch on
//! [`DossierError::kind`]:
//!
//! - **Precondition**: workflow misuse rejected before any mutation
//! - **ContentSafety**: generated markdown failed the safety gate
//! - **Backend**: text generation failed, fallback included
//! - **CostLimit**: the metered-call ceiling would be exceeded
//! - **Service**: storage and configuration failures
//!
//! Provider failures are carried as [`LlmError`], tagged with an
//! [`ErrorCategory`] derived from the HTTP status or the error text.

use std::fmt;

use thiserror::Error;

// =============================================================================
// Provider Failures
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    /// Prompt exceeded the model's context window
    ContextLength,
    Auth,
    /// Connection refused, DNS, timeouts
    Network,
    Unavailable,
    BadRequest,
    /// HTTP success but no usable text in the body
    EmptyResponse,
    Transient,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ContextLength => "context_length",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Unavailable => "unavailable",
            Self::BadRequest => "bad_request",
            Self::EmptyResponse => "empty_response",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        }
    }

    /// Failures that may clear up on their own
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Unavailable | Self::Transient
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmError {
    pub category: ErrorCategory,
    pub message: String,
    pub provider: Option<String>,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{provider} ({}): {}", self.category, self.message),
            None => write!(f, "{}: {}", self.category, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::new(category, message)
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category.is_transient()
    }
}

/// Maps raw provider failures onto an [`ErrorCategory`]
pub struct ErrorClassifier;

/// Checked in order; the first rule with a matching needle wins
const MESSAGE_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::RateLimit,
        &["rate limit", "429", "too many requests", "quota exceeded"],
    ),
    (
        ErrorCategory::ContextLength,
        &["context length", "maximum context", "too many tokens"],
    ),
    (
        ErrorCategory::Auth,
        &["401", "403", "api key", "unauthorized"],
    ),
    (
        ErrorCategory::Network,
        &["connection", "dns", "timeout", "timed out", "unreachable"],
    ),
    (
        ErrorCategory::Unavailable,
        &["500", "502", "503", "service unavailable", "server error"],
    ),
    (
        ErrorCategory::BadRequest,
        &["400", "bad request", "malformed"],
    ),
    (ErrorCategory::Transient, &["overloaded", "temporary"]),
];

impl ErrorClassifier {
    /// Classify a transport or client error by its message text
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();
        let category = MESSAGE_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map_or(ErrorCategory::Unknown, |(category, _)| *category);
        LlmError::with_provider(category, message, provider)
    }

    /// Classify a non-success HTTP response
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 | 422 => ErrorCategory::BadRequest,
            404 => ErrorCategory::Unavailable,
            500..=599 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };
        LlmError::with_provider(category, message, provider)
    }
}

// =============================================================================
// Precondition Errors
// =============================================================================

/// Workflow misuse detected before any state mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{operation} requires explicit confirmation")]
    NotConfirmed { operation: &'static str },

    #[error("Locked: {reason}")]
    Locked { reason: String },

    #[error("Section '{section}' has unaccepted dependencies: {}", pending.join(", "))]
    DependencyUnmet {
        section: String,
        pending: Vec<String>,
    },

    #[error("Section '{section}' reached its revision cap ({max_revisions})")]
    RevisionCapReached { section: String, max_revisions: u32 },

    #[error("{target} is '{actual}', expected {expected}")]
    InvalidStatus {
        target: String,
        expected: String,
        actual: String,
    },

    #[error("Sections not accepted: {}", pending.join(", "))]
    Incomplete { pending: Vec<String> },
}

impl PreconditionError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn locked(reason: impl Into<String>) -> Self {
        Self::Locked {
            reason: reason.into(),
        }
    }

    pub fn invalid_status(
        target: impl Into<String>,
        expected: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidStatus {
            target: target.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

/// Coarse error kind exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    ContentSafety,
    Backend,
    CostLimit,
    Service,
}

#[derive(Debug, Error)]
pub enum DossierError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Workflow Errors
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("Unsafe content in section '{section}': {reason}")]
    ContentSafety { section: String, reason: String },

    // -------------------------------------------------------------------------
    // Generation Errors
    // -------------------------------------------------------------------------
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("Cost limit reached: {calls} of {limit} metered calls used")]
    CostLimit { calls: u32, limit: u32 },

    #[error("Generation failed for section '{section}': {message}")]
    Generation { section: String, message: String },
}

impl From<LlmError> for DossierError {
    fn from(err: LlmError) -> Self {
        DossierError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, DossierError>;

impl DossierError {
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(LlmError::new(ErrorCategory::Unknown, message))
    }

    pub fn generation(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            section: section.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::ContentSafety { .. } => ErrorKind::ContentSafety,
            Self::Llm(_) | Self::Generation { .. } => ErrorKind::Backend,
            Self::CostLimit { .. } => ErrorKind::CostLimit,
            _ => ErrorKind::Service,
        }
    }

    /// Precondition payload, if this is a workflow rejection
    pub fn precondition(&self) -> Option<&PreconditionError> {
        match self {
            Self::Precondition(p) => Some(p),
            _ => None,
        }
    }

    /// Whether a provider failure qualifies for the one-shot fallback
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Llm(_))
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| DossierError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| DossierError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::RateLimit, "slow down", "openai");
        assert_eq!(err.to_string(), "openai (rate_limit): slow down");
        assert_eq!(
            LlmError::new(ErrorCategory::Unknown, "boom").to_string(),
            "unknown: boom"
        );
    }

    #[test]
    fn test_classify_by_message() {
        let cases = [
            ("Connection timed out after 30s", ErrorCategory::Network),
            ("Service unavailable (503)", ErrorCategory::Unavailable),
            ("Invalid API key provided", ErrorCategory::Auth),
            ("This model's maximum context length is 8192", ErrorCategory::ContextLength),
            ("something odd", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(ErrorClassifier::classify(message, "p").category, expected, "{message}");
        }
        assert!(!ErrorClassifier::classify("unauthorized", "p").is_transient());
    }

    #[test]
    fn test_classify_http_status() {
        let server = ErrorClassifier::classify_http_status(502, "bad gateway", "ollama");
        assert_eq!(server.category, ErrorCategory::Transient);
        assert!(server.is_transient());
        assert_eq!(
            ErrorClassifier::classify_http_status(401, "", "ollama").category,
            ErrorCategory::Auth
        );
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let pre: DossierError = PreconditionError::locked("report").into();
        assert_eq!(pre.kind(), ErrorKind::Precondition);

        let cost = DossierError::CostLimit { calls: 15, limit: 15 };
        assert_eq!(cost.kind(), ErrorKind::CostLimit);

        let backend = DossierError::llm("boom");
        assert_eq!(backend.kind(), ErrorKind::Backend);
        assert!(backend.is_backend_failure());
        assert!(!cost.is_backend_failure());
    }

    #[test]
    fn test_dependency_message_names_sections() {
        let err = PreconditionError::DependencyUnmet {
            section: "executive_summary".into(),
            pending: vec!["trend_analysis".into(), "research_gaps".into()],
        };
        assert_eq!(
            err.to_string(),
            "Section 'executive_summary' has unaccepted dependencies: trend_analysis, research_gaps"
        );
    }
}
