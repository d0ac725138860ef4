//! Phase-Aware Provider Routing
//!
//! Assigns each compilation phase to the primary or secondary backend,
//! enforces the metered-call guardrail, and performs the one-shot runtime
//! fallback from a failing primary to a distinct secondary.
//!
//! ## Strategy
//!
//! 1. Pick the preferred backend for the phase (hybrid routing)
//! 2. Charge the guardrail if that backend is metered; on refusal, route to
//!    the secondary, or fail with a cost-limit error if it cannot absorb it
//! 3. On a primary backend failure, retry exactly once on the secondary
//! 4. Record every call and every fallback for audit

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::guardrail::CostGuardrail;
use super::provider::{Backends, GenerationRequest, LlmResponse, SharedProvider};
use crate::types::Result;

/// Compilation phase of a generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Draft,
    Expand,
    Refine,
    Abstract,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Expand => write!(f, "expand"),
            Self::Refine => write!(f, "refine"),
            Self::Abstract => write!(f, "abstract"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Primary,
    Secondary,
}

/// One dispatched generation call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub phase: Phase,
    pub backend: Backend,
    pub provider: String,
    pub model: String,
    pub metered: bool,
    pub success: bool,
    pub tokens: u32,
}

/// Calls and warnings accumulated while compiling one section
#[derive(Debug, Default)]
pub struct RoutingLog {
    pub calls: Vec<CallRecord>,
    pub warnings: Vec<String>,
}

impl RoutingLog {
    pub fn metered_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.metered).count()
    }

    /// Model identifier of the last successful call
    pub fn last_model(&self) -> Option<String> {
        self.calls
            .iter()
            .rev()
            .find(|c| c.success)
            .map(|c| format!("{}/{}", c.provider, c.model))
    }

    pub fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Routes phases across the backend pair
#[derive(Clone)]
pub struct ProviderRouter {
    backends: Backends,
    hybrid: bool,
}

impl ProviderRouter {
    pub fn new(backends: Backends, hybrid: bool) -> Self {
        Self { backends, hybrid }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Preferred backend for a phase before guardrail checks
    ///
    /// Abstract synthesis is pinned to the primary: it is never rerouted by
    /// the cost ceiling nor retried on the secondary after a failure.
    pub fn route(&self, phase: Phase, reasoning_heavy: bool) -> Backend {
        if !self.hybrid {
            return Backend::Primary;
        }
        match phase {
            Phase::Refine | Phase::Abstract => Backend::Primary,
            Phase::Expand => Backend::Secondary,
            Phase::Draft if reasoning_heavy => Backend::Primary,
            Phase::Draft => Backend::Secondary,
        }
    }

    /// Whether a phase may leave the primary once routed there
    fn may_fall_back(&self, phase: Phase) -> bool {
        phase != Phase::Abstract && self.backends.has_distinct_secondary()
    }

    fn provider(&self, backend: Backend) -> &SharedProvider {
        match backend {
            Backend::Primary => &self.backends.primary,
            Backend::Secondary => &self.backends.secondary,
        }
    }

    /// Apply the guardrail to the preferred backend and return the one to call
    fn admit(
        &self,
        preferred: Backend,
        phase: Phase,
        guardrail: &CostGuardrail,
        log: &mut RoutingLog,
    ) -> Result<Backend> {
        let provider = self.provider(preferred);
        if !provider.is_metered() {
            return Ok(preferred);
        }

        match guardrail.try_charge() {
            Ok(_) => Ok(preferred),
            Err(limit) => {
                if preferred == Backend::Secondary || !self.may_fall_back(phase) {
                    return Err(limit);
                }
                if self.backends.secondary.is_metered() {
                    guardrail.try_charge()?;
                }
                log.warn(format!(
                    "Cost ceiling of {} metered calls reached; {} routed to secondary '{}'",
                    guardrail.ceiling(),
                    phase,
                    self.backends.secondary.name()
                ));
                Ok(Backend::Secondary)
            }
        }
    }

    async fn call(
        &self,
        backend: Backend,
        phase: Phase,
        request: &GenerationRequest,
        log: &mut RoutingLog,
    ) -> Result<LlmResponse> {
        let provider = self.provider(backend);
        debug!(%phase, ?backend, provider = provider.name(), "Dispatching generation");

        let result = provider.generate(request).await;
        let requested = || {
            request
                .model
                .clone()
                .unwrap_or_else(|| provider.model().to_string())
        };
        let (model, tokens) = match &result {
            Ok(response) if !response.model.is_empty() => {
                (response.model.clone(), response.usage.total())
            }
            Ok(response) => (requested(), response.usage.total()),
            Err(_) => (requested(), 0),
        };
        debug!(provider = provider.name(), %model, tokens, ok = result.is_ok(), "Generation finished");
        log.calls.push(CallRecord {
            phase,
            backend,
            provider: provider.name().to_string(),
            model,
            metered: provider.is_metered(),
            success: result.is_ok(),
            tokens,
        });
        result
    }

    /// Dispatch one phase call with guardrail and runtime fallback
    #[instrument(skip(self, request, guardrail, log), fields(calls = guardrail.calls()))]
    pub async fn dispatch(
        &self,
        phase: Phase,
        reasoning_heavy: bool,
        request: &GenerationRequest,
        guardrail: &CostGuardrail,
        log: &mut RoutingLog,
    ) -> Result<LlmResponse> {
        let preferred = self.route(phase, reasoning_heavy);
        let backend = self.admit(preferred, phase, guardrail, log)?;

        match self.call(backend, phase, request, log).await {
            Ok(response) => Ok(response),
            Err(err)
                if backend == Backend::Primary
                    && err.is_backend_failure()
                    && self.may_fall_back(phase) =>
            {
                log.warn(format!(
                    "{} on primary '{}' failed ({}); retrying once on secondary '{}'",
                    phase,
                    self.backends.primary.name(),
                    err,
                    self.backends.secondary.name()
                ));
                if self.backends.secondary.is_metered() {
                    guardrail.try_charge()?;
                }
                self.call(Backend::Secondary, phase, request, log).await
            }
            Err(err) => Err(err),
        }
    }
}
