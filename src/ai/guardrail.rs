//! Cost Guardrail
//!
//! Thread-safe ceiling on metered backend calls for one report.
//! The counter is seeded from the report's persisted call count so the
//! ceiling holds across sessions.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::constants::guardrail as guardrail_constants;
use crate::types::{DossierError, Result};

#[derive(Debug)]
pub struct CostGuardrail {
    ceiling: u32,
    calls: AtomicU32,
    warning_emitted: AtomicBool,
}

impl CostGuardrail {
    pub fn new(ceiling: u32) -> Self {
        Self::resume(ceiling, 0)
    }

    /// Continue counting from calls already made for this report
    pub fn resume(ceiling: u32, already_used: u32) -> Self {
        Self {
            ceiling,
            calls: AtomicU32::new(already_used),
            warning_emitted: AtomicBool::new(false),
        }
    }

    /// Whether one more metered call would pass the ceiling
    pub fn would_exceed(&self) -> bool {
        self.calls.load(Ordering::Acquire) >= self.ceiling
    }

    /// Atomically charge one metered call, failing once the ceiling is reached
    pub fn try_charge(&self) -> Result<u32> {
        loop {
            let current = self.calls.load(Ordering::Acquire);
            if current >= self.ceiling {
                return Err(DossierError::CostLimit {
                    calls: current,
                    limit: self.ceiling,
                });
            }
            let next = current + 1;
            if self
                .calls
                .compare_exchange_weak(current, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.check_threshold(next);
                return Ok(next);
            }
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.calls())
    }

    fn check_threshold(&self, calls: u32) {
        if self.ceiling == 0 {
            return;
        }
        let util = calls as f64 / self.ceiling as f64;
        if calls >= self.ceiling {
            tracing::error!(calls, ceiling = self.ceiling, "Metered call ceiling reached");
        } else if util >= guardrail_constants::WARNING_THRESHOLD
            && !self.warning_emitted.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                calls,
                ceiling = self.ceiling,
                "Metered call count approaching ceiling"
            );
        }
    }
}

impl Default for CostGuardrail {
    fn default() -> Self {
        Self::new(guardrail_constants::DEFAULT_CALL_CEILING)
    }
}
