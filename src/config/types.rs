//! Configuration Types
//!
//! All configuration structures with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ai::provider::ProviderConfig;
use crate::constants::{compiler, guardrail, report};
use crate::types::{DossierError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Generation backends and routing
    pub llm: LlmConfig,

    /// Section compiler tuning
    pub compiler: CompilerConfig,

    /// Report lifecycle settings
    pub report: ReportConfig,

    /// State store settings
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            compiler: CompilerConfig::default(),
            report: ReportConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        for (label, provider) in [("primary", &self.llm.primary), ("secondary", &self.llm.secondary)]
        {
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(DossierError::Config(format!(
                    "{label} temperature must be between 0.0 and 2.0, got {}",
                    provider.temperature
                )));
            }
            if provider.timeout_secs == 0 {
                return Err(DossierError::Config(format!(
                    "{label} timeout_secs must be greater than 0"
                )));
            }
        }

        if self.llm.cost_ceiling == 0 {
            return Err(DossierError::Config(
                "llm.cost_ceiling must be greater than 0".to_string(),
            ));
        }

        self.compiler.validate()?;

        if self.report.max_revisions == 0 {
            return Err(DossierError::Config(
                "report.max_revisions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Higher-quality, typically metered backend
    pub primary: ProviderConfig,

    /// Cheaper or local backend, always available
    pub secondary: ProviderConfig,

    /// Route phases to different backends
    pub hybrid: bool,

    /// Maximum metered calls per report
    pub cost_ceiling: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig {
                provider: "openai".to_string(),
                model: Some("gpt-4o".to_string()),
                ..Default::default()
            },
            secondary: ProviderConfig {
                provider: "ollama".to_string(),
                model: Some("llama3:latest".to_string()),
                ..Default::default()
            },
            hybrid: true,
            cost_ceiling: guardrail::DEFAULT_CALL_CEILING,
        }
    }
}

// =============================================================================
// Compiler Configuration
// =============================================================================

/// Tuning for the draft/expand/refine loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub max_expansion_passes: usize,
    pub repetition_threshold: f64,
    pub min_word_growth: usize,
    pub anchor_char_budget: usize,
    pub sanitize_line_limit: usize,
    pub abstract_fallback_words: usize,
    pub draft_temperature: f32,
    pub expand_temperature: f32,
    pub refine_temperature: f32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_expansion_passes: compiler::MAX_EXPANSION_PASSES,
            repetition_threshold: compiler::REPETITION_THRESHOLD,
            min_word_growth: compiler::MIN_WORD_GROWTH,
            anchor_char_budget: compiler::ANCHOR_CHAR_BUDGET,
            sanitize_line_limit: compiler::SANITIZE_LINE_LIMIT,
            abstract_fallback_words: compiler::ABSTRACT_FALLBACK_WORDS,
            draft_temperature: compiler::DRAFT_TEMPERATURE,
            expand_temperature: compiler::EXPAND_TEMPERATURE,
            refine_temperature: compiler::REFINE_TEMPERATURE,
        }
    }
}

impl CompilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_expansion_passes > compiler::MAX_EXPANSION_PASSES {
            return Err(DossierError::Config(format!(
                "compiler.max_expansion_passes must be at most {}, got {}",
                compiler::MAX_EXPANSION_PASSES,
                self.max_expansion_passes
            )));
        }
        if !(0.0..=1.0).contains(&self.repetition_threshold) {
            return Err(DossierError::Config(format!(
                "compiler.repetition_threshold must be between 0.0 and 1.0, got {}",
                self.repetition_threshold
            )));
        }
        if self.anchor_char_budget == 0 {
            return Err(DossierError::Config(
                "compiler.anchor_char_budget must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Report Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Revisions allowed per section before rejection forces an error
    pub max_revisions: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_revisions: report::DEFAULT_MAX_REVISIONS,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path (relative to the working directory)
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".dossier/reports.db"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.primary.provider, "openai");
        assert_eq!(config.llm.secondary.provider, "ollama");
        assert_eq!(config.llm.cost_ceiling, 15);
        assert_eq!(config.report.max_revisions, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_excess_passes() {
        let mut config = Config::default();
        config.compiler.max_expansion_passes = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        let mut config = Config::default();
        config.llm.cost_ceiling = 0;
        assert!(matches!(config.validate(), Err(DossierError::Config(_))));
    }
}
