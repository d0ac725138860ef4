//! Dossier - Interactive Research Report Compilation
//!
//! Compiles a long-form research report from precomputed analysis artifacts
//! (trend data, research gaps, collaboration-graph metrics, source documents)
//! one section at a time, with a human reviewing every section.
//!
//! ## Core Features
//!
//! - **Section Planning**: sections derived from the available data, with
//!   dependency edges and a structural fingerprint for drift detection
//! - **Report State Machine**: confirmation-gated lifecycle, per-section
//!   locks, revision caps and forced-reset recovery
//! - **Multi-pass Compiler**: draft, bounded expansion with repetition and
//!   growth stopping rules, refine, sanitize
//! - **Cost-aware Routing**: primary/secondary backends per phase with a
//!   metered-call ceiling and one-shot runtime fallback
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dossier::{Config, Database, ProviderRegistry, ReportService};
//!
//! let config = Config::default();
//! let store = Arc::new(Database::open(&config.storage.path)?);
//! let service = ReportService::from_config(&config, &ProviderRegistry::new(), store)?;
//!
//! service.put_analysis(&session, &user, snapshot)?;
//! service.initialize(&session, &user, true).await?;
//! service.generate_section(&session, &user, "trend_analysis").await?;
//! service.submit_review(&session, &user, "trend_analysis", true, None).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: providers, routing, cost guardrail, templates, markdown safety
//! - [`report`]: planner, compiler, state machine, state store boundary
//! - [`storage`]: SQLite-backed state store
//! - [`config`]: layered configuration

pub mod ai;
pub mod config;
pub mod constants;
pub mod logging;
pub mod report;
pub mod storage;
pub mod types;

pub use ai::{
    Backends, CostGuardrail, LlmProvider, Phase, ProviderConfig, ProviderRegistry, ProviderRouter,
};
pub use config::{Config, ConfigLoader};
pub use report::{
    AnalysisSnapshot, MemoryReportStore, ReportService, ReportState, ReportStatus, ReportStore,
    SectionState, SectionStatus,
};
pub use storage::Database;
pub use types::{DossierError, ErrorKind, PreconditionError, Result, SessionId, UserId};
