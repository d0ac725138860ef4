//! Report and Section State
//!
//! Persisted state of one interactive report. Statuses are closed enums and
//! every nullable field is an `Option`; the whole tree round-trips through
//! JSON in the state store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PreconditionError, Result};

// =============================================================================
// Statuses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Idle,
    Planned,
    InProgress,
    AwaitingFinalReview,
    Validating,
    Finalizing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::AwaitingFinalReview => "awaiting_final_review",
            Self::Validating => "validating",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Statuses in which sections may be generated
    pub fn accepts_generation(&self) -> bool {
        matches!(
            self,
            Self::Planned | Self::InProgress | Self::AwaitingFinalReview
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Planned,
    Generating,
    Review,
    Accepted,
    Error,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Generating => "generating",
            Self::Review => "review",
            Self::Accepted => "accepted",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Section Descriptor
// =============================================================================

/// How a section is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionRole {
    /// Draft/expand/refine over analysis data
    Analytic,
    /// Single-pass synthesis of the accepted analytic sections
    Summary,
    /// Rendered directly from data, no generation call
    Appendix,
}

/// Planning-time description of one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub id: String,
    pub title: String,
    pub description: String,
    pub required_data_keys: Vec<String>,
    pub template_key: String,
    pub depends_on: Vec<String>,
    pub role: SectionRole,
}

impl SectionDescriptor {
    pub fn is_generative(&self) -> bool {
        self.role != SectionRole::Appendix
    }
}

// =============================================================================
// Section State
// =============================================================================

/// One past revision of a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub revision: u32,
    pub content: String,
    /// Lowercase hex SHA-256 of `content`
    pub content_hash: String,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `<template_key>@<catalog version>`
    pub template_version: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub coverage: f64,
    pub groundedness: f64,
    pub novelty: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    pub descriptor: SectionDescriptor,
    pub status: SectionStatus,
    pub content: Option<String>,
    pub revision: u32,
    pub max_revisions: u32,
    pub history: Vec<RevisionEntry>,
    pub scores: Option<QualityScores>,
    pub last_feedback: Option<String>,
    pub error_reason: Option<String>,
    /// Identifies the generation call currently holding the section lock
    #[serde(default)]
    pub lease: Option<Uuid>,
}

impl SectionState {
    pub fn new(descriptor: SectionDescriptor, max_revisions: u32) -> Self {
        Self {
            descriptor,
            status: SectionStatus::Planned,
            content: None,
            revision: 0,
            max_revisions,
            history: Vec::new(),
            scores: None,
            last_feedback: None,
            error_reason: None,
            lease: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn title(&self) -> &str {
        &self.descriptor.title
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SectionStatus::Accepted
    }

    /// Back to a fresh `planned` section
    pub fn reset(&mut self) {
        self.status = SectionStatus::Planned;
        self.content = None;
        self.revision = 0;
        self.history.clear();
        self.scores = None;
        self.last_feedback = None;
        self.error_reason = None;
        self.lease = None;
    }
}

// =============================================================================
// Report State
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locks {
    pub report: bool,
    pub sections: BTreeMap<String, bool>,
}

impl Locks {
    pub fn section_locked(&self, id: &str) -> bool {
        self.sections.get(id).copied().unwrap_or(false)
    }

    pub fn set_section(&mut self, id: &str, locked: bool) {
        self.sections.insert(id.to_string(), locked);
    }
}

/// Compilation step reached for crash diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStep {
    Context,
    Draft,
    Expand,
    Refine,
    Abstract,
    Render,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastStep {
    pub section_id: String,
    pub step: CompileStep,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub generation_count: u32,
    pub total_revisions: u32,
    /// Metered backend calls charged against the cost ceiling
    pub cloud_calls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub section_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    pub report_id: Uuid,
    pub status: ReportStatus,
    pub sections: Vec<SectionState>,
    pub locks: Locks,
    pub last_step: Option<LastStep>,
    /// Structural fingerprint of the planned section list
    pub order_hash: String,
    pub confirmed_start: bool,
    pub confirmed_finalize: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metrics: ReportMetrics,
    pub audit_warnings: Vec<AuditEntry>,
    pub final_document: Option<String>,
}

impl ReportState {
    /// Fresh `planned` report for the given plan
    pub fn planned(descriptors: Vec<SectionDescriptor>, max_revisions: u32, order_hash: String) -> Self {
        let now = Utc::now();
        let sections: Vec<SectionState> = descriptors
            .into_iter()
            .map(|d| SectionState::new(d, max_revisions))
            .collect();
        let locks = Locks {
            report: false,
            sections: sections.iter().map(|s| (s.id().to_string(), false)).collect(),
        };

        Self {
            report_id: Uuid::new_v4(),
            status: ReportStatus::Planned,
            sections,
            locks,
            last_step: None,
            order_hash,
            confirmed_start: true,
            confirmed_finalize: false,
            created_at: now,
            updated_at: now,
            metrics: ReportMetrics::default(),
            audit_warnings: Vec::new(),
            final_document: None,
        }
    }

    pub fn section(&self, id: &str) -> Option<&SectionState> {
        self.sections.iter().find(|s| s.id() == id)
    }

    pub fn section_mut(&mut self, id: &str) -> Option<&mut SectionState> {
        self.sections.iter_mut().find(|s| s.id() == id)
    }

    pub fn require_section(&self, id: &str) -> Result<&SectionState> {
        self.section(id)
            .ok_or_else(|| PreconditionError::not_found(format!("Section '{}'", id)).into())
    }

    pub fn require_section_mut(&mut self, id: &str) -> Result<&mut SectionState> {
        self.section_mut(id)
            .ok_or_else(|| PreconditionError::not_found(format!("Section '{}'", id)).into())
    }

    /// The section currently holding the generation slot, if any
    pub fn generating_section(&self) -> Option<&SectionState> {
        self.sections
            .iter()
            .find(|s| s.status == SectionStatus::Generating)
    }

    pub fn all_accepted(&self) -> bool {
        self.sections.iter().all(SectionState::is_accepted)
    }

    /// Ids of sections not yet accepted, in plan order
    pub fn pending_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| !s.is_accepted())
            .map(|s| s.id().to_string())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.sections
            .iter()
            .any(|s| s.status == SectionStatus::Error)
    }

    pub fn record_step(&mut self, section_id: &str, step: CompileStep) {
        self.last_step = Some(LastStep {
            section_id: section_id.to_string(),
            step,
            at: Utc::now(),
        });
    }

    pub fn audit(&mut self, section_id: Option<&str>, message: impl Into<String>) {
        self.audit_warnings.push(AuditEntry {
            at: Utc::now(),
            section_id: section_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, deps: &[&str]) -> SectionDescriptor {
        SectionDescriptor {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            required_data_keys: vec![],
            template_key: id.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            role: SectionRole::Analytic,
        }
    }

    #[test]
    fn test_planned_report_starts_unlocked() {
        let state = ReportState::planned(
            vec![descriptor("a", &[]), descriptor("b", &["a"])],
            3,
            "hash".into(),
        );
        assert_eq!(state.status, ReportStatus::Planned);
        assert!(!state.locks.report);
        assert_eq!(state.locks.sections.len(), 2);
        assert!(!state.locks.section_locked("a"));
        assert_eq!(state.pending_sections(), vec!["a", "b"]);
        assert!(state.generating_section().is_none());
    }

    #[test]
    fn test_section_reset_clears_revision_state() {
        let mut section = SectionState::new(descriptor("a", &[]), 3);
        section.status = SectionStatus::Error;
        section.content = Some("text".into());
        section.revision = 2;
        section.last_feedback = Some("too vague".into());
        section.error_reason = Some("boom".into());

        section.reset();
        assert_eq!(section.status, SectionStatus::Planned);
        assert_eq!(section.revision, 0);
        assert!(section.content.is_none());
        assert!(section.last_feedback.is_none());
        assert!(section.error_reason.is_none());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::AwaitingFinalReview).unwrap(),
            "\"awaiting_final_review\""
        );
        assert_eq!(ReportStatus::InProgress.to_string(), "in_progress");
        assert!(!ReportStatus::Failed.accepts_generation());
    }

    #[test]
    fn test_missing_section_is_not_found() {
        let state = ReportState::planned(vec![descriptor("a", &[])], 3, String::new());
        let err = state.require_section("zzz").unwrap_err();
        assert!(matches!(
            err.precondition(),
            Some(PreconditionError::NotFound { .. })
        ));
    }
}
