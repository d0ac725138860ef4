//! Interactive Reporting Service
//!
//! Owns the report lifecycle. Every operation is a read-modify-write against
//! the [`ReportStore`](super::store::ReportStore); generation is split into an acquire step (lock
//! persisted before the backend call), the compile itself, and a completion
//! step applied to freshly loaded state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::ai::guardrail::CostGuardrail;
use crate::ai::prompt::{TEMPLATE_VERSION, TemplateCatalog};
use crate::ai::provider::{Backends, ProviderRegistry};
use crate::ai::router::ProviderRouter;
use crate::config::Config;
use crate::types::{PreconditionError, Result, SessionId, UserId, sha256_hex};

use super::analysis::AnalysisSnapshot;
use super::compiler::{CompileInput, CompileProgress, CompiledSection, SectionCompiler, SiblingSection};
use super::context::{AnalysisContextBuilder, ContextBuilder};
use super::document::{assemble_document, render_appendix};
use super::planner::{APPENDIX, SectionPlanner, fingerprint};
use super::store::{SessionRecord, SharedStore, session_not_found, update_with};
use super::types::{
    CompileStep, ReportState, ReportStatus, RevisionEntry, SectionRole, SectionState,
    SectionStatus,
};

const INTERRUPTED: &str = "generation interrupted";

/// Everything the compile step needs, captured while the lock is taken
struct Acquired {
    input: CompileInput,
    analysis: AnalysisSnapshot,
    cloud_calls: u32,
}

enum ReviewOutcome {
    Updated(SectionState),
    CapReached { max_revisions: u32 },
}

pub struct ReportService {
    store: SharedStore,
    compiler: SectionCompiler,
    context_builder: Arc<dyn ContextBuilder>,
    planner: SectionPlanner,
    max_revisions: u32,
    cost_ceiling: u32,
}

impl ReportService {
    pub fn new(store: SharedStore, router: ProviderRouter, config: &Config) -> Self {
        Self {
            store,
            compiler: SectionCompiler::new(
                router,
                TemplateCatalog::builtin(),
                config.compiler.clone(),
            ),
            context_builder: Arc::new(AnalysisContextBuilder),
            planner: SectionPlanner::new(),
            max_revisions: config.report.max_revisions,
            cost_ceiling: config.llm.cost_ceiling,
        }
    }

    /// Validate `config`, resolve both backends through `registry` and build the service
    pub fn from_config(
        config: &Config,
        registry: &ProviderRegistry,
        store: SharedStore,
    ) -> Result<Self> {
        config.validate()?;
        let backends = Backends::from_config(registry, &config.llm)?;
        let router = ProviderRouter::new(backends, config.llm.hybrid);
        Ok(Self::new(store, router, config))
    }

    pub fn with_context_builder(mut self, builder: Arc<dyn ContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Register or replace the analysis snapshot a session reports on
    pub fn put_analysis(
        &self,
        session: &SessionId,
        user: &UserId,
        analysis: AnalysisSnapshot,
    ) -> Result<()> {
        self.store.put_analysis(session, user, analysis)
    }

    // =========================================================================
    // Initialize
    // =========================================================================

    /// Plan the report on explicit confirmation
    ///
    /// Runs as one exclusive read-modify-write, so two concurrent calls cannot
    /// create divergent plans. A report that already left `idle` is returned
    /// unchanged.
    #[instrument(skip_all, fields(session = %session, user = %user))]
    pub async fn initialize(
        &self,
        session: &SessionId,
        user: &UserId,
        confirm: bool,
    ) -> Result<ReportState> {
        let planner = self.planner;
        let max_revisions = self.max_revisions;

        let (state, created) = update_with(self.store.as_ref(), session, user, |record| {
            if let Some(existing) = &record.report
                && existing.status != ReportStatus::Idle
            {
                return Ok((existing.clone(), false));
            }
            if !confirm {
                return Err(PreconditionError::NotConfirmed {
                    operation: "initialize",
                }
                .into());
            }

            let plan = planner.plan(&record.analysis);
            let order_hash = fingerprint(&plan);
            let state = ReportState::planned(plan, max_revisions, order_hash);
            record.report = Some(state.clone());
            Ok((state, true))
        })?;

        if created {
            info!(
                report_id = %state.report_id,
                sections = state.sections.len(),
                "Report planned"
            );
        }
        Ok(state)
    }

    // =========================================================================
    // Generate
    // =========================================================================

    /// Generate one section and move it to `review`
    ///
    /// The section lock is persisted before any backend call. A compile
    /// failure marks the section `error` and the report `failed`, then
    /// returns the compile error.
    #[instrument(skip_all, fields(session = %session, section = %section_id))]
    pub async fn generate_section(
        &self,
        session: &SessionId,
        user: &UserId,
        section_id: &str,
    ) -> Result<SectionState> {
        let lease_id = Uuid::new_v4();
        let acquired = update_with(self.store.as_ref(), session, user, |record| {
            self.acquire(record, section_id, lease_id)
        })?;
        let lease = SectionLease::new(
            Arc::clone(&self.store),
            session.clone(),
            user.clone(),
            section_id.to_string(),
            lease_id,
        );
        info!(role = ?acquired.input.descriptor.role, "Section generation started");

        let guardrail = CostGuardrail::resume(self.cost_ceiling, acquired.cloud_calls);
        let mut progress = CompileProgress::default();
        let outcome = if acquired.input.descriptor.is_generative() {
            self.compiler
                .compile(&acquired.input, &guardrail, &mut progress)
                .await
        } else {
            progress.last_step = Some(CompileStep::Render);
            Ok(CompiledSection::deterministic(
                render_appendix(&acquired.analysis),
                format!("{}@{}", APPENDIX, TEMPLATE_VERSION),
            ))
        };
        let charged = guardrail.calls().saturating_sub(acquired.cloud_calls);

        let section = update_with(self.store.as_ref(), session, user, |record| {
            complete(record, section_id, lease_id, &outcome, &progress, charged)
        })?;
        lease.disarm();

        match outcome {
            Ok(_) => {
                info!(revision = section.revision, "Section ready for review");
                Ok(section)
            }
            Err(err) => {
                error!(error = %err, "Section generation failed");
                Err(err)
            }
        }
    }

    /// Check every generation precondition and take the section lock
    fn acquire(
        &self,
        record: &mut SessionRecord,
        section_id: &str,
        lease_id: Uuid,
    ) -> Result<Acquired> {
        let analysis = record.analysis.clone();
        let report = record.report_mut()?;

        if report.locks.report
            || matches!(
                report.status,
                ReportStatus::Validating | ReportStatus::Finalizing | ReportStatus::Completed
            )
        {
            return Err(PreconditionError::locked(format!("report is {}", report.status)).into());
        }
        if !report.status.accepts_generation() {
            return Err(PreconditionError::invalid_status(
                "Report",
                "planned, in_progress or awaiting_final_review",
                report.status,
            )
            .into());
        }

        let section = report.require_section(section_id)?;
        if let Some(active) = report.generating_section() {
            let reason = if active.id() == section_id {
                format!("section '{}' is already generating", section_id)
            } else {
                format!("section '{}' is generating", active.id())
            };
            return Err(PreconditionError::locked(reason).into());
        }
        if report.locks.section_locked(section_id) {
            return Err(PreconditionError::locked(format!(
                "section '{}' holds a stale lock",
                section_id
            ))
            .into());
        }
        if section.status != SectionStatus::Planned {
            return Err(PreconditionError::invalid_status(
                format!("Section '{}'", section_id),
                "planned",
                section.status,
            )
            .into());
        }

        let unmet: Vec<String> = section
            .descriptor
            .depends_on
            .iter()
            .filter(|dep| !report.section(dep).is_some_and(SectionState::is_accepted))
            .cloned()
            .collect();
        if !unmet.is_empty() {
            return Err(PreconditionError::DependencyUnmet {
                section: section_id.to_string(),
                pending: unmet,
            }
            .into());
        }

        let descriptor = section.descriptor.clone();
        let siblings = if descriptor.role == SectionRole::Summary {
            let outstanding: Vec<String> = report
                .sections
                .iter()
                .filter(|s| s.id() != section_id && !s.is_accepted())
                .map(|s| s.id().to_string())
                .collect();
            if !outstanding.is_empty() {
                return Err(PreconditionError::DependencyUnmet {
                    section: section_id.to_string(),
                    pending: outstanding,
                }
                .into());
            }
            report
                .sections
                .iter()
                .filter(|s| s.descriptor.role == SectionRole::Analytic && s.is_accepted())
                .filter_map(|s| {
                    s.content.as_ref().map(|content| SiblingSection {
                        id: s.id().to_string(),
                        title: s.title().to_string(),
                        content: content.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let vars = if descriptor.is_generative() {
            self.context_builder
                .build_context(section_id, report, &analysis)?
        } else {
            BTreeMap::new()
        };

        let current_hash = fingerprint(&self.planner.plan(&analysis));
        if current_hash != report.order_hash {
            warn!(
                stored = %report.order_hash,
                current = %current_hash,
                "Section plan drifted since initialization"
            );
            report.audit(
                None,
                "Section plan drifted since initialization; the analysis data changed",
            );
        }

        let section = report.require_section_mut(section_id)?;
        section.status = SectionStatus::Generating;
        section.error_reason = None;
        section.lease = Some(lease_id);
        report.locks.set_section(section_id, true);
        report.metrics.generation_count += 1;
        report.record_step(section_id, CompileStep::Context);
        report.touch();

        Ok(Acquired {
            input: CompileInput {
                descriptor,
                vars,
                siblings,
            },
            analysis,
            cloud_calls: report.metrics.cloud_calls,
        })
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Accept or reject a section in `review`
    ///
    /// Rejection below the revision cap sends the section back to `planned`
    /// with the feedback attached to its latest revision. Rejection at the cap
    /// marks the section `error` and the report `failed`.
    #[instrument(skip_all, fields(session = %session, section = %section_id, accepted = accepted))]
    pub async fn submit_review(
        &self,
        session: &SessionId,
        user: &UserId,
        section_id: &str,
        accepted: bool,
        feedback: Option<&str>,
    ) -> Result<SectionState> {
        let feedback = feedback
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        let outcome = update_with(self.store.as_ref(), session, user, |record| {
            let report = record.report_mut()?;
            if report.locks.report
                || matches!(
                    report.status,
                    ReportStatus::Validating | ReportStatus::Finalizing | ReportStatus::Completed
                )
            {
                return Err(
                    PreconditionError::locked(format!("report is {}", report.status)).into(),
                );
            }

            let section = report.require_section(section_id)?;
            if section.status != SectionStatus::Review {
                return Err(PreconditionError::invalid_status(
                    format!("Section '{}'", section_id),
                    "review",
                    section.status,
                )
                .into());
            }
            let (revision, max_revisions) = (section.revision, section.max_revisions);

            let section = report.require_section_mut(section_id)?;
            if let Some(latest) = section.history.last_mut()
                && feedback.is_some()
            {
                latest.feedback = feedback.clone();
            }
            if feedback.is_some() {
                section.last_feedback = feedback.clone();
            }

            if accepted {
                section.status = SectionStatus::Accepted;
                let accepted_section = section.clone();
                if report.all_accepted() {
                    report.status = ReportStatus::AwaitingFinalReview;
                    info!("All sections accepted");
                }
                report.touch();
                return Ok(ReviewOutcome::Updated(accepted_section));
            }

            if revision < max_revisions {
                section.status = SectionStatus::Planned;
                section.content = None;
                let planned = section.clone();
                report.touch();
                return Ok(ReviewOutcome::Updated(planned));
            }

            section.status = SectionStatus::Error;
            section.error_reason = Some(format!(
                "rejected at revision cap ({})",
                max_revisions
            ));
            report.status = ReportStatus::Failed;
            report.audit(
                Some(section_id),
                format!("Rejected at revision {} of {}", revision, max_revisions),
            );
            report.touch();
            Ok(ReviewOutcome::CapReached { max_revisions })
        })?;

        match outcome {
            ReviewOutcome::Updated(section) => {
                info!(status = %section.status, revision = section.revision, "Review recorded");
                Ok(section)
            }
            ReviewOutcome::CapReached { max_revisions } => {
                warn!(max_revisions, "Revision cap reached, section marked as error");
                Err(PreconditionError::RevisionCapReached {
                    section: section_id.to_string(),
                    max_revisions,
                }
                .into())
            }
        }
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Return a section to a fresh `planned` state
    ///
    /// Without `force` only `planned`, `review` and `error` sections may be
    /// reset. A forced reset also releases a held lock and lets a `failed`
    /// report recover once no section remains in `error`.
    #[instrument(skip_all, fields(session = %session, section = %section_id))]
    pub async fn reset_section(
        &self,
        session: &SessionId,
        user: &UserId,
        section_id: &str,
        force: bool,
    ) -> Result<SectionState> {
        update_with(self.store.as_ref(), session, user, |record| {
            let report = record.report_mut()?;
            if report.status == ReportStatus::Completed {
                return Err(PreconditionError::invalid_status(
                    "Report",
                    "not completed",
                    report.status,
                )
                .into());
            }
            if report.locks.report {
                return Err(PreconditionError::locked("report is locked for finalization").into());
            }

            let status = report.require_section(section_id)?.status;
            if !force {
                match status {
                    SectionStatus::Generating => {
                        return Err(PreconditionError::locked(format!(
                            "section '{}' is generating",
                            section_id
                        ))
                        .into());
                    }
                    SectionStatus::Accepted => {
                        return Err(PreconditionError::invalid_status(
                            format!("Section '{}'", section_id),
                            "planned, review or error",
                            status,
                        )
                        .into());
                    }
                    _ => {}
                }
            } else if status == SectionStatus::Generating {
                warn!("Force-resetting a section that is still generating");
            }

            let section = report.require_section_mut(section_id)?;
            section.reset();
            let reset = section.clone();
            report.locks.set_section(section_id, false);

            match report.status {
                ReportStatus::Failed if force && !report.has_errors() => {
                    report.status = ReportStatus::InProgress;
                    report.audit(Some(section_id), "Report recovered by forced reset");
                    info!("Report recovered from failed");
                }
                ReportStatus::AwaitingFinalReview => {
                    report.status = ReportStatus::InProgress;
                }
                _ => {}
            }
            report.touch();
            Ok(reset)
        })
    }

    // =========================================================================
    // Finalize
    // =========================================================================

    /// Validate, lock and assemble the report
    ///
    /// Each stage is persisted before the next begins. If any section is not
    /// accepted the report ends `failed` and the pending ids are returned.
    #[instrument(skip_all, fields(session = %session, user = %user))]
    pub async fn finalize(
        &self,
        session: &SessionId,
        user: &UserId,
        confirm: bool,
    ) -> Result<ReportState> {
        if !confirm {
            return Err(PreconditionError::NotConfirmed {
                operation: "finalize",
            }
            .into());
        }

        update_with(self.store.as_ref(), session, user, |record| {
            let report = record.report_mut()?;
            if report.status == ReportStatus::Completed {
                return Err(PreconditionError::invalid_status(
                    "Report",
                    "awaiting_final_review",
                    report.status,
                )
                .into());
            }
            if report.locks.report {
                return Err(PreconditionError::locked("report is already finalizing").into());
            }
            if let Some(active) = report.generating_section() {
                return Err(PreconditionError::locked(format!(
                    "section '{}' is generating",
                    active.id()
                ))
                .into());
            }
            report.confirmed_finalize = true;
            report.locks.report = true;
            report.status = ReportStatus::Validating;
            report.touch();
            Ok(())
        })?;

        let pending = update_with(self.store.as_ref(), session, user, |record| {
            let report = record.report_mut()?;
            let pending = report.pending_sections();
            if pending.is_empty() {
                report.status = ReportStatus::Finalizing;
            } else {
                report.status = ReportStatus::Failed;
                report.locks.report = false;
                report.audit(
                    None,
                    format!("Finalization refused; not accepted: {}", pending.join(", ")),
                );
            }
            report.touch();
            Ok(pending)
        })?;

        if !pending.is_empty() {
            warn!(pending = ?pending, "Finalization failed validation");
            return Err(PreconditionError::Incomplete { pending }.into());
        }

        let state = update_with(self.store.as_ref(), session, user, |record| {
            let document = assemble_document(record.report()?, &record.analysis);
            let report = record.report_mut()?;
            report.final_document = Some(document);
            report.status = ReportStatus::Completed;
            report.touch();
            Ok(report.clone())
        })?;

        info!(report_id = %state.report_id, "Report completed");
        Ok(state)
    }

    // =========================================================================
    // Read
    // =========================================================================

    pub async fn get_state(&self, session: &SessionId, user: &UserId) -> Result<ReportState> {
        self.store
            .load(session, user)?
            .ok_or_else(|| session_not_found(session))?
            .report
            .ok_or_else(|| PreconditionError::not_found("Report").into())
    }
}

/// Apply a compile outcome to fresh state
///
/// Refuses when the section no longer holds this lease (it was force-reset
/// while the backend call was running); the result is then discarded.
fn complete(
    record: &mut SessionRecord,
    section_id: &str,
    lease_id: Uuid,
    outcome: &Result<CompiledSection>,
    progress: &CompileProgress,
    charged: u32,
) -> Result<SectionState> {
    let report = record.report_mut()?;
    let section = report.require_section(section_id)?;
    if section.status != SectionStatus::Generating || section.lease != Some(lease_id) {
        return Err(PreconditionError::invalid_status(
            format!("Section '{}'", section_id),
            "generating",
            section.status,
        )
        .into());
    }

    report.metrics.cloud_calls += charged;
    for warning in &progress.log.warnings {
        report.audit(Some(section_id), warning.clone());
    }
    report.locks.set_section(section_id, false);

    match outcome {
        Ok(compiled) => {
            let section = report.require_section_mut(section_id)?;
            section.revision += 1;
            section.history.push(RevisionEntry {
                revision: section.revision,
                content: compiled.content.clone(),
                content_hash: sha256_hex(&compiled.content),
                feedback: None,
                created_at: Utc::now(),
                template_version: compiled.template_version.clone(),
                model: compiled.model.clone(),
            });
            section.content = Some(compiled.content.clone());
            section.scores = Some(compiled.scores);
            section.status = SectionStatus::Review;
            section.error_reason = None;
            section.lease = None;

            report.metrics.total_revisions += 1;
            if report.status == ReportStatus::Planned {
                report.status = ReportStatus::InProgress;
            }
            report.record_step(section_id, CompileStep::Complete);
        }
        Err(err) => {
            let section = report.require_section_mut(section_id)?;
            section.status = SectionStatus::Error;
            section.error_reason = Some(err.to_string());
            section.lease = None;

            report.status = ReportStatus::Failed;
            if let Some(step) = progress.last_step {
                report.record_step(section_id, step);
            }
        }
    }
    report.touch();
    Ok(report.require_section(section_id)?.clone())
}

// =============================================================================
// Section Lease
// =============================================================================

/// Releases a section lock that completion never got to persist
///
/// Armed from the moment the lock is stored. If the generate future is
/// dropped or unwinds before [`SectionLease::disarm`], the section is marked
/// `error` and the report `failed`, but only while it still holds this lease.
struct SectionLease {
    store: SharedStore,
    session: SessionId,
    user: UserId,
    section_id: String,
    lease_id: Uuid,
    armed: bool,
}

impl SectionLease {
    fn new(
        store: SharedStore,
        session: SessionId,
        user: UserId,
        section_id: String,
        lease_id: Uuid,
    ) -> Self {
        Self {
            store,
            session,
            user,
            section_id,
            lease_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    fn release(&self) -> Result<bool> {
        update_with(
            self.store.as_ref(),
            &self.session,
            &self.user,
            |record: &mut SessionRecord| -> Result<bool> {
                let report = record.report_mut()?;
                let held = report.section(&self.section_id).is_some_and(|s| {
                    s.status == SectionStatus::Generating && s.lease == Some(self.lease_id)
                });
                if !held {
                    return Ok(false);
                }

                if let Some(section) = report.section_mut(&self.section_id) {
                    section.status = SectionStatus::Error;
                    section.error_reason = Some(INTERRUPTED.to_string());
                    section.lease = None;
                }
                report.locks.set_section(&self.section_id, false);
                report.status = ReportStatus::Failed;
                report.touch();
                Ok(true)
            },
        )
    }
}

impl Drop for SectionLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.release() {
            Ok(true) => warn!(section = %self.section_id, "Released interrupted section lock"),
            Ok(false) => {}
            Err(e) => error!(section = %self.section_id, error = %e, "Failed to release section lock"),
        }
    }
}

impl std::fmt::Debug for ReportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportService")
            .field("max_revisions", &self.max_revisions)
            .field("cost_ceiling", &self.cost_ceiling)
            .finish_non_exhaustive()
    }
}
