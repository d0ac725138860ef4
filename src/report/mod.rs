//! Interactive Report Compilation
//!
//! Section planning, the per-report state machine and the multi-pass section
//! compiler, plus the state store boundary they persist through.

pub mod analysis;
pub mod compiler;
pub mod context;
pub mod document;
pub mod outline;
pub mod planner;
pub mod service;
pub mod store;
pub mod types;

pub use analysis::{
    AnalysisSnapshot, CollaborationGraph, GraphEdge, GraphNode, KeyTrend, ReportPreferences,
    ResearchGap, SourceDocument, TrendData,
};
pub use compiler::{
    CompileInput, CompileProgress, CompiledSection, ExpansionTrace, SectionCompiler,
    SiblingSection, StopReason,
};
pub use context::{AnalysisContextBuilder, ContextBuilder};
pub use document::{assemble_document, render_appendix};
pub use outline::{Outline, OutlineNode};
pub use planner::{APPENDIX, EXECUTIVE_SUMMARY, SectionPlanner, fingerprint};
pub use service::ReportService;
pub use store::{MemoryReportStore, ReportStore, SessionRecord, SharedStore, update_with};
pub use types::{
    AuditEntry, CompileStep, LastStep, Locks, QualityScores, ReportMetrics, ReportState,
    ReportStatus, RevisionEntry, SectionDescriptor, SectionRole, SectionState, SectionStatus,
};
