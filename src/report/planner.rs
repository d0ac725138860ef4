//! Section Planner
//!
//! Derives the ordered section list for a report from the analysis
//! snapshot. The output is a pure function of the snapshot, so its
//! structural fingerprint can be compared across sessions to detect drift.

use crate::types::sha256_hex;

use super::analysis::{AnalysisSnapshot, keys};
use super::types::{SectionDescriptor, SectionRole};

pub const EXECUTIVE_SUMMARY: &str = "executive_summary";
pub const APPENDIX: &str = "appendix";

struct AnalyticSection {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    required: &'static [&'static str],
}

/// Analytic sections in report order
const ANALYTIC_SECTIONS: &[AnalyticSection] = &[
    AnalyticSection {
        id: "trend_analysis",
        title: "Trend Analysis",
        description: "Publication volume over time and the key emerging topics",
        required: &[keys::TRENDS],
    },
    AnalyticSection {
        id: "research_gaps",
        title: "Research Gaps",
        description: "Open questions supported by the gap analysis",
        required: &[keys::GAPS],
    },
    AnalyticSection {
        id: "network_analysis",
        title: "Collaboration Network",
        description: "Structure of the co-authorship network and its central actors",
        required: &[keys::GRAPH],
    },
    AnalyticSection {
        id: "limitations",
        title: "Limitations",
        description: "Coverage and methodological limits of the source corpus",
        required: &[keys::DOCUMENTS],
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SectionPlanner;

impl SectionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Ordered descriptors: summary first, included analytic sections, appendix last
    pub fn plan(&self, snapshot: &AnalysisSnapshot) -> Vec<SectionDescriptor> {
        let analytic: Vec<SectionDescriptor> = ANALYTIC_SECTIONS
            .iter()
            .filter(|section| Self::is_applicable(section, snapshot))
            .map(|section| SectionDescriptor {
                id: section.id.to_string(),
                title: section.title.to_string(),
                description: section.description.to_string(),
                required_data_keys: section.required.iter().map(|k| k.to_string()).collect(),
                template_key: section.id.to_string(),
                depends_on: Vec::new(),
                role: SectionRole::Analytic,
            })
            .collect();

        let summary = SectionDescriptor {
            id: EXECUTIVE_SUMMARY.to_string(),
            title: "Executive Summary".to_string(),
            description: "Synthesis of the accepted analytic sections".to_string(),
            required_data_keys: Vec::new(),
            template_key: EXECUTIVE_SUMMARY.to_string(),
            depends_on: analytic.iter().map(|d| d.id.clone()).collect(),
            role: SectionRole::Summary,
        };

        let appendix = SectionDescriptor {
            id: APPENDIX.to_string(),
            title: "Evidence Appendix".to_string(),
            description: "Source documents behind the analysis".to_string(),
            required_data_keys: Vec::new(),
            template_key: APPENDIX.to_string(),
            depends_on: Vec::new(),
            role: SectionRole::Appendix,
        };

        let mut plan = Vec::with_capacity(analytic.len() + 2);
        plan.push(summary);
        plan.extend(analytic);
        plan.push(appendix);
        plan
    }

    fn is_applicable(section: &AnalyticSection, snapshot: &AnalysisSnapshot) -> bool {
        if !section.required.iter().all(|key| snapshot.has_key(key)) {
            return false;
        }
        if section.required.contains(&keys::GRAPH) {
            return snapshot.graph.as_ref().is_some_and(|g| g.has_edges());
        }
        true
    }
}

/// Structural fingerprint over ordered (id, title, dependency-set) triples
pub fn fingerprint(descriptors: &[SectionDescriptor]) -> String {
    let lines: Vec<String> = descriptors
        .iter()
        .map(|d| {
            let mut deps: Vec<&str> = d.depends_on.iter().map(String::as_str).collect();
            deps.sort_unstable();
            format!("{}|{}|{}", d.id, d.title, deps.join(","))
        })
        .collect();
    sha256_hex(&lines.join("\n"))
}
