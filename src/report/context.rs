//! Section Context Builder
//!
//! Converts the analysis snapshot and current report state into the
//! template variables for one section: tone, depth, focus, rendered data
//! tables, accepted dependency excerpts and the latest reviewer feedback.

use std::collections::BTreeMap;

use crate::constants::report::MAX_TABLE_ROWS;
use crate::types::{Result, truncate_words};

use super::analysis::{AnalysisSnapshot, keys};
use super::types::{ReportState, SectionStatus};

const DEFAULT_TONE: &str = "formal academic";
const DEFAULT_DEPTH: &str = "detailed";
const DEPENDENCY_EXCERPT_WORDS: usize = 80;
const NO_FEEDBACK: &str = "None.";

/// Builds per-section template variables
pub trait ContextBuilder: Send + Sync {
    fn build_context(
        &self,
        section_id: &str,
        report: &ReportState,
        analysis: &AnalysisSnapshot,
    ) -> Result<BTreeMap<String, String>>;
}

/// Default builder rendering the typed analysis artifacts as markdown
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisContextBuilder;

impl ContextBuilder for AnalysisContextBuilder {
    fn build_context(
        &self,
        section_id: &str,
        report: &ReportState,
        analysis: &AnalysisSnapshot,
    ) -> Result<BTreeMap<String, String>> {
        let section = report.require_section(section_id)?;
        let prefs = &analysis.preferences;

        let mut blocks: Vec<String> = section
            .descriptor
            .required_data_keys
            .iter()
            .filter_map(|key| render_data(key, analysis))
            .collect();

        for dep_id in &section.descriptor.depends_on {
            if let Some(dep) = report.section(dep_id)
                && dep.status == SectionStatus::Accepted
                && let Some(content) = &dep.content
            {
                blocks.push(format!(
                    "### From {}\n{}",
                    dep.title(),
                    truncate_words(content, DEPENDENCY_EXCERPT_WORDS)
                ));
            }
        }

        let context = if blocks.is_empty() {
            format!("Report topic: {}", analysis.topic)
        } else {
            format!("Report topic: {}\n\n{}", analysis.topic, blocks.join("\n\n"))
        };

        let mut vars = BTreeMap::new();
        vars.insert("title".to_string(), section.title().to_string());
        vars.insert(
            "tone".to_string(),
            prefs.tone.clone().unwrap_or_else(|| DEFAULT_TONE.to_string()),
        );
        vars.insert(
            "depth".to_string(),
            prefs.depth.clone().unwrap_or_else(|| DEFAULT_DEPTH.to_string()),
        );
        vars.insert(
            "focus".to_string(),
            prefs.focus.clone().unwrap_or_else(|| analysis.topic.clone()),
        );
        vars.insert("context".to_string(), context);
        vars.insert(
            "reviewer_feedback".to_string(),
            section
                .last_feedback
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| NO_FEEDBACK.to_string()),
        );
        Ok(vars)
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn render_data(key: &str, analysis: &AnalysisSnapshot) -> Option<String> {
    match key {
        keys::TRENDS => {
            let trends = analysis.trends.as_ref()?;
            let mut out = String::new();
            if !trends.yearly_counts.is_empty() {
                out.push_str("### Publications per year\n| Year | Publications |\n|---|---|\n");
                for (year, count) in trends.yearly_counts.iter().take(MAX_TABLE_ROWS) {
                    out.push_str(&format!("| {} | {} |\n", year, count));
                }
            }
            if !trends.key_trends.is_empty() {
                out.push_str("### Key trends\n");
                for trend in trends.key_trends.iter().take(MAX_TABLE_ROWS) {
                    let note = trend
                        .note
                        .as_deref()
                        .map(|n| format!(" ({})", n))
                        .unwrap_or_default();
                    out.push_str(&format!(
                        "- {}: {:+.0}% growth{}\n",
                        trend.term,
                        trend.growth * 100.0,
                        note
                    ));
                }
            }
            Some(out.trim_end().to_string())
        }
        keys::GAPS => {
            let gaps = analysis.gaps.as_ref()?;
            let mut out = String::from("### Research gaps\n");
            for gap in gaps.iter().take(MAX_TABLE_ROWS) {
                match gap.score {
                    Some(score) => out.push_str(&format!(
                        "- {}: {} (score {:.2})\n",
                        gap.topic, gap.evidence, score
                    )),
                    None => out.push_str(&format!("- {}: {}\n", gap.topic, gap.evidence)),
                }
            }
            Some(out.trim_end().to_string())
        }
        keys::GRAPH => {
            let graph = analysis.graph.as_ref()?;
            let mut out = format!(
                "### Collaboration network\n- Authors: {}\n- Co-authorship links: {}\n",
                graph.nodes.len(),
                graph.edges.len()
            );
            for (name, value) in &graph.metrics {
                out.push_str(&format!("- {}: {:.3}\n", name, value));
            }
            let central = graph.central_nodes(MAX_TABLE_ROWS.min(10));
            if !central.is_empty() {
                out.push_str("### Most central authors\n| Author | Centrality |\n|---|---|\n");
                for node in central {
                    let centrality = node
                        .centrality
                        .map(|c| format!("{:.3}", c))
                        .unwrap_or_else(|| "n/a".to_string());
                    out.push_str(&format!("| {} | {} |\n", cell(&node.label), centrality));
                }
            }
            Some(out.trim_end().to_string())
        }
        keys::DOCUMENTS => {
            let documents = analysis.documents.as_ref()?;
            let years: Vec<i32> = documents.iter().filter_map(|d| d.year).collect();
            let mut out = format!("### Source corpus\n- Documents: {}\n", documents.len());
            if let (Some(min), Some(max)) = (years.iter().min(), years.iter().max()) {
                out.push_str(&format!("- Publication years: {} to {}\n", min, max));
            }
            let undated = documents.len() - years.len();
            if undated > 0 {
                out.push_str(&format!("- Documents without a year: {}\n", undated));
            }
            for doc in documents.iter().take(MAX_TABLE_ROWS) {
                let year = doc.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
                out.push_str(&format!("- {} ({})\n", doc.title, year));
            }
            Some(out.trim_end().to_string())
        }
        _ => None,
    }
}
