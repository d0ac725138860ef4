//! Deterministic Rendering
//!
//! The evidence appendix and the final assembled report are produced from
//! data alone, without any generation call.

use super::analysis::AnalysisSnapshot;
use super::outline::Outline;
use super::types::ReportState;

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Markdown table of the source documents behind the analysis
pub fn render_appendix(analysis: &AnalysisSnapshot) -> String {
    let documents = analysis.documents.as_deref().unwrap_or_default();
    if documents.is_empty() {
        return "No source documents were selected for this report.".to_string();
    }

    let mut out = format!(
        "The analysis is based on {} source document{}.\n\n",
        documents.len(),
        if documents.len() == 1 { "" } else { "s" }
    );
    out.push_str("| # | Title | Authors | Year | Venue |\n|---|---|---|---|---|\n");

    for (idx, doc) in documents.iter().enumerate() {
        let title = match &doc.url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                format!("[{}]({})", cell(&doc.title), url)
            }
            _ => cell(&doc.title),
        };
        let authors = match doc.authors.len() {
            0 => "n/a".to_string(),
            1..=3 => doc.authors.join(", "),
            _ => format!("{} et al.", doc.authors[0]),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            idx + 1,
            title,
            cell(&authors),
            doc.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into()),
            cell(doc.venue.as_deref().unwrap_or("n/a")),
        ));
    }

    out.trim_end().to_string()
}

/// Full report markdown: title, then every section in planned order
///
/// Section bodies have their own headings demoted below the section title.
pub fn assemble_document(report: &ReportState, analysis: &AnalysisSnapshot) -> String {
    let title = if analysis.topic.trim().is_empty() {
        "Research Report".to_string()
    } else {
        format!("Research Report: {}", analysis.topic.trim())
    };

    let mut out = format!("# {}\n", title);
    for section in &report.sections {
        out.push_str(&format!("\n## {}\n\n", section.title()));
        let body = section.content.as_deref().unwrap_or_default();
        out.push_str(Outline::parse(body).render(2).trim());
        out.push('\n');
    }
    out
}
