//! Analysis Snapshot
//!
//! Typed view of the previously computed analysis artifacts a report is
//! compiled from. Each artifact is optional; the planner includes a section
//! only when the artifacts it needs are present.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Data keys the planner can require
pub mod keys {
    pub const TRENDS: &str = "trends";
    pub const GAPS: &str = "gaps";
    pub const GRAPH: &str = "graph";
    pub const DOCUMENTS: &str = "documents";
}

/// Writing preferences chosen by the user for the whole report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPreferences {
    pub tone: Option<String>,
    pub depth: Option<String>,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTrend {
    pub term: String,
    /// Relative growth over the observed period, e.g. 0.35 for +35%
    pub growth: f64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendData {
    pub yearly_counts: BTreeMap<i32, u32>,
    pub key_trends: Vec<KeyTrend>,
}

impl TrendData {
    pub fn is_empty(&self) -> bool {
        self.yearly_counts.is_empty() && self.key_trends.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchGap {
    pub topic: String,
    pub evidence: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub centrality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Co-authorship graph metrics computed upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metrics: BTreeMap<String, f64>,
}

impl CollaborationGraph {
    pub fn has_edges(&self) -> bool {
        !self.edges.is_empty()
    }

    /// Nodes ordered by descending centrality, then label
    pub fn central_nodes(&self, limit: usize) -> Vec<&GraphNode> {
        let mut nodes: Vec<&GraphNode> = self.nodes.iter().collect();
        nodes.sort_by(|a, b| {
            b.centrality
                .unwrap_or(0.0)
                .total_cmp(&a.centrality.unwrap_or(0.0))
                .then_with(|| a.label.cmp(&b.label))
        });
        nodes.truncate(limit);
        nodes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Everything known about a research session when a report is compiled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSnapshot {
    pub topic: String,
    pub preferences: ReportPreferences,
    pub trends: Option<TrendData>,
    pub gaps: Option<Vec<ResearchGap>>,
    pub graph: Option<CollaborationGraph>,
    pub documents: Option<Vec<SourceDocument>>,
}

impl AnalysisSnapshot {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_trends(mut self, trends: TrendData) -> Self {
        self.trends = Some(trends);
        self
    }

    pub fn with_gaps(mut self, gaps: Vec<ResearchGap>) -> Self {
        self.gaps = Some(gaps);
        self
    }

    pub fn with_graph(mut self, graph: CollaborationGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_documents(mut self, documents: Vec<SourceDocument>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_preferences(mut self, preferences: ReportPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Whether a non-empty artifact exists for `key`
    pub fn has_key(&self, key: &str) -> bool {
        match key {
            keys::TRENDS => self.trends.as_ref().is_some_and(|t| !t.is_empty()),
            keys::GAPS => self.gaps.as_ref().is_some_and(|g| !g.is_empty()),
            keys::GRAPH => self.graph.as_ref().is_some_and(|g| !g.nodes.is_empty()),
            keys::DOCUMENTS => self.documents.as_ref().is_some_and(|d| !d.is_empty()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_key_requires_non_empty_artifacts() {
        let snapshot = AnalysisSnapshot::new("solid-state batteries")
            .with_trends(TrendData::default())
            .with_gaps(vec![ResearchGap {
                topic: "recycling".into(),
                evidence: "3 papers".into(),
                score: None,
            }]);

        assert!(!snapshot.has_key(keys::TRENDS));
        assert!(snapshot.has_key(keys::GAPS));
        assert!(!snapshot.has_key(keys::GRAPH));
        assert!(!snapshot.has_key("unknown"));
    }

    #[test]
    fn test_central_nodes_order() {
        let graph = CollaborationGraph {
            nodes: vec![
                GraphNode { id: "a".into(), label: "Ahn".into(), centrality: Some(0.2) },
                GraphNode { id: "b".into(), label: "Baker".into(), centrality: Some(0.9) },
                GraphNode { id: "c".into(), label: "Chen".into(), centrality: None },
            ],
            ..Default::default()
        };
        let top: Vec<_> = graph.central_nodes(2).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(top, vec!["b", "a"]);
    }

    #[test]
    fn test_snapshot_deserializes_with_missing_fields() {
        let snapshot: AnalysisSnapshot =
            serde_json::from_str(r#"{"topic": "graphene", "graph": {"nodes": [], "edges": []}}"#)
                .unwrap();
        assert_eq!(snapshot.topic, "graphene");
        assert!(snapshot.graph.is_some());
        assert!(snapshot.trends.is_none());
    }
}
