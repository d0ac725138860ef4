//! Template Catalog
//!
//! Static lookup from (phase, template key) to a prompt skeleton with
//! `{placeholder}` names and a system instruction.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::PromptBuilder;
use crate::ai::router::Phase;
use crate::types::{DossierError, Result};

/// Bumped whenever a skeleton or system instruction changes meaning
pub const TEMPLATE_VERSION: u32 = 3;

/// Per-section-type catalog entry
#[derive(Debug, Clone, Copy)]
pub struct SectionProfile {
    pub key: &'static str,
    pub target_words: usize,
    /// Draft on the primary backend even in hybrid mode
    pub reasoning_heavy: bool,
    /// Rendered from data without any generation call
    pub generative: bool,
    pub focus: &'static str,
}

const PROFILES: &[SectionProfile] = &[
    SectionProfile {
        key: "executive_summary",
        target_words: 250,
        reasoning_heavy: true,
        generative: true,
        focus: "the problem addressed, the main findings and their implications",
    },
    SectionProfile {
        key: "trend_analysis",
        target_words: 900,
        reasoning_heavy: false,
        generative: true,
        focus: "how publication activity and key topics evolve over time",
    },
    SectionProfile {
        key: "research_gaps",
        target_words: 800,
        reasoning_heavy: true,
        generative: true,
        focus: "under-explored questions and the evidence that they are open",
    },
    SectionProfile {
        key: "network_analysis",
        target_words: 700,
        reasoning_heavy: false,
        generative: true,
        focus: "the structure of the collaboration network and its central actors",
    },
    SectionProfile {
        key: "limitations",
        target_words: 500,
        reasoning_heavy: true,
        generative: true,
        focus: "the limits of the underlying data and of the analysis itself",
    },
    SectionProfile {
        key: "appendix",
        target_words: 0,
        reasoning_heavy: false,
        generative: false,
        focus: "the source documents the report is based on",
    },
];

const DRAFT_SKELETON: &str = "\
Write the \"{title}\" section of a research report.

Section focus: {section_focus}
Tone: {tone}
Depth: {depth}
Research focus: {focus}
Target length: about {target_words} words.

## Permitted facts
{anchors}

## Analysis context
{context}

## Reviewer feedback on the previous revision
{reviewer_feedback}

Use only the permitted facts above. Return the section body only, without a heading.";

const EXPAND_SKELETON: &str = "\
The draft of the \"{title}\" section below has {current_words} words; the target is about {target_words} words.
Elaborate on and clarify what the draft already says.

## Permitted facts
{anchors}

## Current draft
{draft}

Return the complete expanded section body without a heading.";

const REFINE_SKELETON: &str = "\
Polish the style of the \"{title}\" section below. Preserve its meaning, its facts and its markdown structure.

{draft}

Return only the revised section body.";

const ABSTRACT_SKELETON: &str = "\
Write the \"{title}\" of a research report in about {target_words} words, using only the material extracted from its accepted sections.
Tone: {tone}

{inputs}

## Reviewer feedback on the previous revision
{reviewer_feedback}

Return one or two paragraphs without a heading.";

/// A resolved (phase, template key) entry ready to render
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub phase: Phase,
    pub profile: SectionProfile,
    pub skeleton: &'static str,
    pub system: String,
}

impl PromptTemplate {
    /// Render the skeleton; profile values fill placeholders the caller leaves out
    pub fn render(&self, vars: &BTreeMap<String, String>) -> Result<String> {
        let mut merged = BTreeMap::new();
        merged.insert("section_focus".to_string(), self.profile.focus.to_string());
        merged.insert(
            "target_words".to_string(),
            self.profile.target_words.to_string(),
        );
        merged.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        render(self.skeleton, &merged)
    }

    /// Provenance tag recorded on revision history
    pub fn version_tag(&self) -> String {
        format!("{}@{}", self.profile.key, TEMPLATE_VERSION)
    }
}

/// Lookup table of section profiles and phase skeletons
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    profiles: Vec<SectionProfile>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        Self {
            profiles: PROFILES.to_vec(),
        }
    }

    pub fn profile(&self, key: &str) -> Result<&SectionProfile> {
        self.profiles
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| DossierError::Config(format!("Unknown template key: {}", key)))
    }

    pub fn lookup(&self, phase: Phase, key: &str) -> Result<PromptTemplate> {
        let profile = *self.profile(key)?;
        if !profile.generative {
            return Err(DossierError::Config(format!(
                "Template '{}' is rendered from data and has no {} prompt",
                key, phase
            )));
        }

        let skeleton = match phase {
            Phase::Draft => DRAFT_SKELETON,
            Phase::Expand => EXPAND_SKELETON,
            Phase::Refine => REFINE_SKELETON,
            Phase::Abstract => ABSTRACT_SKELETON,
        };

        Ok(PromptTemplate {
            phase,
            profile,
            skeleton,
            system: system_instruction(phase, &profile),
        })
    }
}

fn system_instruction(phase: Phase, profile: &SectionProfile) -> String {
    let builder = PromptBuilder::new().role(
        "research analyst",
        "evidence-bound scientific report writing",
    );

    let builder = match phase {
        Phase::Draft => builder.objectives(vec![
            "Write a well-structured first version of the section",
            "Use ONLY the permitted facts supplied in the request",
            "Address any reviewer feedback supplied in the request",
        ]),
        Phase::Expand => builder.objectives(vec![
            "Lengthen the draft by clarifying and elaborating its existing points",
            "Never introduce facts, figures or sources that are not already present",
        ]),
        Phase::Refine => builder.objectives(vec![
            "Improve clarity, flow and register only",
            "Keep every fact, number, list and table exactly as given",
            "Add no new information",
        ]),
        Phase::Abstract => builder.objectives(vec![
            "Synthesize the supplied section material into a concise summary",
            "Mention only findings present in that material",
        ]),
    };

    builder
        .focus(
            profile.focus,
            vec![
                "Do NOT invent citations, authors, statistics or examples",
                "Do NOT describe the document itself or what the section will do",
                "Do NOT include a section heading",
            ],
        )
        .anti_patterns(
            vec![
                "In this section, we will discuss the trends.",
                "According to Smith et al. (2020), ...",
            ],
            vec!["Publication output grew steadily across the observed period."],
        )
        .build()
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{([a-z_]+)\}").ok())
        .as_ref()
}

/// Substitute `{name}` placeholders in `skeleton` from `vars`
///
/// Values are inserted verbatim and never rescanned. Any placeholder with no
/// value fails the whole render.
pub fn render(skeleton: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let pattern = placeholder_pattern()
        .ok_or_else(|| DossierError::Config("Invalid placeholder pattern".to_string()))?;

    let mut output = String::with_capacity(skeleton.len());
    let mut missing = Vec::new();
    let mut last = 0;

    for caps in pattern.captures_iter(skeleton) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        output.push_str(&skeleton[last..whole.start()]);
        match vars.get(name.as_str()) {
            Some(value) => output.push_str(value),
            None => missing.push(name.as_str().to_string()),
        }
        last = whole.end();
    }
    output.push_str(&skeleton[last..]);

    if !missing.is_empty() {
        missing.dedup();
        return Err(DossierError::Config(format!(
            "Template placeholders without values: {}",
            missing.join(", ")
        )));
    }
    Ok(output)
}
