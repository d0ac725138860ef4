//! Section Compiler
//!
//! Multi-pass generation of one section body:
//!
//! 1. **Context & anchors**: short fact lines from the section context,
//!    bounded by a character budget, are the only facts the prompts allow
//! 2. **Draft**: skeleton at the template's target length
//! 3. **Expand**: at most `max_expansion_passes` elaboration passes, stopped
//!    early on repetition or diminishing word growth
//! 4. **Refine**: style-only pass on the primary backend
//! 5. **Sanitize**: strip meta-commentary and a leading heading
//!
//! The summary section takes a single abstract pass over material extracted
//! from its accepted siblings instead. Every result passes the markdown
//! safety gate before it is returned.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use crate::ai::guardrail::CostGuardrail;
use crate::ai::prompt::{PromptTemplate, TemplateCatalog};
use crate::ai::provider::GenerationRequest;
use crate::ai::router::{Phase, ProviderRouter, RoutingLog};
use crate::ai::validation::MarkdownValidator;
use crate::config::CompilerConfig;
use crate::constants::compiler::{ANCHOR_MAX_LINE_CHARS, REPETITION_WINDOW_WORDS};
use crate::types::{DossierError, Result, truncate_words, word_count};

use super::outline::Outline;
use super::types::{CompileStep, QualityScores, SectionDescriptor, SectionRole};

/// Headings whose content feeds the summary, in priority order
const ABSTRACT_KEYWORDS: &[&str] = &[
    "problem statement",
    "key findings",
    "findings",
    "conclusion",
    "summary",
    "overview",
];

const NO_ANCHORS: &str = "(no facts available)";
const NO_SIBLINGS: &str = "No analytic sections were available for this report.";

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Accepted section content offered to the summary pass
#[derive(Debug, Clone)]
pub struct SiblingSection {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompileInput {
    pub descriptor: SectionDescriptor,
    pub vars: BTreeMap<String, String>,
    pub siblings: Vec<SiblingSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Repetition,
    DiminishingReturns,
    PassBudget,
}

#[derive(Debug, Clone)]
pub struct ExpansionTrace {
    pub passes: usize,
    /// Word count of the draft, then of each accepted pass
    pub word_counts: Vec<usize>,
    pub repetition_scores: Vec<f64>,
    pub stop: StopReason,
}

impl ExpansionTrace {
    pub fn last_repetition(&self) -> Option<f64> {
        self.repetition_scores.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSection {
    pub content: String,
    pub scores: QualityScores,
    pub trace: Option<ExpansionTrace>,
    pub template_version: String,
    pub model: String,
}

impl CompiledSection {
    /// Content produced without any generation call
    pub fn deterministic(content: String, template_version: String) -> Self {
        Self {
            content,
            scores: QualityScores {
                coverage: 1.0,
                groundedness: 1.0,
                novelty: 1.0,
                overall: 1.0,
            },
            trace: None,
            template_version,
            model: "deterministic".to_string(),
        }
    }
}

/// Survives a failed compile so the caller can persist partial progress
#[derive(Debug, Default)]
pub struct CompileProgress {
    pub last_step: Option<CompileStep>,
    pub log: RoutingLog,
}

impl CompileProgress {
    fn step(&mut self, step: CompileStep) {
        debug!(?step, "Compile step completed");
        self.last_step = Some(step);
    }
}

// =============================================================================
// Expansion Decisions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum PassOutcome {
    Continue { accept: bool },
    Stop { accept: bool, reason: StopReason },
}

/// Decide what to do with one expansion pass result
fn evaluate_pass(
    pass: usize,
    previous_words: usize,
    new_words: usize,
    repetition: f64,
    config: &CompilerConfig,
) -> PassOutcome {
    if repetition > config.repetition_threshold {
        return PassOutcome::Stop {
            accept: false,
            reason: StopReason::Repetition,
        };
    }

    let delta = new_words as i64 - previous_words as i64;
    if pass > 1 && delta < config.min_word_growth as i64 {
        return PassOutcome::Stop {
            accept: delta > 0,
            reason: StopReason::DiminishingReturns,
        };
    }
    PassOutcome::Continue { accept: delta > 0 }
}

// =============================================================================
// Compiler
// =============================================================================

pub struct SectionCompiler {
    router: ProviderRouter,
    catalog: TemplateCatalog,
    validator: MarkdownValidator,
    config: CompilerConfig,
}

impl SectionCompiler {
    pub fn new(router: ProviderRouter, catalog: TemplateCatalog, config: CompilerConfig) -> Self {
        Self {
            router,
            catalog,
            validator: MarkdownValidator::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(section = %input.descriptor.id))]
    pub async fn compile(
        &self,
        input: &CompileInput,
        guardrail: &CostGuardrail,
        progress: &mut CompileProgress,
    ) -> Result<CompiledSection> {
        match input.descriptor.role {
            SectionRole::Analytic => self.compile_multipass(input, guardrail, progress).await,
            SectionRole::Summary => self.compile_abstract(input, guardrail, progress).await,
            SectionRole::Appendix => Err(DossierError::generation(
                &input.descriptor.id,
                "appendix is rendered from data, not compiled",
            )),
        }
    }

    async fn compile_multipass(
        &self,
        input: &CompileInput,
        guardrail: &CostGuardrail,
        progress: &mut CompileProgress,
    ) -> Result<CompiledSection> {
        let descriptor = &input.descriptor;
        let context = input.vars.get("context").cloned().unwrap_or_default();
        let anchors = build_anchors(&context, self.config.anchor_char_budget);

        let mut vars = input.vars.clone();
        vars.insert(
            "anchors".to_string(),
            if anchors.is_empty() {
                NO_ANCHORS.to_string()
            } else {
                anchors
            },
        );
        progress.step(CompileStep::Context);

        // Draft
        let draft_template = self.catalog.lookup(Phase::Draft, &descriptor.template_key)?;
        let request = GenerationRequest::new(draft_template.render(&vars)?, &draft_template.system)
            .with_temperature(self.config.draft_temperature);
        let draft = self
            .router
            .dispatch(
                Phase::Draft,
                draft_template.profile.reasoning_heavy,
                &request,
                guardrail,
                &mut progress.log,
            )
            .await?
            .content;
        progress.step(CompileStep::Draft);

        // Expand
        let (expanded, trace) = self
            .expand(draft, &draft_template, &vars, guardrail, &mut progress.log)
            .await?;
        if trace.passes > 0 {
            progress.step(CompileStep::Expand);
        }

        // Refine
        let refine_template = self.catalog.lookup(Phase::Refine, &descriptor.template_key)?;
        let mut refine_vars = vars.clone();
        refine_vars.insert("draft".to_string(), expanded.clone());
        let request =
            GenerationRequest::new(refine_template.render(&refine_vars)?, &refine_template.system)
                .with_temperature(self.config.refine_temperature);
        let refined = self
            .router
            .dispatch(Phase::Refine, true, &request, guardrail, &mut progress.log)
            .await?
            .content;

        let mut content = sanitize(&refined, self.config.sanitize_line_limit);
        if content.trim().is_empty() {
            progress.log.warn(format!(
                "Refine pass for '{}' returned no usable text; keeping expanded draft",
                descriptor.id
            ));
            content = sanitize(&expanded, self.config.sanitize_line_limit);
        }
        progress.step(CompileStep::Refine);

        let novelty = 1.0 - trace.last_repetition().unwrap_or(0.0);
        let scores = score_content(
            &content,
            &context,
            draft_template.profile.target_words,
            novelty,
        );
        info!(
            section = %descriptor.id,
            words = word_count(&content),
            passes = trace.passes,
            stop = ?trace.stop,
            overall = scores.overall,
            "Section compiled"
        );

        self.finish(
            descriptor,
            content,
            scores,
            Some(trace),
            draft_template.version_tag(),
            &progress.log,
        )
    }

    async fn expand(
        &self,
        draft: String,
        template: &PromptTemplate,
        vars: &BTreeMap<String, String>,
        guardrail: &CostGuardrail,
        log: &mut RoutingLog,
    ) -> Result<(String, ExpansionTrace)> {
        let target = template.profile.target_words;
        let expand_template = self
            .catalog
            .lookup(Phase::Expand, template.profile.key)?;

        let mut current = draft;
        let mut current_words = word_count(&current);
        let mut trace = ExpansionTrace {
            passes: 0,
            word_counts: vec![current_words],
            repetition_scores: Vec::new(),
            stop: StopReason::TargetReached,
        };
        let mut stopped = None;

        while current_words < target && trace.passes < self.config.max_expansion_passes {
            trace.passes += 1;

            let mut pass_vars = vars.clone();
            pass_vars.insert("draft".to_string(), current.clone());
            pass_vars.insert("current_words".to_string(), current_words.to_string());
            let request =
                GenerationRequest::new(expand_template.render(&pass_vars)?, &expand_template.system)
                    .with_temperature(self.config.expand_temperature);
            let expanded = self
                .router
                .dispatch(
                    Phase::Expand,
                    expand_template.profile.reasoning_heavy,
                    &request,
                    guardrail,
                    log,
                )
                .await?
                .content;

            let new_words = word_count(&expanded);
            let repetition = repetition_score(&current, &expanded);
            trace.repetition_scores.push(repetition);
            debug!(
                pass = trace.passes,
                previous_words = current_words,
                new_words,
                repetition,
                "Expansion pass"
            );

            let (accept, stop) = match evaluate_pass(
                trace.passes,
                current_words,
                new_words,
                repetition,
                &self.config,
            ) {
                PassOutcome::Continue { accept } => (accept, None),
                PassOutcome::Stop { accept, reason } => (accept, Some(reason)),
            };
            if accept {
                current = expanded;
                current_words = new_words;
                trace.word_counts.push(current_words);
            }
            if let Some(reason) = stop {
                stopped = Some(reason);
                break;
            }
        }

        trace.stop = match stopped {
            Some(reason) => reason,
            None if current_words >= target => StopReason::TargetReached,
            None => StopReason::PassBudget,
        };
        Ok((current, trace))
    }

    async fn compile_abstract(
        &self,
        input: &CompileInput,
        guardrail: &CostGuardrail,
        progress: &mut CompileProgress,
    ) -> Result<CompiledSection> {
        let descriptor = &input.descriptor;
        let inputs = extract_abstract_inputs(&input.siblings, self.config.abstract_fallback_words);
        progress.step(CompileStep::Context);

        let template = self
            .catalog
            .lookup(Phase::Abstract, &descriptor.template_key)?;
        let mut vars = input.vars.clone();
        vars.insert("inputs".to_string(), inputs.clone());
        let request = GenerationRequest::new(template.render(&vars)?, &template.system)
            .with_temperature(self.config.draft_temperature);
        let generated = self
            .router
            .dispatch(Phase::Abstract, true, &request, guardrail, &mut progress.log)
            .await?
            .content;
        progress.step(CompileStep::Abstract);

        let content = sanitize(&generated, self.config.sanitize_line_limit);
        let scores = score_content(&content, &inputs, template.profile.target_words, 1.0);
        self.finish(
            descriptor,
            content,
            scores,
            None,
            template.version_tag(),
            &progress.log,
        )
    }

    fn finish(
        &self,
        descriptor: &SectionDescriptor,
        content: String,
        scores: QualityScores,
        trace: Option<ExpansionTrace>,
        template_version: String,
        log: &RoutingLog,
    ) -> Result<CompiledSection> {
        if content.trim().is_empty() {
            return Err(DossierError::generation(
                &descriptor.id,
                "generation produced no content",
            ));
        }

        let validation = self.validator.validate(&content);
        if !validation.is_valid() {
            return Err(DossierError::ContentSafety {
                section: descriptor.id.clone(),
                reason: validation.error_summary(),
            });
        }

        Ok(CompiledSection {
            content,
            scores,
            trace,
            template_version,
            model: log.last_model().unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

// =============================================================================
// Text Helpers
// =============================================================================

/// Short non-empty context lines concatenated up to `budget` characters
pub fn build_anchors(context: &str, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;

    for line in context.lines().map(str::trim) {
        let len = line.chars().count();
        if len == 0 || len > ANCHOR_MAX_LINE_CHARS {
            continue;
        }
        let needed = if out.is_empty() { len } else { len + 1 };
        if used + needed > budget {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
        used += needed;
    }
    out
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .take(REPETITION_WINDOW_WORDS)
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Share of the new text's leading vocabulary already present in the previous text
///
/// Always in `[0, 1]`; an empty new text scores 1.0.
pub fn repetition_score(previous: &str, new: &str) -> f64 {
    let new_set = word_set(new);
    if new_set.is_empty() {
        return 1.0;
    }
    let previous_set = word_set(previous);
    new_set.intersection(&previous_set).count() as f64 / new_set.len() as f64
}

fn meta_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(?:in this (?:section|report|chapter)|as an ai(?: language model)?|as (?:discussed|mentioned) (?:above|earlier|previously)|in the following sections?|let(?:'s| us) (?:dive|delve) into)\b[,:;]?[ \t]*",
            )
            .ok()
        })
        .as_ref()
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Strip meta-commentary line by line and drop a leading heading
///
/// Lines longer than `line_limit` characters are left untouched. A line that
/// is left with no alphanumeric content after stripping is dropped; lines
/// that were blank to begin with are kept.
pub fn sanitize(text: &str, line_limit: usize) -> String {
    let pattern = meta_pattern();
    let mut lines: Vec<String> = Vec::new();
    let mut seen_content = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            lines.push(String::new());
            continue;
        }
        if !seen_content {
            seen_content = true;
            if trimmed.starts_with('#') {
                continue;
            }
        }
        if line.chars().count() > line_limit {
            lines.push(line.trim_end().to_string());
            continue;
        }

        let Some(re) = pattern.filter(|p| p.is_match(line)) else {
            lines.push(line.trim_end().to_string());
            continue;
        };

        let indent_len = line.len() - line.trim_start().len();
        let (indent, body) = line.split_at(indent_len);
        let at_start = re.find(body).is_some_and(|m| m.start() == 0);
        let stripped = re.replace_all(body, "").replace("  ", " ");
        let stripped = stripped.trim();
        if !stripped.chars().any(char::is_alphanumeric) {
            continue;
        }
        let stripped = if at_start {
            capitalize_first(stripped)
        } else {
            stripped.to_string()
        };
        lines.push(format!("{indent}{stripped}"));
    }

    lines.join("\n").trim().to_string()
}

/// Material from each accepted sibling: a keyword-matched heading or a truncation
pub fn extract_abstract_inputs(siblings: &[SiblingSection], fallback_words: usize) -> String {
    let blocks: Vec<String> = siblings
        .iter()
        .map(|sibling| {
            let outline = Outline::parse(&sibling.content);
            let excerpt = outline
                .find(ABSTRACT_KEYWORDS)
                .map(|node| node.full_text())
                .filter(|text| !text.trim().is_empty())
                .map(|text| truncate_words(&text, fallback_words * 2))
                .unwrap_or_else(|| truncate_words(&sibling.content, fallback_words));
            format!("### {}\n{}", sibling.title, excerpt)
        })
        .collect();

    if blocks.is_empty() {
        NO_SIBLINGS.to_string()
    } else {
        blocks.join("\n\n")
    }
}

fn content_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() >= 4)
        .collect()
}

/// Coverage, groundedness and novelty of compiled content
pub fn score_content(content: &str, context: &str, target_words: usize, novelty: f64) -> QualityScores {
    let words = word_count(content);
    let coverage = if target_words == 0 {
        1.0
    } else {
        (words as f64 / target_words as f64).min(1.0)
    };

    let context_vocab: HashSet<String> = content_words(context).into_iter().collect();
    let produced = content_words(content);
    let groundedness = if produced.is_empty() {
        0.0
    } else {
        produced
            .iter()
            .filter(|w| context_vocab.contains(*w))
            .count() as f64
            / produced.len() as f64
    };

    let novelty = novelty.clamp(0.0, 1.0);
    QualityScores {
        coverage,
        groundedness,
        novelty,
        overall: 0.4 * coverage + 0.4 * groundedness + 0.2 * novelty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{Backends, LlmProvider, LlmResponse, SharedProvider};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<LlmResponse> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let next = self.responses.lock().unwrap().pop_front();
            next.map(LlmResponse::content_only)
                .ok_or_else(|| DossierError::llm("script exhausted"))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "script-1"
        }

        fn is_metered(&self) -> bool {
            false
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn compiler(provider: Arc<ScriptedProvider>) -> SectionCompiler {
        let shared: SharedProvider = provider;
        let router = ProviderRouter::new(Backends::new(Arc::clone(&shared), shared), true);
        SectionCompiler::new(router, TemplateCatalog::builtin(), CompilerConfig::default())
    }

    fn input(id: &str, role: SectionRole) -> CompileInput {
        let mut vars = BTreeMap::new();
        for (k, v) in [
            ("title", "Trend Analysis"),
            ("tone", "formal"),
            ("depth", "detailed"),
            ("focus", "batteries"),
            ("context", "- sulfide electrolytes: +35% growth\n| 2022 | 18 |"),
            ("reviewer_feedback", "None."),
        ] {
            vars.insert(k.to_string(), v.to_string());
        }
        CompileInput {
            descriptor: SectionDescriptor {
                id: id.to_string(),
                title: "Trend Analysis".to_string(),
                description: String::new(),
                required_data_keys: vec![],
                template_key: id.to_string(),
                depends_on: vec![],
                role,
            },
            vars,
            siblings: vec![],
        }
    }

    fn config() -> CompilerConfig {
        CompilerConfig::default()
    }

    #[test]
    fn test_evaluate_pass_rules() {
        let cfg = config();
        assert_eq!(
            evaluate_pass(1, 100, 400, 0.9, &cfg),
            PassOutcome::Stop {
                accept: false,
                reason: StopReason::Repetition
            }
        );
        assert_eq!(
            evaluate_pass(1, 100, 150, 0.3, &cfg),
            PassOutcome::Continue { accept: true }
        );
        assert_eq!(
            evaluate_pass(2, 300, 350, 0.3, &cfg),
            PassOutcome::Stop {
                accept: true,
                reason: StopReason::DiminishingReturns
            }
        );
        assert_eq!(
            evaluate_pass(3, 300, 280, 0.3, &cfg),
            PassOutcome::Stop {
                accept: false,
                reason: StopReason::DiminishingReturns
            }
        );
    }

    #[test]
    fn test_repetition_score_bounds() {
        assert_eq!(repetition_score("a b c", ""), 1.0);
        assert_eq!(repetition_score("", "a b"), 0.0);
        assert_eq!(repetition_score("A, b.", "a B"), 1.0);
        assert!((repetition_score("a b", "a b c d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_anchors_skip_long_lines_and_respect_budget() {
        let long = "x".repeat(ANCHOR_MAX_LINE_CHARS + 1);
        let context = format!("fact one\n\n{long}\n  fact two  \nfact three");
        assert_eq!(build_anchors(&context, 1000), "fact one\nfact two\nfact three");
        assert_eq!(build_anchors(&context, 17), "fact one\nfact two");
    }

    #[test]
    fn test_sanitize_strips_meta_and_heading() {
        let text = "## Trend Analysis\n\nIn this section, we review output.\n\nAs an AI language model.\nGrowth was steady.";
        let cleaned = sanitize(text, 400);
        assert_eq!(cleaned, "We review output.\n\nGrowth was steady.");
    }

    #[test]
    fn test_sanitize_skips_long_lines() {
        let long = format!("In this section, {}", words("w", 100));
        assert_eq!(sanitize(&long, 50), long);
    }

    #[test]
    fn test_abstract_inputs_prefer_matching_heading() {
        let siblings = vec![
            SiblingSection {
                id: "intro".into(),
                title: "Introduction".into(),
                content: "Preamble.\n\n## Problem Statement\n\nCells degrade quickly.".into(),
            },
            SiblingSection {
                id: "trend_analysis".into(),
                title: "Trend Analysis".into(),
                content: words("t", 400),
            },
        ];
        let inputs = extract_abstract_inputs(&siblings, 150);
        assert!(inputs.contains("### Introduction\nCells degrade quickly."));
        assert!(!inputs.contains("Preamble."));
        assert!(inputs.contains("t149"));
        assert!(!inputs.contains("t150"));
    }

    #[test]
    fn test_scores_are_bounded() {
        let scores = score_content("growth growth unrelated", "growth", 3, 0.5);
        assert_eq!(scores.coverage, 1.0);
        assert!((scores.groundedness - 2.0 / 3.0).abs() < 1e-9);
        assert!(scores.overall <= 1.0);
    }

    #[tokio::test]
    async fn test_expansion_stops_on_repetition_and_keeps_previous() {
        let draft = words("d", 200);
        let rephrased = words("d", 220);
        let provider =
            ScriptedProvider::new(&[draft.as_str(), rephrased.as_str(), "Refined body."]);
        let compiler = compiler(Arc::clone(&provider));
        let mut progress = CompileProgress::default();

        let compiled = compiler
            .compile(
                &input("trend_analysis", SectionRole::Analytic),
                &CostGuardrail::new(15),
                &mut progress,
            )
            .await
            .unwrap();

        let trace = compiled.trace.unwrap();
        assert_eq!(trace.passes, 1);
        assert_eq!(trace.stop, StopReason::Repetition);
        assert_eq!(trace.word_counts, vec![200]);
        assert_eq!(compiled.content, "Refined body.");
        assert_eq!(progress.last_step, Some(CompileStep::Refine));

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("- sulfide electrolytes: +35% growth"));
        assert!(prompts[2].contains(&words("d", 10)));
    }

    #[tokio::test]
    async fn test_expansion_terminates_within_pass_budget() {
        let mut script: Vec<String> = vec![words("a", 10)];
        for pass in 0..5 {
            script.push(words(&format!("p{pass}x"), 120 * (pass + 2)));
        }
        script.push("Refined.".to_string());
        let refs: Vec<&str> = script.iter().map(String::as_str).collect();
        let provider = ScriptedProvider::new(&refs);
        let compiler = compiler(Arc::clone(&provider));
        let mut progress = CompileProgress::default();

        let compiled = compiler
            .compile(
                &input("trend_analysis", SectionRole::Analytic),
                &CostGuardrail::new(15),
                &mut progress,
            )
            .await
            .unwrap();

        let trace = compiled.trace.unwrap();
        assert_eq!(trace.passes, 5);
        assert_eq!(trace.stop, StopReason::PassBudget);
        assert_eq!(provider.prompts.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_blank_refine_keeps_expanded_text() {
        let draft = words("d", 950);
        let provider = ScriptedProvider::new(&[draft.as_str(), "In this section,"]);
        let compiler = compiler(Arc::clone(&provider));
        let mut progress = CompileProgress::default();

        let compiled = compiler
            .compile(
                &input("trend_analysis", SectionRole::Analytic),
                &CostGuardrail::new(15),
                &mut progress,
            )
            .await
            .unwrap();

        assert_eq!(compiled.content, draft);
        assert_eq!(compiled.trace.unwrap().stop, StopReason::TargetReached);
        assert_eq!(progress.log.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_output_is_rejected() {
        let draft = words("d", 950);
        let provider = ScriptedProvider::new(&[draft.as_str(), "Fine text.\n<script>alert(1)</script>"]);
        let compiler = compiler(provider);
        let mut progress = CompileProgress::default();

        let err = compiler
            .compile(
                &input("trend_analysis", SectionRole::Analytic),
                &CostGuardrail::new(15),
                &mut progress,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DossierError::ContentSafety { .. }));
    }

    #[tokio::test]
    async fn test_abstract_is_single_pass() {
        let provider = ScriptedProvider::new(&["The corpus shows steady growth."]);
        let compiler = compiler(Arc::clone(&provider));
        let mut progress = CompileProgress::default();
        let mut summary = input("executive_summary", SectionRole::Summary);
        summary.siblings.push(SiblingSection {
            id: "trend_analysis".into(),
            title: "Trend Analysis".into(),
            content: "## Key Findings\n\nOutput doubled.".into(),
        });

        let compiled = compiler
            .compile(&summary, &CostGuardrail::new(15), &mut progress)
            .await
            .unwrap();
        assert_eq!(compiled.content, "The corpus shows steady growth.");
        assert!(compiled.trace.is_none());
        assert_eq!(progress.last_step, Some(CompileStep::Abstract));

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Output doubled."));
        assert_eq!(compiled.template_version, format!("executive_summary@{}", crate::ai::TEMPLATE_VERSION));
    }

    proptest! {
        #[test]
        fn prop_repetition_score_in_unit_interval(a in "[a-z ]{0,200}", b in "[a-z ]{0,200}") {
            let score = repetition_score(&a, &b);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_sanitize_never_adds_lines(text in "[A-Za-z ,#\n]{0,300}") {
            let cleaned = sanitize(&text, 400);
            prop_assert!(cleaned.lines().count() <= text.lines().count().max(1));
        }

        #[test]
        fn prop_anchors_within_budget(text in "[a-z \n]{0,500}", budget in 0usize..300) {
            prop_assert!(build_anchors(&text, budget).chars().count() <= budget);
        }
    }
}
