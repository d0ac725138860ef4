//! Markdown Safety Validator
//!
//! Rejects generated markdown carrying HTML or link injection. Code spans
//! and fenced blocks are not exempt: compiled sections are prose and are
//! rendered by downstream viewers that may not escape them.

use std::sync::OnceLock;

use regex::Regex;

use super::{ValidationIssue, ValidationResult};

struct CompiledRule {
    name: &'static str,
    regex: Regex,
}

const RULES: &[(&str, &str)] = &[
    ("script tag", r"(?i)<\s*/?\s*script\b"),
    ("embedded frame", r"(?i)<\s*(iframe|frame|frameset|object|embed|applet)\b"),
    ("inline event handler", r#"(?i)<[^>]*\son[a-z]+\s*=\s*["']?"#),
    ("javascript URL", r#"(?i)(\]\(|href\s*=\s*["']?|<)\s*javascript\s*:"#),
    ("vbscript URL", r#"(?i)(\]\(|href\s*=\s*["']?|<)\s*vbscript\s*:"#),
    ("HTML data URL", r"(?i)data\s*:\s*text/html"),
    ("style tag", r"(?i)<\s*style\b"),
    ("form element", r"(?i)<\s*(form|input|button|textarea)\b"),
    ("meta refresh", r#"(?i)<\s*meta[^>]*http-equiv"#),
];

/// Get compiled rules (initialized once)
fn compiled_rules() -> &'static Vec<CompiledRule> {
    static COMPILED: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|&(name, pattern)| {
                Regex::new(pattern)
                    .ok()
                    .map(|regex| CompiledRule { name, regex })
            })
            .collect()
    })
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownValidator;

impl MarkdownValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, content: &str) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut fence_open = false;

        for (idx, line) in content.lines().enumerate() {
            for rule in compiled_rules() {
                if rule.regex.is_match(line) {
                    result.issues.push(
                        ValidationIssue::error(format!("Forbidden {}", rule.name))
                            .at_line(idx + 1),
                    );
                }
            }
            if line.trim_start().starts_with("```") {
                fence_open = !fence_open;
            }
        }

        if fence_open {
            result
                .issues
                .push(ValidationIssue::warning("Unclosed code fence"));
        }
        result
    }

    /// Boolean gate used after each generation
    pub fn is_safe(&self, content: &str) -> bool {
        self.validate(content).is_valid()
    }
}
