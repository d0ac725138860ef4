//! Writer Instructions
//!
//! System instructions for section generation are assembled from a small set
//! of tagged blocks so every phase speaks to the backend in the same layout:
//! who is writing, what this pass must achieve, which topic it is pinned to,
//! and a pair of example phrasings to avoid and to imitate.

mod catalog;

pub use catalog::{PromptTemplate, SectionProfile, TEMPLATE_VERSION, TemplateCatalog, render};

/// One tagged block of a system instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSection {
    Role { persona: String, discipline: String },
    Objectives(Vec<String>),
    Focus { topic: String, rules: Vec<String> },
    Examples { avoid: Vec<String>, prefer: Vec<String> },
}

impl PromptSection {
    fn write_into(&self, out: &mut String) {
        match self {
            Self::Role {
                persona,
                discipline,
            } => {
                out.push_str("<ROLE>\n");
                out.push_str(&format!("You are a {persona} working on {discipline}.\n"));
                out.push_str("</ROLE>");
            }
            Self::Objectives(goals) => {
                out.push_str("<OBJECTIVES>\n");
                for (n, goal) in goals.iter().enumerate() {
                    out.push_str(&format!("{}. {goal}\n", n + 1));
                }
                out.push_str("</OBJECTIVES>");
            }
            Self::Focus { topic, rules } => {
                out.push_str("<FOCUS>\n");
                out.push_str(&format!("Write only about: {topic}\n"));
                for rule in rules {
                    out.push_str(&format!("- {rule}\n"));
                }
                out.push_str("</FOCUS>");
            }
            Self::Examples { avoid, prefer } => {
                out.push_str("<EXAMPLES>\n");
                for line in avoid {
                    out.push_str(&format!("AVOID: {line}\n"));
                }
                for line in prefer {
                    out.push_str(&format!("PREFER: {line}\n"));
                }
                out.push_str("</EXAMPLES>");
            }
        }
    }
}

/// Chainable assembly of a system instruction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    blocks: Vec<PromptSection>,
}

fn owned(items: Vec<&str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, persona: &str, discipline: &str) -> Self {
        self.blocks.push(PromptSection::Role {
            persona: persona.to_string(),
            discipline: discipline.to_string(),
        });
        self
    }

    pub fn objectives(mut self, goals: Vec<&str>) -> Self {
        self.blocks.push(PromptSection::Objectives(owned(goals)));
        self
    }

    /// Pin the output to one topic with explicit prohibitions
    pub fn focus(mut self, topic: &str, rules: Vec<&str>) -> Self {
        self.blocks.push(PromptSection::Focus {
            topic: topic.to_string(),
            rules: owned(rules),
        });
        self
    }

    pub fn anti_patterns(mut self, avoid: Vec<&str>, prefer: Vec<&str>) -> Self {
        self.blocks.push(PromptSection::Examples {
            avoid: owned(avoid),
            prefer: owned(prefer),
        });
        self
    }

    /// Blocks in insertion order, separated by a blank line
    pub fn build(self) -> String {
        let mut out = String::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                out.push_str("\n\n");
            }
            block.write_into(&mut out);
        }
        out
    }
}
