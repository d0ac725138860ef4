//! Markdown Outline Tree
//!
//! Parses section markdown into an ownership tree of headings. Used to
//! extract summary inputs by heading keyword and to demote headings when
//! sections are assembled into the final document.

use crate::constants::report::MAX_OUTLINE_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    pub heading: String,
    /// Markdown heading level (1..=6)
    pub level: usize,
    pub body: String,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Body followed by all descendants, headings included
    pub fn full_text(&self) -> String {
        let mut out = self.body.trim().to_string();
        for child in &self.children {
            child.render_into(&mut out, 0);
        }
        out.trim().to_string()
    }

    fn find(&self, keywords: &[&str]) -> Option<&OutlineNode> {
        let heading = self.heading.to_lowercase();
        if keywords.iter().any(|k| heading.contains(k)) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(keywords))
    }

    fn render_into(&self, out: &mut String, offset: usize) {
        let level = (self.level + offset).min(6);
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&"#".repeat(level));
        out.push(' ');
        out.push_str(&self.heading);
        let body = self.body.trim();
        if !body.is_empty() {
            out.push_str("\n\n");
            out.push_str(body);
        }
        for child in &self.children {
            child.render_into(out, offset);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    /// Text before the first heading
    pub preamble: String,
    pub nodes: Vec<OutlineNode>,
}

struct RawHeading {
    level: usize,
    heading: String,
    body: String,
}

impl Outline {
    pub fn parse(markdown: &str) -> Self {
        let mut preamble = String::new();
        let mut raw: Vec<RawHeading> = Vec::new();
        let mut in_fence = false;

        for line in markdown.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            let heading = if in_fence { None } else { parse_heading(line) };
            match heading {
                Some((level, text)) => raw.push(RawHeading {
                    level,
                    heading: text,
                    body: String::new(),
                }),
                None => {
                    let target = match raw.last_mut() {
                        Some(last) => &mut last.body,
                        None => &mut preamble,
                    };
                    target.push_str(line);
                    target.push('\n');
                }
            }
        }

        let mut cursor = 0;
        let nodes = build_level(&raw, &mut cursor, 0, 1);
        Self {
            preamble: preamble.trim().to_string(),
            nodes,
        }
    }

    /// First node (depth-first) whose heading contains any keyword, case-insensitive
    pub fn find(&self, keywords: &[&str]) -> Option<&OutlineNode> {
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let lowered: Vec<&str> = lowered.iter().map(String::as_str).collect();
        self.nodes.iter().find_map(|n| n.find(&lowered))
    }

    /// Render back to markdown with every heading demoted by `offset` levels
    pub fn render(&self, offset: usize) -> String {
        let mut out = self.preamble.clone();
        for node in &self.nodes {
            node.render_into(&mut out, offset);
        }
        out
    }

    pub fn depth(&self) -> usize {
        fn node_depth(node: &OutlineNode) -> usize {
            1 + node.children.iter().map(node_depth).max().unwrap_or(0)
        }
        self.nodes.iter().map(node_depth).max().unwrap_or(0)
    }
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    if text.is_empty() {
        return None;
    }
    Some((level, text.to_string()))
}

/// Consume headings deeper than `parent_level` into a sibling list
fn build_level(
    raw: &[RawHeading],
    cursor: &mut usize,
    parent_level: usize,
    depth: usize,
) -> Vec<OutlineNode> {
    let mut nodes: Vec<OutlineNode> = Vec::new();

    while let Some(item) = raw.get(*cursor) {
        if item.level <= parent_level {
            break;
        }
        *cursor += 1;

        let mut node = OutlineNode {
            heading: item.heading.clone(),
            level: item.level,
            body: item.body.clone(),
            children: Vec::new(),
        };

        if depth < MAX_OUTLINE_DEPTH {
            node.children = build_level(raw, cursor, item.level, depth + 1);
        } else {
            // Past the depth bound, deeper headings are folded into the body
            while let Some(deeper) = raw.get(*cursor) {
                if deeper.level <= item.level {
                    break;
                }
                node.body.push_str(&format!(
                    "\n{} {}\n{}",
                    "#".repeat(deeper.level),
                    deeper.heading,
                    deeper.body
                ));
                *cursor += 1;
            }
        }
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Opening words.\n\n## Problem Statement\n\nBatteries degrade.\n\n### Scope\n\nOnly Li-ion.\n\n## Key Findings\n\nGrowth is steady.\n";

    #[test]
    fn test_parse_builds_tree() {
        let outline = Outline::parse(SAMPLE);
        assert_eq!(outline.preamble, "Opening words.");
        assert_eq!(outline.nodes.len(), 2);
        assert_eq!(outline.nodes[0].heading, "Problem Statement");
        assert_eq!(outline.nodes[0].children[0].heading, "Scope");
        assert_eq!(outline.depth(), 2);
    }

    #[test]
    fn test_find_is_recursive_and_case_insensitive() {
        let outline = Outline::parse(SAMPLE);
        assert_eq!(outline.find(&["SCOPE"]).unwrap().body.trim(), "Only Li-ion.");
        let problem = outline.find(&["problem statement"]).unwrap();
        assert!(problem.full_text().contains("Only Li-ion."));
        assert!(outline.find(&["methodology"]).is_none());
    }

    #[test]
    fn test_render_demotes_and_clamps() {
        let outline = Outline::parse("# Top\n\nbody\n\n###### Deep\n\nx");
        let rendered = outline.render(2);
        assert!(rendered.starts_with("### Top"));
        assert!(rendered.contains("###### Deep"));
        assert!(!rendered.contains("####### "));
    }

    #[test]
    fn test_headings_inside_fences_are_body() {
        let outline = Outline::parse("```\n# not a heading\n```\n\n## Real");
        assert_eq!(outline.nodes.len(), 1);
        assert!(outline.preamble.contains("# not a heading"));
    }

    #[test]
    fn test_hashtag_without_space_is_not_heading() {
        let outline = Outline::parse("#hashtag text");
        assert!(outline.nodes.is_empty());
    }
}
