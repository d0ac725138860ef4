//! Defaults and tuning constants, grouped by the component that reads them

/// Section compiler constants
pub mod compiler {
    /// Maximum expansion passes per section
    pub const MAX_EXPANSION_PASSES: usize = 5;

    /// Repetition score above which expansion stops
    pub const REPETITION_THRESHOLD: f64 = 0.8;

    /// Number of leading words compared by the repetition score
    pub const REPETITION_WINDOW_WORDS: usize = 500;

    /// Minimum word growth per expansion pass (after the first)
    pub const MIN_WORD_GROWTH: usize = 100;

    /// Character budget for the anchor excerpt
    pub const ANCHOR_CHAR_BUDGET: usize = 2_000;

    /// Lines longer than this are never used as anchor facts
    pub const ANCHOR_MAX_LINE_CHARS: usize = 240;

    /// Lines longer than this skip meta-commentary stripping
    pub const SANITIZE_LINE_LIMIT: usize = 400;

    /// Words taken from a sibling section when no heading matches
    pub const ABSTRACT_FALLBACK_WORDS: usize = 150;

    /// Generation temperatures per phase
    pub const DRAFT_TEMPERATURE: f32 = 0.3;
    pub const EXPAND_TEMPERATURE: f32 = 0.5;
    pub const REFINE_TEMPERATURE: f32 = 0.2;
}

/// Cost guardrail constants
pub mod guardrail {
    /// Default ceiling on metered backend calls per report
    pub const DEFAULT_CALL_CEILING: u32 = 15;

    /// Warning threshold (fraction of ceiling)
    pub const WARNING_THRESHOLD: f64 = 0.75;
}

/// Report lifecycle constants
pub mod report {
    /// Default maximum revisions per section
    pub const DEFAULT_MAX_REVISIONS: u32 = 3;

    /// Maximum heading depth walked by the outline tree
    pub const MAX_OUTLINE_DEPTH: usize = 6;

    /// Maximum rows rendered per data table in section context
    pub const MAX_TABLE_ROWS: usize = 25;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Default maximum tokens per generation
    pub const DEFAULT_MAX_TOKENS: usize = 4096;
}
