//! Prompt templates for every oracle call in the pipeline.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing how the model is instructed
//!    requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can render and inspect prompts directly
//!    without a live model, so prompt regressions are easy to catch.
//!
//! Templates use `{name}` placeholders filled by the `*_prompt` builders
//! below. Literal braces in the JSON schema are written doubled in the
//! source and collapsed at render time.

// ── Extraction ───────────────────────────────────────────────────────────

/// Per-page vision prompt: detect content types and extract each in one call.
pub const EXTRACTION_PROMPT: &str = r#"Analyze this document page. First identify what content types exist, then extract each appropriately.

{context_hint}

Return JSON:
{{
  "content_types": ["table", "chart", "graph", "image", "paragraph"],

  "tables": [{{
    "headers": ["col1", "col2"],
    "rows": [["val1", "val2"]],
    "summary": "What this table shows",
    "importance": 1-3
  }}],

  "visuals": [{{
    "type": "chart|graph|image|diagram",
    "description": "What it shows",
    "data_points": ["key values/labels visible"],
    "trend": "increasing|decreasing|stable|comparison|n/a",
    "importance": 1-3
  }}],

  "events": [{{
    "date": "YYYY-MM-DD or null",
    "type": "incident|decision|action|other",
    "summary": "<30 words",
    "actors": ["names"],
    "importance": 1-3
  }}],

  "entities": ["names, systems, orgs"],
  "dates": ["all dates found"],
  "facts": [{{"text": "<25 words", "importance": 1-3}}],

  "continues_previous": false,
  "continues_next": false
}}

RULES:
- List ALL content types present on the page
- For TABLES: Extract headers and key rows (max 10 rows)
- For CHARTS/GRAPHS: Describe trend, extract visible data points
- For IMAGES/DIAGRAMS: Describe what's shown, extract any labels
- For PARAGRAPHS: Extract events with dates, actors, importance
- Importance: 3=critical (dates, decisions), 2=high, 1=supporting
- Preserve exact names, dates, numbers
- Empty arrays if content type not present
- ONLY extract information EXPLICITLY visible - never infer or assume"#;

/// Continuity hint prepended when the previous page runs on.
pub const CONTEXT_HINT: &str = "Previous page context: Topics: {topics}. Key actors: {actors}.\nCheck if this page continues from previous.";

/// System message sent with every JSON-mode call.
pub const JSON_SYSTEM_PROMPT: &str = "You are a precise document analyst. Respond with a single valid JSON object and nothing else: no markdown fences, no commentary.";

/// Render the extraction prompt around an optional continuity hint.
pub fn extraction_prompt(context_hint: &str) -> String {
    EXTRACTION_PROMPT
        .replace("{context_hint}", context_hint)
        .replace("{{", "{")
        .replace("}}", "}")
}

/// Render the continuity hint.
pub fn context_hint(topics: &str, actors: &str) -> String {
    CONTEXT_HINT
        .replace("{topics}", topics)
        .replace("{actors}", actors)
}

// ── Integration (legacy path) ────────────────────────────────────────────

/// Routing prompt for one page: ADD, UPDATE or SKIP.
pub const DECISION_PROMPT: &str = r#"New information extracted from document page:
---
{page_summary}
---

Current report sections:
{compact_state}

Available sections: {sections}

What should I do with this new information?
Reply with EXACTLY this format on one line:
action: [ADD/UPDATE/SKIP], topic: [brief topic], section: [section name]

- ADD = new information not in report
- UPDATE = extends or corrects existing entry
- SKIP = redundant or not relevant"#;

pub fn decision_prompt(page_summary: &str, compact_state: &str, sections: &[String]) -> String {
    let sections = sections
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");
    DECISION_PROMPT
        .replace("{page_summary}", page_summary)
        .replace("{compact_state}", compact_state)
        .replace("{sections}", &format!("[{sections}]"))
}

// ── Compression ──────────────────────────────────────────────────────────

/// Merge prompt for one group of similar items.
pub const CONSOLIDATION_PROMPT: &str = r#"Merge these related report items while keeping all protected terms.

ITEMS TO MERGE:
{items}

{protected_terms}
{chronology_warning}
MERGE RULES:
1. NEVER change or remove dates - copy exactly as written
2. NEVER change entity/person names - copy exactly
3. Merge items about the same event into one
4. Remove filler words (very, really, basically, etc.)
5. Keep technical terms and error codes
6. Each output item should be {min_words}-25 words

Write merged items as a simple list, one per line starting with dash:
- merged item 1
- merged item 2"#;

/// Added when a group spans two or more distinct dates.
pub const CHRONOLOGY_WARNING: &str = "WARNING: These items describe a chronological sequence ({dates}). Keep each dated event as its own item; do NOT merge events that happened on different dates.\n";

/// Render the protected-term block listing in-group dates and names.
pub fn protected_terms_block(dates: &[String], names: &[String]) -> String {
    let mut parts = Vec::new();
    if !dates.is_empty() {
        let shown: Vec<&str> = dates.iter().take(10).map(String::as_str).collect();
        parts.push(format!("DATES (keep exactly): {}", shown.join(", ")));
    }
    if !names.is_empty() {
        let shown: Vec<&str> = names.iter().take(15).map(String::as_str).collect();
        parts.push(format!("NAMES (keep exactly): {}", shown.join(", ")));
    }
    parts.join("\n")
}

pub fn consolidation_prompt(
    items: &[String],
    protected_terms: &str,
    distinct_dates: &[String],
    min_words: usize,
) -> String {
    let items_text = items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n");
    let warning = if distinct_dates.len() >= 2 {
        CHRONOLOGY_WARNING.replace("{dates}", &distinct_dates.join(", "))
    } else {
        String::new()
    };
    CONSOLIDATION_PROMPT
        .replace("{items}", &items_text)
        .replace("{protected_terms}", protected_terms)
        .replace("{chronology_warning}", &warning)
        .replace("{min_words}", &min_words.to_string())
}

// ── Synthesis ────────────────────────────────────────────────────────────

/// Single-pass synthesis prompt over importance-grouped content.
pub const FINALIZE_PROMPT: &str = r#"You are an expert report writer. Synthesize this information into a coherent report.

CRITICAL (preserve exactly):
{critical}

HIGH PRIORITY:
{high}

TABLES (summarize key data):
{tables}

VISUAL INSIGHTS (charts/graphs):
{visuals}

SUPPORTING:
{medium}

{preferences}

RULES:
- Use ONLY the information above - never add external knowledge or assumptions
- Preserve all dates, names, figures exactly as given
- Write clear professional prose
- Skip topics with no information rather than speculate
- Target: {target_words} words

Write the report:"#;

/// Report shape used when no preferences file is supplied.
pub const DEFAULT_PREFERENCES: &str = "Generate a detailed executive report (~800-1000 words) for stakeholders and leadership.\n\nInclude: Executive Summary, Background, Key Events (chronological), Impact Analysis, Root Cause, Current Status, Recommended Actions.\n\nTone: Professional, factual, suitable for board-level review.";

/// Bucket text for the synthesis prompt; empty buckets read `(none)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeBlocks<'a> {
    pub critical: &'a str,
    pub high: &'a str,
    pub tables: &'a str,
    pub visuals: &'a str,
    pub medium: &'a str,
}

pub fn finalize_prompt(blocks: FinalizeBlocks<'_>, preferences: &str, target_words: usize) -> String {
    let or_none = |s: &str| {
        if s.trim().is_empty() {
            "(none)".to_string()
        } else {
            s.to_string()
        }
    };
    FINALIZE_PROMPT
        .replace("{critical}", &or_none(blocks.critical))
        .replace("{high}", &or_none(blocks.high))
        .replace("{tables}", &or_none(blocks.tables))
        .replace("{visuals}", &or_none(blocks.visuals))
        .replace("{medium}", &or_none(blocks.medium))
        .replace("{preferences}", preferences)
        .replace("{target_words}", &target_words.to_string())
}

// ── Perspective (legacy path) ────────────────────────────────────────────

/// Asks the model to write a tailored rewrite prompt for one section.
pub const SECTION_META_PROMPT: &str = r#"Create a rewrite prompt for the "{section}" section.

USER'S GOAL: {goal}

VOICE: {voice}
TERMINOLOGY: {terminology}

EMPHASIZE these aspects: {emphasize}
DE-EMPHASIZE these aspects: {de_emphasize}

Write a clear, direct prompt (3-5 sentences) that I'll use to rewrite the section.
The prompt should:
- Be specific about what to highlight
- Specify the tone/voice
- Give concrete guidance on what to change

Write only the prompt, nothing else."#;

/// Applies a tailored prompt to one section.
pub const SECTION_REWRITE_PROMPT: &str = r#"{tailored_prompt}

SECTION CONTENT:
{content}

{constraints}

CRITICAL: Keep all dates exactly as written. Keep all names exactly as written.

Rewrite the content. Output as a list with one item per line starting with dash:
- rewritten item 1
- rewritten item 2"#;

/// Voice-only rewrite for sections without their own goal.
pub const SECTION_BASIC_PROMPT: &str = r#"Rewrite this section content with the following style:

VOICE: {voice}
TERMINOLOGY: {terminology}

SECTION: {section}
{content}

CRITICAL: Keep all dates exactly as written. Keep all names exactly as written.

Output as a list with one item per line starting with dash:
- rewritten item 1
- rewritten item 2"#;

/// Whole-document rewrite against a free-text perspective guide.
pub const GLOBAL_PERSPECTIVE_PROMPT: &str = r#"Rewrite this report from a specific perspective.

PERSPECTIVE GUIDE:
{guide}

CURRENT REPORT:
{document}

RULES:
- Keep ALL dates exactly as written
- Keep ALL entity/person names exactly as written
- Adjust emphasis and framing per the perspective guide
- Match the voice and terminology specified
- Stay within {max_words} words total

Write the complete rewritten report in markdown format."#;

pub fn section_meta_prompt(
    section: &str,
    goal: &str,
    voice: &str,
    terminology: &str,
    emphasize: &[String],
    de_emphasize: &[String],
) -> String {
    SECTION_META_PROMPT
        .replace("{section}", section)
        .replace("{goal}", goal)
        .replace("{voice}", voice)
        .replace("{terminology}", terminology)
        .replace("{emphasize}", &emphasize.join(", "))
        .replace("{de_emphasize}", &de_emphasize.join(", "))
}

pub fn section_rewrite_prompt(
    tailored_prompt: &str,
    items: &[String],
    max_words: Option<usize>,
    preserve_format: bool,
) -> String {
    let mut constraints = String::new();
    if let Some(n) = max_words {
        constraints.push_str(&format!("Keep under {n} words."));
    }
    if preserve_format {
        if !constraints.is_empty() {
            constraints.push('\n');
        }
        constraints.push_str("Keep the same structure/format.");
    }
    SECTION_REWRITE_PROMPT
        .replace("{tailored_prompt}", tailored_prompt)
        .replace("{content}", &dash_list(items))
        .replace("{constraints}", &constraints)
}

pub fn section_basic_prompt(section: &str, items: &[String], voice: &str, terminology: &str) -> String {
    SECTION_BASIC_PROMPT
        .replace("{voice}", voice)
        .replace("{terminology}", terminology)
        .replace("{section}", section)
        .replace("{content}", &dash_list(items))
}

pub fn global_perspective_prompt(guide: &str, document: &str, max_words: usize) -> String {
    GLOBAL_PERSPECTIVE_PROMPT
        .replace("{guide}", guide)
        .replace("{document}", document)
        .replace("{max_words}", &max_words.to_string())
}

/// `- item` per line.
pub fn dash_list(items: &[String]) -> String {
    items
        .iter()
        .filter(|i| !i.is_empty())
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
