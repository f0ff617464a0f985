//! Response cleaning: turn model output into plain, speakable text.
//!
//! Scripts are read aloud, so every formatting artefact a model tends to emit
//! (markdown emphasis, code fences, citation brackets, literal `\n` sequences,
//! stray HTML) has to go. The rules form an explicit ordered table; each one
//! is a pure `&str → String` pass. The table is applied repeatedly until the
//! text stops changing, so removing one artefact never exposes another that
//! survives into the output.
//!
//! Every rule except `punctuation_spacing` only deletes characters or
//! shortens whitespace runs. `punctuation_spacing` inserts a single space
//! between punctuation and a following letter, and no rule deletes such a
//! space again, so the loop always reaches a fixed point.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// One named cleaning rule.
#[derive(Clone, Copy)]
pub struct CleanRule {
    pub name: &'static str,
    pub action: fn(&str) -> String,
}

impl std::fmt::Debug for CleanRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Ordered rule table applied to a fixed point.
#[derive(Debug, Clone)]
pub struct ResponseCleaner {
    rules: Vec<CleanRule>,
}

impl Default for ResponseCleaner {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ResponseCleaner {
    /// Build the standard table, optionally including stage-direction removal.
    pub fn new(strip_stage_directions: bool) -> Self {
        let mut rules = vec![
            CleanRule { name: "line_endings", action: normalise_line_endings },
            CleanRule { name: "invisible_chars", action: remove_invisible_chars },
            CleanRule { name: "code_fences", action: strip_code_fences },
            CleanRule { name: "html_tags", action: strip_tags },
            CleanRule { name: "bracketed", action: strip_bracketed },
            CleanRule { name: "emphasis", action: strip_emphasis },
            CleanRule { name: "literal_escapes", action: replace_literal_escapes },
        ];
        if strip_stage_directions {
            rules.push(CleanRule { name: "stage_directions", action: strip_stage_directions_rule });
        }
        rules.extend([
            CleanRule { name: "whitespace", action: collapse_whitespace },
            CleanRule { name: "punctuation", action: normalise_punctuation },
            CleanRule { name: "punctuation_spacing", action: space_after_punctuation },
            CleanRule { name: "trim", action: trim },
        ]);
        Self { rules }
    }

    /// Names of the active rules, in order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Clean `text`. `clean(clean(x)) == clean(x)` for every input.
    pub fn clean(&self, text: &str) -> String {
        let mut current = text.to_string();
        let mut pass = 0usize;
        loop {
            let next = self.apply_once(&current);
            if next == current {
                return next;
            }
            pass += 1;
            debug!(
                "Cleaner pass {} changed {} → {} chars",
                pass,
                current.chars().count(),
                next.chars().count()
            );
            current = next;
        }
    }

    fn apply_once(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| (rule.action)(&acc))
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule 3: Code fences and backticks ────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());

fn strip_code_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").replace('`', "")
}

// ── Rule 4: HTML-like tags ───────────────────────────────────────────────────

static RE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>]*)?/?>").unwrap());

fn strip_tags(input: &str) -> String {
    remove_until_stable(&RE_TAG, input)
}

// ── Rule 5: Bracketed annotations ────────────────────────────────────────────

// Matches innermost brackets; nesting is peeled one layer per round.
static RE_BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());

fn strip_bracketed(input: &str) -> String {
    remove_until_stable(&RE_BRACKETED, input)
}

/// Delete every match of `re`, repeating while deletions expose new matches.
fn remove_until_stable(re: &Regex, input: &str) -> String {
    let mut current = input.to_string();
    while re.is_match(&current) {
        current = re.replace_all(&current, "").into_owned();
    }
    current
}

// ── Rule 6: Emphasis and heading markers ─────────────────────────────────────

static RE_UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

fn strip_emphasis(input: &str) -> String {
    let s: String = input.chars().filter(|c| !matches!(c, '*' | '#')).collect();
    RE_UNDERSCORE_RUN.replace_all(&s, "").into_owned()
}

// ── Rule 7: Literal escape sequences ─────────────────────────────────────────

static RE_LITERAL_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[ntr]").unwrap());

fn replace_literal_escapes(input: &str) -> String {
    RE_LITERAL_ESCAPE.replace_all(input, " ").into_owned()
}

// ── Rule 8: Stage directions ─────────────────────────────────────────────────

static RE_STAGE_DIRECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\((?:short |long |brief |dramatic )?(?:pause|laughs?|laughter|sighs?|music|applause|chuckles?)\)",
    )
    .unwrap()
});

fn strip_stage_directions_rule(input: &str) -> String {
    RE_STAGE_DIRECTION.replace_all(input, "").into_owned()
}

// ── Rule 9: Collapse whitespace, keep paragraphs ─────────────────────────────

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_PARAGRAPH_BREAK
        .split(input)
        .map(|para| para.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|para| !para.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Rule 10: Spacing around punctuation ──────────────────────────────────────

static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" +([,.;:!?])").unwrap());

fn normalise_punctuation(input: &str) -> String {
    RE_SPACE_BEFORE_PUNCT.replace_all(input, "$1").into_owned()
}

// ── Rule 11: Space after punctuation ─────────────────────────────────────────

// A letter glued to the punctuation gets one space; `3.14` and `1,000` keep theirs.
static RE_PUNCT_THEN_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([,.;:!?])(\p{L})").unwrap());

fn space_after_punctuation(input: &str) -> String {
    RE_PUNCT_THEN_LETTER.replace_all(input, "$1 $2").into_owned()
}

// ── Rule 12: Trim ────────────────────────────────────────────────────────────

fn trim(input: &str) -> String {
    input.trim().to_string()
}
