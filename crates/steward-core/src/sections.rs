//! Payload section checking for PR narratives.
//!
//! A section counts as present when the body has a heading-like line whose
//! normalized text contains one of the section's aliases as a whole word.
//! The prose under the heading may be in any language; only the heading token
//! has to be recognizable.

use serde::{Deserialize, Serialize};

use crate::policy::SectionSpec;

/// Outcome of checking a body against the required sections.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionCheckResult {
    /// Missing section names, in policy order.
    pub missing_sections: Vec<String>,
}

impl SectionCheckResult {
    pub fn is_complete(&self) -> bool {
        self.missing_sections.is_empty()
    }
}

/// A normalized line and whether it carried heading markup.
#[derive(Debug, PartialEq, Eq)]
struct HeadingKey {
    text: String,
    marked: bool,
}

/// A line ending in a colon reads as a label only up to this many words.
const MAX_LABEL_WORDS: usize = 5;

fn is_wrap_char(c: char) -> bool {
    matches!(c, '*' | '_' | '`') || c.is_whitespace()
}

fn heading_key(line: &str) -> Option<HeadingKey> {
    let mut s = line.trim();
    if s.is_empty() {
        return None;
    }
    let mut marked = false;

    if s.starts_with('#') {
        marked = true;
        s = s.trim_start_matches('#').trim_start();
    } else if let Some(rest) = ["- ", "* ", "+ "].iter().find_map(|b| s.strip_prefix(b)) {
        s = rest.trim_start();
    }

    if s.starts_with("**") || s.starts_with("__") {
        marked = true;
    }
    s = s.trim_matches(is_wrap_char);

    if let Some(stripped) = s.strip_suffix(':').or_else(|| s.strip_suffix('：')) {
        marked |= stripped.split_whitespace().count() <= MAX_LABEL_WORDS;
        s = stripped;
    }
    let text = s.trim_matches(is_wrap_char).to_lowercase();
    if text.is_empty() {
        return None;
    }
    Some(HeadingKey { text, marked })
}

/// `alias` occurs in `text` with no ASCII letter or digit on either side.
/// Scripts written without spaces still match inside a longer run.
fn contains_word(text: &str, alias: &str) -> bool {
    if alias.is_empty() {
        return false;
    }
    text.match_indices(alias).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + alias.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

fn satisfies(key: &HeadingKey, spec: &SectionSpec) -> bool {
    spec.aliases.iter().any(|alias| {
        if key.marked {
            contains_word(&key.text, alias)
        } else {
            key.text == *alias
        }
    })
}

/// Check `body` against `required`. An absent or empty body misses every
/// section.
pub fn check_sections(body: Option<&str>, required: &[SectionSpec]) -> SectionCheckResult {
    let keys: Vec<HeadingKey> = body
        .unwrap_or_default()
        .lines()
        .filter_map(heading_key)
        .collect();

    let missing_sections = required
        .iter()
        .filter(|spec| !keys.iter().any(|key| satisfies(key, spec)))
        .map(|spec| spec.name.clone())
        .collect();

    SectionCheckResult { missing_sections }
}
