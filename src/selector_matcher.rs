//! Selector Matcher
//! Decides whether a selector is live for a page, given the tag names,
//! `#ids` and `.classes` harvested from its markup.

use std::collections::HashSet;

/// Selectors that style the document frame and are never pruned.
const STRUCTURAL_SELECTORS: &[&str] = &["*", "html", "body"];

/// Check whether a selector should be kept for a page.
///
/// The test is a permissive substring match against the used signals.
/// A short selector that happens to be a substring of an unrelated signal
/// (`.nav` in `.navbar`) is kept.
pub fn is_live(selector: &str, used_signals: &HashSet<String>) -> bool {
    let selector = selector.trim();

    if STRUCTURAL_SELECTORS.contains(&selector) {
        return true;
    }

    // @media, @keyframes, @font-face
    if selector.starts_with('@') {
        return true;
    }

    if appears_in_signals(selector, used_signals) {
        return true;
    }

    // For ".nav a:hover", "ul > li.item" and friends check every simple part.
    // Selectors with nothing to check (":root", "[hidden]") can't be judged
    // from markup and stay.
    let parts = simple_parts(selector);
    if parts.is_empty() {
        return true;
    }

    parts.iter().any(|part| part_is_used(part, used_signals))
}

fn appears_in_signals(needle: &str, used_signals: &HashSet<String>) -> bool {
    used_signals.contains(needle) || used_signals.iter().any(|used| used.contains(needle))
}

/// Tags must be present by name. Classes and ids only match signals of the
/// same kind, so `a` never matches `head` and `.x` never matches `#x`.
fn part_is_used(part: &str, used_signals: &HashSet<String>) -> bool {
    match part.chars().next() {
        Some(sigil @ ('.' | '#')) => used_signals
            .iter()
            .any(|used| used.starts_with(sigil) && used.contains(part)),
        _ => used_signals.contains(part),
    }
}

/// Break a selector into its tag, `.class` and `#id` parts.
///
/// Pseudo-classes, pseudo-elements, attribute brackets and functional
/// arguments (`:not(.x)`) are skipped.
pub fn simple_parts(selector: &str) -> Vec<String> {
    let chars: Vec<char> = selector.chars().collect();
    let len = chars.len();
    let mut parts = Vec::new();
    let mut compound_start = true;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        match c {
            c if c.is_whitespace() || c == '>' || c == '+' || c == '~' => {
                compound_start = true;
                i += 1;
            }
            '[' => {
                i = skip_balanced(&chars, i, '[', ']');
                compound_start = false;
            }
            '(' => {
                i = skip_balanced(&chars, i, '(', ')');
                compound_start = false;
            }
            ':' => {
                i += 1;
                while i < len && (chars[i] == ':' || is_ident_char(chars[i])) {
                    i += 1;
                }
                compound_start = false;
            }
            '.' | '#' => {
                let (ident, next) = read_ident(&chars, i + 1);
                if !ident.is_empty() {
                    parts.push(format!("{}{}", c, ident));
                }
                i = next;
                compound_start = false;
            }
            c if compound_start && is_ident_char(c) => {
                let (ident, next) = read_ident(&chars, i);
                if ident.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false) {
                    parts.push(ident.to_lowercase());
                }
                i = next;
                compound_start = false;
            }
            _ => {
                compound_start = false;
                i += 1;
            }
        }
    }

    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || c == '\\'
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    let mut ident = String::new();
    while i < chars.len() && is_ident_char(chars[i]) {
        if chars[i] == '\\' && i + 1 < chars.len() {
            // escaped character, e.g. ".md\:flex"
            ident.push(chars[i + 1]);
            i += 2;
            continue;
        }
        ident.push(chars[i]);
        i += 1;
    }
    (ident, i)
}

fn skip_balanced(chars: &[char], start: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == open {
            depth += 1;
        } else if chars[i] == close {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    chars.len()
}
