//! CSS Optimizer Module
//! Unused CSS removal: harvests the selectors a page uses and drops rules
//! that match none of them.

use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::selector_matcher;

/// Glob patterns (fnmatch style) for selectors that are never removed
#[derive(Debug, Clone, Default)]
pub struct Safelist {
    patterns: Vec<glob::Pattern>,
}

impl Safelist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| {
                let normalized = normalize_selector(p.as_ref());
                match glob::Pattern::new(&normalized) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!("CSS safelist: Ignoring invalid pattern {:?}: {}", p.as_ref(), e);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Check if a selector matches any safelist pattern
    pub fn matches(&self, selector: &str) -> bool {
        let normalized = normalize_selector(selector);
        self.patterns.iter().any(|p| p.matches(&normalized))
    }
}

/// A parsed `selectors { block }` unit
#[derive(Debug, PartialEq)]
pub struct CssRule<'a> {
    /// Full rule text, selectors and block included
    pub text: &'a str,
    pub selectors: Vec<&'a str>,
}

/// Unused CSS processor
pub struct CssOptimizer {
    /// Selectors used in HTML
    used_selectors: HashSet<String>,
}

impl CssOptimizer {
    /// Build from the markup of the page the CSS is filtered for
    pub fn from_html(html: &str) -> Self {
        Self {
            used_selectors: extract_used_selectors(html),
        }
    }

    /// Remove unused CSS rules, keeping cascade order.
    ///
    /// Malformed input yields a partial or empty result, never an error.
    pub fn remove_unused_css(&self, css: &str, safelist: &Safelist) -> String {
        let mut result = String::with_capacity(css.len());
        let mut removed_rules = 0;
        let mut kept_rules = 0;

        for rule in split_rules(css) {
            let keep = rule.selectors.iter().any(|selector| {
                safelist.matches(selector) || selector_matcher::is_live(selector, &self.used_selectors)
            });

            if keep {
                result.push_str(rule.text);
                result.push('\n');
                kept_rules += 1;
            } else {
                removed_rules += 1;
            }
        }

        tracing::debug!(
            "CSS tree-shake: {} rules removed, {} kept, {} -> {} bytes",
            removed_rules,
            kept_rules,
            css.len(),
            result.len()
        );

        result
    }
}

/// Filter `css` down to the rules used by `html`
pub fn filter(css: &str, html: &str, safelist: &Safelist) -> String {
    CssOptimizer::from_html(html).remove_unused_css(css, safelist)
}

/// Extract all selectors used in HTML: tag names, `#id` and `.class`
pub fn extract_used_selectors(html: &str) -> HashSet<String> {
    let document = Html::parse_document(html);
    let mut used = HashSet::new();

    if let Ok(selector) = Selector::parse("[class]") {
        for element in document.select(&selector) {
            if let Some(classes) = element.value().attr("class") {
                for class in classes.split_whitespace() {
                    used.insert(format!(".{}", class));
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("[id]") {
        for element in document.select(&selector) {
            if let Some(id) = element.value().attr("id") {
                let id = id.trim();
                if !id.is_empty() {
                    used.insert(format!("#{}", id));
                }
            }
        }
    }

    for node in document.root_element().descendants() {
        if let Some(el) = node.value().as_element() {
            used.insert(el.name().to_lowercase());
        }
    }

    used
}

/// Split CSS into rules with a brace-balanced scan.
///
/// A rule runs from its selector text to the brace closing its block, so
/// `@media` blocks come back whole. Block-less statements (`@import ...;`)
/// are rules of their own. A block still open at the end of input is closed
/// by the end of input, as CSS error recovery does; trailing text without a
/// block is dropped.
pub fn split_rules(css: &str) -> Vec<CssRule<'_>> {
    let bytes = css.as_bytes();
    let mut rules = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(open_rel) = css[pos..].find('{') else {
            push_statements(&mut rules, &css[pos..]);
            break;
        };
        let open = pos + open_rel;

        let close = find_block_end(bytes, open).unwrap_or_else(|| {
            tracing::debug!("CSS tree-shake: Block at byte {} runs to end of input", open);
            bytes.len() - 1
        });

        // A stray "}" before the selector is not part of it
        let mut start = pos + css[pos..open].rfind('}').map(|i| i + 1).unwrap_or(0);
        if let Some(semi) = css[start..open].rfind(';') {
            push_statements(&mut rules, &css[start..=start + semi]);
            start += semi + 1;
        }

        let selector_text = css[start..open].trim();
        rules.push(CssRule {
            text: css[start..=close].trim(),
            selectors: split_selectors(selector_text),
        });

        pos = close + 1;
    }

    rules
}

fn push_statements<'a>(rules: &mut Vec<CssRule<'a>>, text: &'a str) {
    let text = text.trim();
    if text.starts_with('@') && text.ends_with(';') {
        rules.push(CssRule {
            text,
            selectors: vec![text],
        });
    }
}

fn find_block_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    None
}

/// Split a selector list on top-level commas
fn split_selectors(selector_text: &str) -> Vec<&str> {
    let mut selectors = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in selector_text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth <= 0 => {
                selectors.push(selector_text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    selectors.push(selector_text[start..].trim());

    selectors.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Collapse whitespace and drop it around combinators, so "ul > li" and
/// "ul>li" match the same safelist pattern
fn normalize_selector(selector: &str) -> String {
    let collapsed = selector.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            let prev = if i > 0 { chars[i - 1] } else { ' ' };
            let next = chars.get(i + 1).copied().unwrap_or(' ');
            if matches!(prev, '>' | '+' | '~' | ',') || matches!(next, '>' | '+' | '~' | ',') {
                continue;
            }
        }
        out.push(c);
    }

    out
}
