//! CSS Transform Pipeline
//! Comment stripping, whitespace collapsing, unused rule removal,
//! minification and mobile media-query stripping, always in that order.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::css_optimizer::{self, CssOptimizer, Safelist};

static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// One level of nested blocks inside the @media body
static MEDIA_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@media\s*[^{]+\{(?:[^{}]*\{[^{}]*\})*[^{}]*\}").unwrap()
});

/// How one transform run behaves
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationParams {
    #[serde(default = "default_true")]
    pub filter_unused: bool,
    #[serde(default = "default_true")]
    pub minify: bool,
    /// Strip `@media` blocks
    #[serde(default, rename = "is_mobile")]
    pub mobile_variant: bool,
    /// Label for reporting ("homepage", "single post", ...)
    #[serde(default = "default_item_type")]
    pub item_type: String,
}

impl Default for OptimizationParams {
    fn default() -> Self {
        Self {
            filter_unused: true,
            minify: true,
            mobile_variant: false,
            item_type: default_item_type(),
        }
    }
}

impl OptimizationParams {
    /// Short tag folded into cache fingerprints so that differently
    /// processed variants of one stylesheet never share a key
    pub fn cache_tag(&self) -> String {
        format!(
            "u{}m{}q{}",
            self.filter_unused as u8, self.minify as u8, self.mobile_variant as u8
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_item_type() -> String {
    "page".to_string()
}

/// Transform pipeline sharing one safelist across runs
pub struct CssPipeline {
    safelist: Safelist,
}

impl CssPipeline {
    pub fn new(safelist: Safelist) -> Self {
        Self { safelist }
    }

    pub fn safelist(&self) -> &Safelist {
        &self.safelist
    }

    /// Run the pipeline over `css`.
    ///
    /// `html_provider` is called only when unused rule filtering is enabled.
    pub fn transform<F>(&self, css: &str, params: &OptimizationParams, html_provider: F) -> String
    where
        F: FnOnce() -> String,
    {
        self.run(css, params, |css| {
            css_optimizer::filter(css, &html_provider(), &self.safelist)
        })
    }

    /// Same as [`transform`](Self::transform), filtering against selectors
    /// already harvested from the page. For callers processing many
    /// stylesheets of one page.
    pub fn transform_for(&self, css: &str, params: &OptimizationParams, optimizer: &CssOptimizer) -> String {
        self.run(css, params, |css| optimizer.remove_unused_css(css, &self.safelist))
    }

    fn run<F>(&self, css: &str, params: &OptimizationParams, remove_unused: F) -> String
    where
        F: FnOnce(&str) -> String,
    {
        let original_size = css.len();

        let mut css = strip_comments(css);
        css = collapse_whitespace(&css);

        if params.filter_unused {
            let filtered = remove_unused(&css);
            if filtered.trim().is_empty() && !css.is_empty() {
                tracing::warn!("CSS pipeline: Unused CSS filter emptied the stylesheet, keeping it unfiltered");
            } else {
                css = collapse_whitespace(&filtered);
            }
        }

        if params.minify {
            css = match minify_css(&css) {
                Ok(minified) => collapse_whitespace(&minified),
                Err(e) => {
                    tracing::debug!("CSS pipeline: Minification skipped: {}", e);
                    css
                }
            };
        }

        if params.mobile_variant {
            css = strip_media_queries(&css);
        }

        tracing::debug!(
            "CSS pipeline: {} -> {} bytes (filter={}, minify={}, mobile={})",
            original_size,
            css.len(),
            params.filter_unused,
            params.minify,
            params.mobile_variant
        );

        css
    }
}

/// Remove `/* ... */` comments
pub fn strip_comments(css: &str) -> String {
    COMMENTS.replace_all(css, "").into_owned()
}

/// Collapse whitespace runs to a single space and trim the ends
pub fn collapse_whitespace(css: &str) -> String {
    WHITESPACE.replace_all(css, " ").trim().to_string()
}

/// Minify CSS using lightningcss
pub fn minify_css(css: &str) -> Result<String, String> {
    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| format!("CSS parse error: {:?}", e))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS print error: {:?}", e))?;

    Ok(result.code)
}

/// Strip `@media` blocks for the mobile variant.
///
/// Repeats until nothing matches so that an inner block removed on one pass
/// can't expose a match for the next run. An `@media` whose body nests more
/// than one level deep is never matched and is left intact.
pub fn strip_media_queries(css: &str) -> String {
    let mut current = css.to_string();
    loop {
        let next = MEDIA_BLOCK.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    collapse_whitespace(&current)
}
