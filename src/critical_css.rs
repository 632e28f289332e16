//! Critical CSS Generator
//! Fetches a rendered page, runs every stylesheet it references through the
//! transform pipeline and stores the concatenation as one artifact.

use std::sync::Arc;

use futures::future::join_all;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::cache_store::CacheStore;
use crate::css_optimizer::CssOptimizer;
use crate::css_pipeline::{CssPipeline, OptimizationParams};
use crate::error::OptimizerError;
use crate::fetcher::download_resource;
use crate::resolver::{content_hash, StylesheetResolver};

/// Successful generation, as reported to the admin UI
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub code: &'static str,
    pub message: String,
    pub key: String,
    pub url: String,
    pub bytes: usize,
}

/// A stylesheet found in the page, in document order
#[derive(Debug, Clone, PartialEq)]
pub enum StyleSource {
    Link(String),
    Inline(String),
}

pub struct CriticalCssGenerator {
    resolver: Arc<StylesheetResolver>,
    pipeline: Arc<CssPipeline>,
    store: CacheStore,
}

impl CriticalCssGenerator {
    pub fn new(resolver: Arc<StylesheetResolver>, pipeline: Arc<CssPipeline>, store: CacheStore) -> Self {
        Self {
            resolver,
            pipeline,
            store,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Generate and persist critical CSS for `url` under `variant_key`
    pub async fn generate(
        &self,
        url: &str,
        variant_key: &str,
        params: &OptimizationParams,
    ) -> Result<GenerationOutcome, OptimizerError> {
        self.store.ensure_writable()?;
        let key = critical_key(url, variant_key);

        tracing::info!("Critical CSS: Generating {} for {} ({})", key, url, params.item_type);

        let html = download_resource(self.resolver.fetcher(), url).await?;
        if html.trim().is_empty() {
            return Err(OptimizerError::EmptyResponse { url: url.to_string() });
        }

        let css = self.extract_critical_css(&html, params).await;
        if css.is_empty() {
            return Err(OptimizerError::NoCssContent);
        }

        self.store.write(&key, css.as_bytes())?;

        tracing::info!("Critical CSS: Stored {} bytes as {}", css.len(), key);

        Ok(GenerationOutcome {
            code: "generation_successful",
            message: format!("Successfully generated critical CSS for {}", params.item_type),
            key,
            url: url.to_string(),
            bytes: css.len(),
        })
    }

    async fn extract_critical_css(&self, html: &str, params: &OptimizationParams) -> String {
        let sources = extract_style_sources(html);

        let contents = join_all(sources.iter().map(|source| async move {
            match source {
                StyleSource::Link(href) => match self.resolver.resolve(href).await {
                    Ok(resolved) => Some(resolved.content),
                    Err(e) => {
                        tracing::warn!("Critical CSS: Skipping {}: {}", href, e);
                        None
                    }
                },
                StyleSource::Inline(css) => Some(css.clone()),
            }
        }))
        .await;

        // One harvest of the page's selectors serves every stylesheet
        let optimizer = params.filter_unused.then(|| CssOptimizer::from_html(html));

        let mut critical_css = String::new();
        for css in contents.into_iter().flatten() {
            let processed = match &optimizer {
                Some(optimizer) => self.pipeline.transform_for(&css, params, optimizer),
                None => self.pipeline.transform(&css, params, String::new),
            };
            critical_css.push_str(&processed);
        }

        critical_css
    }
}

/// Enumerate `<link rel="stylesheet">` and `<style>` elements in one
/// document-order walk. Links with an empty href are skipped.
pub fn extract_style_sources(html: &str) -> Vec<StyleSource> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("link, style") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let el = element.value();
            if el.name() == "style" {
                let css: String = element.text().collect();
                return Some(StyleSource::Inline(css));
            }

            let href = el.attr("href").map(str::trim).unwrap_or("");

            if is_stylesheet_link(el) && !href.is_empty() {
                Some(StyleSource::Link(href.to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// `rel` carries a `stylesheet` token, in any letter case
pub fn is_stylesheet_link(el: &scraper::node::Element) -> bool {
    el.attr("rel")
        .map(|rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case("stylesheet")))
        .unwrap_or(false)
}

/// Cache key for a page's critical CSS: `<variant>/<url hash>.css`
pub fn critical_key(url: &str, variant_key: &str) -> String {
    let variant: String = variant_key
        .trim()
        .trim_end_matches(".css")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let variant = if variant.is_empty() { "default".to_string() } else { variant };

    format!("{}/{}.css", variant, &content_hash(url)[..16])
}
