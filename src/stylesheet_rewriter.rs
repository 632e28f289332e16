//! Per-Request Stylesheet Rewriter
//! Called once for every stylesheet `<link>` the site renders. Points the
//! tag at a processed copy in the cache, or hands it back untouched.

use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::cache_store::CacheStore;
use crate::config::Config;
use crate::css_pipeline::{CssPipeline, OptimizationParams};
use crate::error::OptimizerError;
use crate::fetcher::download_resource;
use crate::resolver::{content_hash, ResolvedStylesheet, StylesheetResolver};

/// Marker for tags that were already rewritten
pub const PROCESSED_ATTR: &str = "data-minify";

/// One `style_loader_tag` invocation
#[derive(Debug, Clone, Deserialize)]
pub struct StyleTag {
    pub tag: String,
    #[serde(default)]
    pub handle: String,
    pub href: String,
    #[serde(default)]
    pub media: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderContext {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_preview: bool,
}

/// The page being rendered, needed only when unused CSS is filtered
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: Option<String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RewriterSettings {
    pub remove_unused_css: bool,
    pub minify_css: bool,
    pub excluded_patterns: Vec<String>,
}

impl RewriterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remove_unused_css: config.remove_unused_css,
            minify_css: config.minify_css,
            excluded_patterns: config.excluded_patterns.clone(),
        }
    }

    fn params(&self) -> OptimizationParams {
        OptimizationParams {
            filter_unused: self.remove_unused_css,
            minify: self.minify_css,
            mobile_variant: false,
            item_type: "stylesheet".to_string(),
        }
    }
}

pub struct StylesheetRewriter {
    settings: RewriterSettings,
    resolver: Arc<StylesheetResolver>,
    pipeline: Arc<CssPipeline>,
    store: CacheStore,
}

impl StylesheetRewriter {
    pub fn new(
        settings: RewriterSettings,
        resolver: Arc<StylesheetResolver>,
        pipeline: Arc<CssPipeline>,
        store: CacheStore,
    ) -> Self {
        Self {
            settings,
            resolver,
            pipeline,
            store,
        }
    }

    /// Rewrite one stylesheet tag. Never fails: any problem yields the
    /// input tag unchanged.
    pub async fn process_stylesheet(&self, tag: &StyleTag, ctx: &RenderContext, page: &PageContext) -> String {
        if !self.should_process(tag, ctx) {
            return tag.tag.clone();
        }

        match self.rewrite(tag, page).await {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => tag.tag.clone(),
            Err(e) => {
                tracing::debug!("CSS rewriter: Serving original {} ({}): {}", tag.handle, tag.href, e);
                tag.tag.clone()
            }
        }
    }

    fn should_process(&self, tag: &StyleTag, ctx: &RenderContext) -> bool {
        if ctx.is_admin || ctx.is_preview {
            return false;
        }

        if !self.settings.remove_unused_css && !self.settings.minify_css {
            return false;
        }

        if tag.href.trim().is_empty() || tag.tag.contains(PROCESSED_ATTR) {
            return false;
        }

        !self
            .settings
            .excluded_patterns
            .iter()
            .any(|pattern| tag.href.contains(pattern.as_str()))
    }

    async fn rewrite(&self, tag: &StyleTag, page: &PageContext) -> Result<Option<String>, OptimizerError> {
        let params = self.settings.params();
        let resolved = self.resolver.resolve(&tag.href).await?;

        let scope = if params.filter_unused { page_scope(page) } else { None };
        if params.filter_unused && scope.is_none() {
            tracing::debug!("CSS rewriter: No page context for {}, skipping", tag.href);
            return Ok(None);
        }

        let key = fingerprint(&resolved, &params, scope.as_deref());
        let Some(cache_url) = self.store.url_for(&key) else {
            return Ok(None);
        };

        if self.store.exists(&key) {
            tracing::debug!("CSS rewriter: Cache hit {} for {}", key, tag.href);
        } else {
            let html = if params.filter_unused {
                Some(self.page_markup(page).await?)
            } else {
                None
            };

            let processed = self
                .pipeline
                .transform(&resolved.content, &params, || html.unwrap_or_default());
            self.store.write(&key, processed.as_bytes())?;

            let source = resolved
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| resolved.url.clone());
            tracing::info!(
                "CSS rewriter: {} [{}] {} -> {} bytes from {}",
                tag.handle,
                tag.media,
                resolved.content.len(),
                processed.len(),
                source
            );
        }

        Ok(rewrite_tag(&tag.tag, &tag.href, &cache_url))
    }

    /// Markup of the page being rendered, fetched when the host sent only
    /// its URL
    async fn page_markup(&self, page: &PageContext) -> Result<String, OptimizerError> {
        if let Some(html) = &page.html {
            return Ok(html.clone());
        }

        match &page.url {
            Some(url) => download_resource(self.resolver.fetcher(), url).await,
            None => Err(OptimizerError::NoCssContent),
        }
    }
}

/// Identity of the page unused CSS is filtered against
fn page_scope(page: &PageContext) -> Option<String> {
    match (&page.url, &page.html) {
        (Some(url), _) => Some(format!("url:{}", url)),
        (None, Some(html)) => Some(format!("html:{}", content_hash(html))),
        (None, None) => None,
    }
}

/// Cache key for a processed stylesheet: stable while the stylesheet is
/// unchanged, new as soon as its change signal moves
pub fn fingerprint(resolved: &ResolvedStylesheet, params: &OptimizationParams, scope: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resolved.url.as_bytes());
    hasher.update(b"\n");
    hasher.update(resolved.change_signal.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.cache_tag().as_bytes());
    if let Some(scope) = scope {
        hasher.update(b"\n");
        hasher.update(scope.as_bytes());
    }
    format!("{}.css", hex::encode(hasher.finalize()))
}

/// Swap the href for the cached URL and mark the tag as processed.
/// `None` when the href can't be found in the tag.
fn rewrite_tag(tag: &str, href: &str, cache_url: &str) -> Option<String> {
    let candidates = [
        href.to_string(),
        href.replace('&', "&#038;"),
        href.replace('&', "&amp;"),
    ];
    let found = candidates.iter().find(|c| tag.contains(c.as_str()))?;

    let link_pos = tag.to_ascii_lowercase().find("<link")?;
    let mut rewritten = tag.replace(found.as_str(), cache_url);
    rewritten.insert_str(link_pos + "<link".len(), &format!(" {}=\"1\"", PROCESSED_ATTR));

    Some(rewritten)
}
