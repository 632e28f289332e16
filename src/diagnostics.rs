//! Unused CSS diagnostics
//! Reports, per stylesheet linked from a page, how much unused rule
//! removal would save.

use futures::future::join_all;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::critical_css::is_stylesheet_link;
use crate::css_optimizer::{CssOptimizer, Safelist};
use crate::error::OptimizerError;
use crate::fetcher::download_resource;
use crate::resolver::StylesheetResolver;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnusedCssReport {
    pub file: String,
    pub original_size: usize,
    pub optimized_size: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Extract external CSS links from HTML, absolutized and deduplicated
pub fn extract_css_links(html: &str, resolver: &StylesheetResolver) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("link[href]") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for href in document
        .select(&selector)
        .filter(|element| is_stylesheet_link(element.value()))
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with("data:"))
    {
        let url = resolver.normalize_url(href);
        if !links.contains(&url) {
            links.push(url);
        }
    }
    links
}

/// Fetch `url` and measure the unused CSS filter on every linked stylesheet
pub async fn test_unused_css(
    url: &str,
    resolver: &StylesheetResolver,
    safelist: &Safelist,
) -> Result<Vec<UnusedCssReport>, OptimizerError> {
    let html = download_resource(resolver.fetcher(), url).await?;
    if html.trim().is_empty() {
        return Err(OptimizerError::EmptyResponse { url: url.to_string() });
    }

    let optimizer = CssOptimizer::from_html(&html);
    let files = extract_css_links(&html, resolver);

    tracing::info!("Unused CSS test: {} stylesheets on {}", files.len(), url);

    let resolved = join_all(files.iter().map(|file| resolver.resolve(file))).await;

    let reports = files
        .into_iter()
        .zip(resolved)
        .map(|(file, result)| match result {
            Ok(stylesheet) => {
                let optimized = optimizer.remove_unused_css(&stylesheet.content, safelist);
                UnusedCssReport {
                    file,
                    original_size: stylesheet.content.len(),
                    optimized_size: optimized.len(),
                    success: true,
                    error: None,
                }
            }
            Err(e) => UnusedCssReport {
                file,
                original_size: 0,
                optimized_size: 0,
                success: false,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(reports)
}
