//! API Handlers

use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::cache_store::Invalidator;
use crate::critical_css::GenerationOutcome;
use crate::css_pipeline::OptimizationParams;
use crate::diagnostics::{self, UnusedCssReport};
use crate::error::AppError;
use crate::stylesheet_rewriter::{PageContext, RenderContext, StyleTag};
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// One stylesheet tag from the page render hook
#[derive(Deserialize)]
pub struct RewriteRequest {
    #[serde(flatten)]
    pub style: StyleTag,
    #[serde(default)]
    pub context: RenderContext,
    pub page_url: Option<String>,
    pub page_html: Option<String>,
}

#[derive(Serialize)]
pub struct RewriteResponse {
    pub tag: String,
    pub rewritten: bool,
}

/// Stylesheet tag rewrite. Answers with the original tag on any failure.
pub async fn rewrite_stylesheet(
    State(state): State<AppState>,
    Json(req): Json<RewriteRequest>,
) -> Result<Json<RewriteResponse>, AppError> {
    if req.style.tag.is_empty() {
        return Err(AppError::BadRequest("tag is required".to_string()));
    }

    let page = PageContext {
        url: req.page_url,
        html: req.page_html,
    };
    let tag = state
        .rewriter
        .process_stylesheet(&req.style, &req.context, &page)
        .await;

    Ok(Json(RewriteResponse {
        rewritten: tag != req.style.tag,
        tag,
    }))
}

#[derive(Deserialize)]
pub struct PurgeRequest {
    /// Host event that triggered the purge (save_post, switch_theme, ...)
    #[serde(default)]
    pub event: Option<String>,
}

#[derive(Serialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub purged: Vec<String>,
}

/// Drop every cached artifact
pub async fn purge_cache(
    State(state): State<AppState>,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>, AppError> {
    tracing::info!(
        "Cache purge requested ({})",
        req.event.as_deref().unwrap_or("manual")
    );

    let invalidator = state.invalidator.clone();
    tokio::task::spawn_blocking(move || Invalidator::purge(invalidator.as_ref())).await??;

    Ok(Json(PurgeResponse {
        success: true,
        purged: state.cache_roots.clone(),
    }))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub url: String,
    /// Variant key the artifact is stored under, e.g. `mobile-front_page`
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub params: OptimizationParams,
}

/// Critical CSS generation for one page
pub async fn generate_critical_css(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerationOutcome>, AppError> {
    validate_url(&req.url)?;

    match state.generator.generate(&req.url, &req.path, &req.params).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            tracing::error!("Critical CSS: Generation failed for {}: {}", req.url, e);
            Err(e.into())
        }
    }
}

#[derive(Deserialize)]
pub struct UnusedCssRequest {
    pub url: String,
}

/// Report how much unused CSS removal saves per stylesheet of a page
pub async fn unused_css_test(
    State(state): State<AppState>,
    Json(req): Json<UnusedCssRequest>,
) -> Result<Json<Vec<UnusedCssReport>>, AppError> {
    validate_url(&req.url)?;

    let reports = diagnostics::test_unused_css(&req.url, &state.resolver, state.pipeline.safelist()).await?;
    Ok(Json(reports))
}

fn validate_url(url: &str) -> Result<(), AppError> {
    if url.is_empty() {
        return Err(AppError::BadRequest("url is required".to_string()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::BadRequest(format!("url must be absolute: {}", url)));
    }
    Ok(())
}
