//! HTMLWordPress CSS Service
//! Stylesheet rewriting, unused CSS removal and critical CSS generation for
//! WordPress sites

mod cache_store;
mod config;
mod critical_css;
mod css_optimizer;
mod css_pipeline;
mod diagnostics;
mod error;
mod fetcher;
mod handlers;
mod resolver;
mod selector_matcher;
mod stylesheet_rewriter;

#[cfg(test)]
mod test_verification;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache_store::{CacheInvalidator, CacheStore, Invalidator};
use crate::config::Config;
use crate::critical_css::CriticalCssGenerator;
use crate::css_optimizer::Safelist;
use crate::css_pipeline::CssPipeline;
use crate::fetcher::{HttpFetch, ReqwestFetcher};
use crate::resolver::StylesheetResolver;
use crate::stylesheet_rewriter::{RewriterSettings, StylesheetRewriter};

#[derive(Clone)]
pub struct AppState {
    pub rewriter: Arc<StylesheetRewriter>,
    pub generator: Arc<CriticalCssGenerator>,
    pub resolver: Arc<StylesheetResolver>,
    pub pipeline: Arc<CssPipeline>,
    pub invalidator: Arc<dyn Invalidator>,
    pub cache_roots: Vec<String>,
}

impl AppState {
    pub fn new(config: &Config, fetcher: Arc<dyn HttpFetch>) -> Self {
        let resolver = Arc::new(StylesheetResolver::from_config(config, fetcher));
        let pipeline = Arc::new(CssPipeline::new(Safelist::new(&config.safelist)));

        let min_store = CacheStore::new(&config.min_cache_dir, Some(config.min_cache_url.clone()));
        let critical_store = CacheStore::new(&config.critical_css_dir, None);
        let invalidator = CacheInvalidator::new(vec![min_store.clone(), critical_store.clone()]);
        let cache_roots = invalidator
            .roots()
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        Self {
            rewriter: Arc::new(StylesheetRewriter::new(
                RewriterSettings::from_config(config),
                Arc::clone(&resolver),
                Arc::clone(&pipeline),
                min_store,
            )),
            generator: Arc::new(CriticalCssGenerator::new(
                Arc::clone(&resolver),
                Arc::clone(&pipeline),
                critical_store,
            )),
            resolver,
            pipeline,
            invalidator: Arc::new(invalidator),
            cache_roots,
        }
    }
}

pub fn build_router(state: AppState, min_cache_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/stylesheet/rewrite", post(handlers::rewrite_stylesheet))
        .route("/api/v1/cache/purge", post(handlers::purge_cache))
        .route("/api/v1/critical-css/generate", post(handlers::generate_critical_css))
        .route("/api/v1/unused-css/test", post(handlers::unused_css_test))
        .nest_service("/cache/min", ServeDir::new(min_cache_dir))
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "htmlwordpress_css=debug,info".into()),
        ))
        .init();

    let config = Config::from_env();

    tracing::info!("Starting HTMLWordPress CSS service on {}", config.address());
    tracing::info!(
        "Unused CSS removal: {}, minification: {}, {} safelist patterns",
        config.remove_unused_css,
        config.minify_css,
        config.safelist.len()
    );

    let fetcher = ReqwestFetcher::new(config.http_timeout).context("Failed to create HTTP client")?;
    let state = AppState::new(&config, Arc::new(fetcher));

    if let Err(e) = state.generator.store().ensure_writable() {
        tracing::warn!("Critical CSS: {}", e);
    }

    let app = build_router(state, &config.min_cache_dir);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.address())
        .await
        .with_context(|| format!("Failed to bind {}", config.address()))?;

    tracing::info!("Server listening on http://{}", config.address());

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::StubFetcher;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(root: &Path, fetcher: StubFetcher) -> Router {
        let config = test_support::config(root);
        build_router(AppState::new(&config, Arc::new(fetcher)), &config.min_cache_dir)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let response = app(dir.path(), StubFetcher::new())
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_rewrite_then_serve_cached_stylesheet() {
        let dir = TempDir::new().unwrap();
        let theme = dir.path().join("wp-content/themes/t");
        std::fs::create_dir_all(&theme).unwrap();
        std::fs::write(theme.join("style.css"), ".site { margin: 0 } .unused { color: red }").unwrap();

        let app = app(dir.path(), StubFetcher::new());
        let href = "https://example.com/wp-content/themes/t/style.css?ver=1";
        let request = post_json(
            "/api/v1/stylesheet/rewrite",
            json!({
                "tag": format!("<link rel='stylesheet' id='t-css' href='{}' media='all' />", href),
                "handle": "t",
                "href": href,
                "media": "all",
                "page_url": "https://example.com/",
                "page_html": "<html><body><div class=\"site\"></div></body></html>"
            }),
        );

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["rewritten"], true);

        let tag = body["tag"].as_str().unwrap();
        assert!(tag.contains("data-minify=\"1\""));
        let prefix = "https://example.com/wp-content/cache/min/";
        let start = tag.find(prefix).unwrap() + prefix.len();
        let file = &tag[start..start + tag[start..].find('\'').unwrap()];

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/cache/min/{}", file))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b".site{margin:0}");
    }

    #[tokio::test]
    async fn test_rewrite_requires_tag() {
        let dir = TempDir::new().unwrap();
        let response = app(dir.path(), StubFetcher::new())
            .oneshot(post_json("/api/v1/stylesheet/rewrite", json!({"tag": "", "href": "/a.css"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_generate_reports_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let response = app(dir.path(), StubFetcher::new())
            .oneshot(post_json(
                "/api/v1/critical-css/generate",
                json!({"url": "https://example.com/", "path": "front_page", "params": {"item_type": "homepage"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "fetch_failed");
        assert!(body["message"].as_str().unwrap().contains("https://example.com/"));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let dir = TempDir::new().unwrap();
        let page = "<html><head><style>main{display:block} aside{float:left}</style></head><body><main></main></body></html>";
        let fetcher = StubFetcher::new().with("https://example.com/", 200, page);

        let response = app(dir.path(), fetcher)
            .oneshot(post_json(
                "/api/v1/critical-css/generate",
                json!({"url": "https://example.com/", "path": "front_page", "params": {"item_type": "homepage"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], "generation_successful");
        assert_eq!(body["message"], "Successfully generated critical CSS for homepage");

        let key = body["key"].as_str().unwrap();
        let stored = std::fs::read_to_string(dir.path().join("wp-content/cache/macp/critical-css").join(key)).unwrap();
        assert_eq!(stored, "main{display:block}");
    }

    #[tokio::test]
    async fn test_purge_clears_both_caches() {
        let dir = TempDir::new().unwrap();
        let min = dir.path().join("wp-content/cache/min");
        let critical = dir.path().join("wp-content/cache/macp/critical-css/front_page");
        std::fs::create_dir_all(&min).unwrap();
        std::fs::create_dir_all(&critical).unwrap();
        std::fs::write(min.join("a.css"), "a{}").unwrap();
        std::fs::write(critical.join("b.css"), "b{}").unwrap();

        let response = app(dir.path(), StubFetcher::new())
            .oneshot(post_json("/api/v1/cache/purge", json!({"event": "switch_theme"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["purged"].as_array().unwrap().len(), 2);
        assert!(!min.join("a.css").exists());
        assert!(!critical.join("b.css").exists());
    }

    #[tokio::test]
    async fn test_unused_css_rejects_relative_url() {
        let dir = TempDir::new().unwrap();
        let response = app(dir.path(), StubFetcher::new())
            .oneshot(post_json("/api/v1/unused-css/test", json!({"url": "/about/"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
