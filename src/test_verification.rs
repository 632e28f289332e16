//! End-to-end checks across the wired service

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::cache_store::{CacheStore, Invalidator};
use crate::css_optimizer::{self, Safelist};
use crate::css_pipeline::OptimizationParams;
use crate::fetcher::testing::StubFetcher;
use crate::stylesheet_rewriter::{PageContext, RenderContext, StyleTag};
use crate::test_support;
use crate::AppState;

const STYLE_URL: &str = "https://example.com/wp-content/themes/t/style.css?ver=2";

fn state(root: &Path, fetcher: StubFetcher) -> AppState {
    AppState::new(&test_support::config(root), Arc::new(fetcher))
}

fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| if e.path().is_dir() { count_files(&e.path()) } else { 1 })
        .sum()
}

fn style_tag(href: &str) -> StyleTag {
    StyleTag {
        tag: format!("<link rel='stylesheet' id='theme-css' href='{}' media='all' />\n", href),
        handle: "theme".to_string(),
        href: href.to_string(),
        media: "all".to_string(),
    }
}

fn page() -> PageContext {
    PageContext {
        url: Some("https://example.com/".to_string()),
        html: Some("<html><body><header class=\"masthead\"></header></body></html>".to_string()),
    }
}

#[test]
fn test_used_rule_kept_unused_dropped() {
    let css = ".used{color:red} .unused{color:blue}";
    let html = "<div class='used'></div>";

    let filtered = css_optimizer::filter(css, html, &Safelist::default());

    assert!(filtered.contains(".used{color:red}"));
    assert!(!filtered.contains(".unused"));
}

#[test]
fn test_comment_and_whitespace_stripping() {
    let dir = TempDir::new().unwrap();
    let state = state(dir.path(), StubFetcher::new());
    let params = OptimizationParams {
        filter_unused: false,
        minify: false,
        ..OptimizationParams::default()
    };

    let out = state
        .pipeline
        .transform("/* note */   .a{color:#fff}\n\n", &params, || unreachable!());

    assert_eq!(out, ".a{color:#fff}");
}

#[test]
fn test_generate_against_failing_fetch() {
    let dir = TempDir::new().unwrap();
    let state = state(dir.path(), StubFetcher::new());
    let url = "https://example.com/unreachable/";

    let err = tokio_test::block_on(state.generator.generate(url, "front_page", &OptimizationParams::default()))
        .unwrap_err();

    assert_eq!(err.code(), "fetch_failed");
    assert!(err.to_string().contains(url));
    assert_eq!(count_files(state.generator.store().root()), 0);
}

#[test]
fn test_concurrent_identical_writes_publish_whole_files() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path().join("min"), None);
    let content = ".hero{background:#000}".repeat(50_000).into_bytes();

    std::thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| store.write("shared.css", &content).unwrap());
        }
        s.spawn(|| {
            for _ in 0..500 {
                if let Ok(bytes) = store.read("shared.css") {
                    assert_eq!(bytes.len(), content.len());
                }
            }
        });
    });

    assert_eq!(store.read("shared.css").unwrap(), content);
    assert_eq!(count_files(store.root()), 1);
}

#[test]
fn test_safelisted_and_structural_rules_survive_empty_markup() {
    let dir = TempDir::new().unwrap();
    let state = state(dir.path(), StubFetcher::new());
    let params = OptimizationParams {
        minify: false,
        ..OptimizationParams::default()
    };

    let out = state.pipeline.transform(
        "html{margin:0} .nav.is-open{display:block} .promo{color:red}",
        &params,
        String::new,
    );

    assert!(out.contains("html{margin:0}"));
    assert!(out.contains(".nav.is-open{display:block}"));
    assert!(!out.contains(".promo"));
}

#[test]
fn test_pipeline_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let state = state(dir.path(), StubFetcher::new());
    let css = r#"
        /* theme */
        :root { --gap: 8px }
        html, body { margin: 0 }
        .masthead > .title { font: 700 2rem/1.2 serif }
        .is-open .drawer { transform: none }
        @media (max-width: 600px) { .masthead { padding: 0 } .sidebar { display: none } }
        @font-face { font-family: X; src: url(x.woff2) }
        .sidebar a:hover { color: #ff0000 }
    "#;
    let html = "<html><body><header class=\"masthead\"><h1 class=\"title\">x</h1></header></body></html>";

    for (filter_unused, minify, mobile_variant) in [(true, true, false), (true, true, true), (false, true, true), (true, false, false)] {
        let params = OptimizationParams {
            filter_unused,
            minify,
            mobile_variant,
            ..OptimizationParams::default()
        };
        let once = state.pipeline.transform(css, &params, || html.to_string());
        let twice = state.pipeline.transform(&once, &params, || html.to_string());
        assert_eq!(once, twice, "params {:?}", params);
    }
}

#[tokio::test]
async fn test_rewriter_fails_open_byte_identical() {
    let dir = TempDir::new().unwrap();
    let state = state(dir.path(), StubFetcher::new());

    let tag = style_tag("https://cdn.example.net/lib.css?a=1&b=2");
    let out = state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;

    assert_eq!(out.as_bytes(), tag.tag.as_bytes());
    assert_eq!(count_files(&dir.path().join("wp-content/cache/min")), 0);
}

#[tokio::test]
async fn test_modified_stylesheet_gets_new_artifact() {
    let dir = TempDir::new().unwrap();
    let theme = dir.path().join("wp-content/themes/t");
    std::fs::create_dir_all(&theme).unwrap();
    let file = theme.join("style.css");
    std::fs::write(&file, ".masthead { color: red }").unwrap();

    let state = state(dir.path(), StubFetcher::new());
    let tag = style_tag(STYLE_URL);

    let first = state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;
    let again = state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;
    assert_ne!(first, tag.tag);
    assert_eq!(first, again);

    std::fs::write(&file, ".masthead { color: blue }").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&file)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let changed = state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;
    assert_ne!(changed, first);
    assert_eq!(count_files(&dir.path().join("wp-content/cache/min")), 2);
}

#[tokio::test]
async fn test_purge_forces_reprocessing() {
    let dir = TempDir::new().unwrap();
    let theme = dir.path().join("wp-content/themes/t");
    std::fs::create_dir_all(&theme).unwrap();
    std::fs::write(theme.join("style.css"), ".masthead { color: red }").unwrap();

    let state = state(dir.path(), StubFetcher::new());
    let tag = style_tag(STYLE_URL);
    let min_dir = dir.path().join("wp-content/cache/min");

    state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;
    assert_eq!(count_files(&min_dir), 1);

    Invalidator::purge(state.invalidator.as_ref()).unwrap();
    assert_eq!(count_files(&min_dir), 0);

    let rewritten = state
        .rewriter
        .process_stylesheet(&tag, &RenderContext::default(), &page())
        .await;
    assert!(rewritten.contains("data-minify=\"1\""));
    assert_eq!(count_files(&min_dir), 1);
}
