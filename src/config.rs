//! Configuration module

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Selectors kept regardless of usage evidence when `CSS_SAFELIST` is unset.
/// State classes toggled by scripts and page-builder wrappers.
const DEFAULT_SAFELIST: &[&str] = &[
    "*.active*",
    "*.open*",
    "*.show*",
    "*.hidden*",
    "*.visible*",
    "*.selected*",
    "*.disabled*",
    "*.loading*",
    "*.is-*",
    "*.has-*",
    "*.wp-*",
    "*.admin-bar*",
    "*.elementor-*",
    "*.woocommerce*",
    "*.wc-*",
    "*.wpcf7*",
    "*.gform*",
];

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Site URL, the public URL of the WordPress root (ABSPATH)
    pub site_url: String,
    /// Home URL, used to absolutize root-relative references
    pub home_url: String,
    pub content_url: String,
    pub site_root: PathBuf,
    pub content_dir: PathBuf,
    pub min_cache_dir: PathBuf,
    pub min_cache_url: String,
    pub critical_css_dir: PathBuf,
    pub remove_unused_css: bool,
    pub minify_css: bool,
    pub excluded_patterns: Vec<String>,
    pub safelist: Vec<String>,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let site_url = trim_url(&env::var("SITE_URL").unwrap_or_else(|_| "http://localhost".to_string()));
        let home_url = env::var("HOME_URL")
            .map(|u| trim_url(&u))
            .unwrap_or_else(|_| site_url.clone());
        let content_url = env::var("CONTENT_URL")
            .map(|u| trim_url(&u))
            .unwrap_or_else(|_| format!("{}/wp-content", site_url));

        let site_root = PathBuf::from(env::var("SITE_ROOT").unwrap_or_else(|_| ".".to_string()));
        let content_dir = env::var("CONTENT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| site_root.join("wp-content"));

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            min_cache_dir: env::var("MIN_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| content_dir.join("cache").join("min")),
            min_cache_url: env::var("MIN_CACHE_URL")
                .map(|u| trim_url(&u))
                .unwrap_or_else(|_| format!("{}/cache/min", content_url)),
            critical_css_dir: env::var("CRITICAL_CSS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| content_dir.join("cache").join("macp").join("critical-css")),
            remove_unused_css: env_flag("MACP_REMOVE_UNUSED_CSS"),
            minify_css: env_flag("MACP_MINIFY_CSS"),
            excluded_patterns: env::var("CSS_EXCLUDED_PATTERNS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            safelist: env::var("CSS_SAFELIST")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| DEFAULT_SAFELIST.iter().map(|s| s.to_string()).collect()),
            http_timeout: Duration::from_secs(
                env::var("HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(30),
            ),
            site_url,
            home_url,
            content_url,
            site_root,
            content_dir,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| parse_flag(&v)).unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
