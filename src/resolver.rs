//! Stylesheet Resolver
//! Reads a referenced stylesheet from the site's own document root when the
//! URL points there, and over HTTP otherwise.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::Config;
use crate::error::OptimizerError;
use crate::fetcher::{download_resource, HttpFetch};

/// Maps a public URL prefix to a directory on disk
#[derive(Debug, Clone)]
pub struct LocalRoot {
    pub url_prefix: String,
    pub dir: PathBuf,
}

/// What the resolver knows about a stylesheet after reading it
#[derive(Debug, Clone)]
pub struct ResolvedStylesheet {
    /// Absolute URL the locator normalized to
    pub url: String,
    pub content: String,
    pub local_path: Option<PathBuf>,
    /// Modification time for local files, content hash for fetched ones
    pub change_signal: String,
}

pub struct StylesheetResolver {
    home_url: String,
    /// Checked in order; the content root comes before the site root so the
    /// more specific prefix wins
    local_roots: Vec<LocalRoot>,
    fetcher: Arc<dyn HttpFetch>,
}

impl StylesheetResolver {
    pub fn new(home_url: &str, local_roots: Vec<LocalRoot>, fetcher: Arc<dyn HttpFetch>) -> Self {
        let mut local_roots: Vec<LocalRoot> = local_roots
            .into_iter()
            .map(|root| LocalRoot {
                url_prefix: format!("{}/", root.url_prefix.trim_end_matches('/')),
                dir: root.dir,
            })
            .collect();
        local_roots.sort_by(|a, b| b.url_prefix.len().cmp(&a.url_prefix.len()));

        Self {
            home_url: home_url.trim_end_matches('/').to_string(),
            local_roots,
            fetcher,
        }
    }

    pub fn from_config(config: &Config, fetcher: Arc<dyn HttpFetch>) -> Self {
        Self::new(
            &config.home_url,
            vec![
                LocalRoot {
                    url_prefix: config.site_url.clone(),
                    dir: config.site_root.clone(),
                },
                LocalRoot {
                    url_prefix: config.content_url.clone(),
                    dir: config.content_dir.clone(),
                },
            ],
            fetcher,
        )
    }

    pub fn fetcher(&self) -> &dyn HttpFetch {
        self.fetcher.as_ref()
    }

    /// Make a locator absolute: `//host/x` gets https, `/x` and bare
    /// relative paths are taken against the home URL
    pub fn normalize_url(&self, locator: &str) -> String {
        let locator = locator.trim();

        if let Some(rest) = locator.strip_prefix("//") {
            return format!("https://{}", rest);
        }
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return locator.to_string();
        }
        if locator.starts_with('/') {
            return format!("{}{}", self.home_url, locator);
        }

        Url::parse(&format!("{}/", self.home_url))
            .and_then(|base| base.join(locator))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}/{}", self.home_url, locator))
    }

    /// Translate a URL under one of the site's roots to a filesystem path.
    /// Percent-escapes are decoded before the path is checked.
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);

        for root in &self.local_roots {
            if let Some(relative) = without_query.strip_prefix(&root.url_prefix) {
                let decoded = percent_decode_str(relative).decode_utf8().ok()?;
                let relative = Path::new(decoded.as_ref());
                if relative.as_os_str().is_empty()
                    || !relative.components().all(|c| matches!(c, Component::Normal(_)))
                {
                    return None;
                }
                return Some(root.dir.join(relative));
            }
        }

        None
    }

    /// Retrieve a stylesheet's raw content
    pub async fn resolve(&self, locator: &str) -> Result<ResolvedStylesheet, OptimizerError> {
        let url = self.normalize_url(locator);

        if let Some(path) = self.local_path(&url) {
            match read_local(&path) {
                Ok((content, modified)) => {
                    tracing::debug!("Resolver: Read {} from {}", url, path.display());
                    return Ok(ResolvedStylesheet {
                        url,
                        content,
                        change_signal: format!("mtime:{}", modified),
                        local_path: Some(path),
                    });
                }
                Err(e) => {
                    tracing::debug!("Resolver: Local read of {} failed ({}), fetching", path.display(), e);
                }
            }
        }

        let content = download_resource(self.fetcher.as_ref(), &url).await?;
        Ok(ResolvedStylesheet {
            change_signal: format!("sha256:{}", content_hash(&content)),
            url,
            content,
            local_path: None,
        })
    }
}

fn read_local(path: &Path) -> std::io::Result<(String, u128)> {
    let content = std::fs::read_to_string(path)?;
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok((content, modified))
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
