//! Web search capability and the bundled DuckDuckGo implementation.
//!
//! DuckDuckGo's HTML endpoint needs no API key. Results are extracted
//! with regexes, entity-decoded, and optionally enriched with a
//! best-effort fetch of the target page. Identical queries within the
//! cache TTL are served from a file-backed cache keyed by query hash.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ConfigError, RetrievalError};

/// Per-page fetch timeout.
const PAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Character cap on extracted page text.
const PAGE_CONTENT_CAP: usize = 5_000;

/// A single web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHit {
    /// Result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Search-engine snippet.
    pub snippet: String,
    /// Best-effort extracted page text (falls back to the snippet).
    pub content: String,
}

/// Capability boundary to a web search backend.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Searches the web, returning up to `max_results` hits.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Web`] on transport or parse failure.
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<WebHit>, RetrievalError>;
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    fetched_at: i64,
    hits: Vec<WebHit>,
}

/// DuckDuckGo HTML search with a TTL'd file cache.
pub struct DdgSearch {
    http: reqwest::Client,
    cache_dir: Option<PathBuf>,
    cache_ttl: Duration,
    fetch_pages: bool,
}

impl DdgSearch {
    /// Creates a searcher. `cache_dir` of `None` disables caching.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the HTTP client cannot be built or
    /// the cache directory cannot be created.
    pub fn new(
        cache_dir: Option<PathBuf>,
        cache_ttl_days: u64,
        fetch_pages: bool,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = &cache_dir {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Invalid {
                field: "cache_dir",
                reason: format!("cannot create {}: {e}", dir.display()),
            })?;
        }
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "web_search",
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            cache_dir,
            cache_ttl: Duration::from_secs(cache_ttl_days * 24 * 60 * 60),
            fetch_pages,
        })
    }

    fn cache_path(&self, query: &str, max_results: usize) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0]);
        hasher.update(max_results.to_le_bytes());
        Some(dir.join(format!("{}.json", hex::encode(hasher.finalize()))))
    }

    fn cached(&self, query: &str, max_results: usize) -> Option<Vec<WebHit>> {
        let path = self.cache_path(query, max_results)?;
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        let age = Utc::now().timestamp().saturating_sub(entry.fetched_at);
        if age >= 0 && Duration::from_secs(age.unsigned_abs()) < self.cache_ttl {
            debug!(query, "web search cache hit");
            Some(entry.hits)
        } else {
            None
        }
    }

    fn store(&self, query: &str, max_results: usize, hits: &[WebHit]) {
        let Some(path) = self.cache_path(query, max_results) else {
            return;
        };
        let entry = CacheEntry {
            fetched_at: Utc::now().timestamp(),
            hits: hits.to_vec(),
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(error) = std::fs::write(&path, json) {
                    debug!(%error, "failed to write web search cache entry");
                }
            }
            Err(error) => debug!(%error, "failed to encode web search cache entry"),
        }
    }

    fn result_regexes() -> Option<(Regex, Regex, Regex)> {
        Some((
            Regex::new(r#"class="result__a"[^>]*href="([^"]+)"[^>]*>([^<]+)"#).ok()?,
            Regex::new(r#"(?s)class="result__snippet"[^>]*>(.+?)</a>"#).ok()?,
            Regex::new(r"<[^>]+>").ok()?,
        ))
    }

    fn parse_results(html: &str, max_results: usize) -> Vec<WebHit> {
        let Some((link_re, snippet_re, tag_re)) = Self::result_regexes() else {
            return Vec::new();
        };

        let links: Vec<(String, String)> = link_re
            .captures_iter(html)
            .filter_map(|c| {
                let url = c.get(1)?.as_str().trim().to_string();
                let title =
                    html_escape::decode_html_entities(c.get(2)?.as_str().trim()).to_string();
                (!url.is_empty() && !title.is_empty()).then_some((url, title))
            })
            .collect();
        let snippets: Vec<String> = snippet_re
            .captures_iter(html)
            .filter_map(|c| {
                let raw = c.get(1)?.as_str();
                let text = tag_re.replace_all(raw, " ");
                Some(
                    html_escape::decode_html_entities(text.trim())
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" "),
                )
            })
            .collect();

        links
            .into_iter()
            .enumerate()
            .take(max_results)
            .map(|(i, (url, title))| {
                let snippet = snippets.get(i).cloned().unwrap_or_default();
                WebHit {
                    url,
                    title,
                    content: snippet.clone(),
                    snippet,
                }
            })
            .collect()
    }

    /// Fetches a result page and strips it to readable text. Any failure
    /// leaves the snippet as the hit's content.
    async fn enrich(&self, hit: &mut WebHit) {
        let response = self
            .http
            .get(&hit.url)
            .timeout(PAGE_FETCH_TIMEOUT)
            .send()
            .await;
        let Ok(response) = response else { return };
        if !response.status().is_success() {
            return;
        }
        let Ok(html) = response.text().await else {
            return;
        };
        let text = strip_html(&html);
        if !text.is_empty() {
            hit.content = text.chars().take(PAGE_CONTENT_CAP).collect();
        }
    }
}

fn strip_html(html: &str) -> String {
    let Some(script_re) = Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").ok()
    else {
        return String::new();
    };
    let Some(tag_re) = Regex::new(r"<[^>]+>").ok() else {
        return String::new();
    };
    let without_blocks = script_re.replace_all(html, " ");
    let without_tags = tag_re.replace_all(&without_blocks, " ");
    let decoded = html_escape::decode_html_entities(without_tags.as_ref());
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl WebSearch for DdgSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebHit>, RetrievalError> {
        if let Some(hits) = self.cached(query, max_results) {
            return Ok(hits);
        }

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        debug!(query, "searching the web");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RetrievalError::Web {
                message: format!("request failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(RetrievalError::Web {
                message: format!("search returned status {}", response.status()),
            });
        }
        let html = response.text().await.map_err(|e| RetrievalError::Web {
            message: format!("failed to read response: {e}"),
        })?;

        let mut hits = Self::parse_results(&html, max_results);
        if hits.is_empty() {
            warn!(query, "no web results parsed");
        }
        if self.fetch_pages {
            for hit in &mut hits {
                self.enrich(hit).await;
            }
        }
        self.store(query, max_results, &hits);
        Ok(hits)
    }
}
