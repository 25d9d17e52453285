use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::metrics::{PageStats, SearchResultMetrics};
use super::{get_json, ProviderOutcome, SearchProvider, SearchResult, SourceKind};
use crate::config::SearchConfig;
use crate::retry::RetryPolicy;

pub const MISSING_CREDENTIALS: &str =
    "Configure GOOGLE_API_KEY and GOOGLE_SEARCH_ENGINE_ID to enable web search";

const DATE_TAGS: [&str; 2] = ["og:updated_time", "article:modified_time"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    pagemap: Option<PageMap>,
}

#[derive(Debug, Deserialize)]
struct PageMap {
    #[serde(default)]
    metatags: Vec<Map<String, Value>>,
}

impl Page {
    fn modified(&self) -> Option<&str> {
        self.pagemap
            .as_ref()?
            .metatags
            .iter()
            .find_map(|tags| DATE_TAGS.iter().find_map(|key| tags.get(*key)?.as_str()))
    }
}

/// Google Programmable Search. Without credentials every query degrades.
pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    engine_id: Option<String>,
    retry: RetryPolicy,
}

impl WebSearch {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, engine_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            engine_id: engine_id.filter(|id| !id.trim().is_empty()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        let mut search = Self::new(
            config.google_search_url.clone(),
            config.google_api_key.clone(),
            config.google_search_engine_id.clone(),
        );
        if let Ok(client) = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
        {
            search.client = client;
        }
        search.retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.initial_retry_delay_ms),
        );
        search
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl SearchProvider for WebSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    fn name(&self) -> &'static str {
        "web"
    }

    async fn search(&self, query: &str, limit: usize) -> ProviderOutcome {
        let (Some(key), Some(cx)) = (&self.api_key, &self.engine_id) else {
            debug!("web search skipped, credentials missing");
            return ProviderOutcome::Degraded(MISSING_CREDENTIALS.to_string());
        };

        // The API caps `num` at 10.
        let params = [
            ("key", key.clone()),
            ("cx", cx.clone()),
            ("q", query.to_string()),
            ("num", limit.clamp(1, 10).to_string()),
        ];

        let response =
            match get_json::<SearchResponse>(&self.client, &self.endpoint, &params, &self.retry).await {
                Ok(response) => response,
                Err(reason) => {
                    warn!(%reason, "web search failed");
                    return ProviderOutcome::Degraded(format!("Web search failed: {}", reason));
                }
            };

        let now = Utc::now();
        let results = response
            .items
            .iter()
            .take(limit)
            .enumerate()
            .map(|(position, page)| {
                let stats = PageStats {
                    query,
                    title: &page.title,
                    url: &page.link,
                    snippet: &page.snippet,
                    modified: page.modified(),
                    position,
                };
                SearchResult::new(
                    page.title.clone(),
                    page.link.clone(),
                    page.snippet.clone(),
                    SourceKind::Web,
                    SearchResultMetrics::web(&stats, now),
                )
            })
            .collect::<Vec<_>>();

        debug!(count = results.len(), %query, "web results");
        ProviderOutcome::Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn missing_credentials_degrade_without_a_request() {
        let search = WebSearch::new("http://127.0.0.1:9", None, Some("cx".to_string()));
        assert_eq!(
            search.search("anything", 3).await,
            ProviderOutcome::Degraded(MISSING_CREDENTIALS.to_string())
        );
    }

    #[tokio::test]
    async fn scores_pages_by_position_and_domain() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/customsearch/v1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("key".into(), "k".into()),
                Matcher::UrlEncoded("cx".into(), "c".into()),
                Matcher::UrlEncoded("num".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "items": [
                        {
                            "title": "Fix EACCES",
                            "link": "https://docs.npmjs.com/resolving-eacces",
                            "snippet": "Reinstall npm with a node version manager",
                            "pagemap": { "metatags": [{ "og:updated_time": "1999-01-01" }] }
                        },
                        {
                            "title": "Random blog",
                            "link": "https://blog.example.org/eacces",
                            "snippet": "short"
                        },
                        {
                            "title": "Dropped",
                            "link": "https://example.org/3",
                            "snippet": "beyond the limit"
                        }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let search = WebSearch::new(
            format!("{}/customsearch/v1", server.url()),
            Some("k".to_string()),
            Some("c".to_string()),
        );
        let ProviderOutcome::Ok(results) = search.search("npm eacces", 2).await else {
            panic!("expected results");
        };

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metrics.authority, 9.0);
        assert_eq!(results[0].metrics.recency, 4.0);
        assert_eq!(results[1].metrics.authority, 5.0);
        assert_eq!(results[1].metrics.recency, 5.0);
        assert!(results[0].metrics.relevance > results[1].metrics.relevance);
        assert_eq!(results[0].answered, None);
        mock.assert_async().await;
    }
}
