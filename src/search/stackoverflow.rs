use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::metrics::{QuestionStats, SearchResultMetrics};
use super::{get_json, truncate_snippet, ProviderOutcome, SearchProvider, SearchResult, SourceKind};
use crate::config::SearchConfig;
use crate::retry::RetryPolicy;

const SNIPPET_CHARS: usize = 250;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct Question {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    answer_count: u64,
    #[serde(default)]
    is_answered: bool,
    accepted_answer_id: Option<u64>,
    creation_date: Option<i64>,
}

/// Stack Exchange `search` endpoint, restricted to stackoverflow.
pub struct StackOverflowSearch {
    client: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl StackOverflowSearch {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: config.stackexchange_url.clone(),
            retry: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.initial_retry_delay_ms),
            ),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn to_result(question: Question) -> SearchResult {
        let now = Utc::now();
        let stats = QuestionStats {
            score: question.score,
            answer_count: question.answer_count,
            is_answered: question.is_answered,
            has_accepted_answer: question.accepted_answer_id.is_some(),
            creation_date: question
                .creation_date
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            body_len: question.body.chars().count(),
        };
        let snippet = truncate_snippet(&html_to_text(&question.body), SNIPPET_CHARS);

        SearchResult::new(
            decode_entities(&question.title),
            question.link,
            snippet,
            SourceKind::StackOverflow,
            SearchResultMetrics::stack_overflow(&stats, now),
        )
        .with_answered(question.is_answered)
    }
}

#[async_trait]
impl SearchProvider for StackOverflowSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::StackOverflow
    }

    fn name(&self) -> &'static str {
        "stackoverflow"
    }

    async fn search(&self, query: &str, limit: usize) -> ProviderOutcome {
        let params = [
            ("order", "desc".to_string()),
            ("sort", "relevance".to_string()),
            ("intitle", query.to_string()),
            ("site", "stackoverflow".to_string()),
            ("pagesize", limit.to_string()),
            ("filter", "withbody".to_string()),
        ];

        match get_json::<SearchResponse>(&self.client, &self.endpoint, &params, &self.retry).await {
            Ok(response) => {
                debug!(count = response.items.len(), %query, "stack overflow results");
                ProviderOutcome::Ok(
                    response
                        .items
                        .into_iter()
                        .take(limit)
                        .map(Self::to_result)
                        .collect(),
                )
            }
            Err(reason) => {
                warn!(%reason, "stack overflow search failed");
                ProviderOutcome::Degraded(format!("Stack Overflow search failed: {}", reason))
            }
        }
    }
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("built-in tag pattern"))
}

fn entity_pattern() -> &'static Regex {
    static ENTITIES: OnceLock<Regex> = OnceLock::new();
    ENTITIES.get_or_init(|| {
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("built-in entity pattern")
    })
}

/// Strips tags and collapses whitespace.
pub(crate) fn html_to_text(html: &str) -> String {
    let stripped = tag_pattern().replace_all(html, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn decode_entities(text: &str) -> String {
    entity_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse::<u32>()))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn provider(url: &str) -> StackOverflowSearch {
        StackOverflowSearch::new(format!("{}/2.3/search", url))
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[test]
    fn html_is_flattened() {
        assert_eq!(
            html_to_text("<p>Run <code>pip install requests</code> &amp; retry.</p>\n<p>Done&#39;s</p>"),
            "Run pip install requests & retry. Done's"
        );
        assert_eq!(decode_entities("&#x41;&unknown;"), "A&unknown;");
    }

    #[tokio::test]
    async fn maps_questions_to_scored_results() {
        let mut server = Server::new_async().await;
        let created = Utc::now().timestamp() - 10 * 86_400;
        let mock = server
            .mock("GET", "/2.3/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("intitle".into(), "No module named requests".into()),
                Matcher::UrlEncoded("site".into(), "stackoverflow".into()),
                Matcher::UrlEncoded("pagesize".into(), "2".into()),
                Matcher::UrlEncoded("filter".into(), "withbody".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "items": [{
                        "title": "ImportError: No module named requests",
                        "link": "https://stackoverflow.com/q/1",
                        "body": format!("<p>{}</p>", "a".repeat(300)),
                        "score": 20,
                        "answer_count": 4,
                        "is_answered": true,
                        "accepted_answer_id": 7,
                        "creation_date": created
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let outcome = provider(&server.url()).search("No module named requests", 2).await;
        let ProviderOutcome::Ok(results) = outcome else {
            panic!("expected results, got {:?}", outcome);
        };

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.source, SourceKind::StackOverflow);
        assert_eq!(result.answered, Some(true));
        assert_eq!(result.snippet, format!("{}...", "a".repeat(250)));
        assert_eq!(result.metrics.relevance, 10.0);
        assert_eq!(result.metrics.recency, 10.0);
        // 2 + 2 + 2
        assert_eq!(result.metrics.community, 6.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_degrade_after_retries() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/2.3/search")
            .match_query(Matcher::Any)
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let outcome = provider(&server.url()).search("anything", 5).await;

        assert!(matches!(outcome, ProviderOutcome::Degraded(reason) if reason.contains("502")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/2.3/search")
            .match_query(Matcher::Any)
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let outcome = provider(&server.url()).search("anything", 5).await;

        assert!(matches!(outcome, ProviderOutcome::Degraded(_)));
        mock.assert_async().await;
    }
}
