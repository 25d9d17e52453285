//! Solution sources, their scoring and the ranking pass over them.

pub mod aggregator;
pub mod knowledge;
pub mod metrics;
pub mod ranking;
pub mod stackoverflow;
pub mod web;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::retry::{with_retries, RetryPolicy};

pub use aggregator::{Explanation, SolutionAggregator};
pub use knowledge::KnowledgeSearch;
pub use metrics::{SearchResultMetrics, Weights};
pub use ranking::RankingEngine;
pub use stackoverflow::StackOverflowSearch;
pub use web::WebSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    KnowledgeBase,
    LanguageModel,
    #[serde(rename = "stackoverflow")]
    StackOverflow,
    Web,
    Error,
}

impl SourceKind {
    /// Lower is preferred when composites tie.
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::KnowledgeBase => 0,
            SourceKind::LanguageModel => 1,
            SourceKind::StackOverflow => 2,
            SourceKind::Web => 3,
            SourceKind::Error => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::KnowledgeBase => "knowledge_base",
            SourceKind::LanguageModel => "language_model",
            SourceKind::StackOverflow => "stackoverflow",
            SourceKind::Web => "web",
            SourceKind::Error => "error",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: SourceKind,
    pub metrics: SearchResultMetrics,
    #[serde(skip)]
    base_metrics: SearchResultMetrics,
    /// `None` when the source has no notion of an answered question.
    pub answered: Option<bool>,
    pub item_id: Option<String>,
    pub command: Option<String>,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        source: SourceKind,
        metrics: SearchResultMetrics,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source,
            metrics,
            base_metrics: metrics,
            answered: None,
            item_id: None,
            command: None,
        }
    }

    /// A degraded-provider notice; never ranked.
    pub fn notice(failure: &ProviderFailure) -> Self {
        Self::new(
            format!("{} unavailable", failure.provider),
            "",
            failure.reason.clone(),
            SourceKind::Error,
            SearchResultMetrics::default(),
        )
    }

    pub fn with_answered(mut self, answered: bool) -> Self {
        self.answered = Some(answered);
        self
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Metrics as the provider assigned them, before any ranking adjustment.
    pub fn base_metrics(&self) -> &SearchResultMetrics {
        &self.base_metrics
    }
}

/// Truncates to `max` characters, marking the cut with "...".
pub fn truncate_snippet(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Ok(Vec<SearchResult>),
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, limit: usize) -> ProviderOutcome;
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Fatal(format!("invalid response: {}", err))
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// GET with query parameters, retrying rate limits, server errors and
/// transport failures. Returns the final error message on failure.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, String)],
    retry: &RetryPolicy,
) -> Result<T, String> {
    let fetch = move || async move {
        let response = client.get(url).query(params).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(format!("status {}", status)));
        }
        Ok(response.json::<T>().await?)
    };

    debug!(%url, "fetching search results");
    with_retries(retry, FetchError::is_transient, fetch)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippets_are_truncated_on_char_boundaries() {
        assert_eq!(truncate_snippet("short", 10), "short");
        assert_eq!(truncate_snippet("ééééé", 3), "ééé...");
    }

    #[test]
    fn notices_carry_the_reason() {
        let notice = SearchResult::notice(&ProviderFailure {
            provider: "web".to_string(),
            reason: "Configure GOOGLE_API_KEY".to_string(),
        });
        assert_eq!(notice.source, SourceKind::Error);
        assert_eq!(notice.title, "web unavailable");
        assert_eq!(notice.snippet, "Configure GOOGLE_API_KEY");
    }

    #[test]
    fn source_kinds_serialize_by_wire_name() {
        assert_eq!(
            serde_json::to_string(&SourceKind::StackOverflow).unwrap(),
            "\"stackoverflow\""
        );
        assert_eq!(
            serde_json::to_string(&SourceKind::KnowledgeBase).unwrap(),
            "\"knowledge_base\""
        );
    }
}
