use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::metrics::SearchResultMetrics;
use super::{truncate_snippet, ProviderOutcome, SearchProvider, SearchResult, SourceKind};
use crate::knowledge::{KnowledgeIndex, KnowledgeItem};

const DEFAULT_TITLE: &str = "Knowledge Base Entry";
const SNIPPET_CHARS: usize = 250;

/// Similarity search over the local knowledge index.
pub struct KnowledgeSearch {
    index: Arc<KnowledgeIndex>,
    top_k: usize,
}

impl KnowledgeSearch {
    pub fn new(index: Arc<KnowledgeIndex>, top_k: usize) -> Self {
        Self {
            index,
            top_k: top_k.max(1),
        }
    }

    fn to_result(item: &KnowledgeItem) -> SearchResult {
        let result = SearchResult::new(
            item.metadata_str("title").unwrap_or(DEFAULT_TITLE),
            item.metadata_str("url").unwrap_or_default(),
            truncate_snippet(&item.content, SNIPPET_CHARS),
            SourceKind::KnowledgeBase,
            SearchResultMetrics::knowledge_base(),
        )
        .with_answered(true)
        .with_item_id(item.item_id.clone());

        match item.metadata_str("command").map(str::trim) {
            Some(command) if !command.is_empty() => result.with_command(command),
            _ => result,
        }
    }
}

#[async_trait]
impl SearchProvider for KnowledgeSearch {
    fn kind(&self) -> SourceKind {
        SourceKind::KnowledgeBase
    }

    fn name(&self) -> &'static str {
        "knowledge_base"
    }

    async fn search(&self, query: &str, limit: usize) -> ProviderOutcome {
        match self.index.search(query, limit.min(self.top_k)).await {
            Ok(hits) => {
                debug!(count = hits.len(), "knowledge base hits");
                ProviderOutcome::Ok(hits.iter().map(|hit| Self::to_result(&hit.item)).collect())
            }
            Err(e) => {
                warn!(error = %e, "knowledge base search failed");
                ProviderOutcome::Degraded(format!("Knowledge base search failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HashingEmbedder;
    use serde_json::{json, Map, Value};

    #[tokio::test]
    async fn items_become_answered_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = KnowledgeIndex::open(dir.path(), Arc::new(HashingEmbedder::new(64)), 10)
            .await
            .unwrap();
        let metadata: Map<String, Value> = json!({
            "title": "Missing requests",
            "command": "pip install requests"
        })
        .as_object()
        .cloned()
        .unwrap();
        let id = index
            .add_item("No module named requests: install it with pip", metadata)
            .await
            .unwrap();
        index.add_item(&"x".repeat(400), Map::new()).await.unwrap();

        let search = KnowledgeSearch::new(Arc::new(index), 5);
        let ProviderOutcome::Ok(results) = search.search("No module named requests", 5).await else {
            panic!("expected results");
        };

        let first = &results[0];
        assert_eq!(first.title, "Missing requests");
        assert_eq!(first.item_id.as_deref(), Some(id.as_str()));
        assert_eq!(first.command.as_deref(), Some("pip install requests"));
        assert_eq!(first.answered, Some(true));
        assert_eq!(first.metrics, SearchResultMetrics::knowledge_base());

        let second = &results[1];
        assert_eq!(second.title, DEFAULT_TITLE);
        assert_eq!(second.snippet.chars().count(), SNIPPET_CHARS + 3);
        assert_eq!(second.command, None);
    }
}
