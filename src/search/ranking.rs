use super::metrics::Weights;
use super::{SearchResult, SourceKind};

const CODE_BONUS: f64 = 2.0;
const SOLUTION_BONUS: f64 = 1.0;
const UNANSWERED_PENALTY: f64 = 2.0;

/// Content-aware re-scoring. Always starts from the provider-assigned metrics,
/// so ranking the same list twice gives the same order and scores.
#[derive(Debug, Clone, Default)]
pub struct RankingEngine;

impl RankingEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn rank(&self, results: &mut [SearchResult]) {
        for result in results.iter_mut() {
            Self::score(result);
        }
        // sort_by is stable: equal keys keep provider order.
        results.sort_by(|a, b| {
            b.metrics
                .composite
                .total_cmp(&a.metrics.composite)
                .then_with(|| a.source.priority().cmp(&b.source.priority()))
        });
    }

    fn score(result: &mut SearchResult) {
        let mut metrics = *result.base_metrics();

        if result.snippet.contains("```") || result.snippet.contains("<code>") {
            metrics.completeness += CODE_BONUS;
        }
        let lowered = result.snippet.to_lowercase();
        if lowered.contains("solution") || lowered.contains("fixed") {
            metrics.relevance += SOLUTION_BONUS;
        }

        metrics = metrics.clamped().weighted(Weights::RANKING);
        if result.title.contains('?') && result.answered != Some(true) {
            metrics.composite = (metrics.composite - UNANSWERED_PENALTY).max(0.0);
        }
        result.metrics = metrics;
    }

    /// The first `n` ranked results, leaving out provider-failure notices.
    pub fn top<'a>(&self, results: &'a [SearchResult], n: usize) -> Vec<&'a SearchResult> {
        results
            .iter()
            .filter(|r| r.source != SourceKind::Error)
            .take(n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::metrics::SearchResultMetrics;
    use pretty_assertions::assert_eq;

    fn result(title: &str, snippet: &str, source: SourceKind, metrics: SearchResultMetrics) -> SearchResult {
        SearchResult::new(title, "", snippet, source, metrics)
    }

    fn flat(value: f64) -> SearchResultMetrics {
        SearchResultMetrics::new(value, value, value, value, value).weighted(Weights::RANKING)
    }

    #[test]
    fn code_and_keyword_bonuses() {
        let mut results = vec![result(
            "How to install",
            "The solution: ```pip install x```",
            SourceKind::Web,
            flat(5.0),
        )];
        RankingEngine::new().rank(&mut results);

        let m = results[0].metrics;
        assert_eq!(m.completeness, 7.0);
        assert_eq!(m.relevance, 6.0);
        assert!((m.composite - (6.0 * 0.3 + 5.0 * 0.25 + 5.0 * 0.15 + 5.0 * 0.2 + 7.0 * 0.1)).abs() < 1e-9);
    }

    #[test]
    fn axes_are_clamped() {
        let mut results = vec![result("t", "<code>x</code> fixed", SourceKind::Web, flat(10.0))];
        RankingEngine::new().rank(&mut results);
        assert_eq!(results[0].metrics.completeness, 10.0);
        assert_eq!(results[0].metrics.relevance, 10.0);
        assert!((results[0].metrics.composite - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unanswered_questions_are_penalised() {
        let mut results = vec![
            result("Why does it fail?", "", SourceKind::StackOverflow, flat(5.0)).with_answered(false),
            result("Why does it work?", "", SourceKind::StackOverflow, flat(5.0)).with_answered(true),
            result("Is this web page?", "", SourceKind::Web, flat(1.0)),
        ];
        RankingEngine::new().rank(&mut results);

        assert_eq!(results[0].title, "Why does it work?");
        assert!((results[0].metrics.composite - 5.0).abs() < 1e-9);
        assert!((results[1].metrics.composite - 3.0).abs() < 1e-9);
        assert_eq!(results[2].metrics.composite, 0.0);
    }

    #[test]
    fn ranking_is_idempotent_and_stable() {
        let mut results = vec![
            result("web a", "", SourceKind::Web, flat(6.0)),
            result("so", "", SourceKind::StackOverflow, flat(6.0)),
            result("web b", "", SourceKind::Web, flat(6.0)),
            result("kb", "", SourceKind::KnowledgeBase, flat(6.0)),
            result("best", "fixed", SourceKind::Web, flat(6.0)),
        ];
        let engine = RankingEngine::new();
        engine.rank(&mut results);
        let first: Vec<_> = results.iter().map(|r| (r.title.clone(), r.metrics)).collect();

        engine.rank(&mut results);
        let second: Vec<_> = results.iter().map(|r| (r.title.clone(), r.metrics)).collect();

        assert_eq!(first, second);
        let titles: Vec<_> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["best", "kb", "so", "web a", "web b"]);
    }

    #[test]
    fn top_skips_notices() {
        let notice = result("web unavailable", "", SourceKind::Error, SearchResultMetrics::default());
        let results = vec![
            result("a", "", SourceKind::Web, flat(5.0)),
            notice,
            result("b", "", SourceKind::Web, flat(4.0)),
        ];
        let top = RankingEngine::new().top(&results, 2);
        let titles: Vec<_> = top.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }
}
