use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::knowledge::KnowledgeSearch;
use super::metrics::SearchResultMetrics;
use super::ranking::RankingEngine;
use super::stackoverflow::StackOverflowSearch;
use super::web::WebSearch;
use super::{ProviderFailure, ProviderOutcome, SearchProvider, SearchResult, SourceKind};
use crate::ai::prompts::{self, ContextSnippet};
use crate::ai::{self, parse_generated_solutions, LanguageModel, LlmError};
use crate::config::Config;
use crate::diagnosis::templates::common_solutions;
use crate::diagnosis::{
    Confidence, ErrorClassifier, ErrorRecord, ErrorType, Solution, SolutionOrigin, VariableResolver,
};
use crate::knowledge::KnowledgeIndex;

const LANGUAGE_MODEL_PROVIDER: &str = "language_model";

/// What a human sees for a classified failure.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub title: String,
    pub explanation: String,
    pub common_causes: Vec<String>,
    pub solutions: Vec<Solution>,
    pub sources: Vec<SearchResult>,
    pub notices: Vec<ProviderFailure>,
    pub is_common_error: bool,
}

/// Runs the classifier and then every configured source in priority order:
/// knowledge base, language model, Stack Overflow, web.
pub struct SolutionAggregator {
    classifier: ErrorClassifier,
    resolver: VariableResolver,
    knowledge: Option<Box<dyn SearchProvider>>,
    llm: Option<Arc<dyn LanguageModel>>,
    stack_overflow: Option<Box<dyn SearchProvider>>,
    web: Option<Box<dyn SearchProvider>>,
    ranking: RankingEngine,
    results_per_provider: usize,
    top_n: usize,
}

impl SolutionAggregator {
    /// Classifier and templates only; add sources with the `with_*` builders.
    pub fn new() -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            resolver: VariableResolver::new(),
            knowledge: None,
            llm: None,
            stack_overflow: None,
            web: None,
            ranking: RankingEngine::new(),
            results_per_provider: 5,
            top_n: 3,
        }
    }

    pub fn from_config(config: &Config, knowledge: Option<Arc<KnowledgeIndex>>) -> Self {
        let mut aggregator = Self::new()
            .with_results_per_provider(config.search.results_per_provider)
            .with_top_n(config.search.top_n);

        if let Some(index) = knowledge {
            aggregator = aggregator.with_knowledge(KnowledgeSearch::new(index, config.knowledge.top_k));
        }
        if let Some(llm) = ai::from_config(config) {
            aggregator = aggregator.with_language_model(llm);
        }
        if config.search.enabled {
            aggregator = aggregator
                .with_stack_overflow(StackOverflowSearch::from_config(&config.search))
                .with_web(WebSearch::from_config(&config.search));
        }
        aggregator
    }

    pub fn with_knowledge(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.knowledge = Some(Box::new(provider));
        self
    }

    pub fn with_language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_stack_overflow(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.stack_overflow = Some(Box::new(provider));
        self
    }

    pub fn with_web(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.web = Some(Box::new(provider));
        self
    }

    pub fn with_results_per_provider(mut self, limit: usize) -> Self {
        self.results_per_provider = limit.max(1);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub fn language_model(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.llm.as_ref()
    }

    pub async fn analyze(&self, command: &str, return_code: i32, error_text: &str) -> ErrorRecord {
        let mut record = self.classifier.classify(command, return_code, error_text);
        info!(
            error_type = %record.error_type,
            query = %record.search_query,
            "analyzing failure"
        );

        let query = record.search_query.clone();
        let limit = self.results_per_provider;
        let mut sources = Vec::new();
        let mut degraded = Vec::new();

        let mut knowledge_solutions = Vec::new();
        if let Some(provider) = &self.knowledge {
            let results = collect(provider.as_ref(), &query, limit, &mut degraded).await;
            knowledge_solutions = results.iter().filter_map(knowledge_solution).collect();
            sources.extend(results);
        }

        let mut generated = Vec::new();
        if let Some(llm) = &self.llm {
            match self.generate_solutions(llm.as_ref(), &record, &sources).await {
                Ok((solutions, results)) => {
                    generated = solutions;
                    sources.extend(results);
                }
                Err(LlmError::NotConfigured) => {}
                Err(e) => {
                    warn!(error = %e, "solution generation failed");
                    degraded.push(ProviderFailure {
                        provider: LANGUAGE_MODEL_PROVIDER.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut external = 0;
        if let Some(provider) = &self.stack_overflow {
            let results = collect(provider.as_ref(), &query, limit, &mut degraded).await;
            external = results.len();
            sources.extend(results);
        }
        if external < limit {
            if let Some(provider) = &self.web {
                let results = collect(provider.as_ref(), &query, limit - external, &mut degraded).await;
                sources.extend(results);
            }
        }

        let mut solutions = knowledge_solutions;
        solutions.extend(generated);
        solutions.extend(common_solutions(record.error_type));
        record.solutions = self.resolver.fill_variables(solutions, command, error_text);

        self.ranking.rank(&mut sources);
        sources.extend(degraded.iter().map(SearchResult::notice));
        debug!(
            sources = sources.len(),
            solutions = record.solutions.len(),
            degraded = degraded.len(),
            "aggregation finished"
        );

        record.sources = sources;
        record.degraded = degraded;
        record
    }

    async fn generate_solutions(
        &self,
        llm: &dyn LanguageModel,
        record: &ErrorRecord,
        context: &[SearchResult],
    ) -> Result<(Vec<Solution>, Vec<SearchResult>), LlmError> {
        let snippets = context_snippets(context);
        let prompt = prompts::solutions_prompt(record.error_type.as_str(), &record.raw_text, &snippets);
        let reply = llm
            .complete(
                &prompt,
                Some(prompts::SOLUTIONS_SYSTEM_PROMPT),
                prompts::SOLUTIONS_TEMPERATURE,
                prompts::SOLUTIONS_MAX_TOKENS,
            )
            .await?;

        let parsed = parse_generated_solutions(&reply);
        debug!(count = parsed.len(), "parsed generated solutions");

        let mut solutions = Vec::with_capacity(parsed.len());
        let mut results = Vec::with_capacity(parsed.len());
        for generated in parsed {
            let snippet = generated
                .explanation
                .clone()
                .or_else(|| generated.command.clone())
                .unwrap_or_default();
            let mut result = SearchResult::new(
                generated.description.clone(),
                "",
                snippet,
                SourceKind::LanguageModel,
                SearchResultMetrics::language_model(generated.command.is_some()),
            );

            let mut solution = match &generated.command {
                Some(command) => {
                    result = result.with_command(command.clone());
                    Solution::command(generated.description, command.clone())
                }
                None => Solution::advice(generated.description),
            }
            .with_origin(SolutionOrigin::LanguageModel);
            if let Some(explanation) = generated.explanation {
                solution = solution.with_explanation(explanation);
            }

            solutions.push(solution);
            results.push(result);
        }
        Ok((solutions, results))
    }

    /// Human-facing summary, optionally with a language-model explanation.
    pub async fn explain(&self, record: &ErrorRecord) -> Explanation {
        let sources: Vec<SearchResult> = self
            .ranking
            .top(&record.sources, self.top_n)
            .into_iter()
            .cloned()
            .collect();

        let mut explanation = record.user_explanation.clone();
        if let Some(llm) = &self.llm {
            let prompt = prompts::explanation_prompt(
                record.error_type.as_str(),
                &record.description,
                &record.raw_text,
                &context_snippets(&sources),
            );
            match llm
                .complete(&prompt, None, prompts::EXPLANATION_TEMPERATURE, prompts::EXPLANATION_MAX_TOKENS)
                .await
            {
                Ok(text) if !text.trim().is_empty() => explanation = text.trim().to_string(),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "could not generate an enhanced explanation"),
            }
        }

        Explanation {
            title: format!("Error: {}", record.description),
            explanation,
            common_causes: record.common_causes.clone(),
            solutions: record.solutions.iter().take(self.top_n).cloned().collect(),
            sources,
            notices: record.degraded.clone(),
            is_common_error: record.error_type != ErrorType::Unknown,
        }
    }
}

impl Default for SolutionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect(
    provider: &dyn SearchProvider,
    query: &str,
    limit: usize,
    degraded: &mut Vec<ProviderFailure>,
) -> Vec<SearchResult> {
    match provider.search(query, limit).await {
        ProviderOutcome::Ok(results) => results,
        ProviderOutcome::Degraded(reason) => {
            warn!(provider = provider.name(), %reason, "provider degraded");
            degraded.push(ProviderFailure {
                provider: provider.name().to_string(),
                reason,
            });
            Vec::new()
        }
    }
}

fn knowledge_solution(result: &SearchResult) -> Option<Solution> {
    let command = result.command.as_deref()?;
    Some(
        Solution::command(result.title.clone(), command)
            .with_confidence(Confidence::High)
            .with_origin(SolutionOrigin::KnowledgeBase)
            .with_explanation(result.snippet.clone()),
    )
}

fn context_snippets(results: &[SearchResult]) -> Vec<ContextSnippet<'_>> {
    results
        .iter()
        .filter(|r| r.source != SourceKind::Error)
        .take(3)
        .map(|r| ContextSnippet {
            title: &r.title,
            snippet: &r.snippet,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedProvider {
        name: &'static str,
        kind: SourceKind,
        outcome: ProviderOutcome,
        calls: Arc<AtomicUsize>,
        limits: Arc<Mutex<Vec<usize>>>,
    }

    impl FixedProvider {
        fn new(name: &'static str, kind: SourceKind, outcome: ProviderOutcome) -> Self {
            Self {
                name,
                kind,
                outcome,
                calls: Arc::new(AtomicUsize::new(0)),
                limits: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(&self, _query: &str, limit: usize) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.limits.lock().unwrap().push(limit);
            self.outcome.clone()
        }
    }

    struct ScriptedModel {
        reply: Result<String, LlmError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _system_prompt: Option<&str>,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .extend(messages.iter().map(|m| m.content.clone()));
            self.reply.clone()
        }
    }

    fn so_result(title: &str, score: f64) -> SearchResult {
        SearchResult::new(
            title,
            "https://stackoverflow.com/q/1",
            "",
            SourceKind::StackOverflow,
            SearchResultMetrics::new(score, score, score, score, score),
        )
        .with_answered(true)
    }

    const REQUESTS_ERROR: &str = "Traceback (most recent call last):\n  File \"app.py\", line 1, in <module>\n    import requests\nModuleNotFoundError: No module named 'requests'";

    #[tokio::test]
    async fn templates_alone_still_produce_solutions() {
        let record = SolutionAggregator::new()
            .analyze("python app.py", 1, REQUESTS_ERROR)
            .await;

        assert_eq!(record.error_type, ErrorType::PythonModuleNotFound);
        assert_eq!(
            record.solutions[0].resolved_command.as_deref(),
            Some("pip install requests")
        );
        assert!(record.sources.is_empty());
        assert!(record.degraded.is_empty());
    }

    #[tokio::test]
    async fn solutions_are_ordered_knowledge_generated_templates() {
        let kb = SearchResult::new(
            "Team fix",
            "",
            "use the pinned requirements",
            SourceKind::KnowledgeBase,
            SearchResultMetrics::knowledge_base(),
        )
        .with_answered(true)
        .with_command("pip install -r requirements.txt");
        let model = Arc::new(ScriptedModel {
            reply: Ok("SOLUTION 1:\nDESCRIPTION: Install requests\nCOMMAND: pip install {module_name}\nEXPLANATION: It is missing".to_string()),
            prompts: Mutex::new(Vec::new()),
        });

        let aggregator = SolutionAggregator::new()
            .with_knowledge(FixedProvider::new(
                "knowledge_base",
                SourceKind::KnowledgeBase,
                ProviderOutcome::Ok(vec![kb]),
            ))
            .with_language_model(model.clone());
        let record = aggregator.analyze("python app.py", 1, REQUESTS_ERROR).await;

        let origins: Vec<_> = record.solutions.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![
                SolutionOrigin::KnowledgeBase,
                SolutionOrigin::LanguageModel,
                SolutionOrigin::Template
            ]
        );
        assert_eq!(
            record.solutions[1].resolved_command.as_deref(),
            Some("pip install requests")
        );

        // The knowledge-base hit was passed to the model as context.
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Source 1: Team fix"));

        let kinds: Vec<_> = record.sources.iter().map(|s| s.source).collect();
        assert_eq!(kinds, vec![SourceKind::KnowledgeBase, SourceKind::LanguageModel]);
    }

    #[tokio::test]
    async fn web_is_skipped_when_stack_overflow_fills_the_quota() {
        let web = FixedProvider::new("web", SourceKind::Web, ProviderOutcome::Ok(Vec::new()));
        let web_calls = web.calls.clone();

        let aggregator = SolutionAggregator::new()
            .with_results_per_provider(2)
            .with_stack_overflow(FixedProvider::new(
                "stackoverflow",
                SourceKind::StackOverflow,
                ProviderOutcome::Ok(vec![so_result("a", 5.0), so_result("b", 6.0)]),
            ))
            .with_web(web);
        let record = aggregator.analyze("python app.py", 1, REQUESTS_ERROR).await;

        assert_eq!(web_calls.load(Ordering::SeqCst), 0);
        let titles: Vec<_> = record.sources.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn degraded_providers_become_trailing_notices() {
        let web = FixedProvider::new(
            "web",
            SourceKind::Web,
            ProviderOutcome::Degraded("Configure GOOGLE_API_KEY".to_string()),
        );
        let web_limits = web.limits.clone();

        let aggregator = SolutionAggregator::new()
            .with_results_per_provider(3)
            .with_stack_overflow(FixedProvider::new(
                "stackoverflow",
                SourceKind::StackOverflow,
                ProviderOutcome::Ok(vec![so_result("only", 5.0)]),
            ))
            .with_web(web)
            .with_language_model(Arc::new(ScriptedModel {
                reply: Err(LlmError::ServiceUnavailable("overloaded".to_string())),
                prompts: Mutex::new(Vec::new()),
            }));
        let record = aggregator.analyze("python app.py", 1, REQUESTS_ERROR).await;

        assert_eq!(*web_limits.lock().unwrap(), vec![2]);
        let providers: Vec<_> = record.degraded.iter().map(|d| d.provider.as_str()).collect();
        assert_eq!(providers, vec!["language_model", "web"]);

        let kinds: Vec<_> = record.sources.iter().map(|s| s.source).collect();
        assert_eq!(
            kinds,
            vec![SourceKind::StackOverflow, SourceKind::Error, SourceKind::Error]
        );
        // Templates are unaffected by provider failures.
        assert!(record.solutions.iter().any(|s| s.is_executable()));
    }

    #[tokio::test]
    async fn explanation_uses_model_when_available() {
        let aggregator = SolutionAggregator::new().with_top_n(1);
        let record = aggregator.analyze("python app.py", 1, REQUESTS_ERROR).await;
        let plain = aggregator.explain(&record).await;

        assert!(plain.is_common_error);
        assert_eq!(plain.explanation, record.user_explanation);
        assert_eq!(plain.solutions.len(), 1);
        assert!(plain.title.starts_with("Error: "));

        let enhanced = SolutionAggregator::new()
            .with_language_model(Arc::new(ScriptedModel {
                reply: Ok("  The requests library is not installed.  ".to_string()),
                prompts: Mutex::new(Vec::new()),
            }))
            .explain(&record)
            .await;
        assert_eq!(enhanced.explanation, "The requests library is not installed.");
    }

    #[tokio::test]
    async fn unknown_errors_are_not_common() {
        let aggregator = SolutionAggregator::new();
        let record = aggregator.analyze("./thing", 2, "something odd happened").await;
        let explanation = aggregator.explain(&record).await;

        assert_eq!(record.error_type, ErrorType::Unknown);
        assert!(!explanation.is_common_error);
    }
}
