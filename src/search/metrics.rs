use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Quality axes on a 0-10 scale plus their weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResultMetrics {
    pub relevance: f64,
    pub authority: f64,
    pub recency: f64,
    pub community: f64,
    pub completeness: f64,
    pub composite: f64,
}

/// Composite weights in axis order: relevance, authority, recency, community, completeness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights(pub [f64; 5]);

impl Weights {
    pub const KNOWLEDGE_BASE: Weights = Weights([0.30, 0.20, 0.15, 0.25, 0.10]);
    pub const LANGUAGE_MODEL: Weights = Weights([0.30, 0.25, 0.15, 0.20, 0.10]);
    pub const STACK_OVERFLOW: Weights = Weights([0.30, 0.20, 0.15, 0.25, 0.10]);
    pub const WEB: Weights = Weights([0.30, 0.30, 0.20, 0.10, 0.10]);
    pub const RANKING: Weights = Weights([0.30, 0.25, 0.15, 0.20, 0.10]);
}

impl SearchResultMetrics {
    pub fn new(relevance: f64, authority: f64, recency: f64, community: f64, completeness: f64) -> Self {
        Self {
            relevance,
            authority,
            recency,
            community,
            completeness,
            composite: 0.0,
        }
    }

    pub fn weighted(mut self, weights: Weights) -> Self {
        self.composite = self.composite_with(weights);
        self
    }

    pub fn composite_with(&self, Weights(w): Weights) -> f64 {
        self.relevance * w[0]
            + self.authority * w[1]
            + self.recency * w[2]
            + self.community * w[3]
            + self.completeness * w[4]
    }

    pub fn clamped(mut self) -> Self {
        for axis in [
            &mut self.relevance,
            &mut self.authority,
            &mut self.recency,
            &mut self.community,
            &mut self.completeness,
        ] {
            *axis = axis.clamp(0.0, 10.0);
        }
        self
    }

    pub fn knowledge_base() -> Self {
        Self::new(9.0, 9.0, 8.0, 7.0, 8.0).weighted(Weights::KNOWLEDGE_BASE)
    }

    pub fn language_model(has_command: bool) -> Self {
        let completeness = if has_command { 8.0 } else { 5.0 };
        Self::new(7.0, 6.0, 10.0, 5.0, completeness).weighted(Weights::LANGUAGE_MODEL)
    }

    pub fn stack_overflow(question: &QuestionStats, now: DateTime<Utc>) -> Self {
        let answered = if question.is_answered { 1.0 } else { 0.0 };
        let accepted = if question.has_accepted_answer { 1.0 } else { 0.0 };

        let community = (question.score as f64 / 10.0
            + 2.0 * answered
            + (0.5 * question.answer_count as f64).min(3.0))
        .min(10.0);

        let recency = match question.creation_date {
            Some(created) => match age_days(created, now) {
                d if d < 30.0 => 10.0,
                d if d < 180.0 => 8.0,
                d if d < 365.0 => 6.0,
                d if d < 730.0 => 4.0,
                _ => 2.0,
            },
            None => 0.0,
        };

        let completeness = (question.body_len as f64 / 1000.0 * 3.0 + 5.0 * accepted).min(10.0);

        Self::new(7.0 + 3.0 * accepted, 9.0, recency, community, completeness)
            .weighted(Weights::STACK_OVERFLOW)
    }

    pub fn web(page: &PageStats<'_>, now: DateTime<Utc>) -> Self {
        let recency = page
            .modified
            .and_then(parse_page_date)
            .map(|date| match age_days(date, now) {
                d if d < 30.0 => 10.0,
                d if d < 180.0 => 8.0,
                d if d < 365.0 => 6.0,
                _ => 4.0,
            })
            .unwrap_or(5.0);

        let title_bonus = if !page.query.is_empty()
            && page.title.to_lowercase().contains(&page.query.to_lowercase())
        {
            3.0
        } else {
            0.0
        };
        let position_bonus = (5.0 - 0.5 * page.position as f64).max(0.0);
        let relevance = (5.0 + title_bonus + position_bonus).min(10.0);

        let completeness = (page.snippet.chars().count() as f64 / 50.0).min(10.0);

        Self::new(relevance, domain_authority(page.url), recency, 5.0, completeness)
            .weighted(Weights::WEB)
    }
}

/// Inputs for Stack Overflow scoring.
#[derive(Debug, Clone, Default)]
pub struct QuestionStats {
    pub score: i64,
    pub answer_count: u64,
    pub is_answered: bool,
    pub has_accepted_answer: bool,
    pub creation_date: Option<DateTime<Utc>>,
    pub body_len: usize,
}

/// Inputs for web result scoring; `position` is the zero-based rank from the engine.
#[derive(Debug, Clone)]
pub struct PageStats<'a> {
    pub query: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub snippet: &'a str,
    pub modified: Option<&'a str>,
    pub position: usize,
}

fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_seconds() as f64 / 86_400.0
}

fn parse_page_date(raw: &str) -> Option<DateTime<Utc>> {
    let day = raw.get(..10)?;
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

const DOMAIN_AUTHORITY: &[(&str, f64)] = &[
    ("stackoverflow.com", 9.0),
    ("github.com", 8.5),
    ("developer.mozilla.org", 9.5),
    ("reactjs.org", 9.8),
    ("react.dev", 9.8),
    ("nodejs.org", 9.8),
    ("npmjs.com", 9.0),
    ("react-redux.js.org", 9.0),
    ("nextjs.org", 9.5),
    ("medium.com", 7.0),
    ("dev.to", 7.5),
    ("freecodecamp.org", 8.5),
    ("stackoverflow.blog", 8.5),
    ("css-tricks.com", 8.5),
    ("docs.python.org", 9.8),
    ("docs.microsoft.com", 9.5),
    ("learn.microsoft.com", 9.5),
    ("support.google.com", 9.0),
    ("web.dev", 9.0),
    ("kubernetes.io", 9.5),
    ("digitalocean.com/community", 8.0),
    ("aws.amazon.com/documentation", 9.5),
    ("cloud.google.com", 9.5),
    ("blog.logrocket.com", 8.0),
];

const DEFAULT_AUTHORITY: f64 = 5.0;

/// Authority of the most specific table entry matching the URL. Plain entries
/// match the host or any subdomain of it; entries with a path also require the
/// URL path to start with that path.
pub fn domain_authority(raw_url: &str) -> f64 {
    let Ok(parsed) = Url::parse(raw_url) else {
        return DEFAULT_AUTHORITY;
    };
    let Some(host) = parsed.host_str() else {
        return DEFAULT_AUTHORITY;
    };
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    let path = parsed.path();

    DOMAIN_AUTHORITY
        .iter()
        .filter(|(entry, _)| {
            let (domain, prefix) = match entry.split_once('/') {
                Some((domain, rest)) => (domain, Some(rest)),
                None => (*entry, None),
            };
            let host_matches = host == domain || host.ends_with(&format!(".{}", domain));
            let path_matches = prefix.map_or(true, |p| {
                path.trim_start_matches('/').starts_with(p)
            });
            host_matches && path_matches
        })
        .max_by_key(|(entry, _)| entry.len())
        .map(|(_, authority)| *authority)
        .unwrap_or(DEFAULT_AUTHORITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn fixed_provider_scores() {
        let kb = SearchResultMetrics::knowledge_base();
        assert!(close(kb.composite, 9.0 * 0.3 + 9.0 * 0.2 + 8.0 * 0.15 + 7.0 * 0.25 + 8.0 * 0.1));

        let with_command = SearchResultMetrics::language_model(true);
        let without = SearchResultMetrics::language_model(false);
        assert!(close(with_command.completeness, 8.0));
        assert!(close(without.completeness, 5.0));
        assert!(with_command.composite > without.composite);
    }

    #[test]
    fn stack_overflow_formulas() {
        let question = QuestionStats {
            score: 45,
            answer_count: 10,
            is_answered: true,
            has_accepted_answer: true,
            creation_date: Some(now() - Duration::days(100)),
            body_len: 500,
        };
        let m = SearchResultMetrics::stack_overflow(&question, now());

        // 4.5 + 2 + min(3, 5)
        assert!(close(m.community, 9.5));
        assert!(close(m.recency, 8.0));
        assert!(close(m.relevance, 10.0));
        assert!(close(m.completeness, 6.5));
        assert!(close(m.authority, 9.0));
    }

    #[test]
    fn stack_overflow_without_date_has_no_recency() {
        let m = SearchResultMetrics::stack_overflow(&QuestionStats::default(), now());
        assert!(close(m.recency, 0.0));
        assert!(close(m.relevance, 7.0));
        assert!(close(m.community, 0.0));
    }

    #[test]
    fn stack_overflow_recency_buckets() {
        let recency = |days| {
            let q = QuestionStats {
                creation_date: Some(now() - Duration::days(days)),
                ..Default::default()
            };
            SearchResultMetrics::stack_overflow(&q, now()).recency
        };
        assert!(close(recency(1), 10.0));
        assert!(close(recency(300), 6.0));
        assert!(close(recency(500), 4.0));
        assert!(close(recency(2000), 2.0));
    }

    #[test]
    fn web_formulas() {
        let page = PageStats {
            query: "Cannot find module",
            title: "Error: Cannot find module 'express'",
            url: "https://github.com/expressjs/express/issues/1",
            snippet: &"x".repeat(200),
            modified: Some("2024-05-20T10:00:00Z"),
            position: 2,
        };
        let m = SearchResultMetrics::web(&page, now());

        assert!(close(m.authority, 8.5));
        assert!(close(m.recency, 10.0));
        assert!(close(m.relevance, 10.0));
        assert!(close(m.community, 5.0));
        assert!(close(m.completeness, 4.0));
    }

    #[test]
    fn web_defaults_for_unknown_pages() {
        let page = PageStats {
            query: "q",
            title: "Unrelated",
            url: "https://example.net/post",
            snippet: "",
            modified: Some("not a date"),
            position: 12,
        };
        let m = SearchResultMetrics::web(&page, now());

        assert!(close(m.authority, 5.0));
        assert!(close(m.recency, 5.0));
        assert!(close(m.relevance, 5.0));
    }

    #[test]
    fn authority_uses_most_specific_entry() {
        assert!(close(domain_authority("https://stackoverflow.com/questions/1"), 9.0));
        assert!(close(domain_authority("https://www.stackoverflow.blog/2020/x"), 8.5));
        assert!(close(domain_authority("https://docs.python.org/3/library/os.html"), 9.8));
        assert!(close(domain_authority("https://gist.github.com/a/b"), 8.5));
        assert!(close(
            domain_authority("https://www.digitalocean.com/community/tutorials/x"),
            8.0
        ));
        assert!(close(domain_authority("https://www.digitalocean.com/pricing"), 5.0));
        assert!(close(domain_authority("https://notgithub.com/"), 5.0));
        assert!(close(domain_authority("not a url"), 5.0));
    }
}
