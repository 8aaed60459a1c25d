//! Query classification.
//!
//! Two tiers:
//! 1. Regex pattern groups, no external call
//! 2. A single model call when the patterns are inconclusive
//!
//! Classification never fails the caller: anything that goes wrong yields
//! [`QueryCategory::General`].

use crate::actors::invoker::{Budget, ResilientInvoker};
use crate::actors::traits::GenerativeModel;
use crate::brain::prompts;
use crate::error::AppError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

/// Queries shorter than this are small talk by definition.
const MIN_QUERY_CHARS: usize = 3;
/// Upper bound on the fallback call, whatever the invoker's default.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Viewer mood and opinion
    SentimentAnalysis,
    /// Views, likes, retention and growth
    EngagementAnalysis,
    /// Topics and themes of the video
    ContentAnalysis,
    /// Small talk and everything else
    General,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 4] = [
        QueryCategory::SentimentAnalysis,
        QueryCategory::EngagementAnalysis,
        QueryCategory::ContentAnalysis,
        QueryCategory::General,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            QueryCategory::SentimentAnalysis => "sentiment_analysis",
            QueryCategory::EngagementAnalysis => "engagement_analysis",
            QueryCategory::ContentAnalysis => "content_analysis",
            QueryCategory::General => "general",
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Result of the local pattern pass.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryMatch {
    /// `None` when no group matched or the best groups tied.
    pub category: Option<QueryCategory>,
    /// Fraction of the winning group's patterns that matched (0.0 - 1.0)
    pub confidence: f32,
    pub matched_patterns: Vec<String>,
}

struct CategoryPatterns {
    category: QueryCategory,
    patterns: &'static LazyLock<Vec<Regex>>,
}

static SENTIMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(sentiment|mood|feel|feeling|feelings|vibe|tone)\b").expect("Invalid regex: mood words"),
        Regex::new(r"(?i)\b(positive|negative|neutral|toxic|hate|haters|love|angry|happy|upset)\b").expect("Invalid regex: polarity words"),
        Regex::new(r"(?i)\b(opinion|opinions|think about|saying about|react|reaction|reactions|perceive|perception)\b").expect("Invalid regex: opinion phrases"),
        Regex::new(r"(?i)\b(controvers\w*|divisive|backlash|complain\w*)\b").expect("Invalid regex: controversy words"),
    ]
});

static ENGAGEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(views|viewers count|likes|dislikes|subscribers?|subs)\b").expect("Invalid regex: counter words"),
        Regex::new(r"(?i)\b(engagement|retention|watch time|click[- ]?through|ctr|impressions)\b").expect("Invalid regex: engagement metrics"),
        Regex::new(r"(?i)\b(how many|number of|count of)\b").expect("Invalid regex: counting phrases"),
        Regex::new(r"(?i)\b(growth|grow|reach|perform\w*|algorithm)\b").expect("Invalid regex: growth words"),
    ]
});

static CONTENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(topics?|themes?|subjects?)\b").expect("Invalid regex: topic words"),
        Regex::new(r"(?i)\b(content|script|editing|thumbnail|title|intro|outro|format)\b").expect("Invalid regex: production words"),
        Regex::new(r"(?i)\b(next video|video ideas?|what to make|cover next)\b").expect("Invalid regex: planning phrases"),
        Regex::new(r"(?i)\b(about the video|video about|talk about|discussed)\b").expect("Invalid regex: aboutness phrases"),
    ]
});

static GENERAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^(hello|hi|hey|greetings|good morning|good afternoon|good evening|yo)\b").expect("Invalid regex: greetings"),
        Regex::new(r"(?i)\b(thanks|thank you|cheers|bye|goodbye|see you)\b").expect("Invalid regex: courtesy words"),
        Regex::new(r"(?i)\b(how are you|who are you|what can you do)\b").expect("Invalid regex: small talk"),
    ]
});

static GROUPS: [CategoryPatterns; 4] = [
    CategoryPatterns {
        category: QueryCategory::SentimentAnalysis,
        patterns: &SENTIMENT_PATTERNS,
    },
    CategoryPatterns {
        category: QueryCategory::EngagementAnalysis,
        patterns: &ENGAGEMENT_PATTERNS,
    },
    CategoryPatterns {
        category: QueryCategory::ContentAnalysis,
        patterns: &CONTENT_PATTERNS,
    },
    CategoryPatterns {
        category: QueryCategory::General,
        patterns: &GENERAL_PATTERNS,
    },
];

/// Runs the pattern groups over `query`.
///
/// Conclusive only when exactly one group has the highest number of matching
/// patterns. A tie is left to the fallback.
pub fn classify_local(query: &str) -> CategoryMatch {
    let query = query.trim();
    let mut best: Option<(QueryCategory, usize, f32, Vec<String>)> = None;
    let mut tied = false;

    for group in &GROUPS {
        let matched: Vec<String> = group
            .patterns
            .iter()
            .filter_map(|pattern| pattern.find(query).map(|m| m.as_str().to_string()))
            .collect();
        let count = matched.len();
        if count == 0 {
            continue;
        }

        let confidence = count as f32 / group.patterns.len() as f32;
        match &best {
            Some((_, best_count, _, _)) if count < *best_count => {}
            Some((_, best_count, _, _)) if count == *best_count => tied = true,
            _ => {
                tied = false;
                best = Some((group.category, count, confidence, matched));
            }
        }
    }

    match best {
        Some((category, _, confidence, matched_patterns)) if !tied => CategoryMatch {
            category: Some(category),
            confidence,
            matched_patterns,
        },
        _ => CategoryMatch {
            category: None,
            confidence: 0.0,
            matched_patterns: vec![],
        },
    }
}

/// Maps the model's one-word answer to a category. Accepts the label with
/// spaces, hyphens, quotes or a trailing period.
pub fn parse_category(raw: &str) -> Result<QueryCategory, AppError> {
    let normalized = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_");

    QueryCategory::ALL
        .into_iter()
        .find(|category| category.label() == normalized)
        .ok_or_else(|| AppError::MalformedResponse(format!("unknown category '{}'", raw.trim())))
}

/// Maps free-text queries to a [`QueryCategory`].
pub struct QueryClassifier<M: GenerativeModel + ?Sized> {
    invoker: Arc<ResilientInvoker<M>>,
}

impl<M: GenerativeModel + ?Sized> QueryClassifier<M> {
    pub fn new(invoker: Arc<ResilientInvoker<M>>) -> Self {
        Self { invoker }
    }

    /// Classifies `query`. Results are never cached.
    pub async fn classify(&self, query: &str) -> QueryCategory {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            debug!("query too short, defaulting to general");
            return QueryCategory::General;
        }

        let local = classify_local(query);
        if let Some(category) = local.category {
            debug!(%category, confidence = local.confidence, "classified locally");
            return category;
        }

        let budget = Budget::single_attempt(self.invoker.default_budget().timeout.min(FALLBACK_TIMEOUT));
        let outcome = self
            .invoker
            .invoke_parsed(&prompts::classification_request(query), budget, parse_category)
            .await;

        match outcome.result {
            Ok(category) => {
                debug!(%category, "classified by model");
                category
            }
            Err(e) => {
                info!(error = %e, "classification fallback failed, defaulting to general");
                QueryCategory::General
            }
        }
    }
}
