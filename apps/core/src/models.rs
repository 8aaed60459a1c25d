use crate::cache::CacheKey;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of theme labels a single analysis may carry.
pub const MAX_THEMES: usize = 3;

/// The kind of analysis a request asks for. Part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SingleSentiment,
    BatchSentiment,
    InsightGeneration,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::SingleSentiment => "single_sentiment",
            TaskKind::BatchSentiment => "batch_sentiment",
            TaskKind::InsightGeneration => "insight_generation",
        }
    }
}

/// A validated, trimmed piece of text bound to a task kind.
///
/// Fields are private: the only way to get one is through [`AnalysisRequest::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    text: String,
    task: TaskKind,
}

impl AnalysisRequest {
    /// Trims `raw` and checks it is non-empty and at most `max_chars` characters.
    pub fn new(raw: &str, task: TaskKind, max_chars: usize) -> Result<Self, AppError> {
        let text = validate_text(raw, max_chars)?;
        Ok(Self {
            text: text.to_string(),
            task,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    /// Key over the task kind and the normalized text.
    pub fn cache_key(&self) -> CacheKey {
        let normalized = normalize_for_key(&self.text);
        CacheKey::digest([self.task.label(), normalized.as_str()])
    }

    /// Short prefix for log lines; never logs the whole comment.
    pub fn preview(&self) -> String {
        preview(&self.text)
    }
}

/// Trims `raw` and checks it is non-empty and at most `max_chars` characters long.
pub fn validate_text(raw: &str, max_chars: usize) -> Result<&str, AppError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Input text cannot be empty".to_string()));
    }
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(AppError::Validation(format!(
            "Input too long: {} characters, maximum is {}",
            chars, max_chars
        )));
    }
    Ok(text)
}

/// Lowercases and collapses whitespace so that cosmetic differences share a key.
pub fn normalize_for_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 32;
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

/// Range-checked sentiment payload. Construction is the only validation gate:
/// a value that exists is within bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentScores {
    sentiment_score: f64,
    themes: Vec<String>,
    controversy_level: u8,
}

impl SentimentScores {
    /// Rejects a score outside `[-1.0, 1.0]` (or NaN), more than three themes,
    /// blank themes, and a controversy level outside `1..=10`.
    pub fn new(
        sentiment_score: f64,
        themes: Vec<String>,
        controversy_level: i64,
    ) -> Result<Self, AppError> {
        if !(-1.0..=1.0).contains(&sentiment_score) {
            return Err(AppError::MalformedResponse(format!(
                "sentiment_score {} is outside [-1.0, 1.0]",
                sentiment_score
            )));
        }
        if themes.len() > MAX_THEMES {
            return Err(AppError::MalformedResponse(format!(
                "expected at most {} themes, got {}",
                MAX_THEMES,
                themes.len()
            )));
        }
        let themes: Vec<String> = themes.into_iter().map(|t| t.trim().to_string()).collect();
        if themes.iter().any(String::is_empty) {
            return Err(AppError::MalformedResponse("theme labels cannot be blank".to_string()));
        }
        let controversy_level = u8::try_from(controversy_level)
            .ok()
            .filter(|level| (1..=10).contains(level))
            .ok_or_else(|| {
                AppError::MalformedResponse(format!(
                    "controversy_level {} is outside 1..=10",
                    controversy_level
                ))
            })?;

        Ok(Self {
            sentiment_score,
            themes,
            controversy_level,
        })
    }
}

/// Where an [`AnalysisResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultSource {
    CacheHit,
    Fresh { attempts: u32, elapsed_ms: u64 },
}

/// Analysis of one comment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    scores: SentimentScores,
    source: ResultSource,
}

impl AnalysisResult {
    pub fn new(scores: SentimentScores, source: ResultSource) -> Self {
        Self { scores, source }
    }

    pub fn sentiment_score(&self) -> f64 {
        self.scores.sentiment_score
    }

    pub fn themes(&self) -> &[String] {
        &self.scores.themes
    }

    pub fn controversy_level(&self) -> u8 {
        self.scores.controversy_level
    }

    pub fn source(&self) -> ResultSource {
        self.source
    }

    /// Attempts spent producing this result; 0 for a cache hit.
    pub fn attempts(&self) -> u32 {
        match self.source {
            ResultSource::CacheHit => 0,
            ResultSource::Fresh { attempts, .. } => attempts,
        }
    }

    pub(crate) fn into_cache_hit(self) -> Self {
        Self {
            source: ResultSource::CacheHit,
            ..self
        }
    }
}

/// Outcome of one comment inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItem {
    Analyzed { index: usize, result: AnalysisResult },
    Failed { index: usize, error: AppError },
}

impl BatchItem {
    pub fn index(&self) -> usize {
        match self {
            BatchItem::Analyzed { index, .. } | BatchItem::Failed { index, .. } => *index,
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            BatchItem::Analyzed { result, .. } => Some(result),
            BatchItem::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            BatchItem::Analyzed { .. } => None,
            BatchItem::Failed { error, .. } => Some(error),
        }
    }
}

/// Statistics derived from a batch. Means cover successful items only and are
/// `None` when nothing succeeded, so an all-failed batch never reads as neutral.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAggregate {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub mean_sentiment: Option<f64>,
    pub mean_controversy: Option<f64>,
    pub theme_frequency: BTreeMap<String, usize>,
}

impl BatchAggregate {
    pub fn from_items(items: &[BatchItem]) -> Self {
        let mut sentiment_sum = 0.0;
        let mut controversy_sum = 0.0;
        let mut theme_frequency = BTreeMap::new();

        let results: Vec<&AnalysisResult> = items.iter().filter_map(BatchItem::result).collect();
        for result in &results {
            sentiment_sum += result.sentiment_score();
            controversy_sum += f64::from(result.controversy_level());
            for theme in result.themes() {
                *theme_frequency.entry(theme.clone()).or_insert(0) += 1;
            }
        }

        let succeeded = results.len();
        let mean = |sum: f64| (succeeded > 0).then(|| sum / succeeded as f64);

        Self {
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            mean_sentiment: mean(sentiment_sum),
            mean_controversy: mean(controversy_sum),
            theme_frequency,
        }
    }

    /// Themes ordered by descending count, ties broken alphabetically.
    pub fn top_themes(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut themes: Vec<(&str, usize)> = self
            .theme_frequency
            .iter()
            .map(|(theme, count)| (theme.as_str(), *count))
            .collect();
        themes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        themes.truncate(limit);
        themes
    }
}

/// Per-item results of a batch plus their aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub aggregate: BatchAggregate,
    pub items: Vec<BatchItem>,
    /// True when the whole report was served from the batch cache.
    pub cached: bool,
}

impl BatchReport {
    pub fn new(items: Vec<BatchItem>) -> Self {
        Self {
            aggregate: BatchAggregate::from_items(&items),
            items,
            cached: false,
        }
    }
}

/// Insight generation outcome inside a [`FullReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsightSection {
    NotRequested,
    Generated { recommendations: Vec<String> },
    Unavailable { error: AppError },
}

/// Batch analysis plus optional creator-facing recommendations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullReport {
    pub comment_count: usize,
    pub batch: BatchReport,
    pub insights: InsightSection,
}
