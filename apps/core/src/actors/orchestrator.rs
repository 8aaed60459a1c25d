use crate::actors::invoker::{Budget, ResilientInvoker, RetryPolicy};
use crate::actors::messages::AppError;
use crate::actors::traits::GenerativeModel;
use crate::brain::classifier::{QueryCategory, QueryClassifier};
use crate::brain::{parser, prompts};
use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::AppConfig;
use crate::conversation::{ConversationStore, ConversationTurn};
use crate::health::{ComponentHealth, HealthReport};
use crate::models::{
    normalize_for_key, validate_text, AnalysisRequest, AnalysisResult, BatchAggregate, BatchItem,
    BatchReport, FullReport, InsightSection, ResultSource, TaskKind,
};
use crate::rate_limiter::RateLimiter;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

type PendingAnalysis = Shared<BoxFuture<'static, Result<AnalysisResult, AppError>>>;
type InFlight = Mutex<HashMap<CacheKey, PendingAnalysis>>;

/// Counters of both caches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsReport {
    /// Per-comment results.
    pub single: CacheStats,
    /// Whole batch reports.
    pub batch: CacheStats,
}

/// The top-level facade over caching, invocation, classification and chat.
///
/// One instance is meant to be shared (behind an `Arc`) by every caller in the
/// process; all state lives behind its own lock.
pub struct AnalysisOrchestrator<M: GenerativeModel + ?Sized> {
    invoker: Arc<ResilientInvoker<M>>,
    results: Arc<ResultCache<CacheKey, AnalysisResult>>,
    batches: ResultCache<CacheKey, BatchReport>,
    conversations: ConversationStore,
    classifier: QueryClassifier<M>,
    in_flight: Arc<InFlight>,
    max_input_chars: usize,
    max_chat_chars: usize,
    batch_concurrency: usize,
}

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<CacheKey, PendingAnalysis>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: GenerativeModel + ?Sized> AnalysisOrchestrator<M> {
    /// Builds an orchestrator and all of its subsystems from `config`.
    ///
    /// # Arguments
    ///
    /// * `model` - The generative model backend (the HTTP client in production).
    /// * `config` - Cache sizes, TTLs, retry policy and input bounds.
    pub fn new(model: Arc<M>, config: &AppConfig) -> Self {
        let mut invoker = ResilientInvoker::new(model, RetryPolicy::from_config(config));
        if config.requests_per_minute > 0 {
            invoker = invoker.with_rate_limit(RateLimiter::new(
                config.requests_per_minute as usize,
                config.rate_limit_window,
            ));
        }
        let invoker = Arc::new(invoker);

        Self {
            classifier: QueryClassifier::new(Arc::clone(&invoker)),
            invoker,
            results: Arc::new(ResultCache::new(
                "results",
                config.cache_max_size,
                config.cache_ttl,
            )),
            batches: ResultCache::new(
                "batches",
                config.batch_cache_max_size,
                config.batch_cache_ttl,
            ),
            conversations: ConversationStore::new(config.max_history_turns),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            max_input_chars: config.max_input_chars,
            max_chat_chars: config.max_chat_chars,
            batch_concurrency: config.batch_concurrency.max(1),
        }
    }

    /// Analyzes one comment.
    ///
    /// Served from the cache when possible. Concurrent misses on the same key
    /// share a single external call. A failed call is never cached.
    #[instrument(skip(self, text))]
    pub async fn analyze_one(&self, text: &str) -> Result<AnalysisResult, AppError> {
        let request = AnalysisRequest::new(text, TaskKind::SingleSentiment, self.max_input_chars)?;
        let key = request.cache_key();

        let pending = {
            let mut in_flight = lock_in_flight(&self.in_flight);

            // Checked under the in-flight lock: a finished call stores its
            // result before leaving the map, so one of the two always sees it.
            if let Some(hit) = self.results.get(&key) {
                debug!(key = key.short(), "result cache hit");
                return Ok(hit.into_cache_hit());
            }

            match in_flight.get(&key) {
                Some(pending) => {
                    debug!(key = key.short(), "joining in-flight analysis");
                    pending.clone()
                }
                None => {
                    debug!(key = key.short(), preview = %request.preview(), "result cache miss");
                    let pending = self.spawn_analysis(request, key.clone());
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn spawn_analysis(&self, request: AnalysisRequest, key: CacheKey) -> PendingAnalysis {
        let invoker = Arc::clone(&self.invoker);
        let results = Arc::clone(&self.results);
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let prompt = prompts::sentiment_request(request.text());
            let outcome = invoker
                .invoke_parsed(&prompt, invoker.default_budget(), parser::parse_sentiment)
                .await;
            let elapsed_ms = outcome.elapsed.as_millis() as u64;
            let attempts = outcome.attempts;

            let result = outcome
                .result
                .map(|scores| AnalysisResult::new(scores, ResultSource::Fresh { attempts, elapsed_ms }));

            match &result {
                Ok(analysis) => {
                    info!(
                        key = task_key.short(),
                        attempts,
                        elapsed_ms,
                        sentiment = analysis.sentiment_score(),
                        "analysis complete"
                    );
                    results.put(task_key.clone(), analysis.clone());
                }
                Err(e) => error!(key = task_key.short(), attempts, error = %e, "analysis failed"),
            }

            lock_in_flight(&in_flight).remove(&task_key);
            result
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    lock_in_flight(&in_flight).remove(&key);
                    Err(AppError::Internal(format!("analysis task failed: {}", join_error)))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Analyzes every comment and aggregates the successes.
    ///
    /// One failing comment never aborts the batch: it is reported as a failed
    /// item and left out of the means. Items come back in input order.
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn analyze_batch<S: AsRef<str>>(&self, texts: &[S]) -> Result<BatchReport, AppError> {
        if texts.is_empty() {
            return Err(AppError::Validation("Batch cannot be empty".to_string()));
        }

        let normalized: Vec<String> = texts.iter().map(|t| normalize_for_key(t.as_ref())).collect();
        let batch_key = CacheKey::digest(
            std::iter::once(TaskKind::BatchSentiment.label()).chain(normalized.iter().map(String::as_str)),
        );

        if let Some(mut report) = self.batches.get(&batch_key) {
            debug!(key = batch_key.short(), "batch cache hit");
            report.cached = true;
            for item in &mut report.items {
                if let BatchItem::Analyzed { result, .. } = item {
                    *result = result.clone().into_cache_hit();
                }
            }
            return Ok(report);
        }

        let started = Instant::now();
        let items: Vec<BatchItem> = stream::iter(texts.iter().enumerate())
            .map(|(index, text)| async move {
                match self.analyze_one(text.as_ref()).await {
                    Ok(result) => BatchItem::Analyzed { index, result },
                    Err(error) => BatchItem::Failed { index, error },
                }
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let report = BatchReport::new(items);
        let aggregate = &report.aggregate;
        info!(
            total = aggregate.total,
            succeeded = aggregate.succeeded,
            failed = aggregate.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch analysis complete"
        );

        if aggregate.failed == 0 {
            self.batches.put(batch_key, report.clone());
        } else {
            warn!(failed = aggregate.failed, "batch had failures, not caching");
        }
        Ok(report)
    }

    /// Sends `message` in the context of `session_id` and returns the reply.
    ///
    /// Never cached. The exchange is recorded only once the reply is in, so a
    /// failed call leaves the history untouched.
    #[instrument(skip(self, message))]
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<String, AppError> {
        let message = validate_text(message, self.max_chat_chars)?;
        let history = self.conversations.history(session_id);
        let request = prompts::chat_request(&history, message);

        let outcome = self
            .invoker
            .invoke_parsed(&request, self.invoker.default_budget(), parser::parse_reply)
            .await;
        let reply = outcome.result?;

        self.conversations.append_exchange(session_id, message, reply.clone());
        debug!(turns = history.len() + 2, attempts = outcome.attempts, "chat reply recorded");
        Ok(reply)
    }

    /// Maps a free-text query to a category. Never fails.
    pub async fn categorize(&self, query: &str) -> QueryCategory {
        self.classifier.classify(query).await
    }

    /// Turns an aggregate into ordered recommendations with one external call.
    #[instrument(skip(self, aggregate), fields(task = TaskKind::InsightGeneration.label()))]
    pub async fn generate_insights(&self, aggregate: &BatchAggregate) -> Result<Vec<String>, AppError> {
        if aggregate.succeeded == 0 {
            return Err(AppError::Validation(
                "No successfully analyzed comments to derive insights from".to_string(),
            ));
        }

        let request = prompts::insights_request(aggregate)?;
        let outcome = self
            .invoker
            .invoke_parsed(&request, self.invoker.default_budget(), parser::parse_insights)
            .await;
        let insights = outcome.result?;
        info!(count = insights.len(), attempts = outcome.attempts, "insights generated");
        Ok(insights)
    }

    /// Batch analysis plus, if asked, insights. An insights failure is
    /// reported inside the report and does not discard the batch.
    pub async fn full_analysis<S: AsRef<str>>(
        &self,
        texts: &[S],
        include_insights: bool,
    ) -> Result<FullReport, AppError> {
        let batch = self.analyze_batch(texts).await?;

        let insights = if !include_insights {
            InsightSection::NotRequested
        } else {
            match self.generate_insights(&batch.aggregate).await {
                Ok(recommendations) => InsightSection::Generated { recommendations },
                Err(error) => {
                    warn!(error = %error, "insights unavailable");
                    InsightSection::Unavailable { error }
                }
            }
        };

        Ok(FullReport {
            comment_count: batch.aggregate.total,
            batch,
            insights,
        })
    }

    /// Reports the state of every subsystem. Never fails.
    ///
    /// The external service is probed with one attempt only, and only when a
    /// credential is configured.
    pub async fn health_check(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        let model = self.invoker.model();
        let configured = model.is_configured();

        components.insert(
            "credential".to_string(),
            if configured {
                ComponentHealth::ok("configured")
            } else {
                ComponentHealth::degraded("GEMINI_API_KEY is not set")
            },
        );

        let service = if configured {
            let budget = Budget::single_attempt(self.invoker.default_budget().timeout);
            let outcome = self.invoker.invoke(&prompts::probe_request(), budget).await;
            match outcome.result {
                Ok(_) => ComponentHealth::ok(format!(
                    "{} responded in {}ms",
                    model.name(),
                    outcome.elapsed.as_millis()
                )),
                Err(e) => ComponentHealth::degraded(format!("{} probe failed: {}", model.name(), e)),
            }
        } else {
            ComponentHealth::degraded("not probed: no credential")
        };
        components.insert("generative_service".to_string(), service);

        for (name, stats) in [("result_cache", self.results.stats()), ("batch_cache", self.batches.stats())] {
            components.insert(
                name.to_string(),
                ComponentHealth::ok(format!(
                    "{}/{} entries, hit rate {:.2}",
                    stats.size, stats.max_size, stats.hit_rate
                )),
            );
        }

        components.insert(
            "conversations".to_string(),
            ComponentHealth::ok(format!(
                "{} active sessions, {} turns max",
                self.conversations.session_count(),
                self.conversations.max_turns()
            )),
        );

        let report = HealthReport::from_components(components);
        if !report.is_healthy() {
            warn!("health check degraded");
        }
        report
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            single: self.results.stats(),
            batch: self.batches.stats(),
        }
    }

    /// Empties both caches and resets their counters.
    pub fn clear_caches(&self) {
        self.results.clear();
        self.batches.clear();
        info!("caches cleared");
    }

    /// Drops expired entries from both caches. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.results.purge_expired() + self.batches.purge_expired()
    }

    /// Forgets a chat session. Returns whether it existed.
    pub fn clear_chat_history(&self, session_id: &str) -> bool {
        self.conversations.clear(session_id)
    }

    pub fn conversation_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.conversations.history(session_id)
    }
}
