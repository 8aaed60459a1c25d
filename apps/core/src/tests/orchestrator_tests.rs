//! AnalysisOrchestrator Tests
//!
//! End-to-end behavior of the facade against scripted models: caching,
//! retries, batching, coalescing, chat history and health reporting.

use super::mocks::{default_answer, rate_limited, sentiment_json, test_config, ScriptedModel};
use crate::actors::messages::{AppError, PromptTask};
use crate::actors::orchestrator::AnalysisOrchestrator;
use crate::brain::classifier::QueryCategory;
use crate::config::AppConfig;
use crate::conversation::Role;
use crate::error::FailureKind;
use crate::health::HealthStatus;
use crate::models::{BatchAggregate, BatchItem, InsightSection, ResultSource};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

fn setup(model: ScriptedModel) -> (AnalysisOrchestrator<ScriptedModel>, Arc<ScriptedModel>) {
    setup_with(model, test_config())
}

fn setup_with(
    model: ScriptedModel,
    config: AppConfig,
) -> (AnalysisOrchestrator<ScriptedModel>, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    (AnalysisOrchestrator::new(Arc::clone(&model), &config), model)
}

/// Scores keyed on the comment text; "third" fails permanently.
fn per_comment_model() -> ScriptedModel {
    ScriptedModel::new(|req, _| {
        if req.task != PromptTask::Sentiment {
            return Ok(default_answer(req));
        }
        match req.last_user_text() {
            "first" => Ok(sentiment_json(1.0, &["intro"], 2)),
            "second" => Ok(sentiment_json(0.5, &["intro", "audio"], 4)),
            "third" => Err(AppError::InvalidInput("comment rejected".into())),
            "fourth" => Ok(sentiment_json(0.0, &["audio"], 6)),
            _ => Ok(sentiment_json(-0.5, &["pacing"], 8)),
        }
    })
}

// ============================================================================
// Single Analysis & Caching
// ============================================================================

#[tokio::test]
async fn test_second_identical_call_is_a_cache_hit() {
    // 1. Arrange
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    // 2. Act
    let first = orchestrator.analyze_one("Great video!").await.unwrap();
    let hits_before = orchestrator.cache_stats().single.hits;
    let second = orchestrator.analyze_one("Great video!").await.unwrap();

    // 3. Assert
    assert!(matches!(first.source(), ResultSource::Fresh { attempts: 1, .. }));
    assert_eq!(second.source(), ResultSource::CacheHit);
    assert_eq!(first.sentiment_score(), second.sentiment_score());
    assert_eq!(first.themes(), second.themes());
    assert_eq!(orchestrator.cache_stats().single.hits, hits_before + 1);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_cosmetic_differences_share_a_key() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    orchestrator.analyze_one("great video!").await.unwrap();
    let again = orchestrator.analyze_one("  Great   VIDEO! ").await.unwrap();

    assert_eq!(again.source(), ResultSource::CacheHit);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_model() {
    let config = AppConfig {
        max_input_chars: 10,
        ..test_config()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);

    assert!(matches!(orchestrator.analyze_one("   ").await, Err(AppError::Validation(_))));
    assert!(matches!(
        orchestrator.analyze_one("this comment is far too long").await,
        Err(AppError::Validation(_))
    ));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_expired_entry_is_reanalyzed() {
    let config = AppConfig {
        cache_ttl: Duration::from_millis(30),
        ..test_config()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);

    orchestrator.analyze_one("Great video!").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let again = orchestrator.analyze_one("Great video!").await.unwrap();

    assert!(matches!(again.source(), ResultSource::Fresh { .. }));
    assert_eq!(model.call_count(), 2);
    let stats = orchestrator.cache_stats().single;
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_least_recently_used_result_is_evicted() {
    let config = AppConfig {
        cache_max_size: 2,
        ..test_config()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);

    orchestrator.analyze_one("a comment").await.unwrap();
    orchestrator.analyze_one("b comment").await.unwrap();
    orchestrator.analyze_one("a comment").await.unwrap(); // refresh a
    orchestrator.analyze_one("c comment").await.unwrap(); // evicts b
    assert_eq!(model.call_count(), 3);

    let a = orchestrator.analyze_one("a comment").await.unwrap();
    assert_eq!(a.source(), ResultSource::CacheHit);
    let b = orchestrator.analyze_one("b comment").await.unwrap();
    assert!(matches!(b.source(), ResultSource::Fresh { .. }));

    assert_eq!(model.call_count(), 4);
    assert_eq!(orchestrator.cache_stats().single.size, 2);
}

// ============================================================================
// Retry Policy
// ============================================================================

#[tokio::test]
async fn test_two_transient_failures_then_success() {
    let (orchestrator, model) = setup(ScriptedModel::new(|req, n| {
        if n <= 2 {
            Err(rate_limited())
        } else {
            Ok(default_answer(req))
        }
    }));

    let result = orchestrator.analyze_one("Great video!").await.unwrap();

    assert_eq!(result.attempts(), 3);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn test_persistent_transient_failure_exhausts_max_retries() {
    let (orchestrator, model) = setup(ScriptedModel::new(|_, _| Err(rate_limited())));

    let err = orchestrator.analyze_one("Great video!").await.unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::TransientQuota));
    assert_eq!(model.call_count(), test_config().max_retries as usize);
    // Failures are never cached.
    assert_eq!(orchestrator.cache_stats().single.size, 0);
}

#[tokio::test]
async fn test_out_of_range_answer_is_malformed_and_not_retried() {
    let (orchestrator, model) =
        setup(ScriptedModel::new(|_, _| Ok(sentiment_json(3.5, &["hype"], 5))));

    let err = orchestrator.analyze_one("Great video!").await.unwrap_err();

    assert!(matches!(err, AppError::MalformedResponse(_)));
    assert_eq!(model.call_count(), 1);
}

// ============================================================================
// Batch Analysis
// ============================================================================

#[tokio::test]
async fn test_batch_partial_failure() {
    let (orchestrator, _) = setup(per_comment_model());

    let report = orchestrator
        .analyze_batch(&["first", "second", "third", "fourth", "fifth"])
        .await
        .unwrap();

    let aggregate = &report.aggregate;
    assert_eq!(aggregate.total, 5);
    assert_eq!(aggregate.succeeded, 4);
    assert_eq!(aggregate.failed, 1);
    // (1.0 + 0.5 + 0.0 - 0.5) / 4
    assert!((aggregate.mean_sentiment.unwrap() - 0.25).abs() < 1e-9);
    assert!((aggregate.mean_controversy.unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(aggregate.theme_frequency["intro"], 2);
    assert_eq!(aggregate.theme_frequency["audio"], 2);

    assert!(matches!(&report.items[2], BatchItem::Failed { index: 2, error: AppError::InvalidInput(_) }));
    let indices: Vec<usize> = report.items.iter().map(BatchItem::index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    // A batch with failures is not stored whole.
    assert_eq!(orchestrator.cache_stats().batch.size, 0);
}

#[tokio::test]
async fn test_all_failed_batch_reports_absent_means() {
    let (orchestrator, _) =
        setup(ScriptedModel::new(|_, _| Err(AppError::InvalidInput("rejected".into()))));

    let report = orchestrator.analyze_batch(&["one", "two"]).await.unwrap();

    assert_eq!(report.aggregate.succeeded, 0);
    assert_eq!(report.aggregate.failed, 2);
    assert_eq!(report.aggregate.mean_sentiment, None);
    assert_eq!(report.aggregate.mean_controversy, None);
    assert!(report.aggregate.theme_frequency.is_empty());
}

#[tokio::test]
async fn test_successful_batch_is_cached_whole() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());
    let comments = vec!["Loved it".to_string(), "Too long".to_string()];

    let first = orchestrator.analyze_batch(&comments).await.unwrap();
    let second = orchestrator.analyze_batch(&comments).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.aggregate, first.aggregate);
    assert!(second
        .items
        .iter()
        .all(|item| item.result().map(|r| r.source()) == Some(ResultSource::CacheHit)));
    assert_eq!(model.call_count(), 2);
    assert_eq!(orchestrator.cache_stats().batch.hits, 1);
}

#[tokio::test]
async fn test_batch_order_matters_for_batch_key() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    orchestrator.analyze_batch(&["one", "two"]).await.unwrap();
    let swapped = orchestrator.analyze_batch(&["two", "one"]).await.unwrap();

    // Different batch key, but every item comes from the result cache.
    assert!(!swapped.cached);
    assert_eq!(model.call_count(), 2);
    assert_eq!(swapped.items[0].result().map(|r| r.source()), Some(ResultSource::CacheHit));
}

#[tokio::test]
async fn test_throttled_batch_waits_instead_of_failing() {
    let config = AppConfig {
        requests_per_minute: 2,
        rate_limit_window: Duration::from_millis(300),
        ..test_config()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);
    let started = Instant::now();

    let report = orchestrator.analyze_batch(&["a1", "a2", "a3", "a4"]).await.unwrap();

    assert_eq!(report.aggregate.succeeded, 4);
    assert_eq!(report.aggregate.failed, 0);
    assert_eq!(model.call_count(), 4);
    assert!(report
        .items
        .iter()
        .all(|item| item.result().map(|r| r.attempts()) == Some(1)));
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(orchestrator.cache_stats().batch.size, 1);
}

#[tokio::test]
async fn test_default_throttle_admits_a_normal_batch() {
    let config = AppConfig {
        retry_jitter: false,
        api_key: Some("test-key".to_string()),
        ..AppConfig::default()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);
    let comments: Vec<String> = (0..10).map(|i| format!("comment {}", i)).collect();

    let report = orchestrator.analyze_batch(&comments).await.unwrap();

    assert_eq!(report.aggregate.succeeded, 10);
    assert_eq!(model.call_count(), 10);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let (orchestrator, _) = setup(ScriptedModel::always_positive());
    let empty: Vec<String> = vec![];

    assert!(matches!(orchestrator.analyze_batch(&empty).await, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_invalid_item_fails_alone() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    let report = orchestrator.analyze_batch(&["fine", "   "]).await.unwrap();

    assert_eq!(report.aggregate.succeeded, 1);
    assert!(matches!(report.items[1].error(), Some(AppError::Validation(_))));
    assert_eq!(model.call_count(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_coalesce() {
    let (orchestrator, model) =
        setup(ScriptedModel::always_positive().with_delay(Duration::from_millis(50)));
    let orchestrator = Arc::new(orchestrator);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.analyze_one("Same comment").await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(model.call_count(), 1);
    assert_eq!(orchestrator.cache_stats().single.size, 1);
}

#[tokio::test]
async fn test_parallel_batch_deduplicates_repeated_comments() {
    let config = AppConfig {
        batch_concurrency: 4,
        ..test_config()
    };
    let (orchestrator, model) = setup_with(
        ScriptedModel::always_positive().with_delay(Duration::from_millis(20)),
        config,
    );

    let report = orchestrator
        .analyze_batch(&["same", "same", "other", "same"])
        .await
        .unwrap();

    assert_eq!(report.aggregate.succeeded, 4);
    assert_eq!(model.call_count(), 2);
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn test_chat_history_is_bounded() {
    let config = AppConfig {
        max_history_turns: 4,
        ..test_config()
    };
    let (orchestrator, _) = setup_with(
        ScriptedModel::new(|req, _| Ok(format!("reply with {} turns", req.contents.len()))),
        config,
    );

    assert_eq!(orchestrator.chat("s1", "m1").await.unwrap(), "reply with 1 turns");
    assert_eq!(orchestrator.chat("s1", "m2").await.unwrap(), "reply with 3 turns");
    assert_eq!(orchestrator.chat("s1", "m3").await.unwrap(), "reply with 5 turns");

    let history = orchestrator.conversation_history("s1");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].text, "m2");
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[3].text, "reply with 5 turns");
}

#[tokio::test]
async fn test_chat_context_opens_on_a_user_turn() {
    let config = AppConfig {
        max_history_turns: 3,
        ..test_config()
    };
    let (orchestrator, _) = setup_with(
        ScriptedModel::new(|req, _| Ok(format!("{:?} first", req.contents[0].role))),
        config,
    );

    for message in ["m1", "m2", "m3"] {
        assert_eq!(orchestrator.chat("s1", message).await.unwrap(), "User first");
    }

    let roles: Vec<Role> = orchestrator
        .conversation_history("s1")
        .iter()
        .map(|turn| turn.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_failed_chat_leaves_history_untouched() {
    let (orchestrator, _) = setup(ScriptedModel::new(|req, n| {
        if n == 2 {
            Err(AppError::AuthConfiguration("key revoked".into()))
        } else {
            Ok(default_answer(req))
        }
    }));

    orchestrator.chat("s1", "hello").await.unwrap();
    let err = orchestrator.chat("s1", "still there?").await.unwrap_err();

    assert!(matches!(err, AppError::AuthConfiguration(_)));
    let history = orchestrator.conversation_history("s1");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_chat_is_never_cached() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    orchestrator.chat("s1", "hello").await.unwrap();
    orchestrator.chat("s2", "hello").await.unwrap();

    assert_eq!(model.call_count(), 2);
    assert_eq!(orchestrator.cache_stats().single.size, 0);
}

#[tokio::test]
async fn test_chat_validation_and_clear() {
    let config = AppConfig {
        max_chat_chars: 5,
        ..test_config()
    };
    let (orchestrator, model) = setup_with(ScriptedModel::always_positive(), config);

    assert!(matches!(orchestrator.chat("s1", "").await, Err(AppError::Validation(_))));
    assert!(matches!(orchestrator.chat("s1", "way too long").await, Err(AppError::Validation(_))));
    assert_eq!(model.call_count(), 0);

    orchestrator.chat("s1", "hi").await.unwrap();
    assert!(orchestrator.clear_chat_history("s1"));
    assert!(!orchestrator.clear_chat_history("s1"));
    assert!(orchestrator.conversation_history("s1").is_empty());
}

// ============================================================================
// Categorize & Insights
// ============================================================================

#[tokio::test]
async fn test_categorize_delegates_and_never_fails() {
    let (orchestrator, _) =
        setup(ScriptedModel::new(|_, _| Err(AppError::AuthConfiguration("no key".into()))));

    assert_eq!(
        orchestrator.categorize("Is my retention dropping?").await,
        QueryCategory::EngagementAnalysis
    );
    assert_eq!(orchestrator.categorize("").await, QueryCategory::General);
    assert_eq!(orchestrator.categorize("qwzx blorp zzz").await, QueryCategory::General);
}

#[tokio::test]
async fn test_full_analysis_with_insights() {
    let (orchestrator, _) = setup(per_comment_model());

    let report = orchestrator
        .full_analysis(&["first", "second", "third"], true)
        .await
        .unwrap();

    assert_eq!(report.comment_count, 3);
    assert_eq!(report.batch.aggregate.failed, 1);
    match report.insights {
        InsightSection::Generated { recommendations } => {
            assert_eq!(recommendations.len(), 3);
            assert_eq!(recommendations[1], "Fix the audio mix");
        }
        other => panic!("expected insights, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_analysis_without_insights_makes_no_insight_call() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    let report = orchestrator.full_analysis(&["first"], false).await.unwrap();

    assert_eq!(report.insights, InsightSection::NotRequested);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_insight_failure_keeps_the_batch() {
    let (orchestrator, _) = setup(ScriptedModel::new(|req, _| match req.task {
        PromptTask::Insights => Err(AppError::InvalidInput("prompt rejected".into())),
        _ => Ok(default_answer(req)),
    }));

    let report = orchestrator.full_analysis(&["first", "second"], true).await.unwrap();

    assert_eq!(report.batch.aggregate.succeeded, 2);
    assert!(matches!(
        report.insights,
        InsightSection::Unavailable { error: AppError::InvalidInput(_) }
    ));
}

#[tokio::test]
async fn test_insights_need_at_least_one_success() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());
    let empty = BatchAggregate::from_items(&[]);

    let err = orchestrator.generate_insights(&empty).await.unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(model.call_count(), 0);
}

// ============================================================================
// Health & Operations
// ============================================================================

#[tokio::test]
async fn test_health_degraded_without_credential() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive().unconfigured());

    let report = orchestrator.health_check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.components["credential"].status, HealthStatus::Degraded);
    assert_eq!(report.components["generative_service"].status, HealthStatus::Degraded);
    assert_eq!(report.components["result_cache"].status, HealthStatus::Healthy);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_health_healthy_with_working_service() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    let report = orchestrator.health_check().await;

    assert!(report.is_healthy());
    assert_eq!(report.components.len(), 5);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_health_reports_failing_probe() {
    let (orchestrator, model) = setup(ScriptedModel::new(|_, _| Err(rate_limited())));

    let report = orchestrator.health_check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.components["generative_service"].detail.contains("probe failed"));
    // Single attempt, no retries.
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_clear_caches_resets_everything() {
    let (orchestrator, model) = setup(ScriptedModel::always_positive());

    orchestrator.analyze_batch(&["one", "two"]).await.unwrap();
    orchestrator.analyze_one("one").await.unwrap();
    assert_eq!(orchestrator.cache_stats().single.hits, 1);

    orchestrator.clear_caches();
    let stats = orchestrator.cache_stats();
    assert_eq!(stats.single.size, 0);
    assert_eq!(stats.single.hits, 0);
    assert_eq!(stats.single.hit_rate, 0.0);
    assert_eq!(stats.batch.size, 0);

    orchestrator.analyze_one("one").await.unwrap();
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn test_purge_expired_counts_both_caches() {
    let config = AppConfig {
        cache_ttl: Duration::from_millis(20),
        batch_cache_ttl: Duration::from_millis(20),
        ..test_config()
    };
    let (orchestrator, _) = setup_with(ScriptedModel::always_positive(), config);

    orchestrator.analyze_batch(&["one", "two"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(orchestrator.purge_expired(), 3);
    assert_eq!(orchestrator.cache_stats().single.size, 0);
}
