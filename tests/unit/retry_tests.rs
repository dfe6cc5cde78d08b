/*!
 * Tests for the retry policy
 */

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chapterflow::app_config::PipelineConfig;
use chapterflow::errors::PipelineError;
use chapterflow::translation::retry::RetryPolicy;

#[test]
fn test_fromConfig_shouldUseConfiguredValues() {
    let mut config = PipelineConfig::default();
    config.retry_count = 6;
    config.retry_backoff_ms = 250;
    config.retry_max_backoff_ms = 4000;
    config.retry_jitter = 0.1;

    let policy = RetryPolicy::from_config(&config);

    assert_eq!(policy.max_attempts, 6);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_millis(4000));
    assert_eq!(policy.jitter, 0.1);
}

#[test]
fn test_jitteredDelay_withJitter_shouldStillStrictlyIncrease() {
    let policy = RetryPolicy::new(5, Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(60))
        .with_jitter(0.9);

    for _ in 0..20 {
        let delays: Vec<Duration> = (1..5).map(|attempt| policy.jittered_delay(attempt)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);
    }
}

#[test]
fn test_withJitter_outOfRange_shouldClamp() {
    assert_eq!(RetryPolicy::new(1, Duration::ZERO).with_jitter(3.0).jitter, 1.0);
    assert_eq!(RetryPolicy::new(1, Duration::ZERO).with_jitter(-1.0).jitter, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_run_shouldSleepScheduledDelaysBetweenAttempts() {
    let policy = RetryPolicy::new(4, Duration::from_secs(1)).with_max_delay(Duration::from_secs(60));
    let start = tokio::time::Instant::now();

    let outcome = policy
        .run(
            "paused",
            |_| async { Err::<(), _>(PipelineError::RetryableUpstream("busy".into())) },
            PipelineError::is_retryable,
        )
        .await;

    // 1s + 2s + 4s
    assert_eq!(outcome.attempts, 4);
    assert!(start.elapsed() >= Duration::from_secs(7));
}

#[tokio::test]
async fn test_run_withPipelineClassifier_shouldNotRetryBudgetDenial() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let outcome = RetryPolicy::new(5, Duration::from_millis(1))
        .run(
            "budget",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(PipelineError::BudgetExceeded {
                        spent_usd: 10.0,
                        ceiling_usd: 10.0,
                    })
                }
            },
            PipelineError::is_retryable,
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(outcome.result, Err(PipelineError::BudgetExceeded { .. })));
}

#[tokio::test]
async fn test_run_shouldPassOneBasedAttemptNumbers() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();

    let _ = RetryPolicy::new(3, Duration::from_millis(1))
        .run(
            "numbers",
            move |attempt| {
                s.lock().push(attempt);
                async { Err::<(), _>(PipelineError::PartialReconciliation { missing: vec!["a".into()] }) }
            },
            PipelineError::is_retryable,
        )
        .await;

    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}
