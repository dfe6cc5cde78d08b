/*!
 * Tests for the monthly budget ledger
 */

use chrono::NaiveDate;

use chapterflow::app_config::BudgetConfig;
use chapterflow::budget::{BudgetLedger, BudgetStatus, BudgetUpdate};
use chapterflow::database::Repository;
use chapterflow::errors::PipelineError;

fn ledger(ceiling: f64) -> BudgetLedger {
    BudgetLedger::new(
        Repository::new_in_memory().unwrap(),
        BudgetConfig {
            monthly_ceiling_usd: ceiling,
            alert_threshold_pct: 80.0,
        },
    )
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_ceilingScenario_shouldAllowLastCallThenDeny() {
    let ledger = ledger(10.0);
    let today = day(2024, 3, 14);
    ledger.record_spend_at(today, 9.5).await.unwrap();

    ledger.check_at(today).await.unwrap();
    let after = ledger.record_spend_at(today, 1.0).await.unwrap();
    let denied = ledger.check_at(today).await.unwrap_err();

    assert!((after.spent_usd - 10.5).abs() < 1e-9);
    assert_eq!(after.status, BudgetStatus::OverBudget);
    assert!(matches!(denied, PipelineError::BudgetExceeded { .. }));
}

#[tokio::test]
async fn test_newMonth_shouldStartAtZeroAndLeaveHistoryUntouched() {
    let ledger = ledger(10.0);
    ledger.record_spend_at(day(2024, 1, 31), 12.0).await.unwrap();

    let february = ledger.snapshot_at(day(2024, 2, 1)).await.unwrap();
    let january = ledger.snapshot_at(day(2024, 1, 15)).await.unwrap();

    assert_eq!(february.month, "2024-02");
    assert_eq!(february.spent_usd, 0.0);
    assert!(ledger.check_at(day(2024, 2, 1)).await.is_ok());
    assert_eq!(january.spent_usd, 12.0);
}

#[tokio::test]
async fn test_raisingCeiling_shouldReopenPeriod() {
    let ledger = ledger(5.0);
    let today = day(2024, 6, 2);
    ledger.record_spend_at(today, 5.0).await.unwrap();
    assert!(ledger.check_at(today).await.is_err());

    let snapshot = ledger
        .update_limits_at(
            today,
            &BudgetUpdate {
                ceiling_usd: Some(20.0),
                alert_threshold_pct: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(snapshot.status, BudgetStatus::OnTrack);
    assert!(!snapshot.alert_triggered);
    assert!(ledger.check_at(today).await.is_ok());
}

#[test]
fn test_concurrentSpends_shouldAllBeCounted() {
    tokio_test::block_on(async {
        let ledger = ledger(100.0);
        let today = day(2024, 9, 9);
        ledger.period_at(today).await.unwrap();

        let spends = (0..20).map(|_| {
            let ledger = ledger.clone();
            async move { ledger.record_spend_at(today, 0.25).await }
        });
        for result in futures::future::join_all(spends).await {
            result.unwrap();
        }

        let snapshot = ledger.snapshot_at(today).await.unwrap();
        assert!((snapshot.spent_usd - 5.0).abs() < 1e-9);
    });
}
