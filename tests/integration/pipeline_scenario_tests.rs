/*!
 * Single-unit scenarios: kickoff, background fan-out, polling
 */

use anyhow::Result;

use chapterflow::app_controller::Controller;
use chapterflow::budget::BudgetLedger;
use chapterflow::database::models::{JobStatus, TranslationStatus};
use chapterflow::database::Repository;
use chapterflow::errors::{ErrorKind, PipelineError};
use chapterflow::jobs::KickoffRequest;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::progress::JobProgress;
use chapterflow::providers::mock::{MockStep, MockTranslator};

use crate::common;

fn unit_request(content_id: &str, languages: &[&str], retranslate: bool) -> KickoffRequest {
    KickoffRequest::Unit {
        content_unit_id: content_id.to_string(),
        languages: languages.iter().map(|l| l.to_string()).collect(),
        retranslate,
    }
}

/// Kick off one unit and wait for its job to resolve
async fn run_unit(controller: &Controller, request: KickoffRequest) -> Result<JobProgress> {
    let ack = controller.kickoff(&request).await?;
    assert!(ack.accepted, "kickoff declined: {:?}", ack.reason);
    let job_id = ack.job_id.expect("accepted kickoff carries a job id");

    let mut progress = controller.watch_jobs(&[job_id]).await?;
    Ok(progress.remove(0))
}

async fn setup(languages: &[&str], mock: &MockTranslator) -> Result<(Controller, Repository)> {
    common::init_logging();
    let repo = common::seeded_repository(1, 2).await?;
    let controller = common::controller_with_mock(common::fast_config(languages), repo.clone(), mock)?;
    Ok((controller, repo))
}

#[tokio::test]
async fn test_kickoff_withTransientRateLimits_shouldCompleteEveryLanguage() -> Result<()> {
    let mock = MockTranslator::working().script(
        SupportedLanguage::Es,
        vec![MockStep::RateLimited, MockStep::RateLimited],
    );
    let (controller, repo) = setup(&["en", "es"], &mock).await?;

    let progress = run_unit(&controller, unit_request("book-1-ch-1", &["en", "es"], false)).await?;

    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.job.completed_tasks, 2);
    assert!(progress.failures.is_empty());

    let es = repo.get_record("book-1-ch-1", "es").await?.unwrap();
    assert_eq!(es.status, TranslationStatus::Completed);
    assert_eq!(es.attempt_count, 3);
    assert_eq!(mock.calls_for(SupportedLanguage::Es), 3);
    assert_eq!(mock.calls_for(SupportedLanguage::En), 1);

    let en = repo.get_record("book-1-ch-1", "en").await?.unwrap();
    let segments = en.segments.unwrap();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].id, "seg-0001");
    assert!(segments[0].markup.starts_with("[en]"));
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withCompletedLanguages_shouldNotCallTranslatorAgain() -> Result<()> {
    let mock = MockTranslator::working();
    let (controller, _repo) = setup(&["en", "es"], &mock).await?;

    run_unit(&controller, unit_request("book-1-ch-1", &["en", "es"], false)).await?;
    let calls_after_first = mock.total_calls();

    let again = run_unit(&controller, unit_request("book-1-ch-1", &["en", "es"], false)).await?;

    assert_eq!(mock.total_calls(), calls_after_first);
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.job.completed_tasks, 2);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withRetranslate_shouldTranslateCompletedLanguagesAgain() -> Result<()> {
    let mock = MockTranslator::working();
    let (controller, _repo) = setup(&["en"], &mock).await?;

    run_unit(&controller, unit_request("book-1-ch-1", &[], false)).await?;
    run_unit(&controller, unit_request("book-1-ch-1", &[], true)).await?;

    assert_eq!(mock.calls_for(SupportedLanguage::En), 2);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withFatalError_shouldFailAfterOneAttemptAndKeepOthers() -> Result<()> {
    let mock = MockTranslator::working().script(
        SupportedLanguage::De,
        vec![MockStep::Fatal("unsupported language pair".into())],
    );
    let (controller, repo) = setup(&["es", "de"], &mock).await?;

    let progress = run_unit(&controller, unit_request("book-1-ch-1", &["es", "de"], false)).await?;

    assert_eq!(progress.status, JobStatus::Failed);
    assert_eq!(progress.job.completed_tasks, 1);
    assert_eq!(progress.job.failed_tasks, 1);
    assert_eq!(progress.failures[0].language, "de");
    assert_eq!(progress.failures[0].error_kind, Some(ErrorKind::FatalUpstream));

    let de = repo.get_record("book-1-ch-1", "de").await?.unwrap();
    assert_eq!(de.status, TranslationStatus::Failed);
    assert_eq!(de.attempt_count, 1);
    assert_eq!(mock.calls_for(SupportedLanguage::De), 1);

    let es = repo.get_record("book-1-ch-1", "es").await?.unwrap();
    assert_eq!(es.status, TranslationStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withDroppedSegment_shouldRetryUntilEveryIdReturns() -> Result<()> {
    let mock = MockTranslator::working().script(
        SupportedLanguage::Es,
        vec![MockStep::DropSegment("seg-0002".into())],
    );
    let (controller, repo) = setup(&["es"], &mock).await?;

    let progress = run_unit(&controller, unit_request("book-1-ch-1", &["es"], false)).await?;

    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(mock.calls_for(SupportedLanguage::Es), 2);
    let es = repo.get_record("book-1-ch-1", "es").await?.unwrap();
    assert_eq!(es.attempt_count, 2);
    assert_eq!(es.segments.unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withBudgetNearCeiling_shouldAllowOneCallThenRefuse() -> Result<()> {
    common::init_logging();
    let mock = MockTranslator::working().with_cost(1.0);
    let repo = common::seeded_repository(1, 2).await?;
    let mut config = common::fast_config(&["es"]);
    config.budget.monthly_ceiling_usd = 10.0;
    BudgetLedger::new(repo.clone(), config.budget.clone())
        .record_spend(9.5)
        .await?;
    let controller = common::controller_with_mock(config, repo.clone(), &mock)?;

    let first = run_unit(&controller, unit_request("book-1-ch-1", &["es"], false)).await?;
    assert_eq!(first.status, JobStatus::Completed);

    let budget = controller.budget().await?;
    assert!((budget.spent_usd - 10.5).abs() < 1e-9);
    assert!(budget.exhausted);

    let second = run_unit(&controller, unit_request("book-1-ch-2", &["es"], false)).await?;
    assert_eq!(second.status, JobStatus::Failed);
    assert_eq!(second.failures[0].error_kind, Some(ErrorKind::BudgetExceeded));
    assert_eq!(mock.total_calls(), 1);

    let record = repo.get_record("book-1-ch-2", "es").await?.unwrap();
    assert_eq!(record.status, TranslationStatus::Failed);
    assert_eq!(record.cost_usd.unwrap_or(0.0), 0.0);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withNothingToTranslate_shouldFailTasksWithoutRecords() -> Result<()> {
    use chapterflow::database::models::ChapterRecord;

    let mock = MockTranslator::working();
    let (controller, repo) = setup(&["es", "de"], &mock).await?;
    repo.upsert_chapter(&ChapterRecord::new("book-1-blank", "book-1", 9, "Blank", "fr", "<div><img src=\"x.png\"></div>"))
        .await?;

    let progress = run_unit(&controller, unit_request("book-1-blank", &[], false)).await?;

    assert_eq!(progress.status, JobStatus::Failed);
    assert_eq!(progress.failures.len(), 2);
    assert!(progress
        .failures
        .iter()
        .all(|f| f.error_kind == Some(ErrorKind::NonTranslatable)));
    assert!(repo.list_records_for_content("book-1-blank").await?.is_empty());
    assert_eq!(mock.total_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withUnknownUnit_shouldBeRejected() -> Result<()> {
    let (controller, _repo) = setup(&["es"], &MockTranslator::working()).await?;

    let err = controller
        .kickoff(&unit_request("no-such-chapter", &["es"], false))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withUnsupportedLanguage_shouldBeRejected() -> Result<()> {
    let (controller, _repo) = setup(&["es"], &MockTranslator::working()).await?;

    let err = controller
        .kickoff(&unit_request("book-1-ch-1", &["xx"], false))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn test_unitStatus_shouldListEveryLanguageWithErrors() -> Result<()> {
    let mock = MockTranslator::working().script(
        SupportedLanguage::Ja,
        vec![MockStep::Fatal("refused".into())],
    );
    let (controller, _repo) = setup(&["es", "ja"], &mock).await?;

    run_unit(&controller, unit_request("book-1-ch-1", &[], false)).await?;
    let entries = controller.unit_status("book-1-ch-1").await?;

    assert_eq!(entries.len(), 2);
    let es = entries.iter().find(|e| e.language == "es").unwrap();
    assert_eq!(es.status, TranslationStatus::Completed);
    assert!(es.completed_at.is_some());
    let ja = entries.iter().find(|e| e.language == "ja").unwrap();
    assert_eq!(ja.status, TranslationStatus::Failed);
    assert!(ja.error.as_deref().unwrap().starts_with("fatal_upstream:"));
    Ok(())
}
