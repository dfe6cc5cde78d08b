/*!
 * Book and multi-book kickoffs
 */

use anyhow::Result;
use std::time::Duration;

use chapterflow::database::models::JobStatus;
use chapterflow::database::repository::RecordCompletion;
use chapterflow::database::Repository;
use chapterflow::jobs::KickoffRequest;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::mock::{MockStep, MockTranslator};
use chapterflow::translation::DocumentSegmenter;

use crate::common;

/// Store a finished translation for every chapter of a book
async fn complete_book(repo: &Repository, book_id: &str, languages: &[&str]) -> Result<()> {
    let segmenter = DocumentSegmenter::new();
    for chapter in repo.list_chapters(book_id).await? {
        let segments = segmenter.segment(&chapter.source_markup)?.segments;
        for language in languages {
            repo.complete_record(
                &chapter.id,
                language,
                &RecordCompletion {
                    segments: segments.clone(),
                    attempt_count: 1,
                    ..Default::default()
                },
            )
            .await?;
        }
    }
    Ok(())
}

fn book_ids(count: usize) -> Vec<String> {
    (1..=count).map(|b| format!("book-{}", b)).collect()
}

#[tokio::test]
async fn test_kickoffBooks_withOneFinishedBook_shouldSkipItAndRunTheRest() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(5, 2).await?;
    complete_book(&repo, "book-3", &["es", "de"]).await?;
    let mock = MockTranslator::working();
    let controller = common::controller_with_mock(common::fast_config(&["es", "de"]), repo.clone(), &mock)?;

    let results = controller.kickoff_books(&book_ids(5), &[], false).await;

    assert_eq!(results.len(), 5);
    for result in &results {
        if result.book_id == "book-3" {
            assert!(!result.ack.accepted);
            assert!(result.ack.job_id.is_none());
            assert!(result.ack.reason.as_deref().unwrap().contains("no incomplete chapters"));
        } else {
            assert!(result.ack.accepted, "{} was declined", result.book_id);
        }
    }

    let job_ids: Vec<String> = results.iter().filter_map(|r| r.ack.job_id.clone()).collect();
    let progress = controller.watch_jobs(&job_ids).await?;

    assert!(progress.iter().all(|p| p.status == JobStatus::Completed));
    assert!(progress.iter().all(|p| p.job.total_tasks == 4));
    // 4 books x 2 chapters x 2 languages
    assert_eq!(mock.total_calls(), 16);

    let books = controller.book_progress().await?;
    assert_eq!(books.len(), 5);
    assert!(books.iter().all(|b| (b.fraction - 1.0).abs() < 1e-9));
    Ok(())
}

#[tokio::test]
async fn test_kickoffBooks_withUnknownBook_shouldDeclineOnlyThatBook() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(2, 1).await?;
    let controller =
        common::controller_with_mock(common::fast_config(&["es"]), repo, &MockTranslator::working())?;
    let ids = vec!["book-1".to_string(), "ghost".to_string(), "book-2".to_string()];

    let results = controller.kickoff_books(&ids, &[], false).await;

    assert!(results[0].ack.accepted);
    assert!(!results[1].ack.accepted);
    assert!(results[1].ack.reason.as_deref().unwrap().contains("ghost"));
    assert!(results[2].ack.accepted);

    controller.launcher().wait_for_idle().await;
    assert_eq!(controller.launcher().tracked_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_kickoff_withPartiallyTranslatedBook_shouldOnlyQueueMissingChapters() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(1, 3).await?;
    let segments = DocumentSegmenter::new().segment(common::SAMPLE_CHAPTER)?.segments;
    repo.complete_record("book-1-ch-2", "es", &RecordCompletion { segments, ..Default::default() })
        .await?;
    let mock = MockTranslator::working();
    let controller = common::controller_with_mock(common::fast_config(&["es"]), repo, &mock)?;

    let ack = controller
        .kickoff(&KickoffRequest::Book {
            book_id: "book-1".into(),
            languages: None,
            retranslate: false,
        })
        .await?;
    let progress = controller.watch_jobs(&[ack.job_id.unwrap()]).await?;

    assert_eq!(progress[0].job.total_tasks, 2);
    assert_eq!(progress[0].status, JobStatus::Completed);
    assert_eq!(mock.total_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_pipelineProgress_afterBulkRun_shouldTotalCosts() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(2, 2).await?;
    let mock = MockTranslator::working().with_cost(0.25);
    let controller = common::controller_with_mock(common::fast_config(&["es"]), repo, &mock)?;

    let results = controller.kickoff_books(&book_ids(2), &[], false).await;
    let job_ids: Vec<String> = results.into_iter().filter_map(|r| r.ack.job_id).collect();
    controller.watch_jobs(&job_ids).await?;

    let progress = controller.pipeline_progress().await?;
    assert_eq!(progress.total, 4);
    assert_eq!(progress.completed, 4);
    assert!((progress.total_cost_usd - 1.0).abs() < 1e-9);
    assert!((controller.budget().await?.spent_usd - 1.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_rerunBook_overFailedChapters_shouldStayOpenUntilEveryChapterSettles() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(1, 2).await?;
    let rejecting = MockTranslator::working().script(
        SupportedLanguage::Es,
        vec![MockStep::Fatal("unsupported".into()), MockStep::Fatal("unsupported".into())],
    );
    let first = common::controller_with_mock(common::fast_config(&["es"]), repo.clone(), &rejecting)?;
    let request = KickoffRequest::Book {
        book_id: "book-1".into(),
        languages: None,
        retranslate: false,
    };
    let first_job = first.kickoff(&request).await?.job_id.expect("first run accepted");
    let first_progress = first.watch_jobs(&[first_job.clone()]).await?;
    assert_eq!(first_progress[0].status, JobStatus::Failed);

    let mut slow = common::fast_config(&["es"]);
    slow.pipeline.inter_unit_delay_ms = 3_600_000;
    let rerun = common::controller_with_mock(slow, repo.clone(), &MockTranslator::working())?;
    let rerun_job = rerun.kickoff(&request).await?.job_id.expect("rerun accepted");

    let mut progress = rerun.job_progress(&rerun_job).await?;
    for _ in 0..500 {
        if progress.job.completed_tasks == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        progress = rerun.job_progress(&rerun_job).await?;
    }

    // The second chapter still waits out the inter-unit delay
    assert_eq!(progress.job.completed_tasks, 1);
    assert!(!progress.job.is_finished());
    assert_eq!(progress.status, JobStatus::Processing);
    assert!(progress.failures.is_empty());

    let earlier = rerun.job_progress(&first_job).await?;
    assert_eq!(earlier.status, JobStatus::Failed);
    assert_eq!(earlier.failures.len(), 2);
    Ok(())
}
