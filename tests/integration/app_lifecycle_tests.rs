/*!
 * Import, translate, watch and export through the controller
 */

use anyhow::Result;

use chapterflow::database::models::JobStatus;
use chapterflow::database::Repository;
use chapterflow::jobs::KickoffRequest;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::mock::MockTranslator;

use crate::common;

#[tokio::test]
async fn test_controller_importTranslateExport_shouldWriteTranslatedDocument() -> Result<()> {
    common::init_logging();
    let source_dir = common::create_temp_dir()?;
    let output_dir = common::create_temp_dir()?;
    common::create_test_file(source_dir.path(), "01-depart.html", common::SAMPLE_CHAPTER)?;
    common::create_test_file(source_dir.path(), "02-arrivee.html", "<h1>Arrivée</h1>\n<p>Fin.</p>")?;
    common::create_test_file(source_dir.path(), "notes.json", "{}")?;

    let mock = MockTranslator::working();
    let controller = common::controller_with_mock(
        common::fast_config(&["es", "de"]),
        Repository::new_in_memory()?,
        &mock,
    )?;

    let summary = controller
        .import_book(source_dir.path(), "voyage", Some("Le voyage"), "fr")
        .await?;
    assert_eq!(summary.chapters, 2);
    assert_eq!(summary.segments, 5);
    assert!(summary.non_translatable.is_empty());

    let ack = controller
        .kickoff(&KickoffRequest::Book {
            book_id: "voyage".into(),
            languages: None,
            retranslate: false,
        })
        .await?;
    let progress = controller.watch_jobs(&[ack.job_id.unwrap()]).await?;
    assert_eq!(progress[0].status, JobStatus::Completed);
    assert_eq!(progress[0].job.completed_tasks, 4);

    let path = controller
        .export("voyage-02-arrivee", SupportedLanguage::De, output_dir.path())
        .await?;
    let exported = std::fs::read_to_string(&path)?;
    assert!(path.ends_with("voyage-02-arrivee.de.html"));
    assert_eq!(exported, "[de] <h1>Arrivée</h1>\n[de] <p>Fin.</p>");

    let books = controller.book_progress().await?;
    assert_eq!(books[0].title, "Le voyage");
    assert_eq!(books[0].translated_chapters, 2);
    Ok(())
}

#[tokio::test]
async fn test_controller_exportWithoutTranslation_shouldFail() -> Result<()> {
    common::init_logging();
    let repo = common::seeded_repository(1, 1).await?;
    let controller =
        common::controller_with_mock(common::fast_config(&["es"]), repo, &MockTranslator::working())?;
    let output_dir = common::create_temp_dir()?;

    let result = controller
        .export("book-1-ch-1", SupportedLanguage::Es, output_dir.path())
        .await;

    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_controller_updateBudget_shouldRaiseAlertWhenThresholdLowered() -> Result<()> {
    use chapterflow::budget::{BudgetStatus, BudgetUpdate};

    common::init_logging();
    let mock = MockTranslator::working().with_cost(3.0);
    let repo = common::seeded_repository(1, 1).await?;
    let mut config = common::fast_config(&["es"]);
    config.budget.monthly_ceiling_usd = 10.0;
    config.budget.alert_threshold_pct = 80.0;
    let controller = common::controller_with_mock(config, repo, &mock)?;

    let ack = controller
        .kickoff(&KickoffRequest::Unit {
            content_unit_id: "book-1-ch-1".into(),
            languages: vec![],
            retranslate: false,
        })
        .await?;
    controller.watch_jobs(&[ack.job_id.unwrap()]).await?;
    assert!(!controller.budget().await?.alert_triggered);

    let snapshot = controller
        .update_budget(&BudgetUpdate {
            ceiling_usd: None,
            alert_threshold_pct: Some(25.0),
        })
        .await?;

    assert!(snapshot.alert_triggered);
    assert_eq!(snapshot.status, BudgetStatus::Warning);
    Ok(())
}
