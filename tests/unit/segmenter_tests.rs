/*!
 * Tests for document segmentation and reassembly
 */

use chapterflow::errors::SegmentError;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::mock::MockTranslator;
use chapterflow::providers::{TranslationRequest, Translator};
use chapterflow::translation::{DocumentSegmenter, Segment};

const CHAPTER: &str = r#"<article>
  <h2 id="title">Chapitre premier</h2>
  <figure><img src="gare.png" alt=""><figcaption>La gare</figcaption></figure>
  <p class="lead">Il <em>pleuvait</em> depuis l'aube.</p>
  <blockquote><p>Attends-moi.</p></blockquote>
  <ul><li>Un billet</li><li>&nbsp;</li></ul>
</article>"#;

#[test]
fn test_segment_withMixedMarkup_shouldKeepNestedBlocksInsideOuterOne() {
    let document = DocumentSegmenter::new().segment(CHAPTER).unwrap();

    assert_eq!(document.ids(), vec!["title", "seg-0002", "seg-0003", "seg-0004", "seg-0005"]);
    assert_eq!(document.segments[3].markup, "<blockquote><p>Attends-moi.</p></blockquote>");
    assert!(document.segments[2].markup.contains("<em>pleuvait</em>"));
}

#[test]
fn test_segment_shouldBeStableAcrossInstances() {
    let first = DocumentSegmenter::new().segment(CHAPTER).unwrap();
    let second = DocumentSegmenter::default().segment(CHAPTER).unwrap();

    assert_eq!(first.revision, second.revision);
    assert_eq!(first.segments, second.segments);
}

#[test]
fn test_revision_shouldChangeWithSource() {
    assert_ne!(DocumentSegmenter::revision("<p>a</p>"), DocumentSegmenter::revision("<p>b</p>"));
    assert_eq!(DocumentSegmenter::revision("<p>a</p>").len(), 64);
}

#[test]
fn test_segment_withUppercaseTags_shouldStillFindBlocks() {
    let document = DocumentSegmenter::new().segment("<P>Un</P><H1>Deux</H1>").unwrap();

    assert_eq!(document.len(), 2);
}

#[test]
fn test_segment_withDataSegmentId_shouldPreferItOverId() {
    let document = DocumentSegmenter::new()
        .segment(r#"<p id="x" data-segment-id="intro">Bonjour</p>"#)
        .unwrap();

    assert_eq!(document.ids(), vec!["intro"]);
}

#[test]
fn test_segment_withDuplicateExplicitIds_shouldReportTheId() {
    let err = DocumentSegmenter::new()
        .segment(r#"<p id="a">Un</p><p id="a">Deux</p>"#)
        .unwrap_err();

    assert_eq!(err, SegmentError::DuplicateId("a".into()));
}

#[test]
fn test_segment_withIdMarkersCannotCarry_shouldFallBackToPosition() {
    let document = DocumentSegmenter::new()
        .segment(r#"<p data-segment-id="part one">Bonjour</p><p id="a>b">Salut</p>"#)
        .unwrap();

    assert_eq!(document.ids(), vec!["seg-0001", "seg-0002"]);
}

#[test]
fn test_segment_withExplicitIdShapedLikePosition_shouldSkipTakenId() {
    let document = DocumentSegmenter::new()
        .segment(r#"<p id="seg-0002">Un</p><p>Deux</p><p>Trois</p>"#)
        .unwrap();

    assert_eq!(document.ids(), vec!["seg-0002", "seg-0003", "seg-0004"]);
}

#[tokio::test]
async fn test_segment_withUnsafeExplicitId_shouldSurviveAPerfectEcho() {
    let document = DocumentSegmenter::new()
        .segment(r#"<p data-segment-id="part one">Bonjour</p><p>Salut</p>"#)
        .unwrap();
    let request = TranslationRequest {
        content_id: "ch-1".into(),
        source_language: "fr".into(),
        target_language: SupportedLanguage::Es,
        segments: document.segments.clone(),
    };

    let response = MockTranslator::working().translate(&request).await.unwrap();

    assert_eq!(response.segments.len(), 2);
}

#[test]
fn test_reassemble_shouldLeaveLayoutByteForByte() {
    let segmenter = DocumentSegmenter::new();
    let document = segmenter.segment(CHAPTER).unwrap();
    let translated: Vec<Segment> = document
        .segments
        .iter()
        .map(|s| Segment::new(s.id.clone(), format!("<!--es-->{}", s.markup)))
        .collect();

    let output = segmenter.reassemble(CHAPTER, &translated).unwrap();

    assert!(output.starts_with("<article>\n  <!--es--><h2 id=\"title\">"));
    assert!(output.contains("<img src=\"gare.png\" alt=\"\"><!--es--><figcaption>"));
    assert_eq!(output.matches("<!--es-->").count(), document.len());
    assert!(output.ends_with("</ul>\n</article>"));
}
