/*!
 * Tests for the error taxonomy as seen by callers
 */

use chapterflow::errors::{AppError, ErrorKind, PipelineError, ProviderError, TranslatorError};

#[test]
fn test_httpStatusChain_shouldClassifyIntoPipelineKinds() {
    let cases = [
        (429, ErrorKind::RetryableUpstream),
        (500, ErrorKind::RetryableUpstream),
        (503, ErrorKind::RetryableUpstream),
        (400, ErrorKind::FatalUpstream),
        (401, ErrorKind::FatalUpstream),
        (422, ErrorKind::FatalUpstream),
    ];

    for (status, expected) in cases {
        let error: PipelineError = ProviderError::from_status(status, "x")
            .into_translator_error(0.0)
            .into();
        assert_eq!(error.kind(), expected, "status {}", status);
    }
}

#[test]
fn test_transportFailures_shouldBeRetryable() {
    let connection = ProviderError::ConnectionError("reset".into()).into_translator_error(0.0);
    let parse = ProviderError::ParseError("garbled".into()).into_translator_error(0.0);

    assert!(matches!(connection, TranslatorError::Retryable { .. }));
    assert!(matches!(parse, TranslatorError::Retryable { .. }));
}

#[test]
fn test_anyhowError_shouldBecomeInternal() {
    let error: PipelineError = anyhow::anyhow!("disk full").into();

    assert_eq!(error.kind(), ErrorKind::Internal);
    assert!(!error.is_retryable());
}

#[test]
fn test_appError_shouldWrapPipelineError() {
    let error: AppError = PipelineError::Validation("bad language".into()).into();

    assert!(error.to_string().contains("bad language"));
}
