/*!
 * Tests for the OpenAI-compatible translator against a mock server
 */

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chapterflow::app_config::{Pricing, TranslationConfig};
use chapterflow::errors::TranslatorError;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::openai::{OpenAI, OpenAIRequest};
use chapterflow::providers::{PromptSettings, TranslationRequest, Translator};
use chapterflow::translation::Segment;

fn client(server: &MockServer) -> OpenAI {
    OpenAI::new(
        "test-key",
        server.uri(),
        "gpt-4o-mini",
        Duration::from_secs(5),
        Pricing {
            input_per_1k_usd: 0.5,
            output_per_1k_usd: 1.5,
        },
        PromptSettings::from_config(&TranslationConfig::default()),
    )
    .unwrap()
}

fn request() -> TranslationRequest {
    TranslationRequest {
        content_id: "ch-1".into(),
        source_language: "fr".into(),
        target_language: SupportedLanguage::Es,
        segments: vec![
            Segment::new("seg-0001", "<p>Bonjour</p>"),
            Segment::new("seg-0002", "<p>Adieu</p>"),
        ],
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
    })
}

#[tokio::test]
async fn test_translate_withEchoedMarkers_shouldReturnSegmentsAndCost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("<<SEG:seg-0002>>"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "<<SEG:seg-0001>>\n<p>Hola</p>\n<<SEG:seg-0002>>\n<p>Adiós</p>\n<<END>>",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).translate(&request()).await.unwrap();

    assert_eq!(response.segments[0], Segment::new("seg-0001", "<p>Hola</p>"));
    assert_eq!(response.segments[1].markup, "<p>Adiós</p>");
    assert_eq!(response.usage.prompt_tokens, 1000);
    assert!((response.usage.cost_usd - 1.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_translate_withMissingMarker_shouldBePartialWithCost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("<<SEG:seg-0001>>\n<p>Hola</p>\n<<END>>")))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    match err {
        TranslatorError::Partial { missing, cost_usd } => {
            assert_eq!(missing, vec!["seg-0002".to_string()]);
            assert!(cost_usd > 0.0);
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_translate_withRateLimit_shouldBeRetryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    assert!(matches!(err, TranslatorError::Retryable { cost_usd, .. } if cost_usd == 0.0));
}

#[tokio::test]
async fn test_translate_withUnprocessableInput_shouldBeFatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unsupported language"))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    assert!(matches!(err, TranslatorError::Fatal { .. }));
}

#[tokio::test]
async fn test_translate_withGarbledBody_shouldBeRetryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    assert!(matches!(err, TranslatorError::Retryable { .. }));
}

#[test]
fn test_openaiRequest_shouldSerializeOptionalFieldsOnlyWhenSet() {
    let bare = serde_json::to_value(OpenAIRequest::new("gpt-4").add_message("user", "Hi")).unwrap();
    let tuned = serde_json::to_value(OpenAIRequest::new("gpt-4").temperature(0.5).max_tokens(100)).unwrap();

    assert!(bare.get("temperature").is_none());
    assert_eq!(tuned["max_tokens"], 100);
}
