/*!
 * Tests for the Anthropic translator against a mock server
 */

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chapterflow::app_config::{Pricing, TranslationConfig};
use chapterflow::errors::TranslatorError;
use chapterflow::language_utils::SupportedLanguage;
use chapterflow::providers::anthropic::Anthropic;
use chapterflow::providers::{PromptSettings, TranslationRequest, Translator};
use chapterflow::translation::Segment;

fn client(server: &MockServer) -> Anthropic {
    Anthropic::new(
        "test-key",
        server.uri(),
        "claude-3-5-haiku-latest",
        Duration::from_secs(5),
        Pricing {
            input_per_1k_usd: 1.0,
            output_per_1k_usd: 5.0,
        },
        PromptSettings::from_config(&TranslationConfig::default()),
    )
    .unwrap()
}

fn request() -> TranslationRequest {
    TranslationRequest {
        content_id: "ch-9".into(),
        source_language: "fr".into(),
        target_language: SupportedLanguage::De,
        segments: vec![Segment::new("intro", "<h1>Départ</h1>")],
    }
}

#[tokio::test]
async fn test_translate_shouldSendHeadersAndPriceUsage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "<<SEG:intro>>\n<h1>Abfahrt</h1>\n<<END>>"}],
            "usage": {"input_tokens": 2000, "output_tokens": 200}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).translate(&request()).await.unwrap();

    assert_eq!(response.segments, vec![Segment::new("intro", "<h1>Abfahrt</h1>")]);
    assert!((response.usage.cost_usd - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_translate_withOverloaded_shouldBeRetryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    assert!(matches!(err, TranslatorError::Retryable { .. }));
}

#[tokio::test]
async fn test_translate_withBadKey_shouldBeFatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let err = client(&server).translate(&request()).await.unwrap_err();

    assert!(matches!(err, TranslatorError::Fatal { .. }));
}
