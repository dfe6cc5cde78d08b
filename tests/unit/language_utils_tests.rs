/*!
 * Tests for supported language handling
 */

use chapterflow::errors::PipelineError;
use chapterflow::language_utils::{language_codes_match, parse_language_list, SupportedLanguage};

#[test]
fn test_parseLanguageList_withEveryCode_shouldAcceptAll() {
    let codes = ["en", "es", "de", "ru", "zh", "ja", "ar", "pt", "it", "nl", "pl", "tr", "ko", "hi"];

    let languages = parse_language_list(&codes).unwrap();

    assert_eq!(languages.len(), 14);
    assert_eq!(languages, SupportedLanguage::ALL.to_vec());
}

#[test]
fn test_parseLanguageList_withUnsupported_shouldBeValidation() {
    let err = parse_language_list(&["es", "fr"]).unwrap_err();

    assert!(matches!(err, PipelineError::Validation(ref message) if message.contains("fr")));
}

#[test]
fn test_fromStr_shouldMatchFromCode() {
    let parsed: SupportedLanguage = "PT".parse().unwrap();

    assert_eq!(parsed, SupportedLanguage::Pt);
    assert_eq!(parsed.to_string(), "pt");
}

#[test]
fn test_languageCodesMatch_shouldIgnoreCaseAndSpaces() {
    assert!(language_codes_match(" EN", "en"));
    assert!(!language_codes_match("en", "es"));
}
