/*!
 * Tests for configuration loading
 */

use std::fs;

use chapterflow::app_config::{Config, LogLevel, TranslationProvider};
use chapterflow::translation::concurrency::ConcurrencySettings;

use crate::common;

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let (config, created) = Config::load_or_create(&path).unwrap();

    assert!(created);
    assert!(path.exists());
    assert_eq!(config.log_level, LogLevel::Info);
    let (reloaded, created_again) = Config::load_or_create(&path).unwrap();
    assert!(!created_again);
    assert_eq!(reloaded.target_languages, config.target_languages);
}

#[test]
fn test_loadOrCreate_withPartialFile_shouldFillDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "conf.json",
        r#"{
            "target_languages": ["ja", "ko"],
            "translation": {"provider": "anthropic"},
            "budget": {"monthly_ceiling_usd": 12.5}
        }"#,
    )
    .unwrap();

    let (config, created) = Config::load_or_create(&path).unwrap();

    assert!(!created);
    assert_eq!(config.translation.provider, TranslationProvider::Anthropic);
    assert_eq!(config.budget.monthly_ceiling_usd, 12.5);
    assert_eq!(config.budget.alert_threshold_pct, 80.0);
    assert_eq!(config.pipeline.claim_timeout_secs, 900);
    assert!(config.translation.resolve().endpoint.starts_with("https://"));
}

#[test]
fn test_loadOrCreate_withInvalidJson_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");
    fs::write(&path, "{ not json").unwrap();

    assert!(Config::load_or_create(&path).is_err());
}

#[test]
fn test_concurrencySettings_shouldFollowProviderProfile() {
    let mut config = Config::default();
    config.pipeline.max_concurrent_languages = 2;
    config.pipeline.dispatch_delay_ms = 2000;

    let settings = ConcurrencySettings::for_provider(&config.pipeline, TranslationProvider::OpenAI);

    assert_eq!(settings.max_concurrent_languages, 2);
    assert_eq!(settings.dispatch_delay.as_millis(), 2000);
}
