use isolang::Language;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PipelineError;

/// Language utilities for the fixed set of target languages
///
/// Requests naming any other code are rejected at the kickoff boundary,
/// so the rest of the pipeline only ever sees `SupportedLanguage` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedLanguage {
    En,
    Es,
    De,
    Ru,
    Zh,
    Ja,
    Ar,
    Pt,
    It,
    Nl,
    Pl,
    Tr,
    Ko,
    Hi,
}

impl SupportedLanguage {
    /// Every supported target, in canonical order
    pub const ALL: [SupportedLanguage; 14] = [
        SupportedLanguage::En,
        SupportedLanguage::Es,
        SupportedLanguage::De,
        SupportedLanguage::Ru,
        SupportedLanguage::Zh,
        SupportedLanguage::Ja,
        SupportedLanguage::Ar,
        SupportedLanguage::Pt,
        SupportedLanguage::It,
        SupportedLanguage::Nl,
        SupportedLanguage::Pl,
        SupportedLanguage::Tr,
        SupportedLanguage::Ko,
        SupportedLanguage::Hi,
    ];

    /// ISO 639-1 code
    pub fn code(&self) -> &'static str {
        match self {
            SupportedLanguage::En => "en",
            SupportedLanguage::Es => "es",
            SupportedLanguage::De => "de",
            SupportedLanguage::Ru => "ru",
            SupportedLanguage::Zh => "zh",
            SupportedLanguage::Ja => "ja",
            SupportedLanguage::Ar => "ar",
            SupportedLanguage::Pt => "pt",
            SupportedLanguage::It => "it",
            SupportedLanguage::Nl => "nl",
            SupportedLanguage::Pl => "pl",
            SupportedLanguage::Tr => "tr",
            SupportedLanguage::Ko => "ko",
            SupportedLanguage::Hi => "hi",
        }
    }

    /// Parse a code, tolerating case and surrounding whitespace
    pub fn from_code(code: &str) -> Result<Self, PipelineError> {
        let normalized = code.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|lang| lang.code() == normalized)
            .ok_or_else(|| PipelineError::Validation(format!("unsupported language code: '{}'", code)))
    }

    /// English display name, used in prompts
    pub fn display_name(&self) -> &'static str {
        Language::from_639_1(self.code())
            .map(|lang| lang.to_name())
            .unwrap_or_else(|| self.code())
    }
}

impl fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for SupportedLanguage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

/// Parse a requested language list.
///
/// Duplicates collapse (first occurrence wins the position); every unsupported
/// code is reported at once so the caller can fix the request in one go.
pub fn parse_language_list<S: AsRef<str>>(codes: &[S]) -> Result<Vec<SupportedLanguage>, PipelineError> {
    let mut languages = Vec::with_capacity(codes.len());
    let mut unsupported = Vec::new();

    for code in codes {
        match SupportedLanguage::from_code(code.as_ref()) {
            Ok(lang) => {
                if !languages.contains(&lang) {
                    languages.push(lang);
                }
            }
            Err(_) => unsupported.push(code.as_ref().to_string()),
        }
    }

    if !unsupported.is_empty() {
        return Err(PipelineError::Validation(format!(
            "unsupported language code(s): {}",
            unsupported.join(", ")
        )));
    }

    Ok(languages)
}

/// Check that a source language code is a real ISO 639-1 code
pub fn is_valid_source_language(code: &str) -> bool {
    let normalized = code.trim().to_lowercase();
    normalized.len() == 2 && Language::from_639_1(&normalized).is_some()
}

/// Two codes name the same language (case-insensitive)
pub fn language_codes_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
