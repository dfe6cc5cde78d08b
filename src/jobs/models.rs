/*!
 * Request and response types at the kickoff boundary.
 */

use serde::{Deserialize, Serialize};

use crate::database::models::{TranslationRecord, TranslationStatus};

/// A kickoff request: one unit, or every incomplete unit of a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KickoffRequest {
    Unit {
        content_unit_id: String,
        /// Empty means every configured target language
        #[serde(default)]
        languages: Vec<String>,
        #[serde(default)]
        retranslate: bool,
    },
    Book {
        book_id: String,
        #[serde(default)]
        languages: Option<Vec<String>>,
        #[serde(default)]
        retranslate: bool,
    },
}

/// Answer to a kickoff, returned before any translation happens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickoffAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl KickoffAck {
    pub fn accepted(job_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            job_id: Some(job_id.into()),
            reason: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            job_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Per-book answer of a bulk kickoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookKickoffResult {
    pub book_id: String,
    #[serde(flatten)]
    pub ack: KickoffAck,
}

/// One language of a status read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub language: String,
    pub status: TranslationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<&TranslationRecord> for StatusEntry {
    fn from(record: &TranslationRecord) -> Self {
        let error = match (&record.error_kind, &record.error_message) {
            (Some(kind), Some(message)) => Some(format!("{}: {}", kind, message)),
            (Some(kind), None) => Some(kind.to_string()),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        };

        Self {
            language: record.language.clone(),
            status: record.status,
            error,
            completed_at: record.completed_at.clone(),
        }
    }
}
