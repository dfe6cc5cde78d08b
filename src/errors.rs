/*!
 * Error types for the chapterflow pipeline.
 *
 * Transport problems are reported as `ProviderError`, classified into
 * `TranslatorError` at the adapter boundary, and finally folded into the
 * pipeline taxonomy (`PipelineError`) that is persisted on translation records.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when talking to a provider API
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether a fresh attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_)
            | ProviderError::ParseError(_)
            | ProviderError::ConnectionError(_)
            | ProviderError::RateLimitExceeded(_) => true,
            ProviderError::ApiError { status_code, .. } => {
                *status_code == 429 || *status_code == 408 || *status_code >= 500
            }
            ProviderError::AuthenticationError(_) => false,
        }
    }

    /// Map an HTTP status and body to a provider error
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => ProviderError::AuthenticationError(message),
            429 => ProviderError::RateLimitExceeded(message),
            _ => ProviderError::ApiError {
                status_code,
                message,
            },
        }
    }

    /// Classify into the adapter-level failure, attaching the cost of the call
    pub fn into_translator_error(self, cost_usd: f64) -> TranslatorError {
        if self.is_transient() {
            TranslatorError::Retryable {
                message: self.to_string(),
                cost_usd,
            }
        } else {
            TranslatorError::Fatal {
                message: self.to_string(),
                cost_usd,
            }
        }
    }
}

/// Classified failure of one translator call.
///
/// Every variant carries the cost the call consumed (possibly zero) so the
/// budget ledger stays accurate even when the call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslatorError {
    /// Rate limits, transient service errors, malformed responses
    #[error("retryable upstream failure: {message}")]
    Retryable { message: String, cost_usd: f64 },

    /// Invalid input or unsupported language; never retried
    #[error("fatal upstream failure: {message}")]
    Fatal { message: String, cost_usd: f64 },

    /// The response did not echo every segment identifier
    #[error("response is missing {} segment(s): {}", .missing.len(), .missing.join(", "))]
    Partial { missing: Vec<String>, cost_usd: f64 },
}

impl TranslatorError {
    pub fn retryable(message: impl Into<String>) -> Self {
        TranslatorError::Retryable {
            message: message.into(),
            cost_usd: 0.0,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        TranslatorError::Fatal {
            message: message.into(),
            cost_usd: 0.0,
        }
    }

    /// Cost consumed by the failed call
    pub fn cost_usd(&self) -> f64 {
        match self {
            TranslatorError::Retryable { cost_usd, .. }
            | TranslatorError::Fatal { cost_usd, .. }
            | TranslatorError::Partial { cost_usd, .. } => *cost_usd,
        }
    }

    /// Replace the cost figure, e.g. once usage has been priced
    pub fn with_cost(mut self, cost: f64) -> Self {
        match &mut self {
            TranslatorError::Retryable { cost_usd, .. }
            | TranslatorError::Fatal { cost_usd, .. }
            | TranslatorError::Partial { cost_usd, .. } => *cost_usd = cost,
        }
        self
    }
}

/// Errors raised while splitting a document into segments
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("document contains no translatable segments")]
    NoSegments,

    #[error("duplicate segment identifier: {0}")]
    DuplicateId(String),

    #[error("translation is missing segment: {0}")]
    MissingSegment(String),
}

/// Kind tag persisted alongside a record's error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RetryableUpstream,
    FatalUpstream,
    BudgetExceeded,
    PartialReconciliation,
    NonTranslatable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RetryableUpstream => "retryable_upstream",
            ErrorKind::FatalUpstream => "fatal_upstream",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::PartialReconciliation => "partial_reconciliation",
            ErrorKind::NonTranslatable => "non_translatable",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "retryable_upstream" => Ok(ErrorKind::RetryableUpstream),
            "fatal_upstream" => Ok(ErrorKind::FatalUpstream),
            "budget_exceeded" => Ok(ErrorKind::BudgetExceeded),
            "partial_reconciliation" => Ok(ErrorKind::PartialReconciliation),
            "non_translatable" => Ok(ErrorKind::NonTranslatable),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(anyhow::anyhow!("Invalid error kind: {}", s)),
        }
    }
}

/// The pipeline's error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Bad input at kickoff, rejected synchronously
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("upstream failure (retryable): {0}")]
    RetryableUpstream(String),

    #[error("upstream failure (fatal): {0}")]
    FatalUpstream(String),

    /// Ceiling reached; no call was attempted
    #[error("monthly budget exhausted: spent ${spent_usd:.2} of ${ceiling_usd:.2}")]
    BudgetExceeded { spent_usd: f64, ceiling_usd: f64 },

    #[error("partial reconciliation, missing segments: {}", .missing.join(", "))]
    PartialReconciliation { missing: Vec<String> },

    #[error("content unit is not translatable: {0}")]
    NonTranslatable(String),

    /// Storage or runtime failure inside the pipeline itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::RetryableUpstream(_) => ErrorKind::RetryableUpstream,
            PipelineError::FatalUpstream(_) => ErrorKind::FatalUpstream,
            PipelineError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            PipelineError::PartialReconciliation { .. } => ErrorKind::PartialReconciliation,
            PipelineError::NonTranslatable(_) => ErrorKind::NonTranslatable,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only upstream hiccups and partial matches are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::RetryableUpstream(_) | PipelineError::PartialReconciliation { .. }
        )
    }
}

impl From<TranslatorError> for PipelineError {
    fn from(error: TranslatorError) -> Self {
        match error {
            TranslatorError::Retryable { message, .. } => PipelineError::RetryableUpstream(message),
            TranslatorError::Fatal { message, .. } => PipelineError::FatalUpstream(message),
            TranslatorError::Partial { missing, .. } => {
                PipelineError::PartialReconciliation { missing }
            }
        }
    }
}

impl From<SegmentError> for PipelineError {
    fn from(error: SegmentError) -> Self {
        PipelineError::NonTranslatable(error.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(error: anyhow::Error) -> Self {
        PipelineError::Internal(format!("{:#}", error))
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Error from segmentation
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
