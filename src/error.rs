use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[serde(rename = "CONFIG_ERROR")]
    Config,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "QUOTA_ERROR")]
    Quota,
    #[serde(rename = "PARSE_ERROR")]
    Parse,
    #[serde(rename = "GENERATION_ERROR")]
    Generation,
    RetryExhausted,
    ValidationRuleError,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "429",
    "resource_exhausted",
    "too many requests",
    "token limit",
];
const CREDENTIAL_KEYWORDS: &[&str] = &[
    "api key",
    "api_key",
    "credential",
    "unauthorized",
    "unauthenticated",
    "permission",
    "forbidden",
    "401",
    "403",
    "config",
];
const NETWORK_KEYWORDS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "fetch",
    "dns",
    "unreachable",
];
const PARSE_KEYWORDS: &[&str] = &["json", "parse", "malformed", "unexpected token"];
const GENERATION_KEYWORDS: &[&str] = &[
    "generation",
    "safety",
    "blocked",
    "candidate",
    "finish reason",
    "recitation",
];
const RETRY_KEYWORDS: &[&str] = &["attempts failed", "retries", "exhausted"];

impl ErrorKind {
    /// Classify a failure message by keyword. Earlier categories win.
    pub fn classify(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        let table: [(&[&str], ErrorKind); 6] = [
            (QUOTA_KEYWORDS, ErrorKind::Quota),
            (CREDENTIAL_KEYWORDS, ErrorKind::Config),
            (NETWORK_KEYWORDS, ErrorKind::Network),
            (PARSE_KEYWORDS, ErrorKind::Parse),
            (GENERATION_KEYWORDS, ErrorKind::Generation),
            (RETRY_KEYWORDS, ErrorKind::RetryExhausted),
        ];
        table
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Quota => "QUOTA_ERROR",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::Generation => "GENERATION_ERROR",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::ValidationRuleError => "VALIDATION_RULE_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing API credential")]
    MissingCredential,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response body: {0}")]
    MalformedResponse(String),

    #[error("generation blocked: {0}")]
    Generation(String),

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("all {attempts} attempts failed, last error: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ExtractError>,
    },
}

impl ExtractError {
    /// Failures that another attempt could fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractError::Http { .. }
                | ExtractError::Network(_)
                | ExtractError::MalformedResponse(_)
                | ExtractError::Generation(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::MissingCredential | ExtractError::InvalidInput(_) => ErrorKind::Config,
            ExtractError::Parse(_) => ErrorKind::Parse,
            other => ErrorKind::classify(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_keyword() {
        assert_eq!(ErrorKind::classify("HTTP 429: Too Many Requests"), ErrorKind::Quota);
        assert_eq!(ErrorKind::classify("Quota exceeded for model"), ErrorKind::Quota);
        assert_eq!(ErrorKind::classify("API key not valid"), ErrorKind::Config);
        assert_eq!(ErrorKind::classify("HTTP 403: PERMISSION_DENIED"), ErrorKind::Config);
        assert_eq!(ErrorKind::classify("request Timed Out"), ErrorKind::Network);
        assert_eq!(ErrorKind::classify("Unexpected token < in JSON"), ErrorKind::Parse);
        assert_eq!(ErrorKind::classify("blocked by SAFETY"), ErrorKind::Generation);
        assert_eq!(ErrorKind::classify("gave up after 3 retries"), ErrorKind::RetryExhausted);
        assert_eq!(ErrorKind::classify("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn quota_wins_over_retry_exhaustion() {
        let err = ExtractError::RetryExhausted {
            attempts: 3,
            last: Box::new(ExtractError::Http {
                status: 429,
                body: "slow down".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Quota);
    }

    #[test]
    fn server_errors_surface_as_retry_exhausted() {
        let err = ExtractError::RetryExhausted {
            attempts: 3,
            last: Box::new(ExtractError::Http {
                status: 503,
                body: "Service Unavailable".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    }

    #[test]
    fn missing_credential_is_config_and_final() {
        assert_eq!(ExtractError::MissingCredential.kind(), ErrorKind::Config);
        assert!(!ExtractError::MissingCredential.is_retryable());
        assert!(ExtractError::Http { status: 500, body: String::new() }.is_retryable());
    }

    #[test]
    fn serialized_names() {
        assert_eq!(serde_json::to_string(&ErrorKind::Quota).unwrap(), "\"QUOTA_ERROR\"");
        assert_eq!(
            serde_json::to_string(&ErrorKind::RetryExhausted).unwrap(),
            "\"RETRY_EXHAUSTED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ValidationRuleError).unwrap(),
            "\"VALIDATION_RULE_ERROR\""
        );
    }
}
