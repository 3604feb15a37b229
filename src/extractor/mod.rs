pub mod batch;
pub mod client;
pub mod parse;
pub mod prompt;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ExtractError};
use crate::record::{is_field_populated, ExtractedRecord};
use crate::site::SiteType;
use client::{GenerateRequest, GenerateResponse, GenerationClient, HttpGenerationClient, TokenUsage};
use parse::ParseStrategy;
use prompt::PromptBuilder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_content_chars: usize,
    pub max_attempts: u32,
    pub jitter_max_ms: u64,
    pub request_timeout_secs: u64,
    pub prompt_config_url: Option<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.1,
            max_output_tokens: 2048,
            max_content_chars: 12_000,
            max_attempts: 3,
            jitter_max_ms: 1000,
            request_timeout_secs: 30,
            prompt_config_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub site_type: SiteType,
    pub fields: ExtractedRecord,
    pub parse_strategy: Option<ParseStrategy>,
    pub usage: Option<TokenUsage>,
    pub attempt_count: u32,
    pub elapsed_ms: u64,
    pub cumulative_retry_ms: u64,
    pub error: Option<ExtractionFailure>,
}

/// Outcome of the retry loop, successful or not.
struct Attempts {
    result: Result<GenerateResponse, ExtractError>,
    count: u32,
    retry_time: Duration,
}

pub struct Extractor<C = HttpGenerationClient> {
    client: C,
    prompts: PromptBuilder,
    config: ExtractorConfig,
}

impl Extractor<HttpGenerationClient> {
    pub fn from_config(config: ExtractorConfig, prompts: PromptBuilder) -> Result<Self, ExtractError> {
        let client = HttpGenerationClient::new(
            &config.endpoint,
            &config.model,
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Extractor::new(client, prompts, config))
    }
}

impl<C: GenerationClient> Extractor<C> {
    pub fn new(client: C, prompts: PromptBuilder, config: ExtractorConfig) -> Self {
        Extractor {
            client,
            prompts,
            config,
        }
    }

    /// Extract fields from `content`. Failures are reported in the result.
    pub async fn extract(&self, content: &str, site: SiteType) -> ExtractionResult {
        let started = Instant::now();

        if content.trim().is_empty() {
            let err = ExtractError::InvalidInput("page content is empty".into());
            return self.failure(site, err, 0, Duration::ZERO, started);
        }

        let request = GenerateRequest {
            prompt: self.prompts.build(site, content),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
            response_mime_type: "application/json",
        };

        let attempts = self.generate_with_retry(&request).await;
        let response = match attempts.result {
            Ok(r) => r,
            Err(e) => return self.failure(site, e, attempts.count, attempts.retry_time, started),
        };

        match parse::parse_model_output(&response.text, site.schema_fields()) {
            Ok((mut fields, strategy)) => {
                apply_aliases(&mut fields, site);
                info!(
                    site = %site,
                    fields = fields.len(),
                    strategy = ?strategy,
                    attempts = attempts.count,
                    "Extraction succeeded"
                );
                ExtractionResult {
                    success: true,
                    site_type: site,
                    fields,
                    parse_strategy: Some(strategy),
                    usage: response.usage,
                    attempt_count: attempts.count,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    cumulative_retry_ms: attempts.retry_time.as_millis() as u64,
                    error: None,
                }
            }
            Err(e) => self.failure(site, e, attempts.count, attempts.retry_time, started),
        }
    }

    async fn generate_with_retry(&self, request: &GenerateRequest) -> Attempts {
        let max_attempts = self.config.max_attempts.max(1);
        let mut retry_time = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let err = match self.client.generate(request).await {
                Ok(response) => {
                    debug!(attempt, "Generation attempt succeeded");
                    return Attempts {
                        result: Ok(response),
                        count: attempt,
                        retry_time,
                    };
                }
                Err(e) => e,
            };
            retry_time += attempt_started.elapsed();

            if !err.is_retryable() {
                return Attempts {
                    result: Err(err),
                    count: attempt,
                    retry_time,
                };
            }
            if attempt >= max_attempts {
                return Attempts {
                    result: Err(ExtractError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    }),
                    count: attempt,
                    retry_time,
                };
            }

            let delay = backoff_delay(attempt, self.config.jitter_max_ms);
            warn!(
                attempt,
                max_attempts,
                error = %err,
                "Generation failed, backing off {:.1}s",
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            retry_time += delay;
        }
    }

    fn failure(
        &self,
        site: SiteType,
        err: ExtractError,
        attempt_count: u32,
        retry_time: Duration,
        started: Instant,
    ) -> ExtractionResult {
        let kind = err.kind();
        warn!(site = %site, kind = kind.as_str(), error = %err, "Extraction failed");
        ExtractionResult {
            success: false,
            site_type: site,
            fields: ExtractedRecord::new(),
            parse_strategy: None,
            usage: None,
            attempt_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cumulative_retry_ms: retry_time.as_millis() as u64,
            error: Some(ExtractionFailure {
                kind,
                message: err.to_string(),
            }),
        }
    }
}

/// `2^(attempt-1)` seconds plus up to `jitter_max_ms` of random jitter.
pub fn backoff_delay(attempt: u32, jitter_max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let base = Duration::from_secs(1u64 << exp);
    let jitter = if jitter_max_ms == 0 {
        0
    } else {
        fastrand::u64(0..=jitter_max_ms)
    };
    base + Duration::from_millis(jitter)
}

/// Rename alias fields to their canonical names. An alias never replaces a
/// populated canonical field.
fn apply_aliases(fields: &mut ExtractedRecord, site: SiteType) {
    for (alias, canonical) in site.field_aliases() {
        let Some(value) = fields.remove(*alias) else {
            continue;
        };
        let keep_existing = fields
            .get(*canonical)
            .map(is_field_populated)
            .unwrap_or(false);
        if keep_existing {
            debug!(alias, canonical, "Dropping alias, canonical field already set");
        } else {
            fields.insert(canonical.to_string(), value);
        }
    }
}
