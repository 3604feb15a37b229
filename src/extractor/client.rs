use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::ExtractError;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub response_mime_type: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_tokens: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    pub output_tokens: u32,
    #[serde(rename = "totalTokenCount", default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// One call to a text-generation backend. Retries happen above this seam.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ExtractError>;
}

/// `generateContent` over HTTPS.
pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpGenerationClient {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ExtractError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractError::MissingCredential)?;

        let body = json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
                "responseMimeType": request.response_mime_type,
            }
        });

        debug!(model = %self.model, prompt_chars = request.prompt.len(), "Sending generation request");
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let body: String = text.chars().take(500).collect();
            return Err(ExtractError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ExtractError::MalformedResponse(format!("response is not JSON: {}", e)))?;
        parse_generate_response(&value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<TokenUsage>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Pull `candidates[0].content.parts[0].text` and usage out of a response body.
pub fn parse_generate_response(value: &serde_json::Value) -> Result<GenerateResponse, ExtractError> {
    let parsed = GenerateContentResponse::deserialize(value)
        .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ExtractError::Generation(reason));
    }

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        return Err(ExtractError::MalformedResponse("no candidates".into()));
    };
    let text = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text);

    match (text, candidate.finish_reason) {
        (Some(text), _) => Ok(GenerateResponse {
            text,
            usage: parsed.usage_metadata,
        }),
        (None, Some(reason)) if reason != "STOP" => Err(ExtractError::Generation(format!(
            "finish reason {}",
            reason
        ))),
        (None, _) => Err(ExtractError::MalformedResponse(
            "missing candidates[0].content.parts[0].text".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn reads_text_and_usage() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"title\": \"Mixer\"}"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30, "totalTokenCount": 150}
        });
        let r = parse_generate_response(&body).unwrap();
        assert_eq!(r.text, "{\"title\": \"Mixer\"}");
        assert_eq!(
            r.usage,
            Some(TokenUsage {
                prompt_tokens: 120,
                output_tokens: 30,
                total_tokens: 150
            })
        );
    }

    #[test]
    fn missing_path_is_malformed() {
        let err = parse_generate_response(&json!({"candidates": []})).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)));
        assert!(err.is_retryable());

        let err = parse_generate_response(&json!({"candidates": [{"content": {"parts": []}}]})).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)));
    }

    #[test]
    fn blocked_prompt_is_generation_error() {
        let err = parse_generate_response(&json!({"promptFeedback": {"blockReason": "SAFETY"}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);

        let err = parse_generate_response(&json!({
            "candidates": [{"finishReason": "RECITATION"}]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);
    }

    #[tokio::test]
    async fn missing_key_fails_before_sending() {
        let client = HttpGenerationClient::new(
            "http://127.0.0.1:9",
            "test-model",
            Some("  ".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let request = GenerateRequest {
            prompt: "hi".into(),
            temperature: 0.0,
            max_output_tokens: 10,
            response_mime_type: "application/json",
        };
        let err = client.generate(&request).await.unwrap_err();
        assert!(matches!(err, ExtractError::MissingCredential));
    }

    #[test]
    fn url_joins_endpoint_and_model() {
        let client = HttpGenerationClient::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            "gemini-1.5-flash",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
