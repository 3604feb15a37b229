use serde::Deserialize;
use tracing::{info, warn};

use crate::site::SiteType;

pub const DEFAULT_TEMPLATE: &str = "You extract structured data from web pages. \
Respond with a single JSON object and nothing else. \
Use null for any field that is not present on the page. \
Use arrays of strings for list fields. Do not invent values.";

const TRUNCATION_MARKER: &str = "\n[content truncated]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptConfig {
    prompt_template: Option<String>,
}

/// Prompt template plus content limit. Built once at startup, then shared.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
    max_content_chars: usize,
}

impl PromptBuilder {
    pub fn new(template: impl Into<String>, max_content_chars: usize) -> Self {
        PromptBuilder {
            template: template.into(),
            max_content_chars,
        }
    }

    pub fn with_default_template(max_content_chars: usize) -> Self {
        PromptBuilder::new(DEFAULT_TEMPLATE, max_content_chars)
    }

    /// Fetch an override template from `url`. Any failure falls back to the
    /// embedded template.
    pub async fn load(http: &reqwest::Client, url: Option<&str>, max_content_chars: usize) -> Self {
        let Some(url) = url else {
            return PromptBuilder::with_default_template(max_content_chars);
        };
        match fetch_template(http, url).await {
            Ok(Some(template)) => {
                info!(url, chars = template.len(), "Loaded prompt template override");
                PromptBuilder::new(template, max_content_chars)
            }
            Ok(None) => {
                info!(url, "Prompt config has no template, using default");
                PromptBuilder::with_default_template(max_content_chars)
            }
            Err(e) => {
                warn!(url, error = %e, "Prompt config fetch failed, using default");
                PromptBuilder::with_default_template(max_content_chars)
            }
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn build(&self, site: SiteType, content: &str) -> String {
        let fields = site.schema_fields().join(", ");
        format!(
            "{}\n\n{}\n\nFields: {}\n\nPage content:\n{}",
            self.template,
            site.instructions(),
            fields,
            truncate_content(content, self.max_content_chars)
        )
    }
}

async fn fetch_template(http: &reqwest::Client, url: &str) -> anyhow::Result<Option<String>> {
    let config: PromptConfig = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(config.prompt_template.filter(|t| !t.trim().is_empty()))
}

/// Cut `content` to at most `max_chars` characters on a char boundary.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &content[..byte_idx], TRUNCATION_MARKER),
        None => content.to_string(),
    }
}
