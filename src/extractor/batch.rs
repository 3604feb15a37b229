use std::time::Duration;

use futures::future::join_all;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::GenerationClient;
use super::{ExtractionResult, Extractor};
use crate::site::SiteType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInput {
    pub id: String,
    pub site_type: SiteType,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub throttle: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            throttle: 3,
            inter_batch_delay: Duration::from_secs(1),
        }
    }
}

/// Extract `pages` in chunks of `throttle`, pausing between chunks.
/// Results keep input order.
pub async fn extract_parallel<C: GenerationClient>(
    extractor: &Extractor<C>,
    pages: &[PageInput],
    options: &BatchOptions,
    pb: &ProgressBar,
) -> Vec<(String, ExtractionResult)> {
    let throttle = options.throttle.max(1);
    let chunk_count = pages.len().div_ceil(throttle);
    let mut results = Vec::with_capacity(pages.len());

    for (i, chunk) in pages.chunks(throttle).enumerate() {
        let batch = join_all(
            chunk
                .iter()
                .map(|page| extractor.extract(&page.content, page.site_type)),
        )
        .await;

        let ok = batch.iter().filter(|r| r.success).count();
        info!(chunk = i + 1, of = chunk_count, ok, failed = batch.len() - ok, "Chunk done");

        results.extend(chunk.iter().map(|p| p.id.clone()).zip(batch));
        pb.inc(chunk.len() as u64);

        if i + 1 < chunk_count && !options.inter_batch_delay.is_zero() {
            tokio::time::sleep(options.inter_batch_delay).await;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::extractor::client::{GenerateRequest, GenerateResponse};
    use crate::extractor::prompt::PromptBuilder;
    use crate::extractor::ExtractorConfig;
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Echoes the page content back as the title, or fails on "fail".
    struct EchoClient;

    #[async_trait]
    impl GenerationClient for EchoClient {
        async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ExtractError> {
            let content = request.prompt.rsplit('\n').next().unwrap_or_default();
            if content == "fail" {
                return Err(ExtractError::MissingCredential);
            }
            Ok(GenerateResponse {
                text: serde_json::json!({ "title": content }).to_string(),
                usage: None,
            })
        }
    }

    fn pages(contents: &[&str]) -> Vec<PageInput> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| PageInput {
                id: format!("page-{}", i),
                site_type: SiteType::Generic,
                content: c.to_string(),
            })
            .collect()
    }

    fn extractor() -> Extractor<EchoClient> {
        Extractor::new(
            EchoClient,
            PromptBuilder::with_default_template(1000),
            ExtractorConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_order_and_delays_between_chunks_only() {
        let inputs = pages(&["one", "two", "fail", "four", "five", "six", "seven"]);
        let pb = ProgressBar::hidden();
        let started = Instant::now();

        let results = extract_parallel(&extractor(), &inputs, &BatchOptions::default(), &pb).await;

        // 3 chunks, 2 delays
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(pb.position(), 7);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["page-0", "page-1", "page-2", "page-3", "page-4", "page-5", "page-6"]);
        assert!(!results[2].1.success);
        assert_eq!(
            results[6].1.fields["title"],
            crate::record::FieldValue::text("seven")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_has_no_delay() {
        let inputs = pages(&["one", "two"]);
        let started = Instant::now();
        let results =
            extract_parallel(&extractor(), &inputs, &BatchOptions::default(), &ProgressBar::hidden()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn empty_input() {
        let results = extract_parallel(&extractor(), &[], &BatchOptions::default(), &ProgressBar::hidden()).await;
        assert!(results.is_empty());
    }
}
