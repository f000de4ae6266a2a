//! Generation service and the model seam.
//!
//! The model itself is an external collaborator hidden behind
//! [`ImageModel`]; the service owns the only handle to it, applies the
//! per-request deadline and the concurrency cap, and normalizes whatever
//! bytes come back into PNG.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use image::ImageFormat;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

use crate::error::AppError;
use crate::validate::GenerationRequest;

/// The black-box text-to-image collaborator.
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Runs one generation and returns raw image bytes.
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<u8>>;
}

/// HTTP backend for the Pollinations image endpoint.
pub struct PollinationsModel {
    client: reqwest::Client,
    base_url: String,
}

impl PollinationsModel {
    /// Builds a backend against the given base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request_url(&self, request: &GenerationRequest) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid model endpoint {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Model endpoint cannot be a base URL"))?
            .push(&request.prompt);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("width", &request.width.to_string());
            query.append_pair("height", &request.height.to_string());
            query.append_pair("model", request.model.as_str());
            if let Some(seed) = request.seed {
                query.append_pair("seed", &seed.to_string());
            }
            if let Some(steps) = request.steps {
                query.append_pair("steps", &steps.to_string());
            }
            if let Some(scale) = request.guidance_scale {
                query.append_pair("guidance_scale", &scale.to_string());
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl ImageModel for PollinationsModel {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Vec<u8>> {
        let url = self.request_url(request)?;
        debug!("Model request: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Request to model endpoint failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Model endpoint returned {}", status);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed reading model response body")?;
        Ok(bytes.to_vec())
    }
}

/// Successful output of one generation.
pub struct GenerationOutcome {
    /// PNG-encoded image.
    pub png: Vec<u8>,
    /// Wall time the model call took.
    pub elapsed: Duration,
}

/// Wraps the model with timeout, queueing and output normalization.
///
/// Built once at startup; request handlers only ever see this, never the
/// model directly.
pub struct GenerationService {
    model: Arc<dyn ImageModel>,
    timeout: Duration,
    permits: Semaphore,
}

impl GenerationService {
    /// Builds a service over the given model.
    pub fn new(model: Arc<dyn ImageModel>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            model,
            timeout,
            permits: Semaphore::new(max_concurrent),
        }
    }

    /// Runs one generation. The deadline covers the wait for a permit as
    /// well as the model call, so a queued request cannot outlive it.
    /// At-most-once: a timeout or failure is returned to the caller, never
    /// retried here.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome, AppError> {
        let started = Instant::now();
        let attempt = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| AppError::Generation("generation queue closed".to_string()))?;
            self.model
                .generate(request)
                .await
                .map_err(|err| AppError::Generation(err.to_string()))
        };
        let raw = match tokio::time::timeout(self.timeout, attempt).await {
            Err(_) => return Err(AppError::Timeout),
            Ok(result) => result?,
        };

        let png = normalize_png(&raw)
            .map_err(|err| AppError::Generation(format!("Invalid model output: {}", err)))?;
        let elapsed = started.elapsed();
        info!(
            "Generated {}x{} image in {:.2}s ({} bytes)",
            request.width,
            request.height,
            elapsed.as_secs_f64(),
            png.len()
        );

        Ok(GenerationOutcome { png, elapsed })
    }
}

/// Decodes model output, strips any alpha channel and re-encodes as PNG.
fn normalize_png(raw: &[u8]) -> anyhow::Result<Vec<u8>> {
    if raw.is_empty() {
        bail!("empty response");
    }
    let decoded = image::load_from_memory(raw).context("undecodable image bytes")?;
    if decoded.width() == 0 || decoded.height() == 0 {
        bail!("image has zero dimensions");
    }

    let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Png)
        .context("PNG encoding failed")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ModelKind;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "a red fox".to_string(),
            width: 512,
            height: 512,
            model: ModelKind::Flux,
            seed: Some(7),
            steps: None,
            guidance_scale: None,
        }
    }

    fn sample_png() -> Vec<u8> {
        let buffer = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode sample");
        out.into_inner()
    }

    struct StaticModel(Vec<u8>);

    #[async_trait]
    impl ImageModel for StaticModel {
        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ImageModel for SlowModel {
        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    struct RefusingModel;

    #[async_trait]
    impl ImageModel for RefusingModel {
        async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<Vec<u8>> {
            Err(anyhow!("content filter rejected the prompt"))
        }
    }

    #[test]
    fn request_url_carries_parameters() {
        let model = PollinationsModel::new("https://image.pollinations.ai/prompt/");
        let url = model.request_url(&request()).expect("build url");
        let rendered = url.as_str();
        assert!(rendered.contains("/prompt/a%20red%20fox"));
        assert!(rendered.contains("width=512"));
        assert!(rendered.contains("model=flux"));
        assert!(rendered.contains("seed=7"));
        assert!(!rendered.contains("steps="));
    }

    #[tokio::test]
    async fn successful_generation_is_normalized_png() {
        let service = GenerationService::new(
            Arc::new(StaticModel(sample_png())),
            Duration::from_secs(5),
            1,
        );
        let outcome = service.generate(&request()).await.expect("generate");
        let decoded = image::load_from_memory(&outcome.png).expect("decode output");
        assert_eq!(decoded.width(), 4);
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let service =
            GenerationService::new(Arc::new(SlowModel), Duration::from_millis(20), 1);
        match service.generate(&request()).await {
            Err(AppError::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn queue_wait_counts_against_the_deadline() {
        let service = Arc::new(GenerationService::new(
            Arc::new(SlowModel),
            Duration::from_millis(50),
            1,
        ));

        // Occupy the single permit so the second request has to queue.
        let holder = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.generate(&request()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        match service.generate(&request()).await {
            Err(AppError::Timeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "queued request was not bounded by the deadline"
        );
        let _ = holder.await;
    }

    #[tokio::test]
    async fn model_failure_maps_to_generation_error() {
        let service =
            GenerationService::new(Arc::new(RefusingModel), Duration::from_secs(5), 1);
        match service.generate(&request()).await {
            Err(AppError::Generation(detail)) => {
                assert!(detail.contains("content filter"));
            }
            other => panic!("expected generation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_generation_error() {
        let service = GenerationService::new(
            Arc::new(StaticModel(b"not an image".to_vec())),
            Duration::from_secs(5),
            1,
        );
        assert!(matches!(
            service.generate(&request()).await,
            Err(AppError::Generation(_))
        ));
    }
}
