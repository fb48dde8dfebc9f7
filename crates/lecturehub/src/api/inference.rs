//! Upload of captured clips to the inference service.

use super::client::generate_correlation_id;
use crate::capture::VideoClip;
use crate::config::{EndpointConfig, HttpConfig};
use crate::error::{LectureHubError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Instant;
use tracing::{info, warn};
use url::Url;

const PROCESS_VIDEO_PATH: &[&str] = &["inference", "process_video"];

/// Destination for finished capture clips.
#[async_trait]
pub trait ClipUploader: Send + Sync {
    /// Uploads one clip and returns the service's JSON answer.
    async fn upload(&self, clip: VideoClip) -> Result<serde_json::Value>;
}

/// Multipart client for `POST /inference/process_video`.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    url: Url,
}

impl InferenceClient {
    pub fn new(endpoints: &EndpointConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .connect_timeout(http.connect_timeout())
            // Clips are larger than API payloads; allow twice the usual budget.
            .timeout(http.request_timeout() * 2)
            .build()
            .map_err(|e| LectureHubError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Self::with_client(client, &endpoints.inference_base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let mut url = Url::parse(base_url)?;
        url.path_segments_mut()
            .map_err(|_| LectureHubError::UrlError {
                message: format!("{} cannot be used as a base URL", base_url),
            })?
            .pop_if_empty()
            .extend(PROCESS_VIDEO_PATH);
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_form(clip: VideoClip) -> Result<Form> {
        let metadata = clip.metadata;
        let video = Part::bytes(clip.data.to_vec())
            .file_name(clip.file_name)
            .mime_str(&clip.mime_type)
            .map_err(|e| LectureHubError::Validation {
                message: format!("Invalid clip mime type '{}': {}", clip.mime_type, e),
            })?;

        Ok(Form::new()
            .part("video", video)
            .text("gender", metadata.gender)
            .text("stream", metadata.stream)
            .text("inference_interval", metadata.inference_interval))
    }
}

#[async_trait]
impl ClipUploader for InferenceClient {
    async fn upload(&self, clip: VideoClip) -> Result<serde_json::Value> {
        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        let cycle = clip.cycle;
        let size = clip.data.len();

        info!(
            correlation_id = %correlation_id,
            cycle = cycle,
            bytes = size,
            "Uploading capture clip"
        );

        let form = Self::build_form(clip)?;
        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                correlation_id = %correlation_id,
                status = %status,
                "Inference upload rejected"
            );
            return Err(LectureHubError::Api {
                status,
                message: Some(body).filter(|b| !b.trim().is_empty()),
            });
        }

        let result = response.json::<serde_json::Value>().await?;
        info!(
            correlation_id = %correlation_id,
            cycle = cycle,
            duration_ms = start.elapsed().as_millis() as u64,
            "Inference upload completed"
        );
        Ok(result)
    }
}
