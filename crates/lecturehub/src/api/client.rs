//! HTTP client for the lecture platform REST API.

use super::LectureApi;
use crate::config::{EndpointConfig, HttpConfig};
use crate::error::{LectureHubError, Result};
use crate::types::{ChatMessage, Course, Lecture, NewChatMessage, NewLecture, Teacher};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const CHAT_PATH: &[&str] = &["api", "chat"];
const COURSES_PATH: &[&str] = &["api", "courses"];
const LECTURES_PATH: &[&str] = &["api", "lectures"];
const TEACHERS_PATH: &[&str] = &["api", "teachers"];

/// Client for the platform REST backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client from the shared endpoint and HTTP settings.
    pub fn new(endpoints: &EndpointConfig, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&http.user_agent)
            .connect_timeout(http.connect_timeout())
            .timeout(http.request_timeout())
            .build()
            .map_err(|e| LectureHubError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Self::with_client(client, &endpoints.api_base_url)
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(LectureHubError::UrlError {
                message: format!("{} cannot be used as a base URL", base_url),
            });
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends percent-encoded path segments to the base URL.
    fn endpoint(&self, prefix: &[&str], rest: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LectureHubError::UrlError {
                message: format!("{} cannot be used as a base URL", self.base_url),
            })?
            .pop_if_empty()
            .extend(prefix)
            .extend(rest);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        debug!(correlation_id = %correlation_id, url = %url, "GET");

        let response = self.client.get(url.clone()).send().await?;
        let response = check_status(response, &correlation_id).await?;
        let body = response.json::<T>().await?;

        debug!(
            correlation_id = %correlation_id,
            url = %url,
            duration_ms = start.elapsed().as_millis() as u64,
            "GET completed"
        );
        Ok(body)
    }
}

#[async_trait]
impl LectureApi for ApiClient {
    async fn fetch_chat_messages(&self, lecture_id: &str) -> Result<Vec<ChatMessage>> {
        let url = self.endpoint(CHAT_PATH, &[lecture_id])?;
        self.get_json(url).await
    }

    async fn send_chat_message(&self, message: &NewChatMessage) -> Result<()> {
        let correlation_id = generate_correlation_id();
        let url = self.endpoint(CHAT_PATH, &[])?;
        info!(
            correlation_id = %correlation_id,
            lecture_id = %message.lecture_id,
            sender_id = %message.sender_id,
            "Sending chat message"
        );

        let response = self.client.post(url).json(message).send().await?;
        check_status(response, &correlation_id).await?;
        Ok(())
    }

    async fn fetch_course(&self, course_id: &str) -> Result<Course> {
        let url = self.endpoint(COURSES_PATH, &[course_id])?;
        self.get_json(url).await
    }

    async fn fetch_ongoing_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        let mut url = self.endpoint(LECTURES_PATH, &["ongoing"])?;
        url.query_pairs_mut().append_pair("course_id", course_id);
        self.get_json(url).await
    }

    async fn fetch_upcoming_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        let mut url = self.endpoint(LECTURES_PATH, &["upcoming"])?;
        url.query_pairs_mut().append_pair("course_id", course_id);
        self.get_json(url).await
    }

    async fn find_teacher(&self, user_id: &str) -> Result<Teacher> {
        let mut url = self.endpoint(TEACHERS_PATH, &[])?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let not_found = || LectureHubError::TeacherNotFound {
            user_id: user_id.to_string(),
        };

        match self.get_json::<TeacherLookup>(url).await {
            Ok(TeacherLookup::One(teacher)) => Ok(teacher),
            Ok(TeacherLookup::Many(teachers)) => teachers.into_iter().next().ok_or_else(not_found),
            Err(LectureHubError::Api {
                status: StatusCode::NOT_FOUND,
                ..
            }) => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    async fn create_lecture(&self, lecture: &NewLecture) -> Result<Option<Lecture>> {
        let correlation_id = generate_correlation_id();
        let url = self.endpoint(LECTURES_PATH, &[])?;
        info!(
            correlation_id = %correlation_id,
            course_id = %lecture.course_id,
            scheduled_at = %lecture.scheduled_at,
            "Creating lecture"
        );

        let response = self.client.post(url).json(lecture).send().await?;
        let response = check_status(response, &correlation_id).await?;
        let text = response.text().await?;

        // Backends differ on whether the created row is echoed back.
        Ok(serde_json::from_str::<Lecture>(&text).ok())
    }
}

/// Teacher lookups may return a single record or a filtered list.
#[derive(Deserialize)]
#[serde(untagged)]
enum TeacherLookup {
    One(Teacher),
    Many(Vec<Teacher>),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Turns a non-success response into `LectureHubError::Api`, keeping the server's message.
async fn check_status(response: Response, correlation_id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = extract_error_message(&text);
    warn!(
        correlation_id = %correlation_id,
        status = %status,
        error_message = message.as_deref().unwrap_or(""),
        "Request failed"
    );
    Err(LectureHubError::Api { status, message })
}

fn extract_error_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return Some(message);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('<') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Generates a unique correlation ID for request tracing.
pub(crate) fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}
