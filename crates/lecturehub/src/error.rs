//! Error types shared by every lecturehub component.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while talking to the lecture platform.
#[derive(Debug, Error, Clone)]
pub enum LectureHubError {
    /// Network/HTTP transport failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Server answered with a non-success status
    #[error("API error ({status}): {}", message.as_deref().unwrap_or("no message"))]
    Api {
        status: StatusCode,
        message: Option<String>,
    },

    /// Input rejected before any request was made
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The signed-in user has no teacher profile
    #[error("No teacher profile for user {user_id}")]
    TeacherNotFound { user_id: String },

    /// Response body could not be decoded
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// URL parsing/construction failed
    #[error("URL error: {message}")]
    UrlError { message: String },

    /// Camera device could not be opened or stopped producing media
    #[error("Device error: {message}")]
    Device { message: String },

    /// Realtime channel failed
    #[error("Realtime error: {message}")]
    Realtime { message: String },

    /// Configuration file or value is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LectureHubError>;

impl LectureHubError {
    pub fn validation(message: impl Into<String>) -> Self {
        LectureHubError::Validation {
            message: message.into(),
        }
    }

    /// Returns true for failures the user caused and can fix (bad form input, missing profile).
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            LectureHubError::Validation { .. } | LectureHubError::TeacherNotFound { .. }
        )
    }

    /// Message suitable for showing next to a form.
    ///
    /// Server-provided messages are passed through; transport failures collapse to a
    /// generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            LectureHubError::Validation { message } => message.clone(),
            LectureHubError::TeacherNotFound { .. } => {
                "Teacher profile not found. Only teachers can schedule lectures.".to_string()
            }
            LectureHubError::Api {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl From<reqwest::Error> for LectureHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return LectureHubError::Parse {
                message: err.to_string(),
            };
        }
        LectureHubError::Network {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for LectureHubError {
    fn from(err: url::ParseError) -> Self {
        LectureHubError::UrlError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LectureHubError {
    fn from(err: serde_json::Error) -> Self {
        LectureHubError::Parse {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for LectureHubError {
    fn from(err: std::io::Error) -> Self {
        LectureHubError::Device {
            message: err.to_string(),
        }
    }
}
