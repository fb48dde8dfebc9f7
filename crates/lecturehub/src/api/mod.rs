//! REST access to the lecture platform.
//!
//! Components depend on the [`LectureApi`] trait rather than on the HTTP client so the
//! chat poller, the scheduler and the course sync can be driven by in-memory backends.

pub mod client;
pub mod inference;

#[cfg(test)]
pub(crate) mod mock;

pub use client::ApiClient;
pub use inference::{ClipUploader, InferenceClient};

use crate::error::Result;
use crate::types::{ChatMessage, Course, Lecture, NewChatMessage, NewLecture, Teacher};
use async_trait::async_trait;

/// Operations the platform backend exposes to the client.
#[async_trait]
pub trait LectureApi: Send + Sync {
    /// GET /api/chat/{lecture_id}
    async fn fetch_chat_messages(&self, lecture_id: &str) -> Result<Vec<ChatMessage>>;

    /// POST /api/chat
    async fn send_chat_message(&self, message: &NewChatMessage) -> Result<()>;

    /// GET /api/courses/{course_id}
    async fn fetch_course(&self, course_id: &str) -> Result<Course>;

    /// GET /api/lectures/ongoing?course_id=…
    async fn fetch_ongoing_lectures(&self, course_id: &str) -> Result<Vec<Lecture>>;

    /// GET /api/lectures/upcoming?course_id=…
    async fn fetch_upcoming_lectures(&self, course_id: &str) -> Result<Vec<Lecture>>;

    /// GET /api/teachers?user_id=…
    ///
    /// Fails with `TeacherNotFound` when the user has no teacher profile.
    async fn find_teacher(&self, user_id: &str) -> Result<Teacher>;

    /// POST /api/lectures
    ///
    /// Returns the stored record when the server echoes it back.
    async fn create_lecture(&self, lecture: &NewLecture) -> Result<Option<Lecture>>;
}
