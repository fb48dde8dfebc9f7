/// Records exchanged with the lecture platform API
use serde::{Deserialize, Serialize};

/// A scheduled or in-progress teaching session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lecture {
    pub id: i64,
    pub course_id: String,
    pub teacher_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 3339, normalized to the platform timezone when the lecture was created
    pub scheduled_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub video_call_url: Option<String>,
}

impl Lecture {
    /// A lecture is ongoing once an external process has stamped `started_at`.
    pub fn is_ongoing(&self) -> bool {
        self.started_at.is_some()
    }
}

/// Body of `POST /api/lectures`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLecture {
    pub course_id: String,
    pub teacher_id: String,
    pub title: String,
    pub description: String,
    pub scheduled_at: String,
    pub video_call_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One chat line. Ordering is implied by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(default)]
    pub lecture_id: Option<String>,
    pub sender_id: String,
    pub message: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub lecture_id: String,
    pub sender_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

/// Auth session supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
    pub role: Role,
    pub loading: bool,
}

impl Session {
    /// Returns the user id once the session has finished loading.
    pub fn ready_user_id(&self) -> Option<&str> {
        if self.loading {
            return None;
        }
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lecture_deserializes_nullable_fields() {
        let json = r#"{
            "id": 7,
            "course_id": "c-1",
            "teacher_id": "t-1",
            "title": "Intro",
            "description": null,
            "scheduled_at": "2025-06-01T10:00:00+05:30",
            "started_at": null,
            "video_call_url": "https://meet.jit.si/lecture-1"
        }"#;
        let lecture: Lecture = serde_json::from_str(json).unwrap();
        assert!(!lecture.is_ongoing());
        assert_eq!(lecture.description, None);
    }

    #[test]
    fn test_session_not_ready_while_loading() {
        let session = Session {
            user_id: Some("u-1".to_string()),
            role: Role::Teacher,
            loading: true,
        };
        assert_eq!(session.ready_user_id(), None);

        let loaded = Session {
            loading: false,
            ..session
        };
        assert_eq!(loaded.ready_user_id(), Some("u-1"));
    }
}
