//! In-memory backend used by component tests.

use super::LectureApi;
use crate::error::{LectureHubError, Result};
use crate::types::{ChatMessage, Course, Lecture, NewChatMessage, NewLecture, Teacher};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockApi {
    pub messages: Mutex<Vec<ChatMessage>>,
    pub courses: Mutex<Vec<Course>>,
    pub lectures: Mutex<Vec<Lecture>>,
    pub teachers: Mutex<Vec<Teacher>>,
    pub created: Mutex<Vec<NewLecture>>,
    pub fail_chat_fetch: AtomicBool,
    pub fail_create_with: Mutex<Option<Option<String>>>,
    pub chat_fetches: AtomicUsize,
    pub course_fetches: AtomicUsize,
    pub ongoing_fetches: AtomicUsize,
    pub upcoming_fetches: AtomicUsize,
    pub teacher_lookups: AtomicUsize,
}

impl MockApi {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn lectures_where<F>(&self, course_id: &str, keep: F) -> Vec<Lecture>
    where
        F: Fn(&Lecture) -> bool,
    {
        self.lectures
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.course_id == course_id && keep(l))
            .cloned()
            .collect()
    }
}

pub fn lecture(id: i64, course_id: &str, started: bool) -> Lecture {
    Lecture {
        id,
        course_id: course_id.to_string(),
        teacher_id: "t-1".to_string(),
        title: format!("Lecture {}", id),
        description: None,
        scheduled_at: "2025-06-01T10:00:00+05:30".to_string(),
        started_at: started.then(|| "2025-06-01T10:01:00+05:30".to_string()),
        video_call_url: None,
    }
}

#[async_trait]
impl LectureApi for MockApi {
    async fn fetch_chat_messages(&self, lecture_id: &str) -> Result<Vec<ChatMessage>> {
        self.chat_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_chat_fetch.load(Ordering::SeqCst) {
            return Err(LectureHubError::Network {
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.lecture_id.as_deref() == Some(lecture_id))
            .cloned()
            .collect())
    }

    async fn send_chat_message(&self, message: &NewChatMessage) -> Result<()> {
        let mut messages = self.messages.lock().unwrap();
        let id = messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        messages.push(ChatMessage {
            id,
            lecture_id: Some(message.lecture_id.clone()),
            sender_id: message.sender_id.clone(),
            message: message.message.clone(),
        });
        Ok(())
    }

    async fn fetch_course(&self, course_id: &str) -> Result<Course> {
        self.course_fetches.fetch_add(1, Ordering::SeqCst);
        self.courses
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == course_id)
            .cloned()
            .ok_or(LectureHubError::Api {
                status: StatusCode::NOT_FOUND,
                message: Some("Course not found".to_string()),
            })
    }

    async fn fetch_ongoing_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        self.ongoing_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.lectures_where(course_id, |l| l.is_ongoing()))
    }

    async fn fetch_upcoming_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        self.upcoming_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.lectures_where(course_id, |l| !l.is_ongoing()))
    }

    async fn find_teacher(&self, user_id: &str) -> Result<Teacher> {
        self.teacher_lookups.fetch_add(1, Ordering::SeqCst);
        self.teachers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.user_id == user_id)
            .cloned()
            .ok_or_else(|| LectureHubError::TeacherNotFound {
                user_id: user_id.to_string(),
            })
    }

    async fn create_lecture(&self, lecture: &NewLecture) -> Result<Option<Lecture>> {
        if let Some(message) = self.fail_create_with.lock().unwrap().clone() {
            return Err(LectureHubError::Api {
                status: StatusCode::BAD_REQUEST,
                message,
            });
        }
        self.created.lock().unwrap().push(lecture.clone());
        Ok(None)
    }
}
