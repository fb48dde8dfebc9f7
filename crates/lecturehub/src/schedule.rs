//! Lecture scheduling: validate the form, resolve the teacher, normalize the time and
//! create the lecture record.

use crate::api::LectureApi;
use crate::config::{EndpointConfig, ScheduleConfig};
use crate::error::{LectureHubError, Result};
use crate::types::{Lecture, NewLecture, Session};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

/// Formats accepted from a `datetime-local` style input.
const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMessage {
    Success(String),
    Error(String),
}

/// Scheduling form state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleForm {
    pub title: String,
    pub description: String,
    /// Local date-time, e.g. `2025-06-01T10:00`
    pub scheduled_for: String,
    pub message: Option<FormMessage>,
}

impl ScheduleForm {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        scheduled_for: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            scheduled_for: scheduled_for.into(),
            message: None,
        }
    }

    fn reset(&mut self) {
        self.title.clear();
        self.description.clear();
        self.scheduled_for.clear();
    }
}

/// Interprets `local` in `source` and re-expresses the instant in `target`.
///
/// Nonexistent local times (inside a DST gap) are rejected; ambiguous ones resolve to
/// the earlier instant.
pub fn normalize_schedule_time(local: &str, source: Tz, target: Tz) -> Result<DateTime<Tz>> {
    let trimmed = local.trim();
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| LectureHubError::validation(format!("Invalid date and time '{}'", local)))?;

    let in_source = source.from_local_datetime(&naive).earliest().ok_or_else(|| {
        LectureHubError::validation(format!("{} does not exist in {}", trimmed, source.name()))
    })?;

    Ok(in_source.with_timezone(&target))
}

/// Room name derived from the creation instant.
pub fn meeting_room_id(now: DateTime<Utc>) -> String {
    format!("lecture-{}", now.timestamp_millis())
}

/// Builds and submits new lectures on behalf of a teacher.
pub struct LectureScheduler {
    api: Arc<dyn LectureApi>,
    source_tz: Tz,
    target_tz: Tz,
    meeting_base_url: String,
}

impl LectureScheduler {
    pub fn new(
        api: Arc<dyn LectureApi>,
        schedule: &ScheduleConfig,
        endpoints: &EndpointConfig,
    ) -> Result<Self> {
        Ok(Self {
            api,
            source_tz: schedule.source_tz()?,
            target_tz: schedule.target_tz()?,
            meeting_base_url: endpoints.meeting_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn target_timezone(&self) -> Tz {
        self.target_tz
    }

    /// Validates, resolves the teacher and creates the lecture.
    ///
    /// Validation and lookup failures return before any lecture is posted.
    pub async fn schedule(
        &self,
        user_id: Option<&str>,
        course_id: Option<&str>,
        form: &ScheduleForm,
    ) -> Result<(NewLecture, Option<Lecture>)> {
        self.schedule_at(user_id, course_id, form, Utc::now()).await
    }

    /// Same as [`schedule`](Self::schedule) with an explicit creation instant.
    pub async fn schedule_at(
        &self,
        user_id: Option<&str>,
        course_id: Option<&str>,
        form: &ScheduleForm,
        now: DateTime<Utc>,
    ) -> Result<(NewLecture, Option<Lecture>)> {
        let user_id = non_blank(user_id)
            .ok_or_else(|| {
                LectureHubError::validation("You must be signed in to schedule a lecture")
            })?;
        let course_id =
            non_blank(course_id).ok_or_else(|| LectureHubError::validation("No course selected"))?;
        if form.title.trim().is_empty() {
            return Err(LectureHubError::validation("Title is required"));
        }
        if form.scheduled_for.trim().is_empty() {
            return Err(LectureHubError::validation("Date and time are required"));
        }
        let scheduled_at =
            normalize_schedule_time(&form.scheduled_for, self.source_tz, self.target_tz)?;

        let teacher = self.api.find_teacher(user_id).await.map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Teacher lookup failed");
            e
        })?;

        let room = meeting_room_id(now);
        let lecture = NewLecture {
            course_id: course_id.to_string(),
            teacher_id: teacher.id,
            title: form.title.trim().to_string(),
            description: form.description.trim().to_string(),
            scheduled_at: scheduled_at.to_rfc3339(),
            video_call_url: format!("{}/{}", self.meeting_base_url, room),
        };

        let created = self.api.create_lecture(&lecture).await?;
        info!(
            course_id = %lecture.course_id,
            teacher_id = %lecture.teacher_id,
            scheduled_at = %lecture.scheduled_at,
            room = %room,
            "Lecture scheduled"
        );
        Ok((lecture, created))
    }

    /// Runs the form submission and writes the outcome back into the form.
    ///
    /// On success the fields are cleared and a success message is set; on failure the
    /// fields are kept and the message explains what went wrong.
    pub async fn submit(
        &self,
        session: &Session,
        course_id: Option<&str>,
        form: &mut ScheduleForm,
    ) -> bool {
        form.message = None;
        match self.schedule(session.ready_user_id(), course_id, form).await {
            Ok(_) => {
                form.reset();
                form.message = Some(FormMessage::Success(
                    "Lecture scheduled successfully!".to_string(),
                ));
                true
            }
            Err(e) => {
                if !e.is_user_visible() {
                    warn!(error = %e, "Lecture scheduling failed");
                }
                form.message = Some(FormMessage::Error(e.user_message()));
                false
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
