//! Course page state: the course record plus its ongoing and upcoming lectures.
//!
//! The course is fetched once. Both lecture lists are fetched together on start and
//! again whenever the refresh source fires, either a realtime change feed (debounced)
//! or a fixed poll interval. List fetches carry request tokens, so a slow response can
//! never overwrite a newer one.

use crate::api::LectureApi;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::realtime::LectureChange;
use crate::types::{Course, Lecture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest accepted poll period.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What triggers a re-fetch of the lecture lists.
pub enum RefreshSource {
    /// Change notifications from the realtime feed.
    Realtime(mpsc::Receiver<LectureChange>),
    /// Re-fetch on a fixed interval.
    Poll(Duration),
}

/// A value with its own loading and error flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loadable<T> {
    pub loading: bool,
    pub data: T,
    /// User-facing message of the last failed fetch
    pub error: Option<String>,
}

impl<T: Default> Loadable<T> {
    fn pending() -> Self {
        Self {
            loading: true,
            data: T::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseView {
    pub course_id: String,
    pub course: Loadable<Option<Course>>,
    pub ongoing: Loadable<Vec<Lecture>>,
    pub upcoming: Loadable<Vec<Lecture>>,
    lists_revision: u64,
}

impl CourseView {
    fn new(course_id: &str) -> Self {
        Self {
            course_id: course_id.to_string(),
            course: Loadable::pending(),
            ongoing: Loadable::pending(),
            upcoming: Loadable::pending(),
            lists_revision: 0,
        }
    }

    /// Token of the list fetch currently shown.
    pub fn lists_revision(&self) -> u64 {
        self.lists_revision
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Applied {
    Updated,
    Stale,
}

struct SyncInner {
    api: Arc<dyn LectureApi>,
    course_id: String,
    view: watch::Sender<CourseView>,
    next_token: AtomicU64,
}

impl SyncInner {
    fn issue_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn load_course(&self) {
        let result = self.api.fetch_course(&self.course_id).await;
        if let Err(e) = &result {
            warn!(course_id = %self.course_id, error = %e, "Failed to fetch course");
        }
        self.view.send_modify(|view| {
            view.course.loading = false;
            match result {
                Ok(course) => {
                    view.course.data = Some(course);
                    view.course.error = None;
                }
                Err(e) => view.course.error = Some(e.user_message()),
            }
        });
    }

    async fn refresh_lists(&self) -> Applied {
        let token = self.issue_token();
        self.view.send_if_modified(|view| {
            let changed = !view.ongoing.loading || !view.upcoming.loading;
            view.ongoing.loading = true;
            view.upcoming.loading = true;
            changed
        });

        let start = Instant::now();
        let (ongoing, upcoming) = futures::join!(
            self.api.fetch_ongoing_lectures(&self.course_id),
            self.api.fetch_upcoming_lectures(&self.course_id)
        );

        let failures = [
            ("ongoing", ongoing.as_ref().err()),
            ("upcoming", upcoming.as_ref().err()),
        ];
        for (list, failure) in failures {
            if let Some(e) = failure {
                warn!(
                    course_id = %self.course_id,
                    list = list,
                    error = %e,
                    "Failed to fetch lectures"
                );
            }
        }

        let outcome = self.apply_lists(token, ongoing, upcoming);
        debug!(
            course_id = %self.course_id,
            token = token,
            stale = outcome == Applied::Stale,
            duration_ms = start.elapsed().as_millis() as u64,
            "Lecture lists fetched"
        );
        outcome
    }

    fn apply_lists(
        &self,
        token: u64,
        ongoing: Result<Vec<Lecture>>,
        upcoming: Result<Vec<Lecture>>,
    ) -> Applied {
        let latest = self.next_token.load(Ordering::SeqCst);
        let mut outcome = Applied::Stale;
        self.view.send_if_modified(|view| {
            if token <= view.lists_revision {
                return false;
            }
            view.lists_revision = token;
            // A newer fetch still running keeps the lists in the loading state.
            let settled = token >= latest;
            settle(&mut view.ongoing, ongoing, settled);
            settle(&mut view.upcoming, upcoming, settled);
            outcome = Applied::Updated;
            true
        });
        outcome
    }
}

fn settle<T>(slot: &mut Loadable<T>, result: Result<T>, settled: bool) {
    slot.loading = !settled;
    match result {
        Ok(data) => {
            slot.data = data;
            slot.error = None;
        }
        Err(e) => slot.error = Some(e.user_message()),
    }
}

/// Keeps a [`CourseView`] current until shut down or dropped.
pub struct CourseSync {
    inner: Arc<SyncInner>,
    tasks: JoinSet<()>,
}

impl CourseSync {
    pub fn start(
        api: Arc<dyn LectureApi>,
        course_id: impl Into<String>,
        source: RefreshSource,
        config: &SyncConfig,
    ) -> Self {
        let course_id = course_id.into();
        let (view, _) = watch::channel(CourseView::new(&course_id));
        let inner = Arc::new(SyncInner {
            api,
            course_id,
            view,
            next_token: AtomicU64::new(0),
        });

        let mode = match &source {
            RefreshSource::Realtime(_) => "realtime",
            RefreshSource::Poll(_) => "poll",
        };
        info!(course_id = %inner.course_id, mode = mode, "Starting course sync");

        let mut tasks = JoinSet::new();
        tasks.spawn(run(
            inner.clone(),
            source,
            config.debounce(),
            config.fallback_poll_interval(),
        ));

        Self { inner, tasks }
    }

    pub fn course_id(&self) -> &str {
        &self.inner.course_id
    }

    pub fn subscribe(&self) -> watch::Receiver<CourseView> {
        self.inner.view.subscribe()
    }

    pub fn view(&self) -> CourseView {
        self.inner.view.borrow().clone()
    }

    /// Re-fetches both lecture lists now.
    pub async fn refresh(&self) {
        self.inner.refresh_lists().await;
    }

    pub async fn shutdown(mut self) {
        info!(course_id = %self.inner.course_id, "Stopping course sync");
        self.tasks.shutdown().await;
    }
}

async fn run(
    inner: Arc<SyncInner>,
    source: RefreshSource,
    debounce: Duration,
    fallback: Duration,
) {
    futures::join!(inner.load_course(), inner.refresh_lists());

    match source {
        RefreshSource::Poll(interval) => poll_lists(&inner, interval).await,
        RefreshSource::Realtime(changes) => {
            follow_changes(&inner, changes, debounce).await;
            warn!(
                course_id = %inner.course_id,
                interval_secs = fallback.as_secs(),
                "Change feed closed, falling back to polling"
            );
            inner.refresh_lists().await;
            poll_lists(&inner, fallback).await;
        }
    }
}

async fn poll_lists(inner: &SyncInner, interval: Duration) {
    let interval = interval.max(MIN_POLL_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        inner.refresh_lists().await;
    }
}

/// Refetches once per `debounce` window, measured from the first change of a burst, so a
/// steady stream of pushes still refreshes the lists. Returns once the feed closes.
async fn follow_changes(
    inner: &SyncInner,
    mut changes: mpsc::Receiver<LectureChange>,
    debounce: Duration,
) {
    while let Some(change) = changes.recv().await {
        debug!(course_id = %inner.course_id, kind = ?change.kind, "Lecture change pushed");
        let window_end = Instant::now() + debounce;
        let mut open = true;
        loop {
            match tokio::time::timeout_at(window_end, changes.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    open = false;
                    break;
                }
                Err(_) => break,
            }
        }
        inner.refresh_lists().await;
        if !open {
            return;
        }
    }
}
