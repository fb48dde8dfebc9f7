//! Client core of the lecture platform: REST access, lecture chat polling, webcam
//! capture with clip upload, lecture scheduling and realtime course sync.

pub mod api;
pub mod capture;
pub mod chat;
pub mod config;
pub mod error;
pub mod realtime;
pub mod schedule;
pub mod sync;
pub mod types;

pub use api::{ApiClient, ClipUploader, InferenceClient, LectureApi};
pub use config::LectureHubConfig;
pub use error::{LectureHubError, Result};
