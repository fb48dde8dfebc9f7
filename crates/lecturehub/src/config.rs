/// Configuration for every lecturehub component
use crate::error::{LectureHubError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level configuration, loaded from a single JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LectureHubConfig {
    pub endpoints: EndpointConfig,
    pub http: HttpConfig,
    pub chat: ChatConfig,
    pub capture: CaptureConfig,
    pub schedule: ScheduleConfig,
    pub sync: SyncConfig,
}

/// The one place every base URL comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// REST backend (chat, courses, lectures, teachers)
    pub api_base_url: String,
    /// Inference service receiving capture clips
    pub inference_base_url: String,
    /// Realtime websocket endpoint; `None` disables push-driven sync
    pub realtime_url: Option<String>,
    pub realtime_api_key: Option<String>,
    /// Prefix for generated meeting room links
    pub meeting_base_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            inference_base_url: "http://localhost:8000".to_string(),
            realtime_url: None,
            realtime_api_key: None,
            meeting_base_url: "https://meet.jit.si".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            user_agent: concat!("lecturehub/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub poll_interval_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
        }
    }
}

impl ChatConfig {
    /// Never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Capture cadence and the fixed metadata attached to every clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub record_secs: u64,
    pub pause_secs: u64,
    pub gender: String,
    pub stream: String,
    pub inference_interval: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            record_secs: 5,
            pause_secs: 5,
            gender: "male".to_string(),
            stream: "true".to_string(),
            inference_interval: "5".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn record_duration(&self) -> Duration {
        Duration::from_secs(self.record_secs)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

/// Timezones used when normalizing a scheduled lecture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Zone the user typed the date-time in (IANA name)
    pub source_timezone: String,
    /// Zone every stored `scheduled_at` is expressed in (IANA name)
    pub target_timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            source_timezone: "Asia/Kolkata".to_string(),
            target_timezone: "Asia/Kolkata".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn source_tz(&self) -> Result<Tz> {
        parse_timezone(&self.source_timezone)
    }

    pub fn target_tz(&self) -> Result<Tz> {
        parse_timezone(&self.target_timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Coalescing window, from the first realtime push of a burst to the re-fetch
    pub debounce_ms: u64,
    /// Poll interval used when no realtime endpoint is configured
    pub fallback_poll_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            fallback_poll_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Never shorter than one second.
    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_poll_secs.max(1))
    }
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| LectureHubError::Config {
        message: format!("Unknown timezone '{}'", name),
    })
}

impl LectureHubConfig {
    /// Loads configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| LectureHubError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: LectureHubConfig =
            serde_json::from_str(&content).map_err(|e| LectureHubError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        Ok(config)
    }

    /// Applies `LECTUREHUB_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LECTUREHUB_API_URL") {
            self.endpoints.api_base_url = url;
        }
        if let Some(url) = lookup("LECTUREHUB_INFERENCE_URL") {
            self.endpoints.inference_base_url = url;
        }
        if let Some(url) = lookup("LECTUREHUB_REALTIME_URL") {
            self.endpoints.realtime_url = Some(url);
        }
        if let Some(key) = lookup("LECTUREHUB_REALTIME_KEY") {
            self.endpoints.realtime_api_key = Some(key);
        }
    }

    /// Checks that every URL parses, both timezones are known and no interval is zero.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.endpoints.api_base_url)?;
        Url::parse(&self.endpoints.inference_base_url)?;
        Url::parse(&self.endpoints.meeting_base_url)?;
        if let Some(realtime) = &self.endpoints.realtime_url {
            let url = Url::parse(realtime)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(LectureHubError::Config {
                    message: format!("Realtime URL must use ws:// or wss://, got {}", realtime),
                });
            }
        }
        self.schedule.source_tz()?;
        self.schedule.target_tz()?;
        for (name, value) in [
            ("capture.record_secs", self.capture.record_secs),
            ("chat.poll_interval_secs", self.chat.poll_interval_secs),
            ("sync.fallback_poll_secs", self.sync.fallback_poll_secs),
        ] {
            if value == 0 {
                return Err(LectureHubError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }
}
