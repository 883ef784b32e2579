use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Minimum size of every part but the last one (object storage constraint)
pub const MIN_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProctorConfig {
    pub exam: ExamConfig,
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExamConfig {
    /// Total exam duration in seconds
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,

    /// Timer tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Segment emission cadence for the screen recorder
    #[serde(default = "default_segment_interval_ms")]
    pub segment_interval_ms: u64,

    /// Requested camera preview resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub camera_resolution: (u32, u32),

    /// Request an audio track alongside the screen video
    #[serde(default = "default_capture_audio")]
    pub capture_audio: bool,

    /// Content type of the materialized recording
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Prefix for generated recording filenames
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UploadConfig {
    /// Backend base address, editable at runtime through the upload engine
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Opaque candidate identifier forwarded to the backend
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Part size used unless the backend supplies its own
    #[serde(default = "default_part_size_bytes")]
    pub part_size_bytes: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Parts in flight at once; 1 keeps the strictly sequential protocol
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,

    /// Cancel an in-flight upload when the controller shuts down
    #[serde(default)]
    pub cancel_on_shutdown: bool,

    /// Ask the backend to abort the session after a terminal failure
    #[serde(default)]
    pub abort_on_failure: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra attempts per protocol step; 0 surfaces the first failure
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl ProctorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("proctorcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("exam.duration_seconds", default_duration_seconds() as i64)?
            .set_default("exam.tick_interval_ms", default_tick_interval_ms() as i64)?
            .set_default("capture.segment_interval_ms", default_segment_interval_ms() as i64)?
            .set_default(
                "capture.camera_resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("capture.capture_audio", default_capture_audio())?
            .set_default("capture.content_type", default_content_type())?
            .set_default("capture.filename_prefix", default_filename_prefix())?
            .set_default("upload.api_base_url", default_api_base_url())?
            .set_default("upload.user_id", default_user_id())?
            .set_default("upload.part_size_bytes", default_part_size_bytes() as i64)?
            .set_default(
                "upload.request_timeout_seconds",
                default_request_timeout_seconds() as i64,
            )?
            .set_default(
                "upload.max_concurrent_parts",
                default_max_concurrent_parts() as i64,
            )?
            .set_default("upload.cancel_on_shutdown", false)?
            .set_default("upload.abort_on_failure", false)?
            .set_default("upload.retry.max_retries", 0_i64)?
            .set_default("upload.retry.base_delay_ms", default_retry_base_delay_ms() as i64)?
            .set_default("upload.retry.max_delay_ms", default_retry_max_delay_ms() as i64)?
            .set_default(
                "upload.retry.exponential_backoff",
                default_exponential_backoff(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // PROCTORCAM_UPLOAD__API_BASE_URL style overrides
            .add_source(
                Environment::with_prefix("PROCTORCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ProctorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exam.duration_seconds == 0 {
            return Err(ConfigError::Message(
                "Exam duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.exam.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Exam tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.capture.segment_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Capture segment_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.capture.content_type.trim().is_empty() {
            return Err(ConfigError::Message(
                "Capture content_type must not be empty".to_string(),
            ));
        }

        if url::Url::parse(&self.upload.api_base_url).is_err() {
            return Err(ConfigError::Message(format!(
                "Upload api_base_url '{}' is not a valid URL",
                self.upload.api_base_url
            )));
        }

        if self.upload.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigError::Message(format!(
                "Upload part_size_bytes must be at least {} bytes",
                MIN_PART_SIZE_BYTES
            )));
        }

        if self.upload.max_concurrent_parts == 0 {
            return Err(ConfigError::Message(
                "Upload max_concurrent_parts must be greater than 0".to_string(),
            ));
        }

        if self.upload.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Upload request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ExamConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl CaptureConfig {
    pub fn segment_interval(&self) -> Duration {
        Duration::from_millis(self.segment_interval_ms)
    }
}

impl UploadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            exam: ExamConfig {
                duration_seconds: default_duration_seconds(),
                tick_interval_ms: default_tick_interval_ms(),
            },
            capture: CaptureConfig {
                segment_interval_ms: default_segment_interval_ms(),
                camera_resolution: default_camera_resolution(),
                capture_audio: default_capture_audio(),
                content_type: default_content_type(),
                filename_prefix: default_filename_prefix(),
            },
            upload: UploadConfig {
                api_base_url: default_api_base_url(),
                user_id: default_user_id(),
                part_size_bytes: default_part_size_bytes(),
                request_timeout_seconds: default_request_timeout_seconds(),
                max_concurrent_parts: default_max_concurrent_parts(),
                cancel_on_shutdown: false,
                abort_on_failure: false,
                retry: RetryConfig::default(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            exponential_backoff: default_exponential_backoff(),
        }
    }
}

// Default value functions
fn default_duration_seconds() -> u64 {
    3600
}
fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_segment_interval_ms() -> u64 {
    1000
}
fn default_camera_resolution() -> (u32, u32) {
    (320, 240)
}
fn default_capture_audio() -> bool {
    true
}
fn default_content_type() -> String {
    "video/webm".to_string()
}
fn default_filename_prefix() -> String {
    "exam-recording".to_string()
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_user_id() -> String {
    "anonymous".to_string()
}
fn default_part_size_bytes() -> u64 {
    MIN_PART_SIZE_BYTES
}
fn default_request_timeout_seconds() -> u64 {
    30
}
fn default_max_concurrent_parts() -> usize {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_exponential_backoff() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    256
}
