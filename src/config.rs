//! Configuration, read from the environment once at startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::executor::MediaSettings;
use crate::application::progress::DEFAULT_THROTTLE_INTERVAL;
use crate::application::retry::RetryPolicy;
use crate::domain::creative::CreativeTemplate;
use crate::error::ConfigError;

/// Ceiling on readiness polls; past this the backoff sleeps run into hours.
const MAX_READINESS_ATTEMPTS: u32 = 20;

/// Settings of the batch pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Units of one group processed at the same time, unless a batch asks otherwise
    pub concurrency_limit: usize,
    /// Minimum gap between two throttled progress events
    pub progress_interval: Duration,
    /// Backoff used while waiting for uploaded videos to become usable
    pub readiness: RetryPolicy,
    /// Videos longer than this are trimmed before upload
    pub max_video_duration: Duration,
    /// Per-task scratch directories are created under this path
    pub scratch_root: PathBuf,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            progress_interval: DEFAULT_THROTTLE_INTERVAL,
            readiness: RetryPolicy::default(),
            max_video_duration: Duration::from_secs(14_400),
            scratch_root: env::temp_dir().join("adpilot"),
            ffmpeg: String::from("ffmpeg"),
            ffprobe: String::from("ffprobe"),
        }
    }
}

impl PipelineConfig {
    /// Load from environment variables (and `.env`), falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            concurrency_limit: parsed(&lookup, "CONCURRENCY_LIMIT", defaults.concurrency_limit)?,
            progress_interval: Duration::from_millis(parsed(
                &lookup,
                "PROGRESS_INTERVAL_MS",
                defaults.progress_interval.as_millis() as u64,
            )?),
            readiness: RetryPolicy {
                max_attempts: parsed(
                    &lookup,
                    "READINESS_MAX_ATTEMPTS",
                    defaults.readiness.max_attempts,
                )?,
                initial_delay: Duration::from_millis(parsed(
                    &lookup,
                    "READINESS_INITIAL_DELAY_MS",
                    defaults.readiness.initial_delay.as_millis() as u64,
                )?),
                backoff_multiplier: parsed(
                    &lookup,
                    "READINESS_BACKOFF",
                    defaults.readiness.backoff_multiplier,
                )?,
            },
            max_video_duration: Duration::from_secs(parsed(
                &lookup,
                "MAX_VIDEO_SECONDS",
                defaults.max_video_duration.as_secs(),
            )?),
            scratch_root: lookup("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            ffmpeg: lookup("FFMPEG").unwrap_or(defaults.ffmpeg),
            ffprobe: lookup("FFPROBE").unwrap_or(defaults.ffprobe),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::OutOfRange(
                "CONCURRENCY_LIMIT must be at least 1".into(),
            ));
        }
        if self.readiness.max_attempts > MAX_READINESS_ATTEMPTS {
            return Err(ConfigError::OutOfRange(format!(
                "READINESS_MAX_ATTEMPTS must be at most {}",
                MAX_READINESS_ATTEMPTS
            )));
        }
        let backoff = self.readiness.backoff_multiplier;
        if !(1.0..=10.0).contains(&backoff) {
            return Err(ConfigError::OutOfRange(format!(
                "READINESS_BACKOFF must be between 1 and 10, got {}",
                backoff
            )));
        }
        if self.max_video_duration.is_zero() {
            return Err(ConfigError::OutOfRange(
                "MAX_VIDEO_SECONDS must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.readiness
    }

    pub fn media_settings(&self) -> MediaSettings {
        MediaSettings {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            max_video_duration: self.max_video_duration,
        }
    }
}

/// Configuration for the local HTTP deployment.
#[cfg(feature = "local")]
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Root of the filesystem sandbox standing in for the ad platform
    pub platform_dir: PathBuf,
    /// Ad copy for batches uploaded without a creative, and the base that
    /// an uploaded creative is laid over
    pub creative_defaults: CreativeTemplate,
}

#[cfg(feature = "local")]
impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            platform_dir: env::var("PLATFORM_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./platform")),
            creative_defaults: creative_defaults(|key| env::var(key).ok()),
        }
    }
}

/// House ad copy from `CREATIVE_*` variables; unset or blank keys keep the
/// built-in defaults.
pub fn creative_defaults<F>(lookup: F) -> CreativeTemplate
where
    F: Fn(&'static str) -> Option<String>,
{
    let set = |key| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let base = CreativeTemplate::default();

    CreativeTemplate {
        page_id: set("CREATIVE_PAGE_ID").unwrap_or(base.page_id),
        headline: set("CREATIVE_HEADLINE").unwrap_or(base.headline),
        message: set("CREATIVE_MESSAGE").unwrap_or(base.message),
        link: set("CREATIVE_LINK").unwrap_or(base.link),
        utm_parameters: set("CREATIVE_UTM_PARAMETERS").unwrap_or(base.utm_parameters),
        call_to_action: set("CREATIVE_CALL_TO_ACTION").unwrap_or(base.call_to_action),
        link_description: set("CREATIVE_LINK_DESCRIPTION").or(base.link_description),
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
