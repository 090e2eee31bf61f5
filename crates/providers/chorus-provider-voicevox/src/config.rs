//! Engine settings from the environment

use chorus_core::{get_env_int, get_env_or, ChorusError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default engine address
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:50021";

/// VOICEVOX engine and worker pool settings
#[derive(Debug, Clone)]
pub struct VoiceVoxConfig {
    /// Engine base URL, without a trailing slash
    pub engine_url: String,
    /// Playback speed factor written into every query
    pub speed_scale: f64,
    /// Concurrent synthesis jobs
    pub workers: usize,
    /// Where rendered `.wav` files are written
    pub output_dir: PathBuf,
    /// Deadline for `/audio_query`
    pub query_timeout: Duration,
    /// Deadline for `/synthesis`
    pub synthesis_timeout: Duration,
}

impl Default for VoiceVoxConfig {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            speed_scale: 1.1,
            workers: 4,
            output_dir: std::env::temp_dir(),
            query_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(20),
        }
    }
}

impl VoiceVoxConfig {
    /// Read `VOICEVOX_*` variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let engine_url = get_env_or("VOICEVOX_ENGINE_URL", DEFAULT_ENGINE_URL)
            .trim()
            .trim_end_matches('/')
            .to_string();
        if engine_url.is_empty() {
            return Err(ChorusError::config("VOICEVOX_ENGINE_URL is empty"));
        }

        let raw_speed = get_env_or("VOICEVOX_SPEEDSCALE", "1.1");
        let speed_scale: f64 = raw_speed.trim().parse().map_err(|_| {
            ChorusError::config(format!("VOICEVOX_SPEEDSCALE is not a number: {}", raw_speed))
        })?;
        if speed_scale.is_nan() || speed_scale <= 0.0 {
            return Err(ChorusError::config("VOICEVOX_SPEEDSCALE must be positive"));
        }

        let workers = get_env_int::<usize>("VOICEVOX_THREAD_COUNT", defaults.workers);
        if workers == 0 {
            return Err(ChorusError::config("VOICEVOX_THREAD_COUNT must be at least 1"));
        }

        let output_dir = std::env::var("VOICEVOX_OUTPUT_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        Ok(Self {
            engine_url,
            speed_scale,
            workers,
            output_dir,
            ..defaults
        })
    }
}
