//! Cached, pooled, self-degrading synthesis
//!
//! [`SpeechSynthesisService`] is the only [`SpeechSynthesizer`] the agents
//! see. Engine calls and file writes run on spawned worker tasks bounded by
//! a semaphore; the cache and failure counters are updated by the awaiting
//! caller once a worker result is back, never by the workers themselves.

use crate::cache::SynthesisCache;
use crate::config::VoiceVoxConfig;
use crate::engine::{SynthesisEngine, VoiceVoxEngine};
use crate::error::{Result, SynthesisError};
use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::{truncate_chars, AudioResource, SpeechSynthesizer};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive failures tolerated before long lines are shortened
pub const FAILURE_THRESHOLD: u32 = 5;

/// Characters kept when a line is shortened after repeated failures
pub const DEGRADED_TEXT_CHARS: usize = 50;

/// Time without a success after which the engine is reported unreachable
pub const UNREACHABLE_AFTER: Duration = Duration::from_secs(120);

/// How often dangling cache entries are swept
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct ServiceState {
    cache: SynthesisCache,
    consecutive_failures: u32,
    last_success: Instant,
}

/// VOICEVOX-backed [`SpeechSynthesizer`]
pub struct SpeechSynthesisService {
    engine: Arc<dyn SynthesisEngine>,
    output_dir: PathBuf,
    workers: Arc<Semaphore>,
    state: Mutex<ServiceState>,
}

impl SpeechSynthesisService {
    /// Service over an arbitrary engine
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        output_dir: impl Into<PathBuf>,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            output_dir: output_dir.into(),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            state: Mutex::new(ServiceState {
                cache: SynthesisCache::new(),
                consecutive_failures: 0,
                last_success: Instant::now(),
            }),
        }
    }

    /// Service over the HTTP engine described by `config`
    pub fn from_config(config: &VoiceVoxConfig) -> Result<Self> {
        let engine = VoiceVoxEngine::new(config)?;
        info!(
            engine_url = %config.engine_url,
            workers = config.workers,
            speed_scale = config.speed_scale,
            "VOICEVOX synthesis configured"
        );
        Ok(Self::new(Arc::new(engine), &config.output_dir, config.workers))
    }

    #[cfg(test)]
    fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.state.lock().cache.len()
    }

    fn silent_for(&self) -> Duration {
        self.state.lock().last_success.elapsed()
    }

    /// Whether nothing has succeeded for longer than [`UNREACHABLE_AFTER`]
    pub fn engine_unreachable(&self) -> bool {
        self.silent_for() > UNREACHABLE_AFTER
    }

    /// Remove cache entries whose file is gone
    pub fn sweep_cache(&self) -> usize {
        let removed = self.state.lock().cache.sweep();
        if removed > 0 {
            info!(removed, "Swept dangling synthesis cache entries");
        }
        removed
    }

    /// Sweep the cache every [`CACHE_SWEEP_INTERVAL`] until `cancel` fires
    pub fn spawn_cache_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let start = Instant::now() + CACHE_SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, CACHE_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        service.sweep_cache();
                    }
                }
            }
        })
    }

    fn cached(&self, voice_id: u32, text: &str) -> Option<AudioResource> {
        self.state.lock().cache.get(voice_id, text)
    }

    fn record_success(&self, voice_id: u32, text: &str, resource: &AudioResource) {
        let mut state = self.state.lock();
        state.cache.insert(voice_id, text, resource.clone());
        state.consecutive_failures = 0;
        state.last_success = Instant::now();
    }

    fn record_failure(&self) -> u32 {
        let failures = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            state.consecutive_failures
        };
        if self.engine_unreachable() {
            error!(
                failures,
                silent_secs = self.silent_for().as_secs(),
                "VOICEVOX engine appears unreachable"
            );
        }
        failures
    }

    /// Run one job on the worker pool
    async fn render(&self, text: &str, voice_id: u32) -> Result<AudioResource> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| SynthesisError::worker_pool(e.to_string()))?;

        let engine = Arc::clone(&self.engine);
        let dir = self.output_dir.clone();
        let text = text.to_string();
        let job = tokio::spawn(async move {
            let _permit = permit;
            render_job(engine.as_ref(), dir, &text, voice_id).await
        });

        job.await
            .map_err(|e| SynthesisError::worker_pool(e.to_string()))?
    }

    /// Render without retry, updating the cache and counters
    async fn attempt(&self, text: &str, voice_id: u32) -> std::result::Result<AudioResource, u32> {
        if let Some(hit) = self.cached(voice_id, text) {
            debug!(voice_id, "Synthesis cache hit");
            return Ok(hit);
        }

        match self.render(text, voice_id).await {
            Ok(resource) => {
                self.record_success(voice_id, text, &resource);
                debug!(voice_id, path = %resource.path().display(), "Synthesized line");
                Ok(resource)
            }
            Err(e) => {
                let failures = self.record_failure();
                warn!(voice_id, failures, error = %e, "Synthesis failed");
                Err(failures)
            }
        }
    }
}

async fn render_job(
    engine: &dyn SynthesisEngine,
    dir: PathBuf,
    text: &str,
    voice_id: u32,
) -> Result<AudioResource> {
    let query = engine.audio_query(text, voice_id).await?;
    let audio = engine.synthesis(&query, voice_id).await?;
    tokio::task::spawn_blocking(move || persist(&dir, &audio))
        .await
        .map_err(|e| SynthesisError::worker_pool(e.to_string()))?
}

/// Write `audio` to a fresh `.wav` file under `dir` and keep it
fn persist(dir: &Path, audio: &Bytes) -> Result<AudioResource> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::Builder::new()
        .prefix("chorus-")
        .suffix(".wav")
        .tempfile_in(dir)?;
    file.write_all(audio)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(AudioResource::new(path))
}

#[async_trait]
impl SpeechSynthesizer for SpeechSynthesisService {
    async fn synthesize(&self, text: &str, voice_id: u32) -> Option<AudioResource> {
        if text.trim().is_empty() {
            return None;
        }

        match self.attempt(text, voice_id).await {
            Ok(resource) => Some(resource),
            Err(failures)
                if failures > FAILURE_THRESHOLD
                    && text.chars().count() > DEGRADED_TEXT_CHARS =>
            {
                let shortened = truncate_chars(text, DEGRADED_TEXT_CHARS);
                info!(voice_id, failures, "Retrying with shortened text");
                self.attempt(&shortened, voice_id).await.ok()
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockSynthesisEngine;
    use serde_json::json;

    fn status_error() -> SynthesisError {
        SynthesisError::Status {
            stage: "audio_query",
            status: 500,
        }
    }

    fn service(engine: MockSynthesisEngine, dir: &Path) -> SpeechSynthesisService {
        SpeechSynthesisService::new(Arc::new(engine), dir, 2)
    }

    fn working_engine(expected_calls: usize) -> MockSynthesisEngine {
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .times(expected_calls)
            .returning(|_, _| Ok(json!({ "accent_phrases": [] })));
        engine
            .expect_synthesis()
            .times(expected_calls)
            .returning(|_, _| Ok(Bytes::from_static(b"RIFF....WAVE")));
        engine
    }

    #[tokio::test]
    async fn test_cache_hit_skips_engine() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(working_engine(1), dir.path());

        let first = service.synthesize("おはよう", 3).await.unwrap();
        let second = service.synthesize("おはよう", 3).await.unwrap();
        assert_eq!(first, second);
        assert!(first.exists());
        assert_eq!(std::fs::read(first.path()).unwrap(), b"RIFF....WAVE");
        assert_eq!(service.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_released_file_is_rendered_again() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(working_engine(2), dir.path());

        let first = service.synthesize("おはよう", 3).await.unwrap();
        first.release().unwrap();
        let second = service.synthesize("おはよう", 3).await.unwrap();
        assert_ne!(first, second);
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_blank_text_is_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(MockSynthesisEngine::new(), dir.path());
        assert!(service.synthesize("   ", 1).await.is_none());
        assert!(service.synthesize("", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_shortened_retry_after_repeated_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .withf(|text, _| text.chars().count() != 53)
            .times(7)
            .returning(|_, _| Err(status_error()));
        engine
            .expect_audio_query()
            .withf(|text, _| text.chars().count() == 53)
            .times(1)
            .returning(|_, _| Ok(json!({})));
        engine
            .expect_synthesis()
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"RIFF")));
        let service = service(engine, dir.path());

        for i in 0..6 {
            assert!(service.synthesize(&format!("失敗{}", i), 1).await.is_none());
        }
        assert_eq!(service.consecutive_failures(), 6);

        let long = "あ".repeat(60);
        let resource = service.synthesize(&long, 1).await;
        assert!(resource.is_some());
        assert_eq!(service.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_no_retry_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .withf(|text, _| text.chars().count() != 53)
            .times(5)
            .returning(|_, _| Err(status_error()));
        engine
            .expect_audio_query()
            .withf(|text, _| text.chars().count() == 53)
            .times(0);
        let service = service(engine, dir.path());

        for i in 0..4 {
            service.synthesize(&format!("失敗{}", i), 1).await;
        }
        assert!(service.synthesize(&"い".repeat(60), 1).await.is_none());
        assert_eq!(service.consecutive_failures(), 5);
    }

    #[tokio::test]
    async fn test_short_text_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .times(7)
            .returning(|_, _| Err(status_error()));
        let service = service(engine, dir.path());

        for i in 0..7 {
            assert!(service.synthesize(&format!("短い{}", i), 1).await.is_none());
        }
        assert_eq!(service.consecutive_failures(), 7);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .withf(|text, _| text == "bad")
            .times(3)
            .returning(|_, _| Err(status_error()));
        engine
            .expect_audio_query()
            .withf(|text, _| text == "good")
            .times(1)
            .returning(|_, _| Ok(json!({})));
        engine
            .expect_synthesis()
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"RIFF")));
        let service = service(engine, dir.path());

        for _ in 0..3 {
            service.synthesize("bad", 2).await;
        }
        assert_eq!(service.consecutive_failures(), 3);
        assert!(service.synthesize("good", 2).await.is_some());
        assert_eq!(service.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_after_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_audio_query()
            .returning(|_, _| Err(SynthesisError::Timeout { stage: "audio_query" }));
        let service = service(engine, dir.path());

        assert!(!service.engine_unreachable());
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(service.synthesize("もしもし", 1).await.is_none());
        assert!(service.engine_unreachable());
    }

    #[tokio::test]
    async fn test_sweep_drops_released_entries() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(working_engine(2), dir.path());

        let a = service.synthesize("一", 1).await.unwrap();
        service.synthesize("二", 1).await.unwrap();
        a.release().unwrap();

        assert_eq!(service.sweep_cache(), 1);
        assert_eq!(service.cached_entries(), 1);
    }
}
