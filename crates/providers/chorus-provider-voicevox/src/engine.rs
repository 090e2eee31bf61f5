//! VOICEVOX HTTP API
//!
//! Two-step synthesis: `POST /audio_query` turns text into a query object
//! describing phonemes and prosody, `POST /synthesis` renders that object
//! to WAV bytes.

use crate::config::VoiceVoxConfig;
use crate::error::{Result, SynthesisError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Output sample rate requested from the engine
pub const OUTPUT_SAMPLING_RATE: u32 = 24_000;

/// Silence padding before and after each utterance, in seconds
pub const PHONEME_PADDING: f64 = 0.1;

/// The two engine calls a synthesis job needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Build and tune a query object for `text`
    async fn audio_query(&self, text: &str, speaker: u32) -> Result<Value>;

    /// Render a query object to WAV bytes
    async fn synthesis(&self, query: &Value, speaker: u32) -> Result<Bytes>;
}

/// reqwest-backed engine client
pub struct VoiceVoxEngine {
    client: Client,
    base_url: String,
    speed_scale: f64,
    query_timeout: Duration,
    synthesis_timeout: Duration,
}

impl VoiceVoxEngine {
    /// Create a client for the engine at `config.engine_url`
    pub fn new(config: &VoiceVoxConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.workers)
            .build()
            .map_err(|e| SynthesisError::http("client", e))?;

        Ok(Self {
            client,
            base_url: config.engine_url.clone(),
            speed_scale: config.speed_scale,
            query_timeout: config.query_timeout,
            synthesis_timeout: config.synthesis_timeout,
        })
    }

    /// Engine version string, used as a startup health check
    pub async fn version(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/version", self.base_url))
            .timeout(self.query_timeout)
            .send()
            .await
            .map_err(|e| SynthesisError::http("version", e))?;
        let response = check_status("version", response)?;
        let body = response
            .text()
            .await
            .map_err(|e| SynthesisError::http("version", e))?;
        Ok(body.trim().trim_matches('"').to_string())
    }
}

/// Apply the fixed output settings to a query object
pub fn tune_query(query: &mut Value, speed_scale: f64) {
    if let Some(fields) = query.as_object_mut() {
        fields.insert("speedScale".into(), json!(speed_scale));
        fields.insert("outputSamplingRate".into(), json!(OUTPUT_SAMPLING_RATE));
        fields.insert("outputStereo".into(), json!(false));
        fields.insert("prePhonemeLength".into(), json!(PHONEME_PADDING));
        fields.insert("postPhonemeLength".into(), json!(PHONEME_PADDING));
    }
}

fn check_status(stage: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SynthesisError::Status {
            stage,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl SynthesisEngine for VoiceVoxEngine {
    async fn audio_query(&self, text: &str, speaker: u32) -> Result<Value> {
        let speaker = speaker.to_string();
        let response = self
            .client
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .timeout(self.query_timeout)
            .send()
            .await
            .map_err(|e| SynthesisError::http("audio_query", e))?;
        let response = check_status("audio_query", response)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::http("audio_query", e))?;
        let mut query: Value = serde_json::from_slice(&body)?;
        tune_query(&mut query, self.speed_scale);
        Ok(query)
    }

    async fn synthesis(&self, query: &Value, speaker: u32) -> Result<Bytes> {
        let speaker = speaker.to_string();
        let response = self
            .client
            .post(format!("{}/synthesis", self.base_url))
            .query(&[
                ("speaker", speaker.as_str()),
                ("enable_interrogative_upspeak", "true"),
            ])
            .json(query)
            .timeout(self.synthesis_timeout)
            .send()
            .await
            .map_err(|e| SynthesisError::http("synthesis", e))?;
        let response = check_status("synthesis", response)?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::http("synthesis", e))?;
        debug!(speaker = %speaker, bytes = audio.len(), "Engine rendered audio");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tune_query_overrides_output_fields() {
        let mut query = json!({
            "accent_phrases": [],
            "speedScale": 1.0,
            "outputSamplingRate": 48000,
            "outputStereo": true,
        });
        tune_query(&mut query, 1.1);

        assert_eq!(query["speedScale"], json!(1.1));
        assert_eq!(query["outputSamplingRate"], json!(24000));
        assert_eq!(query["outputStereo"], json!(false));
        assert_eq!(query["prePhonemeLength"], json!(0.1));
        assert_eq!(query["postPhonemeLength"], json!(0.1));
        assert_eq!(query["accent_phrases"], json!([]));
    }

    #[test]
    fn test_tune_query_ignores_non_objects() {
        let mut query = json!("not an object");
        tune_query(&mut query, 1.1);
        assert_eq!(query, json!("not an object"));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_http_error() {
        let config = VoiceVoxConfig {
            engine_url: "http://127.0.0.1:9".to_string(),
            query_timeout: Duration::from_secs(2),
            ..VoiceVoxConfig::default()
        };
        let engine = VoiceVoxEngine::new(&config).unwrap();

        let err = engine.audio_query("こんにちは", 1).await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::Http { stage: "audio_query", .. } | SynthesisError::Timeout { .. }
        ));
        assert!(engine.version().await.is_err());
    }
}
