//! `generateContent` client

use crate::config::GeminiConfig;
use crate::prompt::build_prompt;
use async_trait::async_trait;
use chorus_core::{limit_reply, ChorusError, GenerationRequest, Persona, Result, TextGenerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Extract the first candidate's text from a `generateContent` response
pub fn parse_response(body: &str) -> Result<String> {
    let response: GenerateResponse = serde_json::from_str(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ChorusError::generation("Response contained no text"));
    }
    Ok(text.to_string())
}

/// Gemini-backed [`TextGenerator`]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChorusError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Model in use
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Send `prompt` and return the raw reply text
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChorusError::generation(format!("Request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChorusError::generation(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(ChorusError::generation(format!(
                "Gemini returned HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }
        parse_response(&text)
    }
}

fn fallback(persona: &Persona) -> String {
    match persona.random_phrase() {
        Some(phrase) => phrase.to_string(),
        None => {
            warn!(persona = %persona.id, "No fallback phrases configured");
            String::new()
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> String {
        let prompt = build_prompt(&request);
        match self.complete(&prompt).await {
            Ok(reply) => {
                debug!(persona = %request.persona.id, chars = reply.chars().count(), "Gemini reply");
                limit_reply(&reply)
            }
            Err(e) => {
                error!(persona = %request.persona.id, error = %e, "Gemini API error, using fallback phrase");
                fallback(&request.persona)
            }
        }
    }
}
