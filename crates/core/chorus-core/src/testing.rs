//! In-memory collaborators for exercising agents without a chat platform
//!
//! These fakes record every call so tests can assert on connect counts,
//! posted remarks and synthesized lines.

use crate::agent::{Agent, AgentServices};
use crate::conversation::ConversationLog;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::persona::{Persona, PersonaBook};
use crate::presence::{PresenceSnapshot, StatusSource};
use crate::synthesis::{AudioResource, SpeechSynthesizer};
use crate::transport::{
    ChannelId, PlaybackCompletion, PlaybackOutcome, TextChannel, VoiceConnection, VoiceTransport,
};
use crate::{ChorusError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A persona with predictable fields
pub fn sample_persona(id: &str, speaker: u32) -> Persona {
    Persona {
        id: id.to_string(),
        name: format!("{}-name", id),
        personality: "明るい".to_string(),
        relationship: "友達".to_string(),
        voicevox_speaker_id: speaker,
        phrases: vec![format!("{}のフレーズ", id)],
        emoji: vec!["✨".to_string()],
        color: "FF69B4".to_string(),
        relations: HashMap::new(),
    }
}

/// Transport that hands out [`FakeConnection`]s
#[derive(Default)]
pub struct FakeTransport {
    connects: Mutex<Vec<ChannelId>>,
    disconnects: Arc<Mutex<Vec<ChannelId>>>,
    played: Arc<Mutex<Vec<PathBuf>>>,
    fail: AtomicBool,
    connect_delay: Mutex<Duration>,
    play_duration: Arc<Mutex<Duration>>,
}

impl FakeTransport {
    /// Create a transport that always connects
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent connect fail
    pub fn fail_connects(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Let connects succeed again
    pub fn restore_connects(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }

    /// Delay each connect, to widen race windows
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Make each playback take `duration` before completing
    pub fn set_play_duration(&self, duration: Duration) {
        *self.play_duration.lock() = duration;
    }

    /// Channels connected to, in order
    pub fn connects(&self) -> Vec<ChannelId> {
        self.connects.lock().clone()
    }

    /// Channels disconnected from, in order
    pub fn disconnects(&self) -> Vec<ChannelId> {
        self.disconnects.lock().clone()
    }

    /// Files played on any connection
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().clone()
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, channel: ChannelId) -> Result<Arc<dyn VoiceConnection>> {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChorusError::transport("connect refused"));
        }
        self.connects.lock().push(channel);
        Ok(Arc::new(FakeConnection {
            channel,
            connected: AtomicBool::new(true),
            disconnects: self.disconnects.clone(),
            played: self.played.clone(),
            play_duration: self.play_duration.clone(),
        }))
    }
}

/// Connection whose playback completes after a configurable delay
pub struct FakeConnection {
    channel: ChannelId,
    connected: AtomicBool,
    disconnects: Arc<Mutex<Vec<ChannelId>>>,
    played: Arc<Mutex<Vec<PathBuf>>>,
    play_duration: Arc<Mutex<Duration>>,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn play(&self, resource: &Path) -> Result<PlaybackCompletion> {
        self.played.lock().push(resource.to_path_buf());
        let duration = *self.play_duration.lock();
        if duration.is_zero() {
            return Ok(PlaybackCompletion::resolved(PlaybackOutcome::Finished));
        }
        let (signal, completion) = PlaybackCompletion::pair();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            signal.finish(PlaybackOutcome::Finished);
        });
        Ok(completion)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.lock().push(self.channel);
        Ok(())
    }
}

/// Records posted remarks as `(channel, persona id, text)`
#[derive(Default)]
pub struct FakeTextChannel {
    posts: Mutex<Vec<(ChannelId, String, String)>>,
}

impl FakeTextChannel {
    /// Create an empty recorder
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything posted so far
    pub fn posts(&self) -> Vec<(ChannelId, String, String)> {
        self.posts.lock().clone()
    }
}

#[async_trait]
impl TextChannel for FakeTextChannel {
    async fn post(&self, channel: ChannelId, persona: &Persona, text: &str) -> Result<()> {
        self.posts
            .lock()
            .push((channel, persona.id.clone(), text.to_string()));
        Ok(())
    }
}

/// Generator returning a fixed reply
pub struct FakeGenerator {
    reply: Mutex<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self {
            reply: Mutex::new("こんにちは".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGenerator {
    /// Set the reply returned from now on
    pub fn reply(&self, text: &str) {
        *self.reply.lock() = text.to_string();
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: GenerationRequest) -> String {
        self.requests.lock().push(request);
        self.reply.lock().clone()
    }
}

/// Synthesizer writing small placeholder files
pub struct FakeSynthesizer {
    dir: PathBuf,
    calls: Mutex<Vec<(String, u32)>>,
    fail: AtomicBool,
    counter: AtomicU64,
}

impl Default for FakeSynthesizer {
    fn default() -> Self {
        static INSTANCE: AtomicU64 = AtomicU64::new(0);
        let dir = std::env::temp_dir().join(format!(
            "chorus-fake-synth-{}-{}",
            std::process::id(),
            INSTANCE.fetch_add(1, Ordering::SeqCst)
        ));
        Self {
            dir,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }
}

impl FakeSynthesizer {
    /// Make every subsequent synthesis return `None`
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// `(text, voice id)` pairs received so far
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: u32) -> Option<AudioResource> {
        self.calls.lock().push((text.to_string(), voice_id));
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        std::fs::create_dir_all(&self.dir).ok()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{}-{}.wav", voice_id, n));
        std::fs::write(&path, b"RIFF").ok()?;
        Some(AudioResource::new(path))
    }
}

/// Status source returning whatever was last set
#[derive(Default)]
pub struct FakeStatusSource {
    snapshot: Mutex<Option<PresenceSnapshot>>,
    observations: AtomicU64,
}

impl FakeStatusSource {
    /// Create a source that cannot resolve the user yet
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the next snapshot (`None` = user unresolved)
    pub fn set(&self, snapshot: Option<PresenceSnapshot>) {
        *self.snapshot.lock() = snapshot;
    }

    /// Number of observations made
    pub fn observations(&self) -> u64 {
        self.observations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeStatusSource {
    async fn observe(&self, _user_id: u64) -> Option<PresenceSnapshot> {
        self.observations.fetch_add(1, Ordering::SeqCst);
        self.snapshot.lock().clone()
    }
}

/// Bundle of fakes shared by the agents under test
pub struct Harness {
    /// Reply generator
    pub generator: Arc<FakeGenerator>,
    /// Speech synthesizer
    pub synthesizer: Arc<FakeSynthesizer>,
    /// Three personas, `p0`..`p2`, with speaker ids 1..3
    pub personas: Arc<PersonaBook>,
    /// Shared conversation log
    pub conversation: Arc<ConversationLog>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Build a harness with three personas
    pub fn new() -> Self {
        let personas = (0..3)
            .map(|i| sample_persona(&format!("p{}", i), i + 1))
            .collect();
        Self {
            generator: Arc::new(FakeGenerator::default()),
            synthesizer: Arc::new(FakeSynthesizer::default()),
            personas: Arc::new(PersonaBook::unchecked(personas)),
            conversation: Arc::new(ConversationLog::default()),
        }
    }

    /// Services wired to the fakes
    pub fn services(&self) -> AgentServices {
        AgentServices {
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
            personas: self.personas.clone(),
            conversation: self.conversation.clone(),
        }
    }

    /// Agent `id` with persona `p{id % 3}` already assigned
    pub fn agent(&self, id: usize, transport: &Arc<FakeTransport>) -> Agent {
        let agent = Agent::new(id, transport.clone(), self.services());
        let personas = self.personas.personas();
        agent.set_persona(personas[id % personas.len()].clone());
        agent
    }
}

/// An agent on a fresh [`Harness`]
pub fn test_agent(id: usize, transport: &Arc<FakeTransport>) -> Agent {
    Harness::new().agent(id, transport)
}
