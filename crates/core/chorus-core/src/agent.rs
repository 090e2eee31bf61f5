//! A single autonomous agent identity
//!
//! An [`Agent`] owns one voice connection slot, one persona and one
//! [`AudioDispatchQueue`]. Joins and leaves on the same agent are serialized;
//! everything that speaks goes through [`Agent::generate_and_speak`] or
//! [`Agent::speak`], which end in the dispatch queue.

use crate::conversation::ConversationLog;
use crate::dispatch::{AudioDispatchQueue, AudioJob};
use crate::generation::{limit_reply, GenerationRequest, TextGenerator, HISTORY_WINDOW};
use crate::persona::{Emotion, Persona, PersonaBook};
use crate::synthesis::SpeechSynthesizer;
use crate::transport::{ChannelId, TextChannel, VoiceConnection, VoiceTransport};
use crate::{ChorusError, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators shared by every agent in the pool
#[derive(Clone)]
pub struct AgentServices {
    /// Reply generator
    pub generator: Arc<dyn TextGenerator>,
    /// Text-to-speech
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Persona definitions and emotions
    pub personas: Arc<PersonaBook>,
    /// Shared conversation history
    pub conversation: Arc<ConversationLog>,
}

/// One autonomous identity
pub struct Agent {
    id: usize,
    transport: Arc<dyn VoiceTransport>,
    text: Option<Arc<dyn TextChannel>>,
    services: AgentServices,
    persona: RwLock<Option<Arc<Persona>>>,
    connection: Mutex<Option<Arc<dyn VoiceConnection>>>,
    membership: tokio::sync::Mutex<()>,
    queue: AudioDispatchQueue,
    last_voice_remark: Mutex<Instant>,
    last_text_remark: Mutex<Instant>,
    cancel: CancellationToken,
}

impl Agent {
    /// Create a disconnected agent with no persona
    ///
    /// Both remark cooldowns start counting from construction.
    pub fn new(id: usize, transport: Arc<dyn VoiceTransport>, services: AgentServices) -> Self {
        let created = Instant::now();
        Self {
            id,
            transport,
            text: None,
            services,
            persona: RwLock::new(None),
            connection: Mutex::new(None),
            membership: tokio::sync::Mutex::new(()),
            queue: AudioDispatchQueue::new(),
            last_voice_remark: Mutex::new(created),
            last_text_remark: Mutex::new(created),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a text channel for remarks and mention replies
    pub fn with_text_channel(mut self, text: Arc<dyn TextChannel>) -> Self {
        self.text = Some(text);
        self
    }

    /// Tie this agent's background tasks to a parent token
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Pool index
    pub fn id(&self) -> usize {
        self.id
    }

    /// Assigned persona, if any
    pub fn persona(&self) -> Option<Arc<Persona>> {
        self.persona.read().clone()
    }

    /// Assign a persona
    pub fn set_persona(&self, persona: Arc<Persona>) {
        info!(agent_id = self.id, persona = %persona.name, "Persona assigned");
        *self.persona.write() = Some(persona);
    }

    /// Persona definitions and emotion state
    pub fn personas(&self) -> &Arc<PersonaBook> {
        &self.services.personas
    }

    /// Token cancelled when this agent is torn down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Text channel, if one is attached
    pub fn text_channel(&self) -> Option<&Arc<dyn TextChannel>> {
        self.text.as_ref()
    }

    /// Current connection handle, connected or not
    pub fn current_connection(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.connection.lock().clone()
    }

    /// Whether the agent holds a live voice connection
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Channel of the live connection
    pub fn connected_channel(&self) -> Option<ChannelId> {
        self.connection
            .lock()
            .as_ref()
            .filter(|c| c.is_connected())
            .map(|c| c.channel())
    }

    /// Whether audio is currently playing
    pub fn is_speaking(&self) -> bool {
        self.queue.is_speaking()
    }

    /// Join `channel`, leaving any other channel first
    pub async fn join(&self, channel: ChannelId) -> Result<()> {
        let _membership = self.membership.lock().await;

        let existing = self.connection.lock().clone();
        if let Some(conn) = existing {
            if conn.channel() == channel && conn.is_connected() {
                debug!(agent_id = self.id, channel_id = channel, "Already in channel");
                return Ok(());
            }
            self.connection.lock().take();
            if let Err(e) = conn.disconnect().await {
                warn!(agent_id = self.id, error = %e, "Error leaving previous channel");
            }
        }

        let conn = self.transport.connect(channel).await?;
        *self.connection.lock() = Some(conn);
        info!(agent_id = self.id, channel_id = channel, "Joined voice channel");
        Ok(())
    }

    /// Leave the current channel. Returns whether a connection was closed.
    pub async fn leave(&self) -> Result<bool> {
        let _membership = self.membership.lock().await;

        let conn = self.connection.lock().take();
        match conn {
            Some(conn) => {
                let channel = conn.channel();
                conn.disconnect().await?;
                info!(agent_id = self.id, channel_id = channel, "Left voice channel");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Generate one in-character line and record it
    ///
    /// The reply is capped, appended to the conversation log and used to
    /// update the persona's emotion.
    pub async fn compose(&self, activity: Option<&str>) -> Option<String> {
        let Some(persona) = self.persona() else {
            warn!(agent_id = self.id, "No persona assigned, cannot compose");
            return None;
        };

        let request = GenerationRequest {
            persona: persona.clone(),
            emotion: self.services.personas.emotion(&persona.id),
            relations: self.services.personas.relations_of(&persona.id),
            activity: activity.map(str::to_string),
            history: self.services.conversation.recent(HISTORY_WINDOW),
        };
        let reply = limit_reply(&self.services.generator.generate(request).await);
        if reply.is_empty() {
            warn!(agent_id = self.id, "Generator returned an empty reply");
            return None;
        }

        self.services.conversation.record(&persona.name, &reply);
        let emotion = Emotion::from_reply(&reply);
        self.services.personas.set_emotion(&persona.id, emotion);
        debug!(agent_id = self.id, emotion = %emotion, reply = %reply, "Composed reply");
        Some(reply)
    }

    /// Synthesize `text` and queue it. Returns whether a job was queued.
    pub async fn speak(&self, text: &str) -> bool {
        let Some(persona) = self.persona() else {
            warn!(agent_id = self.id, "No persona assigned, cannot speak");
            return false;
        };

        let voice_id = persona.voicevox_speaker_id;
        match self.services.synthesizer.synthesize(text, voice_id).await {
            Some(resource) => {
                if self.cancel.is_cancelled() {
                    if let Err(e) = resource.release() {
                        warn!(
                            agent_id = self.id,
                            path = %resource.path().display(),
                            error = %e,
                            "Failed to delete unused audio"
                        );
                    }
                    return false;
                }
                self.queue.enqueue(AudioJob {
                    text: text.to_string(),
                    voice_id,
                    resource,
                })
            }
            None => {
                warn!(agent_id = self.id, voice_id, "No audio produced, skipping utterance");
                false
            }
        }
    }

    /// Compose a line and speak it
    pub async fn generate_and_speak(&self, activity: Option<&str>) -> bool {
        match self.compose(activity).await {
            Some(text) => self.speak(&text).await,
            None => false,
        }
    }

    /// Compose a line and post it to a text channel
    ///
    /// Returns the undecorated reply.
    pub async fn post_remark(&self, channel: ChannelId, activity: Option<&str>) -> Result<String> {
        let text_channel = self
            .text
            .clone()
            .ok_or_else(|| ChorusError::transport("No text channel attached"))?;
        let persona = self
            .persona()
            .ok_or_else(|| ChorusError::persona("No persona assigned"))?;
        let reply = self
            .compose(activity)
            .await
            .ok_or_else(|| ChorusError::generation("Nothing to say"))?;

        text_channel
            .post(channel, &persona, &persona.decorate(&reply))
            .await?;
        Ok(reply)
    }

    /// Answer a message that mentioned this agent
    ///
    /// The reply is posted to `channel` and, when connected, also spoken.
    pub async fn respond_to_mention(
        &self,
        channel: ChannelId,
        author: &str,
        message: &str,
        activity: Option<&str>,
    ) -> Result<()> {
        if !message.trim().is_empty() {
            self.services.conversation.record(author, message.trim());
        }

        let reply = self.post_remark(channel, activity).await?;
        if self.is_connected() {
            self.speak(&reply).await;
        }
        Ok(())
    }

    /// Whether the voice-remark cooldown has elapsed
    pub fn voice_remark_due(&self, now: Instant, cooldown: Duration) -> bool {
        Self::due(&self.last_voice_remark, now, cooldown)
    }

    /// Record a voice remark at `now`
    pub fn mark_voice_remark(&self, now: Instant) {
        *self.last_voice_remark.lock() = now;
    }

    /// Whether the text-remark cooldown has elapsed
    pub fn text_remark_due(&self, now: Instant, cooldown: Duration) -> bool {
        Self::due(&self.last_text_remark, now, cooldown)
    }

    /// Record a text remark at `now`
    pub fn mark_text_remark(&self, now: Instant) {
        *self.last_text_remark.lock() = now;
    }

    fn due(slot: &Mutex<Instant>, now: Instant, cooldown: Duration) -> bool {
        now.saturating_duration_since(*slot.lock()) >= cooldown
    }

    /// Start this agent's playback loop
    pub fn spawn_dispatch(self: &Arc<Self>) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = agent.cancel.clone();
            agent
                .queue
                .run(agent.id, || agent.current_connection(), cancel)
                .await;
        })
    }

    /// Stop background tasks and leave voice
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Err(e) = self.leave().await {
            warn!(agent_id = self.id, error = %e, "Error leaving voice during shutdown");
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("persona", &self.persona().map(|p| p.id.clone()))
            .field("channel", &self.connected_channel())
            .field("speaking", &self.is_speaking())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[tokio::test]
    async fn test_join_is_noop_for_same_channel() {
        let transport = FakeTransport::new();
        let agent = test_agent(0, &transport);

        agent.join(10).await.unwrap();
        agent.join(10).await.unwrap();
        assert_eq!(transport.connects(), vec![10]);
        assert_eq!(agent.connected_channel(), Some(10));
    }

    #[tokio::test]
    async fn test_join_other_channel_disconnects_first() {
        let transport = FakeTransport::new();
        let agent = test_agent(0, &transport);

        agent.join(10).await.unwrap();
        agent.join(20).await.unwrap();
        assert_eq!(transport.connects(), vec![10, 20]);
        assert_eq!(transport.disconnects(), vec![10]);
        assert_eq!(agent.connected_channel(), Some(20));
    }

    #[tokio::test]
    async fn test_leave() {
        let transport = FakeTransport::new();
        let agent = test_agent(0, &transport);

        assert!(!agent.leave().await.unwrap());
        agent.join(10).await.unwrap();
        assert!(agent.leave().await.unwrap());
        assert!(!agent.is_connected());
        assert_eq!(transport.disconnects(), vec![10]);
    }

    #[tokio::test]
    async fn test_concurrent_joins_connect_once() {
        let transport = FakeTransport::new();
        let agent = Arc::new(test_agent(0, &transport));

        let a = tokio::spawn({
            let agent = agent.clone();
            async move { agent.join(10).await }
        });
        let b = tokio::spawn({
            let agent = agent.clone();
            async move { agent.join(10).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(transport.connects(), vec![10]);
    }

    #[tokio::test]
    async fn test_generate_and_speak_records_and_queues() {
        let transport = FakeTransport::new();
        let harness = Harness::new();
        harness.generator.reply("やったー！今日も遊ぼう");
        let agent = harness.agent(0, &transport);

        assert!(agent.generate_and_speak(Some("Minecraft")).await);

        let requests = harness.generator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].activity.as_deref(), Some("Minecraft"));
        let others: Vec<&str> = requests[0].relations.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(others, vec!["p1-name", "p2-name"]);
        assert_eq!(harness.synthesizer.calls(), vec![("やったー！今日も遊ぼう".to_string(), 1)]);
        assert_eq!(harness.conversation.len(), 1);
        assert_eq!(harness.personas.emotion("p0"), Emotion::Happy);
    }

    #[tokio::test]
    async fn test_speak_skips_when_synthesis_fails() {
        let transport = FakeTransport::new();
        let harness = Harness::new();
        harness.synthesizer.fail();
        let agent = harness.agent(0, &transport);

        assert!(!agent.speak("hello").await);
    }

    #[tokio::test]
    async fn test_speak_without_persona() {
        let transport = FakeTransport::new();
        let harness = Harness::new();
        let agent = Agent::new(0, transport.clone(), harness.services());
        assert!(!agent.generate_and_speak(None).await);
        assert!(harness.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_post_remark_uses_text_channel() {
        let transport = FakeTransport::new();
        let harness = Harness::new();
        harness.generator.reply("テキストだよ");
        let text = FakeTextChannel::new();
        let agent = harness.agent(0, &transport).with_text_channel(text.clone());

        let posted = agent.post_remark(99, None).await.unwrap();
        assert!(posted.starts_with("テキストだよ"));
        let posts = text.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, 99);
        assert_eq!(posts[0].1, "p0");
    }

    #[tokio::test]
    async fn test_mention_reply_speaks_when_connected() {
        let transport = FakeTransport::new();
        let harness = Harness::new();
        harness.generator.reply("呼んだ？");
        let text = FakeTextChannel::new();
        let agent = harness.agent(0, &transport).with_text_channel(text.clone());

        agent.respond_to_mention(5, "user", "やあ", None).await.unwrap();
        assert!(harness.synthesizer.calls().is_empty());

        agent.join(10).await.unwrap();
        agent.respond_to_mention(5, "user", "やあ", None).await.unwrap();
        assert_eq!(harness.synthesizer.calls().len(), 1);
        assert_eq!(text.posts().len(), 2);
        // user message + reply, twice
        assert_eq!(harness.conversation.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldowns_start_at_construction() {
        let transport = FakeTransport::new();
        let agent = test_agent(0, &transport);
        let created = Instant::now();

        assert!(!agent.voice_remark_due(created, Duration::from_secs(10)));
        assert!(!agent.text_remark_due(created, Duration::from_secs(300)));
        assert!(!agent.text_remark_due(created + Duration::from_secs(299), Duration::from_secs(300)));
        assert!(agent.text_remark_due(created + Duration::from_secs(300), Duration::from_secs(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldowns() {
        let transport = FakeTransport::new();
        let agent = test_agent(0, &transport);
        let now = Instant::now() + Duration::from_secs(60);

        assert!(agent.voice_remark_due(now, Duration::from_secs(10)));
        agent.mark_voice_remark(now);
        assert!(!agent.voice_remark_due(now + Duration::from_secs(9), Duration::from_secs(10)));
        assert!(agent.voice_remark_due(now + Duration::from_secs(10), Duration::from_secs(10)));
    }
}
