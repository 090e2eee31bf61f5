//! Songbird-backed voice transport
//!
//! Each agent runs its own bot user and therefore its own [`Songbird`]
//! instance. A [`DiscordConnection`] wraps one joined call; playback
//! completion is reported through songbird track events.

use async_trait::async_trait;
use chorus_core::{
    ChannelId, ChorusError, PlaybackCompletion, PlaybackOutcome, PlaybackSignal, Result,
    VoiceConnection, VoiceTransport,
};
use parking_lot::Mutex;
use serenity::http::Http;
use serenity::model::id::{ChannelId as SerenityChannelId, GuildId};
use songbird::error::JoinError;
use songbird::input::{File as SongbirdFile, Input};
use songbird::{Call, CoreEvent, Event, EventContext, EventHandler, Songbird, TrackEvent};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Joins voice channels as one bot user
pub struct DiscordTransport {
    agent_id: usize,
    http: Arc<Http>,
    songbird: Arc<Songbird>,
    guilds: Mutex<HashMap<ChannelId, GuildId>>,
}

impl DiscordTransport {
    /// Transport for the bot authenticated by `http`
    pub fn new(agent_id: usize, http: Arc<Http>, songbird: Arc<Songbird>) -> Self {
        Self {
            agent_id,
            http,
            songbird,
            guilds: Mutex::new(HashMap::new()),
        }
    }

    async fn guild_for(&self, channel: ChannelId) -> Result<GuildId> {
        let known = self.guilds.lock().get(&channel).copied();
        if let Some(guild) = known {
            return Ok(guild);
        }

        let channel_id = serenity_channel(channel)?;
        let resolved = self.http.get_channel(channel_id).await.map_err(|e| {
            ChorusError::transport(format!("Failed to resolve channel {}: {}", channel, e))
        })?;
        let guild = resolved.guild().map(|c| c.guild_id).ok_or_else(|| {
            ChorusError::transport(format!("Channel {} is not a guild channel", channel))
        })?;

        self.guilds.lock().insert(channel, guild);
        Ok(guild)
    }
}

fn serenity_channel(channel: ChannelId) -> Result<SerenityChannelId> {
    if channel == 0 {
        return Err(ChorusError::transport("Channel id 0 is not valid"));
    }
    Ok(SerenityChannelId::new(channel))
}

#[async_trait]
impl VoiceTransport for DiscordTransport {
    async fn connect(&self, channel: ChannelId) -> Result<Arc<dyn VoiceConnection>> {
        let guild = self.guild_for(channel).await?;
        let call = self
            .songbird
            .join(guild, serenity_channel(channel)?)
            .await
            .map_err(|e| ChorusError::transport(format!("Voice join failed: {}", e)))?;

        let connected = Arc::new(AtomicBool::new(true));
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectWatcher {
                    agent_id: self.agent_id,
                    channel,
                    connected: connected.clone(),
                },
            );
        }

        info!(
            agent_id = self.agent_id,
            guild_id = %guild.get(),
            channel_id = channel,
            "Voice call established"
        );
        Ok(Arc::new(DiscordConnection {
            agent_id: self.agent_id,
            songbird: self.songbird.clone(),
            guild,
            channel,
            call,
            connected,
        }))
    }
}

/// One joined voice call
pub struct DiscordConnection {
    agent_id: usize,
    songbird: Arc<Songbird>,
    guild: GuildId,
    channel: ChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceConnection for DiscordConnection {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.songbird.get(self.guild).is_some()
    }

    async fn play(&self, resource: &Path) -> Result<PlaybackCompletion> {
        if !self.is_connected() {
            return Err(ChorusError::playback("Voice connection is closed"));
        }

        let input: Input = SongbirdFile::new(resource.to_path_buf()).into();
        let track = {
            let mut handler = self.call.lock().await;
            handler.play_input(input)
        };

        let (signal, completion) = PlaybackCompletion::pair();
        for (event, failed) in [(TrackEvent::End, false), (TrackEvent::Error, true)] {
            let notifier = TrackNotifier {
                signal: signal.clone(),
                failed,
            };
            if let Err(e) = track.add_event(Event::Track(event), notifier) {
                warn!(agent_id = self.agent_id, error = %e, "Track ended before events were attached");
                signal.finish(PlaybackOutcome::Failed(e.to_string()));
                break;
            }
        }

        debug!(agent_id = self.agent_id, path = %resource.display(), "Track started");
        Ok(completion)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        match self.songbird.remove(self.guild).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(ChorusError::transport(format!("Voice leave failed: {}", e))),
        }
    }
}

/// Resolves a [`PlaybackCompletion`] when its track ends or fails
struct TrackNotifier {
    signal: PlaybackSignal,
    failed: bool,
}

#[async_trait]
impl EventHandler for TrackNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let outcome = if self.failed {
            PlaybackOutcome::Failed("track error".to_string())
        } else {
            PlaybackOutcome::Finished
        };
        self.signal.finish(outcome);
        Some(Event::Cancel)
    }
}

/// Marks the connection dead when the voice driver drops
struct DisconnectWatcher {
    agent_id: usize,
    channel: ChannelId,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl EventHandler for DisconnectWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(agent_id = self.agent_id, channel_id = self.channel, "Voice driver disconnected");
        }
        None
    }
}
