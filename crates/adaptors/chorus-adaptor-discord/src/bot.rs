//! Gateway client per agent

use chorus_core::{Agent, AgentPool, ChorusError, Result, SharedPresence};
use serenity::async_trait;
use serenity::cache::{Cache, Settings as CacheSettings};
use serenity::gateway::ShardManager;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::UserId;
use serenity::prelude::*;
use songbird::serenity::SerenityInit;
use songbird::Songbird;
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Intents every agent needs; `privileged` adds presences, members and
/// message content
pub fn gateway_intents(privileged: bool) -> GatewayIntents {
    let mut intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES | GatewayIntents::GUILD_MESSAGES;
    if privileged {
        intents |= GatewayIntents::GUILD_PRESENCES
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::MESSAGE_CONTENT;
    }
    intents
}

/// Remove `<@id>` and `<@!id>` mentions of `bot_id` from `content`
pub fn strip_mention(content: &str, bot_id: u64) -> String {
    content
        .replace(&format!("<@{}>", bot_id), "")
        .replace(&format!("<@!{}>", bot_id), "")
        .trim()
        .to_string()
}

struct AgentHandler {
    agent: Arc<Agent>,
    pool: Arc<AgentPool>,
    presence: SharedPresence,
    bot_user: OnceLock<UserId>,
    ready_tx: parking_lot::Mutex<Option<oneshot::Sender<Arc<Cache>>>>,
}

#[async_trait]
impl EventHandler for AgentHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let _ = self.bot_user.set(ready.user.id);
        let persona = self.pool.assign_persona(&self.agent);
        info!(
            agent_id = self.agent.id(),
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            persona = ?persona.as_ref().map(|p| p.name.as_str()),
            "Agent bot ready"
        );

        let ready_tx = self.ready_tx.lock().take();
        if let Some(tx) = ready_tx {
            let _ = tx.send(ctx.cache.clone());
        }
    }

    async fn message(&self, _ctx: Context, msg: DiscordMessage) {
        if msg.author.bot {
            return;
        }
        let Some(bot_id) = self.bot_user.get().copied() else {
            return;
        };
        if !msg.mentions_user_id(bot_id) {
            return;
        }

        let content = strip_mention(&msg.content, bot_id.get());
        let activity = self.presence.read().activity_name.clone();
        debug!(agent_id = self.agent.id(), author = %msg.author.name, "Mentioned");

        if let Err(e) = self
            .agent
            .respond_to_mention(
                msg.channel_id.get(),
                &msg.author.name,
                &content,
                activity.as_deref(),
            )
            .await
        {
            warn!(agent_id = self.agent.id(), error = %e, "Failed to answer mention");
        }
    }
}

/// A running gateway client
pub struct BotHandle {
    /// Resolves with the client's cache on the first ready event
    pub ready: oneshot::Receiver<Arc<Cache>>,
    /// Used to shut the client down
    pub shard_manager: Arc<ShardManager>,
    /// The client task; finishes once the shard manager shuts down
    pub task: JoinHandle<()>,
}

/// Build and start the gateway client for `agent`
///
/// `songbird` must be the instance the agent's transport joins calls with.
pub async fn start_agent_bot(
    token: &str,
    intents: GatewayIntents,
    agent: Arc<Agent>,
    pool: Arc<AgentPool>,
    presence: SharedPresence,
    songbird: Arc<Songbird>,
) -> Result<BotHandle> {
    let agent_id = agent.id();
    let (ready_tx, ready) = oneshot::channel();
    let handler = AgentHandler {
        agent,
        pool,
        presence,
        bot_user: OnceLock::new(),
        ready_tx: parking_lot::Mutex::new(Some(ready_tx)),
    };

    let mut cache_settings = CacheSettings::default();
    cache_settings.cache_guilds = true;
    cache_settings.cache_channels = true;
    cache_settings.cache_users = true;

    let mut client = Client::builder(token, intents)
        .event_handler(handler)
        .cache_settings(cache_settings)
        .register_songbird_with(songbird)
        .await
        .map_err(|e| ChorusError::config(format!("Failed to create Discord client: {}", e)))?;

    let shard_manager = client.shard_manager.clone();
    let task = tokio::spawn(async move {
        if let Err(why) = client.start().await {
            error!(agent_id, error = %format!("{:?}", why), "Discord client error");
        }
    });

    info!(agent_id, "Discord client started");
    Ok(BotHandle {
        ready,
        shard_manager,
        task,
    })
}
