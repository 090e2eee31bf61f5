//! Chorus bot entry point
//!
//! Reads configuration from the environment (and `.env`), starts one
//! gateway client per configured token, then runs the presence monitor,
//! the dispatch loops and the scheduling loops until Ctrl-C.

use anyhow::Context;
use chorus_adaptor_discord::{
    gateway_intents, start_agent_bot, DiscordStatusSource, DiscordTextChannel, DiscordTransport,
};
use chorus_core::{
    load_env, Agent, AgentPool, AgentServices, ChorusConfig, ConversationLog, PersonaBook,
    PresenceMonitor, SchedulingPolicy, SchedulingSettings, SharedPresence,
};
use chorus_provider_gemini::{GeminiClient, GeminiConfig};
use chorus_provider_voicevox::{SpeechSynthesisService, VoiceVoxConfig, VoiceVoxEngine};
use serenity::gateway::ShardManager;
use serenity::http::Http;
use songbird::Songbird;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = load_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chorus=info".parse()?),
        )
        .init();

    if let Err(e) = run(env_loaded).await {
        error!(error = %e, "Chorus failed to start");
        return Err(e);
    }
    Ok(())
}

async fn run(env_loaded: chorus_core::Result<()>) -> anyhow::Result<()> {
    env_loaded.context("Failed to load .env")?;

    let config = ChorusConfig::from_env().context("Invalid configuration")?;
    let voicevox_config = VoiceVoxConfig::from_env().context("Invalid VOICEVOX configuration")?;
    let gemini_config = GeminiConfig::from_env().context("Invalid Gemini configuration")?;
    info!(config = ?config, "Configuration loaded");

    let personas = Arc::new(
        PersonaBook::load(&config.personas_path)
            .with_context(|| format!("Failed to load {}", config.personas_path.display()))?,
    );
    info!(personas = personas.personas().len(), "Personas loaded");

    match VoiceVoxEngine::new(&voicevox_config)?.version().await {
        Ok(version) => info!(version = %version, "VOICEVOX engine reachable"),
        Err(e) => warn!(error = %e, "VOICEVOX engine not reachable yet, continuing"),
    }

    let synthesizer = Arc::new(SpeechSynthesisService::from_config(&voicevox_config)?);
    let generator = Arc::new(GeminiClient::new(gemini_config)?);
    info!(model = generator.model(), "Gemini client ready");

    let services = AgentServices {
        generator,
        synthesizer: synthesizer.clone(),
        personas: personas.clone(),
        conversation: Arc::new(ConversationLog::default()),
    };

    let cancel = CancellationToken::new();
    let mut agents = Vec::new();
    let mut voice_clients = Vec::new();
    for (id, token) in config.active_tokens().iter().enumerate() {
        let http = Arc::new(Http::new(token));
        let songbird = Songbird::serenity();
        let transport = Arc::new(DiscordTransport::new(id, http.clone(), songbird.clone()));
        let agent = Agent::new(id, transport, services.clone())
            .with_text_channel(Arc::new(DiscordTextChannel::new(http)))
            .with_cancellation(&cancel);
        agents.push(Arc::new(agent));
        voice_clients.push(songbird);
    }

    let pool = Arc::new(AgentPool::new(agents, personas.personas()));
    let presence = SharedPresence::default();
    let intents = gateway_intents(config.use_privileged_intents);

    let mut clients = Vec::new();
    let mut primary_ready = None;
    for ((agent, songbird), token) in pool
        .agents()
        .iter()
        .zip(voice_clients)
        .zip(config.active_tokens())
    {
        let bot = start_agent_bot(
            token,
            intents,
            agent.clone(),
            pool.clone(),
            presence.clone(),
            songbird,
        )
        .await?;
        if primary_ready.is_none() {
            primary_ready = Some(bot.ready);
        }
        clients.push((agent.id(), bot.shard_manager, bot.task));
    }
    let primary_ready = primary_ready.context("No agents configured")?;

    for agent in pool.agents() {
        agent.spawn_dispatch();
    }

    info!(agents = pool.len(), "Waiting for the primary agent to connect");
    let cache = tokio::select! {
        ready = primary_ready => ready.context("Primary agent stopped before it was ready")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before startup finished");
            shutdown(&cancel, &pool, clients).await;
            return Ok(());
        }
    };

    let monitor = Arc::new(PresenceMonitor::new(
        config.target_user_id,
        Arc::new(DiscordStatusSource::new(cache)),
        pool.clone(),
        presence.clone(),
    ));
    tokio::spawn(monitor.run(cancel.clone()));

    let settings = SchedulingSettings::default()
        .with_voice_channel(config.voice_channel_id)
        .with_text_channel(config.text_channel_id);
    let policy = Arc::new(SchedulingPolicy::new(pool.clone(), presence.clone(), settings));
    for agent in pool.agents() {
        policy.spawn_agent_loops(agent);
    }
    policy.spawn_autonomous_join(cancel.clone());
    synthesizer.spawn_cache_sweeper(cancel.clone());

    info!(
        target_user_id = config.target_user_id,
        voice_channel_id = ?config.voice_channel_id,
        text_channel_id = ?config.text_channel_id,
        "Chorus running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    shutdown(&cancel, &pool, clients).await;
    Ok(())
}

type GatewayClient = (usize, Arc<ShardManager>, JoinHandle<()>);

async fn shutdown(cancel: &CancellationToken, pool: &AgentPool, clients: Vec<GatewayClient>) {
    cancel.cancel();
    pool.shutdown().await;
    for (agent_id, manager, task) in clients {
        manager.shutdown_all().await;
        if let Err(e) = task.await {
            warn!(agent_id, error = %e, "Discord client task did not stop cleanly");
        }
    }
    info!("All agents stopped");
}
