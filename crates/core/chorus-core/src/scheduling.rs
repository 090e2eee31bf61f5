//! Autonomous behaviour triggers
//!
//! Three independent, cooldown-gated generators:
//!
//! | Trigger | Tick | Cooldown | Chance |
//! |---|---|---|---|
//! | ambient voice remark | 5s | 10-20s | 10% |
//! | ambient text remark | 15s | 300-900s | 5% |
//! | autonomous join | 30s, then 5min | 30min | always |
//!
//! Cooldowns are redrawn on every check. Each `*_check` method performs a
//! single evaluation so tests can drive them directly; the `spawn_*`
//! methods wrap them in interval loops.

use crate::agent::Agent;
use crate::pool::AgentPool;
use crate::presence::SharedPresence;
use crate::transport::ChannelId;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Intervals, cooldowns and probabilities for every trigger
#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    /// Ambient voice remark check interval
    pub voice_tick: Duration,
    /// Ambient voice remark cooldown range
    pub voice_cooldown: (Duration, Duration),
    /// Chance per eligible check
    pub voice_probability: f64,
    /// Ambient text remark check interval
    pub text_tick: Duration,
    /// Ambient text remark cooldown range
    pub text_cooldown: (Duration, Duration),
    /// Chance per eligible check
    pub text_probability: f64,
    /// Delay before the first autonomous-join check
    pub join_initial_delay: Duration,
    /// Autonomous-join check interval
    pub join_interval: Duration,
    /// Minimum time between autonomous joins
    pub join_cooldown: Duration,
    /// When an autonomously joined agent leaves again
    pub auto_leave_after: Duration,
    /// Channel for autonomous joins
    pub voice_channel: Option<ChannelId>,
    /// Channel for ambient text remarks
    pub text_channel: Option<ChannelId>,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            voice_tick: Duration::from_secs(5),
            voice_cooldown: (Duration::from_secs(10), Duration::from_secs(20)),
            voice_probability: 0.1,
            text_tick: Duration::from_secs(15),
            text_cooldown: (Duration::from_secs(300), Duration::from_secs(900)),
            text_probability: 0.05,
            join_initial_delay: Duration::from_secs(30),
            join_interval: Duration::from_secs(5 * 60),
            join_cooldown: Duration::from_secs(30 * 60),
            auto_leave_after: Duration::from_secs(30 * 60),
            voice_channel: None,
            text_channel: None,
        }
    }
}

impl SchedulingSettings {
    /// Set the autonomous-join channel
    pub fn with_voice_channel(mut self, channel: Option<ChannelId>) -> Self {
        self.voice_channel = channel;
        self
    }

    /// Set the ambient text channel
    pub fn with_text_channel(mut self, channel: Option<ChannelId>) -> Self {
        self.text_channel = channel;
        self
    }
}

/// Decides when agents speak, post or join on their own
pub struct SchedulingPolicy {
    pool: Arc<AgentPool>,
    state: SharedPresence,
    settings: SchedulingSettings,
}

impl SchedulingPolicy {
    /// Create a policy over `pool`
    pub fn new(pool: Arc<AgentPool>, state: SharedPresence, settings: SchedulingSettings) -> Self {
        Self {
            pool,
            state,
            settings,
        }
    }

    fn activity(&self) -> Option<String> {
        self.state.read().activity_name.clone()
    }

    /// One ambient voice evaluation for `agent`. Returns whether it fired.
    pub async fn ambient_voice_check(&self, agent: &Arc<Agent>) -> bool {
        if !agent.is_connected() || agent.is_speaking() || self.pool.any_speaking() {
            return false;
        }

        let now = Instant::now();
        let (min, max) = self.settings.voice_cooldown;
        if !agent.voice_remark_due(now, random_between(min, max)) {
            return false;
        }
        if !roll(self.settings.voice_probability) {
            return false;
        }

        agent.mark_voice_remark(now);
        debug!(agent_id = agent.id(), "Ambient voice remark");
        let activity = self.activity();
        agent.generate_and_speak(activity.as_deref()).await
    }

    /// One ambient text evaluation for `agent`. Returns whether it posted.
    pub async fn ambient_text_check(&self, agent: &Arc<Agent>) -> bool {
        let Some(channel) = self.settings.text_channel else {
            return false;
        };
        if agent.text_channel().is_none() {
            return false;
        }

        let now = Instant::now();
        let (min, max) = self.settings.text_cooldown;
        if !agent.text_remark_due(now, random_between(min, max)) {
            return false;
        }
        if !roll(self.settings.text_probability) {
            return false;
        }

        agent.mark_text_remark(now);
        let activity = self.activity();
        match agent.post_remark(channel, activity.as_deref()).await {
            Ok(text) => {
                info!(agent_id = agent.id(), channel_id = channel, text = %text, "Posted ambient remark");
                true
            }
            Err(e) => {
                warn!(agent_id = agent.id(), error = %e, "Ambient text remark failed");
                false
            }
        }
    }

    /// One autonomous-join evaluation
    ///
    /// Eligible when a voice channel is configured, the user is online but
    /// not in voice, and the join cooldown has elapsed. Returns the agent
    /// that joined.
    pub async fn autonomous_join_check(&self) -> Option<Arc<Agent>> {
        let channel = self.settings.voice_channel?;
        let now = Instant::now();

        {
            let mut state = self.state.write();
            if !state.online || state.in_voice_channel {
                return None;
            }
            if let Some(last) = state.last_autonomous_join {
                if now.saturating_duration_since(last) < self.settings.join_cooldown {
                    return None;
                }
            }
            state.last_autonomous_join = Some(now);
        }

        let agent = self.pool.choose_random()?;
        if let Err(e) = agent.join(channel).await {
            warn!(agent_id = agent.id(), channel_id = channel, error = %e, "Autonomous join failed");
            return None;
        }
        info!(agent_id = agent.id(), channel_id = channel, "Joined voice autonomously");

        self.schedule_auto_leave(agent.clone());
        let activity = self.activity();
        agent.generate_and_speak(activity.as_deref()).await;
        Some(agent)
    }

    fn schedule_auto_leave(&self, agent: Arc<Agent>) {
        let state = self.state.clone();
        let after = self.settings.auto_leave_after;
        tokio::spawn(async move {
            tokio::select! {
                _ = agent.cancellation().cancelled() => return,
                _ = tokio::time::sleep(after) => {}
            }

            let user_in_voice = state.read().in_voice_channel;
            if user_in_voice {
                debug!(agent_id = agent.id(), "User is in voice, staying");
                return;
            }
            match agent.leave().await {
                Ok(true) => info!(agent_id = agent.id(), "Auto-left after autonomous join"),
                Ok(false) => {}
                Err(e) => warn!(agent_id = agent.id(), error = %e, "Auto-leave failed"),
            }
        });
    }

    /// Start the ambient voice and text loops for `agent`
    pub fn spawn_agent_loops(self: &Arc<Self>, agent: &Arc<Agent>) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_voice_loop(agent.clone()),
            self.spawn_text_loop(agent.clone()),
        ]
    }

    fn spawn_voice_loop(self: &Arc<Self>, agent: Arc<Agent>) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = agent.cancellation().clone();
            let period = policy.settings.voice_tick;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        policy.ambient_voice_check(&agent).await;
                    }
                }
            }
        })
    }

    fn spawn_text_loop(self: &Arc<Self>, agent: Arc<Agent>) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = agent.cancellation().clone();
            let period = policy.settings.text_tick;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        policy.ambient_text_check(&agent).await;
                    }
                }
            }
        })
    }

    /// Start the pool-wide autonomous-join loop
    pub fn spawn_autonomous_join(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            let start = Instant::now() + policy.settings.join_initial_delay;
            let mut ticker = tokio::time::interval_at(start, policy.settings.join_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        policy.autonomous_join_check().await;
                    }
                }
            }
        })
    }
}

fn roll(probability: f64) -> bool {
    rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
}

/// Uniform random duration in `[min, max]`
pub(crate) fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
