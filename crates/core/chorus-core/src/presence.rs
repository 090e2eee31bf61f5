//! Presence tracking for the monitored user
//!
//! [`PresenceMonitor`] polls a [`StatusSource`] on a fixed interval, folds
//! each snapshot into the shared [`PresenceState`] and reacts to the edges:
//!
//! - joining voice brings the primary agent in after a short delay, followed
//!   by a greeting
//! - leaving voice starts a grace period; once it runs out every agent
//!   disconnects
//! - a new game while agents are connected makes each of them comment on it,
//!   staggered by a random delay

use crate::pool::AgentPool;
use crate::scheduling::random_between;
use crate::transport::ChannelId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the platform currently reports about the monitored user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Online, idle or do-not-disturb
    pub online: bool,
    /// Name of the game being played
    pub activity: Option<String>,
    /// Voice channel the user is in
    pub voice_channel: Option<ChannelId>,
}

/// Reads the monitored user's live status
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Current snapshot, or `None` if the user cannot be resolved
    async fn observe(&self, user_id: u64) -> Option<PresenceSnapshot>;
}

/// Process-wide view of the monitored user
///
/// Written by the monitor (and by the autonomous-join trigger for
/// `last_autonomous_join`); read by everything else.
#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    /// Whether a game is being played
    pub is_playing: bool,
    /// Name of that game
    pub activity_name: Option<String>,
    /// Whether the user is in any voice channel
    pub in_voice_channel: bool,
    /// Which voice channel
    pub voice_channel: Option<ChannelId>,
    /// When the user last left voice, cleared on rejoin or after the grace period
    pub left_voice_at: Option<Instant>,
    /// Whether the user is online
    pub online: bool,
    /// When an agent last joined voice on its own
    pub last_autonomous_join: Option<Instant>,
}

/// Shared handle to the presence state
pub type SharedPresence = Arc<RwLock<PresenceState>>;

/// Edges detected while applying one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceTransitions {
    /// User went from no voice channel to this one
    pub joined_voice: Option<ChannelId>,
    /// User left voice
    pub left_voice: bool,
    /// User started a (different) game
    pub activity_changed: Option<String>,
    /// Online flag flipped to this value
    pub online_changed: Option<bool>,
    /// The leave grace period just ran out
    pub grace_expired: bool,
}

impl PresenceState {
    /// Fold a snapshot into the state and report what changed
    pub fn apply(
        &mut self,
        snapshot: &PresenceSnapshot,
        now: Instant,
        leave_grace: Duration,
    ) -> PresenceTransitions {
        let mut transitions = PresenceTransitions::default();

        let in_voice = snapshot.voice_channel.is_some();
        if in_voice && !self.in_voice_channel {
            self.left_voice_at = None;
            transitions.joined_voice = snapshot.voice_channel;
        } else if !in_voice && self.in_voice_channel {
            self.left_voice_at = Some(now);
            transitions.left_voice = true;
        }
        self.in_voice_channel = in_voice;
        self.voice_channel = snapshot.voice_channel;

        if snapshot.activity != self.activity_name {
            transitions.activity_changed = snapshot.activity.clone();
        }
        self.activity_name = snapshot.activity.clone();
        self.is_playing = snapshot.activity.is_some();

        if snapshot.online != self.online {
            transitions.online_changed = Some(snapshot.online);
        }
        self.online = snapshot.online;

        if let Some(left) = self.left_voice_at {
            if now.saturating_duration_since(left) > leave_grace {
                self.left_voice_at = None;
                transitions.grace_expired = true;
            }
        }

        transitions
    }
}

/// Timing knobs for [`PresenceMonitor`]
#[derive(Debug, Clone)]
struct PresenceSettings {
    /// Status poll interval
    pub poll_interval: Duration,
    /// Wait between the user joining voice and the primary agent following
    pub join_delay: Duration,
    /// How long agents stay after the user leaves voice
    pub leave_grace: Duration,
    /// Per-agent random delay before commenting on a new game
    pub remark_delay: (Duration, Duration),
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            join_delay: Duration::from_secs(5),
            leave_grace: Duration::from_secs(180),
            remark_delay: (Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

/// Drives joins, leaves and activity remarks from the user's status
pub struct PresenceMonitor {
    user_id: u64,
    source: Arc<dyn StatusSource>,
    pool: Arc<AgentPool>,
    state: SharedPresence,
    settings: PresenceSettings,
    join_pending: Arc<AtomicBool>,
}

impl PresenceMonitor {
    /// Create a monitor with default timings
    pub fn new(
        user_id: u64,
        source: Arc<dyn StatusSource>,
        pool: Arc<AgentPool>,
        state: SharedPresence,
    ) -> Self {
        Self {
            user_id,
            source,
            pool,
            state,
            settings: PresenceSettings::default(),
            join_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared state this monitor writes
    pub fn state(&self) -> &SharedPresence {
        &self.state
    }

    /// Run one poll cycle
    ///
    /// Returns `None` when the user could not be resolved; the cycle is
    /// skipped and the state left untouched.
    pub async fn tick(&self) -> Option<PresenceTransitions> {
        let Some(snapshot) = self.source.observe(self.user_id).await else {
            warn!(user_id = self.user_id, "Monitored user not found, skipping cycle");
            return None;
        };

        let transitions =
            self.state
                .write()
                .apply(&snapshot, Instant::now(), self.settings.leave_grace);

        if let Some(online) = transitions.online_changed {
            info!(user_id = self.user_id, online, "Online status changed");
        }

        if let Some(channel) = transitions.joined_voice {
            info!(user_id = self.user_id, channel_id = channel, "User joined voice");
            self.schedule_primary_join(channel);
        }

        if transitions.left_voice {
            info!(
                user_id = self.user_id,
                grace_secs = self.settings.leave_grace.as_secs(),
                "User left voice, grace period started"
            );
        }

        if let Some(activity) = &transitions.activity_changed {
            info!(user_id = self.user_id, activity = %activity, "Activity changed");
            self.schedule_activity_remarks(activity);
        }

        if transitions.grace_expired {
            info!(user_id = self.user_id, "Grace period over, leaving voice");
            self.pool.disconnect_all().await;
            self.pool.reset_emotions();
        }

        Some(transitions)
    }

    fn schedule_primary_join(&self, channel: ChannelId) {
        if self.join_pending.swap(true, Ordering::SeqCst) {
            debug!(channel_id = channel, "Join already pending");
            return;
        }
        let Some(agent) = self.pool.primary() else {
            self.join_pending.store(false, Ordering::SeqCst);
            return;
        };

        let pending = self.join_pending.clone();
        let state = self.state.clone();
        let delay = self.settings.join_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = agent.cancellation().cancelled() => {
                    pending.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let joined = agent.join(channel).await;
            pending.store(false, Ordering::SeqCst);
            match joined {
                Ok(()) => {
                    let activity = state.read().activity_name.clone();
                    agent.generate_and_speak(activity.as_deref()).await;
                }
                Err(e) => warn!(
                    agent_id = agent.id(),
                    channel_id = channel,
                    error = %e,
                    "Failed to follow user into voice"
                ),
            }
        });
    }

    fn schedule_activity_remarks(&self, activity: &str) {
        let (min, max) = self.settings.remark_delay;
        for agent in self.pool.connected() {
            let delay = random_between(min, max);
            let activity = activity.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = agent.cancellation().cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        agent.generate_and_speak(Some(&activity)).await;
                    }
                }
            });
        }
    }

    /// Poll until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(user_id = self.user_id, "Presence monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Presence monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::persona::Emotion;
    use crate::testing::*;

    const GRACE: Duration = Duration::from_secs(180);

    fn in_voice(channel: ChannelId) -> PresenceSnapshot {
        PresenceSnapshot {
            online: true,
            activity: None,
            voice_channel: Some(channel),
        }
    }

    fn out_of_voice() -> PresenceSnapshot {
        PresenceSnapshot {
            online: true,
            activity: None,
            voice_channel: None,
        }
    }

    fn setup(
        n: usize,
    ) -> (
        Harness,
        Arc<FakeTransport>,
        Arc<FakeStatusSource>,
        Arc<AgentPool>,
        PresenceMonitor,
    ) {
        let harness = Harness::new();
        let transport = FakeTransport::new();
        let agents: Vec<Arc<Agent>> = (0..n)
            .map(|i| Arc::new(harness.agent(i, &transport)))
            .collect();
        let pool = Arc::new(AgentPool::new(agents, harness.personas.personas()));
        let source = FakeStatusSource::new();
        let monitor = PresenceMonitor::new(
            42,
            source.clone(),
            pool.clone(),
            SharedPresence::default(),
        );
        (harness, transport, source, pool, monitor)
    }

    #[test]
    fn test_apply_voice_edges() {
        let mut state = PresenceState::default();
        let t0 = Instant::now();

        let t = state.apply(&in_voice(7), t0, GRACE);
        assert_eq!(t.joined_voice, Some(7));
        assert_eq!(t.online_changed, Some(true));

        let t = state.apply(&in_voice(7), t0, GRACE);
        assert_eq!(t, PresenceTransitions::default());

        let t = state.apply(&out_of_voice(), t0, GRACE);
        assert!(t.left_voice);
        assert_eq!(state.left_voice_at, Some(t0));

        let t = state.apply(&in_voice(7), t0 + Duration::from_secs(10), GRACE);
        assert_eq!(t.joined_voice, Some(7));
        assert_eq!(state.left_voice_at, None);
    }

    #[test]
    fn test_apply_grace_boundary() {
        let mut state = PresenceState::default();
        let t0 = Instant::now();
        state.apply(&in_voice(7), t0, GRACE);
        state.apply(&out_of_voice(), t0, GRACE);

        let t = state.apply(&out_of_voice(), t0 + Duration::from_secs(179), GRACE);
        assert!(!t.grace_expired);
        let t = state.apply(&out_of_voice(), t0 + GRACE, GRACE);
        assert!(!t.grace_expired);
        let t = state.apply(&out_of_voice(), t0 + Duration::from_secs(181), GRACE);
        assert!(t.grace_expired);
        assert_eq!(state.left_voice_at, None);

        let t = state.apply(&out_of_voice(), t0 + Duration::from_secs(400), GRACE);
        assert!(!t.grace_expired);
    }

    #[test]
    fn test_apply_activity_changes() {
        let mut state = PresenceState::default();
        let now = Instant::now();
        let playing = |game: Option<&str>| PresenceSnapshot {
            online: true,
            activity: game.map(str::to_string),
            voice_channel: None,
        };

        let t = state.apply(&playing(Some("Splatoon")), now, GRACE);
        assert_eq!(t.activity_changed.as_deref(), Some("Splatoon"));
        assert!(state.is_playing);

        let t = state.apply(&playing(Some("Splatoon")), now, GRACE);
        assert_eq!(t.activity_changed, None);

        let t = state.apply(&playing(None), now, GRACE);
        assert_eq!(t.activity_changed, None);
        assert!(!state.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_user_is_skipped() {
        let (_h, transport, source, _pool, monitor) = setup(1);
        assert!(monitor.tick().await.is_none());
        assert_eq!(source.observations(), 1);
        assert!(transport.connects().is_empty());
        assert!(!monitor.state().read().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_join_connects_primary_once() {
        let (harness, transport, source, _pool, monitor) = setup(2);
        transport.set_connect_delay(Duration::from_secs(2));

        source.set(Some(in_voice(7)));
        monitor.tick().await;

        // Observed leaving and rejoining before the join completes
        source.set(Some(out_of_voice()));
        monitor.tick().await;
        source.set(Some(in_voice(7)));
        monitor.tick().await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(transport.connects().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.connects(), vec![7]);
        // Greeting from the primary (persona p0, speaker 1)
        assert_eq!(harness.synthesizer.calls().len(), 1);
        assert_eq!(harness.synthesizer.calls()[0].1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_join_allows_next_voice_edge() {
        let (harness, transport, source, pool, monitor) = setup(2);
        transport.fail_connects();

        source.set(Some(in_voice(7)));
        monitor.tick().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(pool.connected().is_empty());
        assert!(!monitor.join_pending.load(Ordering::SeqCst));
        assert!(harness.synthesizer.calls().is_empty());

        transport.restore_connects();
        source.set(Some(out_of_voice()));
        monitor.tick().await;
        source.set(Some(in_voice(7)));
        monitor.tick().await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(transport.connects(), vec![7]);
        assert!(pool.primary().unwrap().is_connected());
        assert_eq!(harness.synthesizer.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_grace_disconnects_all() {
        let (harness, transport, source, pool, monitor) = setup(2);
        source.set(Some(in_voice(7)));
        monitor.tick().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        pool.get(1).unwrap().join(7).await.unwrap();
        assert_eq!(pool.connected().len(), 2);

        source.set(Some(out_of_voice()));
        monitor.tick().await;

        tokio::time::advance(Duration::from_secs(175)).await;
        let t = monitor.tick().await.unwrap();
        assert!(!t.grace_expired);
        assert_eq!(pool.connected().len(), 2);

        harness.personas.set_emotion("p0", Emotion::Happy);
        tokio::time::advance(Duration::from_secs(10)).await;
        let t = monitor.tick().await.unwrap();
        assert!(t.grace_expired);
        assert!(pool.connected().is_empty());
        assert_eq!(transport.disconnects().len(), 2);
        assert!(monitor.state().read().left_voice_at.is_none());
        assert_eq!(harness.personas.emotion("p0"), Emotion::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_change_makes_connected_agents_comment() {
        let (harness, _transport, source, pool, monitor) = setup(3);
        pool.get(0).unwrap().join(7).await.unwrap();
        pool.get(2).unwrap().join(7).await.unwrap();

        source.set(Some(PresenceSnapshot {
            online: true,
            activity: Some("Tetris".to_string()),
            voice_channel: None,
        }));
        monitor.tick().await;
        assert!(harness.generator.requests().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let requests = harness.generator.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.activity.as_deref() == Some("Tetris")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (_h, _transport, source, _pool, monitor) = setup(1);
        source.set(Some(out_of_voice()));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::new(monitor).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(source.observations(), 3);
    }
}
