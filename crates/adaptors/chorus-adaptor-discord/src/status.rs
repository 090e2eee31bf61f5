//! Presence snapshots from the serenity cache

use async_trait::async_trait;
use chorus_core::{PresenceSnapshot, StatusSource};
use serenity::cache::Cache;
use serenity::model::gateway::ActivityType;
use serenity::model::id::UserId;
use serenity::model::user::OnlineStatus;
use std::sync::Arc;

/// Reads the monitored user's status from one bot's gateway cache
///
/// The bot must have the presence and member intents, otherwise the user is
/// never resolved.
pub struct DiscordStatusSource {
    cache: Arc<Cache>,
}

impl DiscordStatusSource {
    /// Observe through `cache`
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

/// Offline and invisible count as not online
pub fn is_online(status: OnlineStatus) -> bool {
    !matches!(status, OnlineStatus::Offline | OnlineStatus::Invisible)
}

/// Name of the first "Playing" activity
pub fn playing_activity<'a, I>(activities: I) -> Option<String>
where
    I: IntoIterator<Item = (ActivityType, &'a str)>,
{
    activities
        .into_iter()
        .find(|(kind, name)| *kind == ActivityType::Playing && !name.trim().is_empty())
        .map(|(_, name)| name.to_string())
}

#[async_trait]
impl StatusSource for DiscordStatusSource {
    async fn observe(&self, user_id: u64) -> Option<PresenceSnapshot> {
        if user_id == 0 {
            return None;
        }
        let user = UserId::new(user_id);

        let mut found = false;
        let mut snapshot = PresenceSnapshot::default();
        for guild_id in self.cache.guilds() {
            let Some(guild) = self.cache.guild(guild_id) else {
                continue;
            };

            if guild.members.contains_key(&user) {
                found = true;
            }
            if let Some(presence) = guild.presences.get(&user) {
                found = true;
                snapshot.online |= is_online(presence.status);
                if snapshot.activity.is_none() {
                    snapshot.activity = playing_activity(
                        presence
                            .activities
                            .iter()
                            .map(|a| (a.kind, a.name.as_str())),
                    );
                }
            }
            if let Some(state) = guild.voice_states.get(&user) {
                found = true;
                if snapshot.voice_channel.is_none() {
                    snapshot.voice_channel = state.channel_id.map(|c| c.get());
                }
            }
        }

        found.then_some(snapshot)
    }
}
