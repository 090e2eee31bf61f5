//! Configuration management and environment variable loading

use crate::{ChorusError, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Default location of the persona definitions
pub const DEFAULT_PERSONAS_PATH: &str = "config/characters.json";

/// Load environment variables from a .env file
///
/// A missing file is not an error; the process falls back to the system
/// environment.
///
/// # Example
///
/// ```no_run
/// use chorus_core::load_env;
///
/// load_env().ok();
/// let token = std::env::var("DISCORD_TOKEN").unwrap_or_default();
/// ```
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(ChorusError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::warn!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(ChorusError::config(format!("Failed to load .env file: {}", e))),
    }
}

/// Get required environment variable
///
/// Returns an error if the variable is not set or blank
pub fn get_required_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ChorusError::config(format!(
            "Required environment variable '{}' is not set. \
             Check your .env file or system environment.",
            key
        ))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as boolean
pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Get environment variable as integer
pub fn get_env_int<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Get environment variable as float
pub fn get_env_float(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .unwrap_or(default)
}

/// Get a Discord snowflake where `0` or absence means "not configured"
pub fn get_env_id(key: &str) -> Option<u64> {
    match get_env_int::<u64>(key, 0) {
        0 => None,
        id => Some(id),
    }
}

/// Split a comma-separated credential list, appending `extra` when it is
/// not already present.
pub fn parse_bot_tokens(raw: &str, extra: Option<&str>) -> Vec<String> {
    let mut tokens: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(extra) = extra.map(str::trim).filter(|t| !t.is_empty()) {
        if !tokens.iter().any(|t| t == extra) {
            tokens.push(extra.to_string());
        }
    }

    tokens
}

/// Runtime configuration for the agent pool and presence tracking
#[derive(Clone)]
pub struct ChorusConfig {
    /// Credentials, one per agent identity
    pub bot_tokens: Vec<String>,
    /// Number of agents to start (never more than `bot_tokens.len()`)
    pub bot_count: usize,
    /// The monitored user
    pub target_user_id: u64,
    /// Channel used for autonomous joins
    pub voice_channel_id: Option<u64>,
    /// Destination for ambient text remarks
    pub text_channel_id: Option<u64>,
    /// Persona definitions file
    pub personas_path: PathBuf,
    /// Request presence, member and message-content intents
    pub use_privileged_intents: bool,
}

impl ChorusConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let raw_tokens = get_env_or("BOT_TOKENS", "");
        let discord_token = env::var("DISCORD_TOKEN").ok();
        let bot_tokens = parse_bot_tokens(&raw_tokens, discord_token.as_deref());
        if bot_tokens.is_empty() {
            return Err(ChorusError::config(
                "No bot credentials configured. Set BOT_TOKENS or DISCORD_TOKEN.",
            ));
        }

        let requested = get_env_int::<usize>("BOT_COUNT", 1);
        if requested == 0 {
            return Err(ChorusError::config("BOT_COUNT must be at least 1"));
        }
        let bot_count = requested.min(bot_tokens.len());
        if bot_count < requested {
            tracing::warn!(
                requested = requested,
                available = bot_tokens.len(),
                "BOT_COUNT exceeds the number of configured tokens"
            );
        }

        let target_user_id = get_env_id("TARGET_USER_ID").ok_or_else(|| {
            ChorusError::config("TARGET_USER_ID must be set to the monitored user's id")
        })?;

        Ok(Self {
            bot_tokens,
            bot_count,
            target_user_id,
            voice_channel_id: get_env_id("VOICE_CHANNEL_ID"),
            text_channel_id: get_env_id("TEXT_CHANNEL_ID"),
            personas_path: PathBuf::from(get_env_or("PERSONAS_PATH", DEFAULT_PERSONAS_PATH)),
            use_privileged_intents: get_env_bool("USE_PRIVILEGED_INTENTS", true),
        })
    }

    /// Credentials of the agents that will actually start
    pub fn active_tokens(&self) -> &[String] {
        &self.bot_tokens[..self.bot_count.min(self.bot_tokens.len())]
    }
}

impl fmt::Debug for ChorusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChorusConfig")
            .field("bot_tokens", &format!("[{} redacted]", self.bot_tokens.len()))
            .field("bot_count", &self.bot_count)
            .field("target_user_id", &self.target_user_id)
            .field("voice_channel_id", &self.voice_channel_id)
            .field("text_channel_id", &self.text_channel_id)
            .field("personas_path", &self.personas_path)
            .field("use_privileged_intents", &self.use_privileged_intents)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_bool() {
        env::set_var("CHORUS_TEST_BOOL_TRUE", "true");
        env::set_var("CHORUS_TEST_BOOL_0", "0");

        assert!(get_env_bool("CHORUS_TEST_BOOL_TRUE", false));
        assert!(!get_env_bool("CHORUS_TEST_BOOL_0", true));
        assert!(get_env_bool("CHORUS_NONEXISTENT_BOOL", true));

        env::remove_var("CHORUS_TEST_BOOL_TRUE");
        env::remove_var("CHORUS_TEST_BOOL_0");
    }

    #[test]
    fn test_get_env_int_and_float() {
        env::set_var("CHORUS_TEST_INT", " 42 ");
        env::set_var("CHORUS_TEST_FLOAT", "1.1");
        assert_eq!(get_env_int("CHORUS_TEST_INT", 0), 42);
        assert_eq!(get_env_int("CHORUS_NONEXISTENT_INT", 99), 99);
        assert_eq!(get_env_float("CHORUS_TEST_FLOAT", 0.0), 1.1);
        env::remove_var("CHORUS_TEST_INT");
        env::remove_var("CHORUS_TEST_FLOAT");
    }

    #[test]
    fn test_get_env_id_treats_zero_as_unset() {
        env::set_var("CHORUS_TEST_ID_ZERO", "0");
        env::set_var("CHORUS_TEST_ID", "123456789012345678");
        assert_eq!(get_env_id("CHORUS_TEST_ID_ZERO"), None);
        assert_eq!(get_env_id("CHORUS_TEST_ID"), Some(123456789012345678));
        assert_eq!(get_env_id("CHORUS_NONEXISTENT_ID"), None);
        env::remove_var("CHORUS_TEST_ID_ZERO");
        env::remove_var("CHORUS_TEST_ID");
    }

    #[test]
    fn test_parse_bot_tokens() {
        let tokens = parse_bot_tokens(" a , b,,c ", Some("b"));
        assert_eq!(tokens, vec!["a", "b", "c"]);

        let tokens = parse_bot_tokens("a", Some("z"));
        assert_eq!(tokens, vec!["a", "z"]);

        assert!(parse_bot_tokens("", None).is_empty());
        assert_eq!(parse_bot_tokens("", Some(" solo ")), vec!["solo"]);
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("BOT_TOKENS", "tok-a,tok-b");
        env::set_var("DISCORD_TOKEN", "tok-c");
        env::set_var("BOT_COUNT", "5");
        env::set_var("TARGET_USER_ID", "42");
        env::set_var("VOICE_CHANNEL_ID", "7");
        env::set_var("TEXT_CHANNEL_ID", "0");

        let config = ChorusConfig::from_env().unwrap();
        assert_eq!(config.bot_tokens.len(), 3);
        assert_eq!(config.bot_count, 3);
        assert_eq!(config.active_tokens(), &["tok-a", "tok-b", "tok-c"]);
        assert_eq!(config.target_user_id, 42);
        assert_eq!(config.voice_channel_id, Some(7));
        assert_eq!(config.text_channel_id, None);

        let debug = format!("{:?}", config);
        assert!(!debug.contains("tok-a"));
        assert!(debug.contains("redacted"));

        env::set_var("TARGET_USER_ID", "0");
        let err = ChorusConfig::from_env().unwrap_err();
        assert!(matches!(err, ChorusError::Config(_)));

        for key in [
            "BOT_TOKENS",
            "DISCORD_TOKEN",
            "BOT_COUNT",
            "TARGET_USER_ID",
            "VOICE_CHANNEL_ID",
            "TEXT_CHANNEL_ID",
        ] {
            env::remove_var(key);
        }
        assert!(ChorusConfig::from_env().is_err());
    }
}
