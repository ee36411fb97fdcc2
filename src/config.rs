use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::platform::{ChannelId, GuildId, RoleId};
use crate::shared::EngineError;

/// Winner roles handed out by the award pipeline, one per category.
#[derive(Debug, Clone, Copy)]
pub struct WinnerRoles {
    pub mvp: RoleId,
    pub writer: RoleId,
    pub voice: RoleId,
}

/// Parameters for the scheduled double-voice-XP sessions.
#[derive(Debug, Clone, Copy)]
pub struct BuffConfig {
    /// Upper bound on sessions drawn per day (the draw is 0..=max).
    pub max_sessions_per_day: u32,
    /// Length of one session.
    pub duration: Duration,
    /// Earliest local hour a session may start.
    pub window_start_hour: u32,
    /// Local hour by which a session must have ended.
    pub window_end_hour: u32,
}

impl Default for BuffConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_day: 2,
            duration: Duration::from_secs(60 * 60),
            window_start_hour: 10,
            window_end_hour: 23,
        }
    }
}

/// Engine configuration, read from the environment in production and
/// built directly in tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub guild: GuildId,
    pub announce_channel: ChannelId,
    pub level_feed_channel: ChannelId,
    pub games_channel: ChannelId,
    pub games_notify_role: RoleId,
    pub jackpot_role: RoleId,
    pub winner_roles: WinnerRoles,
    pub awards_enabled: bool,
    pub buffs: BuffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            timezone: chrono_tz::Europe::Paris,
            guild: 0,
            announce_channel: 0,
            level_feed_channel: 0,
            games_channel: 0,
            games_notify_role: 0,
            jackpot_role: 0,
            winner_roles: WinnerRoles {
                mvp: 0,
                writer: 0,
                voice: 0,
            },
            awards_enabled: true,
            buffs: BuffConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from `REFUGE_*` environment variables.
    ///
    /// Ids are mandatory; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = BuffConfig::default();

        Ok(Self {
            data_dir: env::var("REFUGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            timezone: parse_var("REFUGE_TIMEZONE")?.unwrap_or(chrono_tz::Europe::Paris),
            guild: required_id("REFUGE_GUILD")?,
            announce_channel: required_id("REFUGE_ANNOUNCE_CHANNEL")?,
            level_feed_channel: required_id("REFUGE_LEVELFEED_CHANNEL")?,
            games_channel: required_id("REFUGE_GAMES_CHANNEL")?,
            games_notify_role: required_id("REFUGE_GAMES_NOTIFY_ROLE")?,
            jackpot_role: required_id("REFUGE_JACKPOT_ROLE")?,
            winner_roles: WinnerRoles {
                mvp: required_id("REFUGE_MVP_ROLE")?,
                writer: required_id("REFUGE_WRITER_ROLE")?,
                voice: required_id("REFUGE_VOICE_ROLE")?,
            },
            awards_enabled: parse_var("REFUGE_AWARDS_ENABLED")?.unwrap_or(true),
            buffs: BuffConfig {
                max_sessions_per_day: parse_var("REFUGE_BUFF_SESSIONS_PER_DAY")?
                    .unwrap_or(defaults.max_sessions_per_day),
                duration: parse_var("REFUGE_BUFF_DURATION_MIN")?
                    .map(|minutes: u64| Duration::from_secs(minutes * 60))
                    .unwrap_or(defaults.duration),
                window_start_hour: parse_var("REFUGE_BUFF_WINDOW_START")?
                    .unwrap_or(defaults.window_start_hour),
                window_end_hour: parse_var("REFUGE_BUFF_WINDOW_END")?
                    .unwrap_or(defaults.window_end_hour),
            },
        })
    }
}

fn required_id(key: &str) -> Result<u64, EngineError> {
    match parse_var(key)? {
        Some(id) => Ok(id),
        None => Err(EngineError::Config(format!("{} is not set", key))),
    }
}

/// Reads and parses an optional environment variable.
fn parse_var<T>(key: &str) -> Result<Option<T>, EngineError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
