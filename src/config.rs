//! Environment-driven configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daily reminder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// Local hour (0-23) of the daily run
    pub hour: u32,
    /// Delay between consecutive reminder sends
    pub pacing: Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 12,
            pacing: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Messaging API token; without it outbound messages are only logged
    pub line_access_token: Option<String>,
    pub line_api_base: String,
    /// Base URL of the organizer mini-app
    pub liff_url: String,
    /// Without a key the admin API rejects every request
    pub admin_api_key: Option<String>,
    pub reminder: ReminderConfig,
    pub recent_messages_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("CIRCLEPAY_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.circlepay/circlepay.db"))
            },
            PathBuf::from,
        );

        let defaults = ReminderConfig::default();
        let hour = parse_var(var("REMINDER_HOUR"))
            .filter(|h: &u32| *h < 24)
            .unwrap_or(defaults.hour);
        let reminder = ReminderConfig {
            enabled: var("REMINDER_ENABLED").map_or(defaults.enabled, |v| parse_flag(&v)),
            hour,
            pacing: parse_var(var("REMINDER_PACING_MS")).map_or(defaults.pacing, Duration::from_millis),
        };

        Self {
            db_path,
            port: parse_var(var("CIRCLEPAY_PORT")).unwrap_or(8080),
            line_access_token: var("LINE_CHANNEL_ACCESS_TOKEN"),
            line_api_base: var("LINE_API_BASE")
                .unwrap_or_else(|| "https://api.line.me".to_string()),
            liff_url: var("LIFF_URL").unwrap_or_default(),
            admin_api_key: var("ADMIN_API_KEY"),
            reminder,
            recent_messages_capacity: parse_var(var("RECENT_MESSAGES_CAPACITY")).unwrap_or(100),
        }
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
