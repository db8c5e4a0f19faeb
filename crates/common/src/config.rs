use std::time::Duration;

use serde::Deserialize;

/// Default backoff ladder, as written in `NOTIFY_RETRY_POLICIES`.
pub const DEFAULT_RETRY_POLICIES: &str = "1m,5m,10m,30m,60m,120m";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection string
    pub redis_url: String,

    /// Store-level key namespace, applied to every key and to the subscription pattern
    pub redis_key_prefix: Option<String>,

    /// Engine namespace placed in front of every notification key
    pub notify_prefix: String,

    /// Backoff ladder, one delay per attempt
    pub retry_policies: Vec<Duration>,

    /// Extra lifetime of the payload key beyond the last ladder step (default: 300s)
    pub holding_margin_secs: u64,

    /// Instance part of the lock token; generated when unset
    pub instance_id: Option<String>,

    /// Enable keyspace expiry events on the Redis server at start-up
    pub configure_keyspace_events: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let notify_prefix =
            std::env::var("NOTIFY_PREFIX").unwrap_or_else(|_| "redelay".to_string());
        if notify_prefix.is_empty() {
            anyhow::bail!("NOTIFY_PREFIX must not be empty");
        }

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            redis_key_prefix: std::env::var("REDIS_KEY_PREFIX")
                .ok()
                .filter(|p| !p.is_empty()),
            notify_prefix,
            retry_policies: parse_durations(
                &std::env::var("NOTIFY_RETRY_POLICIES")
                    .unwrap_or_else(|_| DEFAULT_RETRY_POLICIES.to_string()),
            )
            .map_err(|e| anyhow::anyhow!("NOTIFY_RETRY_POLICIES is invalid: {e}"))?,
            holding_margin_secs: std::env::var("NOTIFY_HOLDING_MARGIN_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFY_HOLDING_MARGIN_SECS must be a valid u64"))?,
            instance_id: std::env::var("NOTIFY_INSTANCE_ID")
                .ok()
                .filter(|id| !id.is_empty()),
            configure_keyspace_events: std::env::var("REDIS_CONFIGURE_KEYSPACE_EVENTS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("REDIS_CONFIGURE_KEYSPACE_EVENTS must be true or false")
                })?,
        })
    }

    pub fn holding_margin(&self) -> Duration {
        Duration::from_secs(self.holding_margin_secs)
    }
}

/// Parse a comma separated list of durations such as `"90s, 5m, 2h"`.
pub fn parse_durations(src: &str) -> Result<Vec<Duration>, String> {
    src.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_duration)
        .collect()
}

/// Parse a single duration in humantime notation (`500ms`, `90s`, `5m`, `2h`).
/// A bare number is read as seconds.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    let result = if !src.is_empty() && src.bytes().all(|b| b.is_ascii_digit()) {
        humantime::parse_duration(&format!("{src}s"))
    } else {
        humantime::parse_duration(src)
    };
    result.map_err(|e| format!("invalid duration '{src}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        assert!(parse_duration("5124095576030432h").is_err());
        assert!(parse_duration("99999999999999999999999s").is_err());
        assert!(parse_durations("1m, 5124095576030432h").is_err());
    }

    #[test]
    fn test_parse_default_ladder() {
        let ladder = parse_durations(DEFAULT_RETRY_POLICIES).unwrap();
        let minutes: Vec<u64> = ladder.iter().map(|d| d.as_secs() / 60).collect();
        assert_eq!(minutes, vec![1, 5, 10, 30, 60, 120]);
    }

    #[test]
    fn test_parse_durations_tolerates_spaces_and_trailing_comma() {
        let ladder = parse_durations(" 10s, 15s ,30s,").unwrap();
        assert_eq!(
            ladder,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(15),
                Duration::from_secs(30)
            ]
        );
    }
}
