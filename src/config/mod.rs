use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Deployment-level configuration: where the remote services live and how to
/// talk to them. Per-run parameters (command, addresses, intervals) come
/// from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the object store service.
    pub object_store_url: String,

    /// Base URL of the log ingestion service.
    pub log_ingestion_url: String,

    /// Bearer credential attached to every remote request, if any.
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_request_timeout", with = "duration_format")]
    pub request_timeout: Duration,

    /// Endpoint queried for the instance id when the environment does not
    /// supply one.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_metadata_url() -> String {
    "http://169.254.169.254/latest/meta-data/instance-id".to_string()
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Parses durations like `500ms`, `10s`, `5m`, `1h`. Shared by the config
/// file deserializer and the CLI duration flags.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (value_str, unit) = if s.ends_with("ms") {
        (&s[..s.len() - 2], "ms")
    } else if s.ends_with('s') {
        (&s[..s.len() - 1], "s")
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], "m")
    } else if s.ends_with('h') {
        (&s[..s.len() - 1], "h")
    } else {
        return Err(format!("invalid duration format: {}", s));
    };

    let value: u64 = value_str
        .parse()
        .map_err(|_| format!("invalid numeric value: {}", value_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => return Err(format!("unknown unit: {}", unit)),
    };

    Ok(duration)
}

// Custom serde module for duration fields
mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn format_duration(d: Duration) -> String {
        let millis = d.as_millis();
        if millis % 1000 != 0 {
            return format!("{}ms", millis);
        }
        let secs = d.as_secs();
        if secs % 3600 == 0 && secs > 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 && secs > 0 {
            format!("{}m", secs / 60)
        } else if secs > 0 {
            format!("{}s", secs)
        } else {
            "0ms".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
object_store_url: http://localhost:7205
log_ingestion_url: http://localhost:7206
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.object_store_url, "http://localhost:7205");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.auth_token.is_none());
        assert!(config.metadata_url.contains("169.254.169.254"));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
object_store_url: http://store.internal
log_ingestion_url: http://logs.internal
auth_token: secret
request_timeout: 5s
metadata_url: http://metadata.internal/id
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.metadata_url, "http://metadata.internal/id");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("tens").is_err());
    }

    #[test]
    fn test_duration_roundtrip() {
        for timeout in [
            Duration::from_secs(90),
            Duration::from_millis(1500),
            Duration::from_millis(250),
            Duration::from_secs(3600),
        ] {
            let config = Config {
                object_store_url: "a".to_string(),
                log_ingestion_url: "b".to_string(),
                auth_token: None,
                request_timeout: timeout,
                metadata_url: "c".to_string(),
            };
            let yaml = serde_yaml::to_string(&config).unwrap();
            let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(parsed.request_timeout, timeout);
        }
    }
}
