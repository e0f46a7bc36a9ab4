use thiserror::Error;

/// Startup configuration problems. All of these stop the bridge before polling starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no meter address configured (set `ip` or the first entry of `devices`)")]
    MissingHost,
    #[error("poll interval must be a positive number of seconds")]
    InvalidPollInterval,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Every candidate API version failed. `attempts` holds `(path, reason)` in probe order.
    #[error("meter at {host} unreachable after probing {}", format_attempts(.attempts))]
    DeviceUnreachable {
        host: String,
        attempts: Vec<(String, String)>,
    },
}

/// A single poll cycle failed; the cycle is skipped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("malformed body from {url}: {detail}")]
    Body { url: String, detail: String },
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(path, reason)| format!("{path} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}
