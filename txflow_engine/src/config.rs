use std::time::Duration;
use url::Url;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8082/api/";
const DEFAULT_PUSH_URL: &str = "ws://127.0.0.1:8082/api/events";

/// Durations the state machine itself schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub debounce: Duration,
    pub result_display: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            result_display: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub backend_url: Url,
    pub push_url: Url,
    pub http_timeout: Duration,
    pub timing: Timing,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            backend_url: default_url(DEFAULT_BACKEND_URL),
            push_url: default_url(DEFAULT_PUSH_URL),
            http_timeout: Duration::from_secs(30),
            timing: Timing::default(),
        }
    }
}

impl FlowConfig {
    pub fn from_env() -> Self {
        let defaults = FlowConfig::default();
        Self {
            backend_url: env_url("TXFLOW_BACKEND_URL").unwrap_or(defaults.backend_url),
            push_url: env_url("TXFLOW_PUSH_URL").unwrap_or(defaults.push_url),
            http_timeout: Duration::from_secs(
                env_u64("TXFLOW_HTTP_TIMEOUT_SECS", 30).clamp(5, 120),
            ),
            timing: Timing {
                debounce: Duration::from_millis(env_u64("TXFLOW_DEBOUNCE_MS", 400).min(5000)),
                result_display: Duration::from_secs(
                    env_u64("TXFLOW_RESULT_DISPLAY_SECS", 5).clamp(1, 60),
                ),
            },
        }
    }
}

fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("default url is valid")
}

fn env_u64(key: &str, default: u64) -> u64 {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("unparseable {key}={raw:?}, using {default}");
            default
        }
    }
}

fn env_url(key: &str) -> Option<Url> {
    let raw = std::env::var(key).ok()?;
    match Url::parse(raw.trim()) {
        Ok(url) => Some(ensure_trailing_slash(url)),
        Err(e) => {
            tracing::warn!("invalid {key}={raw:?} ({e}), using default");
            None
        }
    }
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
pub fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') && url.scheme().starts_with("http") {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
