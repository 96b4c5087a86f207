// Runtime configuration, loaded from the environment (or a .env file) with defaults.

use std::env;
use std::time::Duration;

/// Maximum number of correction round-trips for one user turn.
pub const MAX_FEEDBACK_RETRY: usize = 3;

/// Models the backend knows how to route, as (id, display name).
pub const MODEL_OPTIONS: [(&str, &str); 2] = [
    ("gpt-4o-mini", "ChatGPT (GPT-4o-mini)"),
    ("deepseek-chat", "DeepSeek Chat"),
];

lazy_static::lazy_static! {
    pub static ref BACKEND_URL: String = env::var("GEOPROMPT_BACKEND_URL")
        .unwrap_or_else(|_| "http://localhost:8000".to_string());
    pub static ref BACKEND_WS_URL: String = env::var("GEOPROMPT_BACKEND_WS_URL")
        .unwrap_or_else(|_| websocket_url_for(&BACKEND_URL));
    pub static ref DEFAULT_MODEL: String = env::var("GEOPROMPT_MODEL")
        .unwrap_or_else(|_| MODEL_OPTIONS[0].0.to_string());
    pub static ref VALIDATION_WINDOW: Duration = Duration::from_millis(
        env_millis("GEOPROMPT_VALIDATION_WINDOW_MS").unwrap_or(300)
    );
    pub static ref EVAL_TIMEOUT: Duration = Duration::from_millis(
        env_millis("GEOPROMPT_EVAL_TIMEOUT_MS").unwrap_or(5_000)
    );
    // Pushed corrections involve a model call on the backend, so allow much longer.
    pub static ref CORRECTION_TIMEOUT: Duration = Duration::from_millis(
        env_millis("GEOPROMPT_CORRECTION_TIMEOUT_MS").unwrap_or(60_000)
    );
}

fn env_millis(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

/// Derives the correction channel endpoint from the HTTP backend URL.
pub fn websocket_url_for(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws", ws_base)
}

pub fn is_known_model(id: &str) -> bool {
    MODEL_OPTIONS.iter().any(|(known, _)| *known == id)
}
