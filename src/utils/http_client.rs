use reqwest::Client;
use std::time::Duration;

use crate::utils::{AppError, AppResult};

/// User-agent string derived from Cargo.toml version at compile time.
pub const APP_USER_AGENT: &str = concat!("ppupdater/", env!("CARGO_PKG_VERSION"));

pub fn create_http_client(request_timeout: Duration) -> AppResult<Client> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .pool_max_idle_per_host(3)
        .tcp_nodelay(true)
        .build()
        .map_err(AppError::from)
}

/// Keep at most `max` characters of an error body for display.
pub fn truncate_body(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_counts_chars_not_bytes() {
        assert_eq!(truncate_body("héllo", 2), "hé");
        assert_eq!(truncate_body("short", 200), "short");
        assert_eq!(truncate_body("", 10), "");
    }

    #[test]
    fn user_agent_carries_version() {
        assert!(APP_USER_AGENT.starts_with("ppupdater/"));
    }
}
