//! Shared HTTP client construction.

use crate::config::HttpConfig;
use crate::error::ParseError;
use std::time::Duration;

const USER_AGENT: &str = concat!("docparse-relay/", env!("CARGO_PKG_VERSION"));

/// Build the client used for every backend and MediaStore call.
pub fn build_client(cfg: &HttpConfig) -> Result<reqwest::Client, ParseError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ParseError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Join a base URL and a path without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Read a response body for an error message, capped so logs stay readable.
pub(crate) async fn error_body(resp: reqwest::Response) -> String {
    const MAX: usize = 512;
    let text = resp.text().await.unwrap_or_default();
    if text.len() <= MAX {
        return text;
    }
    let mut cut = MAX;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
