use core::time::Duration;

use types::redacting_url::RedactingUrl;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Config {
    pub url: RedactingUrl,
    /// Applies to every request except the event stream, which stays open indefinitely.
    pub request_timeout: Duration,
}

impl Config {
    #[must_use]
    pub const fn new(url: RedactingUrl) -> Self {
        Self {
            url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
