use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect::Policy;

use crate::error::DownloadError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Configurable options for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for an entire HTTP request. Zero disables it: a
    /// stalled segment then blocks its track indefinitely, matching the
    /// accepted limitation of the design.
    pub timeout: Duration,

    /// Connection timeout (time to establish the initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests, merged over the defaults
    pub headers: HeaderMap,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers
    }
}

/// Build the shared HTTP client for one download session.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut headers = DownloaderConfig::get_default_headers();
    for (name, value) in config.headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .redirect(if config.follow_redirects {
            Policy::limited(10)
        } else {
            Policy::none()
        });

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    Ok(builder.build()?)
}
