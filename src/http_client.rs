//! Transfer client construction for the concurrent fetcher.
//!
//! Always performs a plain GET; the result recorder handles outcome
//! bookkeeping separately. Redirect policy, connect timeout, total timeout
//! and compression are all configured at the client level.

use std::time::Duration;

use reqwest::{redirect::Policy, Client};

pub const USER_AGENT: &str = "fetchqueue/0.1 (+https://github.com/monokrome/fetchqueue)";

/// Build a transfer client for one pool slot: follows up to `max_redirects`
/// redirects, bounds connect time independently of total transfer time.
pub fn build_client(
    timeout: Duration,
    connect_timeout: Duration,
    max_redirects: usize,
) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(Policy::limited(max_redirects))
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .gzip(true)
        .brotli(true)
        .build()
}
