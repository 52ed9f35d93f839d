use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Rate-limited HTTP client shared by outbound integrations
#[derive(Debug, Clone)]
pub struct RateLimitedHttpClient {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateLimitedHttpClient {
    /// Create a client allowing `requests_per_second` with bursts up to `burst`
    pub fn new(
        requests_per_second: u32,
        burst: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // Telegram allows roughly 30 messages per second per bot; callers
        // configure something below that.
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    /// POST a JSON body once the rate limiter allows it
    pub async fn post_json<B>(&self, url: &str, body: &B) -> Result<reqwest::Response, reqwest::Error>
    where
        B: Serialize + ?Sized,
    {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        debug!("Executing rate-limited POST");
        self.client.post(url).json(body).send().await
    }
}
