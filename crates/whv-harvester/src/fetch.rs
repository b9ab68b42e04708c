use std::error::Error as _;
use std::time::Duration;

use rand::Rng;
use reqwest::header::USER_AGENT;
use url::Url;

use crate::config::HarvesterConfig;
use crate::error::{FetchCause, FetchError};
use crate::limiter::RateLimiter;

/// A successfully fetched payload.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Vec<u8>,
    /// How many attempts the transfer took, first included.
    pub attempts: u32,
}

impl Fetched {
    /// Page bodies are decoded lossily; reqwest already undid any transport
    /// compression.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP GET with bounded retry. Every attempt first takes a slot from the
/// shared [`RateLimiter`], runs under the per-attempt request timeout, and on
/// a transient failure backs off `retry_backoff * 2^(attempt-1)` seconds
/// (capped) before the next try. Permanent failures never retry.
pub struct RetryingFetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
    user_agents: Vec<String>,
    retry_attempts: u32,
    retry_backoff: Duration,
    retry_backoff_max: Duration,
    retry_on_429: bool,
}

impl RetryingFetcher {
    pub fn new(config: &HarvesterConfig, limiter: RateLimiter) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            limiter,
            user_agents: config.user_agents.clone(),
            retry_attempts: config.retry_attempts,
            retry_backoff: Duration::from_secs_f64(config.retry_backoff_secs),
            retry_backoff_max: Duration::from_secs_f64(config.retry_backoff_max_secs),
            retry_on_429: config.retry_on_429,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Permanent {
            url: url.to_string(),
            attempts: 0,
            cause: FetchCause::MalformedUrl(e.to_string()),
        })?;
        self.fetch_url(&parsed).await
    }

    pub async fn fetch_url(&self, url: &Url) -> Result<Fetched, FetchError> {
        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;
            match self.attempt(url).await {
                Ok(body) => {
                    return Ok(Fetched {
                        body,
                        attempts: attempt,
                    })
                }
                Err(cause) if !cause.is_transient(self.retry_on_429) => {
                    return Err(FetchError::Permanent {
                        url: url.to_string(),
                        attempts: attempt,
                        cause,
                    });
                }
                Err(cause) if attempt == self.retry_attempts => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        cause,
                    });
                }
                Err(cause) => {
                    let wait = self.backoff(attempt);
                    log::debug!(
                        "attempt {attempt}/{} for {url} failed ({cause}), retrying in {wait:?}",
                        self.retry_attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One rate-limited GET; classification only, no retry logic here.
    async fn attempt(&self, url: &Url) -> Result<Vec<u8>, FetchCause> {
        let resp = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, self.pick_user_agent())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        // A reset mid-body is as transient as one mid-handshake.
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchCause::Body(e.to_string()))?;
        Ok(body.to_vec())
    }

    fn pick_user_agent(&self) -> &str {
        if self.user_agents.len() == 1 {
            return &self.user_agents[0];
        }
        let idx = rand::thread_rng().gen_range(0..self.user_agents.len());
        &self.user_agents[idx]
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.retry_backoff.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        Duration::from_secs_f64(exp.min(self.retry_backoff_max.as_secs_f64()))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchCause {
    if e.is_timeout() {
        return FetchCause::Timeout;
    }
    if e.is_connect() {
        // hyper does not expose resolution failures structurally; the
        // resolver error text is the only marker that distinguishes a dead
        // name from a dead host.
        let mut chain: Option<&dyn std::error::Error> = e.source();
        while let Some(inner) = chain {
            if inner.to_string().contains("dns error") {
                return FetchCause::Dns(inner.to_string());
            }
            chain = inner.source();
        }
        return FetchCause::Connect(e.to_string());
    }
    FetchCause::Other(e.to_string())
}
