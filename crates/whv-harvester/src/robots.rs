use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use texting_robots::Robot;
use url::Url;

/// robots.txt policy gate. One robots.txt is fetched and parsed per host,
/// then cached for the rest of the run.
///
/// A missing, unreachable or unparsable robots.txt counts as allow-all,
/// matching the common robots-parser convention.
pub struct RobotsGate {
    client: reqwest::Client,
    user_agent: String,
    // host:port -> parsed robots, None when no usable robots.txt exists
    cache: Mutex<HashMap<String, Option<Robot>>>,
}

impl RobotsGate {
    pub fn new(user_agent: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Whether policy permits fetching `url`. Consulted by the scheduler
    /// before the first fetch to a host; disallowed URLs never reach the
    /// fetcher.
    pub async fn allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            // No host means nothing to consult; the fetcher will deal with it.
            return true;
        };
        let key = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(robot) = cache.get(&key) {
                return Self::check(robot.as_ref(), url);
            }
        }

        let robot = self.fetch_robots(url).await;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        // Two workers can race on the same host; first insert wins.
        let robot = cache.entry(key).or_insert(robot);
        Self::check(robot.as_ref(), url)
    }

    fn check(robot: Option<&Robot>, url: &Url) -> bool {
        match robot {
            Some(robot) => robot.allowed(url.as_str()),
            None => true,
        }
    }

    async fn fetch_robots(&self, url: &Url) -> Option<Robot> {
        let robots_url = url.join("/robots.txt").ok()?;
        let resp = match self.client.get(robots_url.as_str()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("could not fetch {robots_url}: {e}; assuming allowed");
                return None;
            }
        };
        if !resp.status().is_success() {
            log::debug!("{robots_url} answered {}; assuming allowed", resp.status());
            return None;
        }
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("could not read {robots_url}: {e}; assuming allowed");
                return None;
            }
        };
        match Robot::new(&self.user_agent, &body) {
            Ok(robot) => Some(robot),
            Err(e) => {
                log::warn!("could not parse {robots_url}: {e}; assuming allowed");
                None
            }
        }
    }
}
