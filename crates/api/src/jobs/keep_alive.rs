//! Keep-alive ping job.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::scheduler::{Job, JobContext, JobError};

/// Periodically requests a URL so idle hosting does not unload the site.
pub struct KeepAliveJob {
    client: Client,
    url: String,
}

impl KeepAliveJob {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("farmhand/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Job for KeepAliveJob {
    fn name(&self) -> &'static str {
        "keep_alive"
    }

    fn default_period(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        debug!(url = %self.url, "Sending keep-alive ping");

        let response = self.client.get(&self.url).send().await?.error_for_status()?;

        info!(url = %self.url, status = response.status().as_u16(), "Keep-alive ping succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_job_metadata() {
        let job = KeepAliveJob::new("http://localhost/ping", Duration::from_secs(5)).unwrap();
        assert_eq!(job.name(), "keep_alive");
        assert_eq!(job.url(), "http://localhost/ping");
        assert_eq!(job.default_period(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_unreachable_url_is_an_error() {
        // Port 9 on loopback is discard; nothing listens there in CI.
        let job = KeepAliveJob::new("http://127.0.0.1:9/ping", Duration::from_secs(2)).unwrap();
        let ctx = JobContext::new(CancellationToken::new(), 1);

        let result = job.execute(&ctx).await;
        assert!(matches!(result, Err(JobError::Http(_))));
    }
}
