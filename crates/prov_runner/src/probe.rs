//! HTTP health probing.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::RunnerResult;

/// Issues a single GET against a health endpoint.
///
/// Only the response status matters; the body is never read.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Return the HTTP status code, or an error if no response arrived.
    async fn status(&self, url: &str) -> RunnerResult<u16>;
}

/// `reqwest`-backed probe.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> RunnerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn status(&self, url: &str) -> RunnerResult<u16> {
        debug!("Probing {}", url);
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Whether a status code counts as healthy.
pub fn is_healthy(status: u16) -> bool {
    (200..300).contains(&status)
}
