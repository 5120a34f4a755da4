//! Outward notification of flagged identities over an HTTP webhook.

use facegate_core::GatingEvent;
use std::time::Duration;
use tokio::runtime::Handle;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Webhook {
    client: reqwest::Client,
    url: String,
}

impl Webhook {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `event` as JSON without waiting for the response.
    pub fn dispatch(&self, runtime: &Handle, event: GatingEvent) {
        let hook = self.clone();
        runtime.spawn(async move {
            if let Err(e) = hook.post(&event).await {
                tracing::warn!(url = %hook.url, error = %e, "webhook delivery failed");
            }
        });
    }

    async fn post(&self, event: &GatingEvent) -> reqwest::Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;
        response.error_for_status()?;
        tracing::debug!(url = %self.url, name = event.name.as_deref(), "webhook delivered");
        Ok(())
    }
}
