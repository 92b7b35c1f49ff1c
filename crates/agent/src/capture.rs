use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autostream_core::config::{LeadCaptureConfig, LeadCaptureMode};
use autostream_core::domain::CompletedLead;
use tracing::info;

#[async_trait]
pub trait LeadCaptureSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn capture(&self, lead: &CompletedLead) -> Result<()>;
}

/// Default sink: records the lead in the structured log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogLeadCapture;

#[async_trait]
impl LeadCaptureSink for LogLeadCapture {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn capture(&self, lead: &CompletedLead) -> Result<()> {
        info!(
            event_name = "agent.lead.captured",
            sink = self.name(),
            "Lead captured successfully: {}, {}, {}",
            lead.name,
            lead.email,
            lead.platform
        );
        Ok(())
    }
}

/// Posts the lead as JSON; any non-2xx answer is a failed capture.
pub struct WebhookLeadCapture {
    client: reqwest::Client,
    url: String,
}

impl WebhookLeadCapture {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl LeadCaptureSink for WebhookLeadCapture {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn capture(&self, lead: &CompletedLead) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(lead)
            .send()
            .await
            .with_context(|| format!("lead webhook `{}` unreachable", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("lead webhook answered {status}");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLeadCapture {
    captured: Mutex<Vec<CompletedLead>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryLeadCapture {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn captured(&self) -> Vec<CompletedLead> {
        match self.captured.lock() {
            Ok(captured) => captured.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadCaptureSink for InMemoryLeadCapture {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn capture(&self, lead: &CompletedLead) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("lead sink unavailable");
        }
        match self.captured.lock() {
            Ok(mut captured) => captured.push(lead.clone()),
            Err(poisoned) => poisoned.into_inner().push(lead.clone()),
        }
        Ok(())
    }
}

pub fn sink_from_config(
    config: &LeadCaptureConfig,
    timeout: Duration,
) -> Result<Arc<dyn LeadCaptureSink>> {
    match config.mode {
        LeadCaptureMode::Log => Ok(Arc::new(LogLeadCapture)),
        LeadCaptureMode::Webhook => {
            let Some(url) = config.webhook_url.as_deref() else {
                bail!("lead_capture.webhook_url is required for webhook mode");
            };
            Ok(Arc::new(WebhookLeadCapture::new(url, timeout)?))
        }
    }
}
