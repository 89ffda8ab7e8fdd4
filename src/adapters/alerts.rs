//! Operator alert sinks
//!
//! `LogAlertSink` writes every alert through tracing. `WebhookAlertSink`
//! posts a Discord-style `{"content": ...}` body. `FanoutAlertSink` sends
//! one alert to several sinks.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AlertsSection;
use crate::ports::alerts::{AlertSeverity, AlertSink, OperatorAlert};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),
}

/// Alerts as log lines, level by severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, alert: OperatorAlert) {
        let summary = alert.summary();
        match alert.severity {
            AlertSeverity::Info => info!(alert = %summary, "Operator alert"),
            AlertSeverity::Warning => warn!(alert = %summary, "Operator alert"),
            AlertSeverity::Critical => error!(alert = %summary, "Operator alert"),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    content: String,
}

#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    http: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let http = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { http, url: url.into() })
    }

    fn body(alert: &OperatorAlert) -> WebhookBody {
        let tag = match alert.severity {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        };
        WebhookBody {
            content: format!("[{}] {}", tag, alert.summary()),
        }
    }

    pub async fn post(&self, alert: &OperatorAlert) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(&self.url)
            .json(&Self::body(alert))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn alert(&self, alert: OperatorAlert) {
        // delivery failure must not block the caller
        if let Err(e) = self.post(&alert).await {
            warn!(error = %e, "Webhook alert delivery failed");
        }
    }
}

/// Delivers each alert to every inner sink in order
#[derive(Clone, Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    /// Log sink always, webhook when enabled and a URL resolves
    pub fn from_config(section: &AlertsSection) -> Result<Self, WebhookError> {
        let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
        match section.get_webhook_url() {
            Some(url) if section.webhook_enabled => {
                sinks.push(Arc::new(WebhookAlertSink::new(url)?));
            }
            None if section.webhook_enabled => {
                warn!("Webhook alerts enabled but no URL configured");
            }
            _ => {}
        }
        Ok(Self { sinks })
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn alert(&self, alert: OperatorAlert) {
        for sink in &self.sinks {
            sink.alert(alert.clone()).await;
        }
    }
}
