//! Threshold alerts for hardware samples.

use crate::types::HardwareSample;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

const SLACK_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack rejected message: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 90.0,
            ram: 90.0,
            disk: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cpu,
    Ram,
    Disk,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Cpu => "CPU",
            Metric::Ram => "RAM",
            Metric::Disk => "Disk",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub metric: Metric,
    pub value: f64,
    pub at: String,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":red_square: {} above limit! {}% at {}", self.metric, self.value, self.at)
    }
}

/// Metrics of `hw` strictly above their threshold, in cpu, ram, disk order.
pub fn breaches(hw: &HardwareSample, limits: &Thresholds) -> Vec<Breach> {
    [
        (Metric::Cpu, hw.cpu_percent, limits.cpu),
        (Metric::Ram, hw.ram_percent, limits.ram),
        (Metric::Disk, hw.disk_percent, limits.disk),
    ]
    .into_iter()
    .filter(|(_, value, limit)| value > limit)
    .map(|(metric, value, _)| Breach {
        metric,
        value,
        at: hw.capture_time.clone(),
    })
    .collect()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), AlertError>;
}

/// Used when no chat channel is configured: alerts only reach the console.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        warn!(alert = message, "threshold exceeded");
        Ok(())
    }
}

pub struct SlackNotifier {
    http: reqwest::Client,
    token: String,
    channel: String,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(token: String, channel: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            channel,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        let resp: SlackResponse = self
            .http
            .post(SLACK_POST_MESSAGE)
            .bearer_auth(&self.token)
            .json(&json!({ "channel": self.channel, "text": message }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !resp.ok {
            return Err(AlertError::Rejected(
                resp.error.unwrap_or_else(|| "unknown".into()),
            ));
        }
        info!(channel = %self.channel, "alert sent");
        Ok(())
    }
}
