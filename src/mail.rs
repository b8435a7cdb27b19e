//! Reading captured mail from a MailHog container's HTTP API.

use crate::env::timeouts;
use crate::error::{Result, ServerError};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container port of MailHog's web UI and API.
pub const MAILHOG_API_PORT: u16 = 8025;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 5000;

const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAccount {
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailContent {
    pub headers: BTreeMap<String, Vec<String>>,
    pub size: u64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSummary {
    pub id: String,
    pub from: MailAccount,
    pub to: Vec<MailAccount>,
    pub created: DateTime<Utc>,
    pub content: MailContent,
}

// MailHog's own JSON shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HogPath {
    #[serde(default)]
    mailbox: String,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HogContent {
    #[serde(default)]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HogMessage {
    #[serde(rename = "ID")]
    id: String,
    from: HogPath,
    #[serde(default)]
    to: Vec<HogPath>,
    created: DateTime<Utc>,
    content: HogContent,
}

impl From<HogPath> for MailAccount {
    fn from(path: HogPath) -> Self {
        Self {
            name: path.mailbox,
            domain: path.domain,
        }
    }
}

impl From<HogMessage> for MailSummary {
    fn from(message: HogMessage) -> Self {
        Self {
            id: message.id,
            from: message.from.into(),
            to: message.to.into_iter().map(MailAccount::from).collect(),
            created: message.created,
            content: MailContent {
                headers: message.content.headers,
                size: message.content.size,
                body: message.content.body,
            },
        }
    }
}

/// Clamp a requested message count into `[1, 5000]`, with 0 meaning 50.
pub fn clamp_limit(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_LIMIT,
        n => n.min(MAX_LIMIT),
    }
}

fn upstream(message: impl std::fmt::Display) -> ServerError {
    ServerError::Upstream {
        service: "MailHog".to_string(),
        message: message.to_string(),
    }
}

fn from_reqwest(err: reqwest::Error) -> ServerError {
    if err.is_timeout() {
        ServerError::Timeout(timeouts::MAIL_API)
    } else {
        upstream(err)
    }
}

/// Client for MailHog's `/api/v1` endpoints on a published host port.
#[derive(Debug, Clone)]
pub struct MailClient {
    http: Client,
    host: String,
}

impl MailClient {
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeouts::MAIL_API)
            .build()
            .map_err(upstream)?;
        Ok(Self {
            http,
            host: host.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut response = self.http.get(url).send().await.map_err(from_reqwest)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServerError::NotFound(format!("mail resource {}", url)));
        }
        if !response.status().is_success() {
            return Err(upstream(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(from_reqwest)? {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(upstream("response body exceeds 1 MiB"));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Most recent messages, newest first as MailHog returns them.
    pub async fn messages(&self, port: u16, limit: usize) -> Result<Vec<MailSummary>> {
        let url = format!(
            "http://{}:{}/api/v1/messages?limit={}",
            self.host,
            port,
            clamp_limit(limit)
        );
        let messages: Vec<HogMessage> = self.get_json(&url).await?;
        Ok(messages.into_iter().map(MailSummary::from).collect())
    }

    pub async fn message(&self, port: u16, id: &str) -> Result<MailSummary> {
        let url = format!("http://{}:{}/api/v1/messages/{}", self.host, port, id);
        let message: HogMessage = self.get_json(&url).await?;
        Ok(message.into())
    }
}
