use async_trait::async_trait;
use log::{debug, error};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// A plain single-recipient message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }
}

/// Outbound delivery. The workflow never retries; it only reports failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_one(&self, email: Email) -> Result<(), NotifyError>;

    /// One templated message per recipient, `data[i]` rendering for `to[i]`.
    async fn send_bulk(
        &self,
        to: Vec<String>,
        template: &str,
        data: Vec<Value>,
    ) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Destination {
    to: String,
    data: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest<'a> {
    from: &'a str,
    template: &'a str,
    destinations: Vec<Destination>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    email: &'a Email,
}

/// Client for a JSON mail gateway exposing `/send` and `/send-bulk`.
pub struct HttpMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl HttpMailer {
    pub fn new(base_url: &str, api_key: &str, sender: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), NotifyError> {
        let url = format!("{}/{}", self.base_url, path);
        match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                error!("Mail gateway rejected {}: {}", path, resp.status());
                Err(NotifyError(format!("mail gateway error: {}", resp.status())))
            }
            Err(e) => {
                error!("Mail gateway unreachable: {}", e);
                Err(NotifyError(format!("mail gateway unreachable: {e}")))
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send_one(&self, email: Email) -> Result<(), NotifyError> {
        debug!("Sending '{}' to {}", email.subject, email.to);
        let request = SendRequest {
            from: &self.sender,
            email: &email,
        };
        self.post("send", &request).await
    }

    async fn send_bulk(
        &self,
        to: Vec<String>,
        template: &str,
        data: Vec<Value>,
    ) -> Result<(), NotifyError> {
        if to.len() != data.len() {
            return Err(NotifyError(format!(
                "{} recipients but {} data entries",
                to.len(),
                data.len()
            )));
        }
        if to.is_empty() {
            return Ok(());
        }
        debug!("Sending template {} to {} recipients", template, to.len());
        let request = BulkRequest {
            from: &self.sender,
            template,
            destinations: to
                .into_iter()
                .zip(data)
                .map(|(to, data)| Destination { to, data })
                .collect(),
        };
        self.post("send-bulk", &request).await
    }
}
