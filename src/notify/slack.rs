use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid webhook URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("encoding payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("slack webhook request error: {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attachment {
    pub title: String,
    pub pretext: String,
    pub text: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payload {
    pub channel: String,
    pub username: String,
    pub attachments: Vec<Attachment>,
}

/// Incoming-webhook poster. One attachment per message.
#[derive(Debug, Clone)]
pub struct SlackClient {
    webhook_url: Url,
    channel: String,
    username: String,
    client: Client,
}

impl SlackClient {
    pub fn new(webhook_url: &str, channel: &str, username: &str) -> Result<Self, NotifyError> {
        let webhook_url = Url::parse(webhook_url).map_err(|source| NotifyError::InvalidUrl {
            url: webhook_url.to_string(),
            source,
        })?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            webhook_url,
            channel: channel.to_string(),
            username: username.to_string(),
            client,
        })
    }

    pub fn webhook_url(&self) -> &Url {
        &self.webhook_url
    }

    fn payload(&self, title: &str, pretext: &str, text: &str, color: &str) -> Payload {
        Payload {
            channel: self.channel.clone(),
            username: self.username.clone(),
            attachments: vec![Attachment {
                title: title.to_string(),
                pretext: pretext.to_string(),
                text: text.to_string(),
                color: color.to_string(),
            }],
        }
    }

    /// Posts `payload=<json>` as a form; anything but 200 is an error.
    pub async fn post(
        &self,
        title: &str,
        pretext: &str,
        text: &str,
        color: &str,
    ) -> Result<(), NotifyError> {
        let body = serde_json::to_string(&self.payload(title, pretext, text, color))?;
        let response = self
            .client
            .post(self.webhook_url.clone())
            .form(&[("payload", body)])
            .send()
            .await?;

        let status = response.status();
        debug!(%status, channel = %self.channel, "slack webhook answered");
        if status != StatusCode::OK {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}
