//! The email transport that carries ciphertext bodies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cipher::{decode_from_transport, encode_for_transport};
use crate::error::TransportError;
use crate::message::{Header, TransportMessage};

/// Email transport operations used by the messenger
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Ids of messages matching `query`
    async fn list_messages(&self, access_token: &str, query: &str)
        -> Result<Vec<String>, TransportError>;

    async fn get_message(&self, access_token: &str, id: &str)
        -> Result<TransportMessage, TransportError>;

    /// Send a message built by [`compose_raw`]. Returns the transport's id for it.
    async fn send_message(&self, access_token: &str, raw: &str) -> Result<String, TransportError>;
}

/// Subject line carrying the application marker
pub fn tagged_subject(marker: &str, subject: &str) -> String {
    format!("{} - {}", marker, subject)
}

/// Search query that scopes fetches to application mail
pub fn marker_query(marker: &str) -> String {
    format!("subject:{}", marker)
}

fn header_value<'a>(name: &'static str, value: &'a str) -> Result<&'a str, TransportError> {
    if value.contains(['\r', '\n']) {
        return Err(TransportError::InvalidHeader { name });
    }
    Ok(value)
}

/// Build a raw RFC 822 message and encode it for the transport.
///
/// Header values containing CR or LF are refused.
pub fn compose_raw(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    marker: &str,
) -> Result<String, TransportError> {
    let subject = tagged_subject(marker, subject);
    let message = format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
        header_value("From", from)?,
        header_value("To", to)?,
        header_value("Subject", &subject)?,
        body
    );
    Ok(encode_for_transport(message.as_bytes()))
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    internal_date: String,
    #[serde(default)]
    snippet: String,
    payload: Option<GmailPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Deserialize)]
struct GmailBody {
    data: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl GmailPart {
    fn plain_text(&self) -> Option<String> {
        if self.mime_type == "text/plain" {
            if let Some(data) = self.body.as_ref().and_then(|b| b.data.as_deref()) {
                let bytes = decode_from_transport(data.trim_end_matches('=')).ok()?;
                return String::from_utf8(bytes).ok();
            }
        }
        self.parts.iter().find_map(GmailPart::plain_text)
    }
}

impl TryFrom<GmailMessage> for TransportMessage {
    type Error = TransportError;

    fn try_from(message: GmailMessage) -> Result<Self, Self::Error> {
        let internal_date = message.internal_date.parse::<u64>().map_err(|_| {
            TransportError::InvalidResponse(format!(
                "message {} has invalid internalDate {:?}",
                message.id, message.internal_date
            ))
        })?;

        let (headers, body) = match message.payload {
            Some(payload) => {
                let body = payload.plain_text();
                (payload.headers, body)
            }
            None => (Vec::new(), None),
        };
        let body = body
            .map(|b| b.trim_end().to_string())
            .unwrap_or(message.snippet);

        Ok(TransportMessage {
            id: message.id,
            internal_date,
            headers,
            body,
        })
    }
}

/// Gmail REST API transport
#[derive(Debug, Clone)]
pub struct GmailTransport {
    http: reqwest::Client,
    base_url: String,
}

impl GmailTransport {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn check(endpoint: &str, response: &reqwest::Response) -> Result<(), TransportError> {
        if response.status().is_success() {
            return Ok(());
        }
        tracing::error!("{} returned {}", endpoint, response.status());
        Err(TransportError::Status {
            endpoint: endpoint.to_string(),
            status: response.status().as_u16(),
        })
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn list_messages(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("q", query)])
            .send()
            .await?;
        Self::check(&url, &response)?;

        let list: ListResponse = response.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<TransportMessage, TransportError> {
        let url = format!("{}/messages/{}", self.base_url, id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        Self::check(&url, &response)?;

        let message: GmailMessage = response.json().await?;
        message.try_into()
    }

    async fn send_message(&self, access_token: &str, raw: &str) -> Result<String, TransportError> {
        let url = format!("{}/messages/send", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&SendRequest { raw })
            .send()
            .await?;
        Self::check(&url, &response)?;

        let sent: SendResponse = response.json().await?;
        tracing::info!("message sent with id {}", sent.id);
        Ok(sent.id)
    }
}
