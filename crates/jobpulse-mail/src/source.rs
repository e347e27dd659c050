use crate::MailError;
use async_trait::async_trait;
use jobpulse_core::RawEmailMessage;
use jobpulse_security::Credential;
use serde::Deserialize;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Read access to the newest messages of one mailbox.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_recent(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<RawEmailMessage>, MailError>;
}

#[derive(Debug, Clone)]
pub struct GmailMailSource {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GmailMailSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailMailSource {
    pub fn new() -> Self {
        Self::with_base_url(GMAIL_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn list_inbox_ids(&self, token: &str, limit: usize) -> Result<Vec<String>, MailError> {
        let response = self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("maxResults", limit.to_string()),
                ("labelIds", "INBOX".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MailError::Api(format!(
                "Gmail message listing failed with status {}",
                response.status()
            )));
        }

        let payload: GmailListResponse = decode_body(&response.bytes().await?)?;
        Ok(payload
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| message.id)
            .take(limit)
            .collect())
    }

    async fn fetch_metadata(&self, token: &str, id: &str) -> Result<RawEmailMessage, MailError> {
        let response = self
            .http
            .get(format!("{}/users/me/messages/{id}", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "Date"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MailError::Api(format!(
                "Gmail fetch of message {id} failed with status {}",
                response.status()
            )));
        }

        let payload: GmailMessage = decode_body(&response.bytes().await?)?;
        Ok(payload.into_raw(id))
    }
}

#[async_trait]
impl MailSource for GmailMailSource {
    async fn fetch_recent(
        &self,
        credential: &Credential,
        limit: usize,
    ) -> Result<Vec<RawEmailMessage>, MailError> {
        let ids = self.list_inbox_ids(&credential.access_token, limit).await?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            messages.push(self.fetch_metadata(&credential.access_token, id).await?);
        }

        tracing::debug!(
            user_key = %credential.user_key,
            fetched = messages.len(),
            "fetched inbox metadata"
        );
        Ok(messages)
    }
}

#[derive(Debug, Deserialize)]
struct GmailListResponse {
    messages: Option<Vec<GmailMessageRef>>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: Option<String>,
    snippet: Option<String>,
    payload: Option<GmailPayload>,
}

#[derive(Debug, Deserialize)]
struct GmailPayload {
    headers: Option<Vec<GmailHeader>>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

impl GmailMessage {
    fn into_raw(self, requested_id: &str) -> RawEmailMessage {
        let headers = self
            .payload
            .and_then(|payload| payload.headers)
            .unwrap_or_default();
        let header = |key: &str| {
            headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(key))
                .map(|header| header.value.clone())
                .unwrap_or_default()
        };

        RawEmailMessage {
            id: self.id.unwrap_or_else(|| requested_id.to_string()),
            from: header("From"),
            subject: header("Subject"),
            date: header("Date"),
            snippet: decode_html_entities(&self.snippet.unwrap_or_default()),
        }
    }
}

/// Gmail snippets are HTML-escaped.
/// Transport errors stay `Http`; a body that is not the expected JSON is `Json`.
fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, MailError> {
    Ok(serde_json::from_slice(body)?)
}

fn decode_html_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}
