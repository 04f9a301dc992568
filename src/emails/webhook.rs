//! Inbound webhook from the email provider: signature check and payload shapes.
//!
//! Deliveries are signed the Svix way. The signed content is
//! `"{svix-id}.{svix-timestamp}.{raw body}"`, keyed with the base64 part of the
//! `whsec_...` secret, and `svix-signature` lists one or more `v1,<base64>`
//! entries separated by spaces.

use axum::http::HeaderMap;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use crate::emails::repo_types::Attachment;

pub const EMAIL_RECEIVED: &str = "email.received";
const TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("webhook secret is not valid base64")]
    InvalidSecret,
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("timestamp outside tolerance")]
    Stale,
    #[error("no matching signature")]
    Mismatch,
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(SignatureError::MissingHeader(name))
}

fn signing_key(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let encoded = secret.trim();
    let encoded = encoded.strip_prefix("whsec_").unwrap_or(encoded);
    Base64::decode_vec(encoded).map_err(|_| SignatureError::InvalidSecret)
}

fn mac_for(key: &[u8], id: &str, timestamp: &str, body: &[u8]) -> Result<Hmac<Sha256>, SignatureError> {
    let mut mac = <Hmac<Sha256>>::new_from_slice(key).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Checks the delivery's signature headers against `secret`.
pub fn verify_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    now: OffsetDateTime,
) -> Result<(), SignatureError> {
    let secret = secret.ok_or(SignatureError::NotConfigured)?;
    let key = signing_key(secret)?;

    let id = header(headers, "svix-id")?;
    let timestamp = header(headers, "svix-timestamp")?;
    let signatures = header(headers, "svix-signature")?;

    let sent_at: i64 = timestamp.parse().map_err(|_| SignatureError::InvalidTimestamp)?;
    if (now.unix_timestamp() - sent_at).abs() > TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let mac = mac_for(&key, id, timestamp, body)?;
    let matched = signatures
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .filter_map(|sig| Base64::decode_vec(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Top-level webhook envelope; `data` is only decoded for events we handle.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ReceivedEmail {
    pub email_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Decoded one by one so a single odd entry does not drop the email.
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct InboundAttachment {
    pub id: String,
    pub filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub content_disposition: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

fn default_content_type() -> String {
    "application/octet-stream".into()
}

impl InboundAttachment {
    pub fn to_attachment(&self, storage_ref: Option<String>) -> Attachment {
        Attachment {
            id: self.id.clone(),
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            content_disposition: self.content_disposition.clone(),
            content_id: self.content_id.clone(),
            storage_ref,
        }
    }
}

#[derive(Debug)]
pub enum ParsedEvent {
    Received(ReceivedEmail),
    /// Any other event type; acknowledged and dropped.
    Other(String),
}

pub fn parse_event(body: &[u8]) -> Result<ParsedEvent, serde_json::Error> {
    let event: WebhookEvent = serde_json::from_slice(body)?;
    if event.kind != EMAIL_RECEIVED {
        return Ok(ParsedEvent::Other(event.kind));
    }
    let received: ReceivedEmail = serde_json::from_value(event.data)?;
    Ok(ParsedEvent::Received(received))
}

impl ReceivedEmail {
    pub fn sent_at(&self) -> Option<OffsetDateTime> {
        let raw = self.created_at.as_deref()?;
        OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
    }

    pub fn inbound_attachments(&self) -> Vec<InboundAttachment> {
        self.attachments
            .iter()
            .filter_map(|raw| match serde_json::from_value::<InboundAttachment>(raw.clone()) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(email_id = %self.email_id, error = %e, "skipping malformed attachment");
                    None
                }
            })
            .collect()
    }
}
