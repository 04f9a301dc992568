use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;

/// Attachment metadata; the bytes live in object storage when `storage_ref` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub content_disposition: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub storage_ref: Option<String>, // object key in the bucket
}

/// A received email.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub id: String, // provider email id, stable across webhook retries
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub message_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub is_read: bool,
    pub replied: bool,
    pub sent_at: Option<OffsetDateTime>, // provider timestamp
    pub received_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct EmailRow {
    pub id: String,
    pub from_addr: String,
    pub to_addrs: Json<Vec<String>>,
    pub cc_addrs: Json<Vec<String>>,
    pub bcc_addrs: Json<Vec<String>>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub message_id: Option<String>,
    pub attachments: Json<Vec<Attachment>>,
    pub is_read: bool,
    pub replied: bool,
    pub sent_at: Option<OffsetDateTime>,
    pub received_at: OffsetDateTime,
}

impl From<EmailRow> for Email {
    fn from(r: EmailRow) -> Self {
        Self {
            id: r.id,
            from: r.from_addr,
            to: r.to_addrs.0,
            cc: r.cc_addrs.0,
            bcc: r.bcc_addrs.0,
            subject: r.subject,
            body_html: r.body_html,
            body_text: r.body_text,
            message_id: r.message_id,
            attachments: r.attachments.0,
            is_read: r.is_read,
            replied: r.replied,
            sent_at: r.sent_at,
            received_at: r.received_at,
        }
    }
}

impl Email {
    pub fn attachment(&self, attachment_id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == attachment_id)
    }

    /// Object keys that have to be removed along with the email.
    pub fn stored_objects(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().filter_map(|a| a.storage_ref.as_deref())
    }
}
