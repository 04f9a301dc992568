use std::{collections::BTreeMap, time::Duration};

use anyhow::Context;
use askama::{Html, MarkupDisplay};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::emails::repo_types::Email;

const RESEND_API: &str = "https://api.resend.com";

/// Body of a Resend `POST /emails` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Sends once; returns the provider's message id.
    async fn send(&self, api_key: &str, email: &OutgoingEmail) -> anyhow::Result<String>;
}

pub struct ResendMailer {
    client: reqwest::Client,
    base_url: String,
}

impl ResendMailer {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build resend http client")?;
        Ok(Self {
            client,
            base_url: RESEND_API.to_string(),
        })
    }
}

#[async_trait]
impl MailSender for ResendMailer {
    #[instrument(skip(self, api_key, email), fields(to = ?email.to))]
    async fn send(&self, api_key: &str, email: &OutgoingEmail) -> anyhow::Result<String> {
        let res = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .json(email)
            .send()
            .await
            .context("resend request failed")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("resend returned {status}: {body}");
        }
        let sent: SendResponse = res.json().await.context("decode resend response")?;
        debug!(id = %sent.id, "email sent");
        Ok(sent.id)
    }
}

/// `"Jane <jane@example.com>"` → `"jane@example.com"`.
pub fn sender_address(from: &str) -> &str {
    match (from.find('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].trim(),
        _ => from.trim(),
    }
}

pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Builds the reply to `original`; line breaks in `message` are kept.
pub fn compose_reply(original: &Email, from: &str, message: &str) -> OutgoingEmail {
    let escaped = MarkupDisplay::new_unsafe(message.trim(), Html).to_string();
    let html = format!("<p>{}</p>", escaped.replace('\n', "<br>"));
    let mut headers = BTreeMap::new();
    if let Some(message_id) = original.message_id.as_deref().filter(|m| !m.is_empty()) {
        headers.insert("In-Reply-To".to_string(), message_id.to_string());
        headers.insert("References".to_string(), message_id.to_string());
    }
    OutgoingEmail {
        from: from.to_string(),
        to: vec![sender_address(&original.from).to_string()],
        subject: reply_subject(&original.subject),
        html,
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn email(from: &str, subject: &str, message_id: Option<&str>) -> Email {
        Email {
            id: "em_1".into(),
            from: from.into(),
            to: vec!["inbox@example.com".into()],
            cc: vec![],
            bcc: vec![],
            subject: subject.into(),
            body_html: None,
            body_text: Some("hi".into()),
            message_id: message_id.map(str::to_string),
            attachments: vec![],
            is_read: false,
            replied: false,
            sent_at: None,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn sender_address_handles_display_names() {
        assert_eq!(sender_address("Jane Doe <jane@example.com>"), "jane@example.com");
        assert_eq!(sender_address("jane@example.com"), "jane@example.com");
        assert_eq!(sender_address(" broken <jane@example.com "), "broken <jane@example.com");
    }

    #[test]
    fn reply_subject_is_prefixed_once() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("Re: Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(reply_subject(""), "Re: ");
    }

    #[test]
    fn reply_body_is_escaped() {
        let out = compose_reply(
            &email("a@b.co", "Hi", None),
            "me@example.com",
            "<script>x</script>\nbye",
        );
        assert_eq!(out.html, "<p>&lt;script&gt;x&lt;/script&gt;<br>bye</p>");
        assert!(out.headers.is_empty());
        assert_eq!(out.to, vec!["a@b.co".to_string()]);
    }

    #[test]
    fn reply_body_escapes_quotes_and_ampersands() {
        let out = compose_reply(&email("a@b.co", "Hi", None), "me@example.com", "Tom & \"Jerry\"");
        assert!(out.html.contains("Tom &amp; &quot;Jerry&quot;"));
        assert!(!out.html.contains('"'));
    }

    #[test]
    fn reply_threads_on_message_id() {
        let out = compose_reply(
            &email("Jane <jane@example.com>", "Plans", Some("<abc@mail>")),
            "me@example.com",
            "sure",
        );
        assert_eq!(out.subject, "Re: Plans");
        assert_eq!(out.headers.get("In-Reply-To").map(String::as_str), Some("<abc@mail>"));

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["to"][0], "jane@example.com");
        assert_eq!(json["headers"]["References"], "<abc@mail>");
    }

    #[test]
    fn headers_are_omitted_when_empty() {
        let out = compose_reply(&email("a@b.co", "Hi", None), "me@example.com", "ok");
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("headers").is_none());
    }
}
