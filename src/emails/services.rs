use anyhow::Context;
use bytes::{Bytes, BytesMut};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::repo_types::User,
    emails::{
        dto::Pagination,
        repo::EmailRepo,
        repo_types::{Attachment, Email},
        webhook::{parse_event, InboundAttachment, ParsedEvent, ReceivedEmail},
    },
    error::AppError,
    mailer::compose_reply,
    settings::{repo::SettingsRepo, repo_types::ApiSettings},
    state::AppState,
    storage::{attachment_key, StorageClient},
};

const PRESIGN_TTL_SECS: u64 = 10 * 60;
/// Largest attachment copied into the bucket; bigger ones stay metadata-only.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Stored(String),
    /// The provider re-delivered an email that is already stored.
    Duplicate(String),
    /// Not an `email.received` event, or a payload we could not read.
    Ignored(String),
}

/// Turns a verified webhook body into a stored email. Only store failures are
/// errors; anything wrong with the payload itself is acknowledged and dropped.
#[instrument(skip(state, settings, body), fields(len = body.len()))]
pub async fn receive(
    state: &AppState,
    settings: &ApiSettings,
    body: &[u8],
) -> anyhow::Result<ReceiveOutcome> {
    let received = match parse_event(body) {
        Ok(ParsedEvent::Received(received)) => received,
        Ok(ParsedEvent::Other(kind)) => {
            debug!(%kind, "ignoring webhook event");
            return Ok(ReceiveOutcome::Ignored(format!("event type {kind}")));
        }
        Err(e) => {
            warn!(error = %e, "malformed webhook payload");
            return Ok(ReceiveOutcome::Ignored("malformed payload".into()));
        }
    };

    let id = received.email_id.clone();
    if state.store.email_exists(&id).await? {
        info!(email_id = %id, "duplicate delivery");
        return Ok(ReceiveOutcome::Duplicate(id));
    }

    let attachments = store_attachments(state, settings, &id, received.inbound_attachments()).await;
    let email = build_email(received, attachments, OffsetDateTime::now_utc());

    if state.store.insert_email(&email).await? {
        info!(email_id = %id, from = %email.from, attachments = email.attachments.len(), "email received");
        Ok(ReceiveOutcome::Stored(id))
    } else {
        Ok(ReceiveOutcome::Duplicate(id))
    }
}

fn build_email(received: ReceivedEmail, attachments: Vec<Attachment>, now: OffsetDateTime) -> Email {
    let sent_at = received.sent_at();
    Email {
        id: received.email_id,
        from: received.from,
        to: received.to,
        cc: received.cc,
        bcc: received.bcc,
        subject: received.subject,
        body_html: received.html.filter(|h| !h.trim().is_empty()),
        body_text: received.text.filter(|t| !t.trim().is_empty()),
        message_id: received.message_id,
        attachments,
        is_read: false,
        replied: false,
        sent_at,
        received_at: now,
    }
}

/// Copies downloadable attachments into the bucket. Every failure is logged
/// and leaves that attachment without a `storage_ref`.
async fn store_attachments(
    state: &AppState,
    settings: &ApiSettings,
    email_id: &str,
    inbound: Vec<InboundAttachment>,
) -> Vec<Attachment> {
    let wants_storage = inbound.iter().any(|a| a.download_url.is_some());
    let client = if wants_storage {
        match state.storage.connect(settings).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "storage unavailable, attachments kept as metadata");
                None
            }
        }
    } else {
        None
    };

    let mut out = Vec::with_capacity(inbound.len());
    for a in inbound {
        let storage_ref = match (&client, a.download_url.as_deref()) {
            (Some(client), Some(url)) => {
                match copy_attachment(&state.http, client.as_ref(), email_id, &a, url).await {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(email_id, attachment = %a.id, error = ?e, "attachment upload failed");
                        None
                    }
                }
            }
            _ => None,
        };
        out.push(a.to_attachment(storage_ref));
    }
    out
}

async fn copy_attachment(
    http: &reqwest::Client,
    client: &dyn StorageClient,
    email_id: &str,
    attachment: &InboundAttachment,
    url: &str,
) -> anyhow::Result<String> {
    let res = http
        .get(url)
        .send()
        .await
        .context("download attachment")?
        .error_for_status()
        .context("download attachment")?;
    let body = read_capped(res, MAX_ATTACHMENT_BYTES).await?;

    let key = attachment_key(email_id, &attachment.id, &attachment.filename);
    client
        .put_object(&key, body, &attachment.content_type)
        .await
        .with_context(|| format!("put_object {key}"))?;
    Ok(key)
}

/// Reads the body in chunks, giving up as soon as it passes `cap` bytes.
async fn read_capped(mut res: reqwest::Response, cap: usize) -> anyhow::Result<Bytes> {
    if let Some(len) = res.content_length() {
        if len > cap as u64 {
            anyhow::bail!("attachment is {len} bytes, limit is {cap}");
        }
    }
    let mut buf = BytesMut::new();
    while let Some(chunk) = res.chunk().await.context("read attachment body")? {
        if buf.len() + chunk.len() > cap {
            anyhow::bail!("attachment exceeds {cap} bytes");
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// One page of the inbox, newest first.
#[derive(Debug)]
pub struct Inbox {
    pub emails: Vec<Email>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl Inbox {
    pub fn prev_offset(&self) -> Option<i64> {
        (self.offset > 0).then(|| (self.offset - self.limit).max(0))
    }

    pub fn next_offset(&self) -> Option<i64> {
        let next = self.offset + self.emails.len() as i64;
        (next < self.total && !self.emails.is_empty()).then_some(next)
    }
}

pub async fn list_inbox(state: &AppState, user: &User, page: Pagination) -> Result<Inbox, AppError> {
    let page = page.normalized();
    let emails = state.store.list_emails(page.limit, page.offset).await?;
    let total = state.store.count_emails().await?;
    debug!(username = %user.username, total, offset = page.offset, "inbox listed");
    Ok(Inbox {
        emails,
        total,
        limit: page.limit,
        offset: page.offset,
    })
}

/// Fetches an email for display and marks it read.
pub async fn open_email(state: &AppState, id: &str) -> Result<Email, AppError> {
    let mut email = state
        .store
        .find_email(id)
        .await?
        .ok_or(AppError::NotFound("Email"))?;
    if !email.is_read {
        state.store.mark_read(id).await?;
        email.is_read = true;
    }
    Ok(email)
}

/// Sends one reply through the provider. `replied` is only set once the
/// provider has accepted the message.
#[instrument(skip(state, message))]
pub async fn reply(state: &AppState, id: &str, message: &str) -> Result<(), AppError> {
    if message.trim().is_empty() {
        return Err(AppError::Validation("Reply cannot be empty".into()));
    }

    let email = state
        .store
        .find_email(id)
        .await?
        .ok_or(AppError::NotFound("Email"))?;

    let settings = state.store.load_settings().await?;
    let Some(api_key) = settings.resend_key() else {
        warn!(email_id = %id, "reply attempted without a resend api key");
        return Err(AppError::Config("Resend API key not configured".into()));
    };

    let outgoing = compose_reply(&email, &state.config.mail_from, message);
    match state.mailer.send(api_key, &outgoing).await {
        Ok(provider_id) => {
            state.store.mark_replied(id).await?;
            info!(email_id = %id, %provider_id, "reply sent");
            Ok(())
        }
        Err(e) => {
            warn!(email_id = %id, error = ?e, "reply failed");
            Err(AppError::Upstream(format!("Failed to send reply: {e}")))
        }
    }
}

/// Removes the email, then its stored attachments on a best-effort basis.
#[instrument(skip(state))]
pub async fn delete(state: &AppState, id: &str) -> Result<(), AppError> {
    let email = state
        .store
        .delete_email(id)
        .await?
        .ok_or(AppError::NotFound("Email"))?;
    info!(email_id = %id, "email deleted");

    let keys: Vec<&str> = email.stored_objects().collect();
    if keys.is_empty() {
        return Ok(());
    }

    let client = match state.store.load_settings().await {
        Ok(settings) => state.storage.connect(&settings).await,
        Err(e) => Err(e),
    };
    let client = match client {
        Ok(Some(client)) => client,
        Ok(None) => {
            warn!(email_id = %id, objects = keys.len(), "storage not configured, objects left in bucket");
            return Ok(());
        }
        Err(e) => {
            warn!(email_id = %id, error = ?e, "storage unavailable, objects left in bucket");
            return Ok(());
        }
    };

    for key in keys {
        if let Err(e) = client.delete_object(key).await {
            warn!(email_id = %id, key, error = ?e, "attachment delete failed");
        }
    }
    Ok(())
}

/// Where the browser should go to download a stored attachment.
pub async fn attachment_url(state: &AppState, id: &str, attachment_id: &str) -> Result<String, AppError> {
    let email = state
        .store
        .find_email(id)
        .await?
        .ok_or(AppError::NotFound("Email"))?;
    let key = email
        .attachment(attachment_id)
        .and_then(|a| a.storage_ref.clone())
        .ok_or(AppError::NotFound("Attachment"))?;

    let settings = state.store.load_settings().await?;
    if let Some(base) = settings.public_url() {
        return Ok(format!("{base}/{key}"));
    }

    let client = state
        .storage
        .connect(&settings)
        .await?
        .ok_or_else(|| AppError::Config("Attachment storage is not configured".into()))?;
    client
        .presign_get(&key, PRESIGN_TTL_SECS)
        .await
        .map_err(|e| AppError::Upstream(format!("Could not sign attachment URL: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::fakes::{FakeMailer, FakeStorage};

    pub(crate) fn received_body(id: &str, attachments: &str) -> Vec<u8> {
        format!(
            r#"{{
                "type": "email.received",
                "created_at": "2024-02-22T23:41:12.126Z",
                "data": {{
                    "email_id": "{id}",
                    "created_at": "2024-02-22T23:41:11+00:00",
                    "from": "Jane <jane@example.com>",
                    "to": ["inbox@example.com"],
                    "subject": "Hello {id}",
                    "message_id": "<{id}@mail.example>",
                    "text": "hi there",
                    "attachments": {attachments}
                }}
            }}"#
        )
        .into_bytes()
    }

    fn storage_settings() -> ApiSettings {
        ApiSettings {
            resend_api_key: "re_test".into(),
            r2_account_id: "acct".into(),
            r2_access_key_id: "key".into(),
            r2_secret_access_key: "secret".into(),
            r2_bucket_name: "bucket".into(),
            ..Default::default()
        }
    }

    fn member() -> User {
        User {
            username: "member".into(),
            email: "member@example.com".into(),
            password_hash: String::new(),
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        }
    }

    fn stored_email(id: &str, keys: &[&str]) -> Email {
        Email {
            id: id.into(),
            from: "Jane <jane@example.com>".into(),
            to: vec!["inbox@example.com".into()],
            cc: vec![],
            bcc: vec![],
            subject: "Hi".into(),
            body_html: None,
            body_text: Some("hello".into()),
            message_id: Some("<orig@mail>".into()),
            attachments: keys
                .iter()
                .enumerate()
                .map(|(i, key)| Attachment {
                    id: format!("att_{i}"),
                    filename: "f.txt".into(),
                    content_type: "text/plain".into(),
                    content_disposition: None,
                    content_id: None,
                    storage_ref: Some(key.to_string()),
                })
                .collect(),
            is_read: false,
            replied: false,
            sent_at: None,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn receive_stores_once_per_provider_id() {
        let state = AppState::fake();
        let settings = ApiSettings::default();
        let body = received_body("em_1", "[]");

        assert_eq!(
            receive(&state, &settings, &body).await.unwrap(),
            ReceiveOutcome::Stored("em_1".into())
        );
        state.store.mark_read("em_1").await.unwrap();
        assert_eq!(
            receive(&state, &settings, &body).await.unwrap(),
            ReceiveOutcome::Duplicate("em_1".into())
        );

        let email = state.store.find_email("em_1").await.unwrap().unwrap();
        assert!(email.is_read);
        assert_eq!(email.subject, "Hello em_1");
        assert!(email.sent_at.is_some());
        assert_eq!(state.store.count_emails().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn receive_ignores_garbage_and_other_events() {
        let state = AppState::fake();
        let settings = ApiSettings::default();
        assert!(matches!(
            receive(&state, &settings, b"{not json").await.unwrap(),
            ReceiveOutcome::Ignored(_)
        ));
        assert!(matches!(
            receive(&state, &settings, br#"{"type":"email.bounced","data":{}}"#).await.unwrap(),
            ReceiveOutcome::Ignored(_)
        ));
        assert_eq!(state.store.count_emails().await.unwrap(), 0);
    }

    fn response(body: Vec<u8>) -> reqwest::Response {
        reqwest::Response::from(axum::http::Response::new(body))
    }

    #[tokio::test]
    async fn read_capped_accepts_bodies_within_the_limit() {
        let body = read_capped(response(vec![7u8; 64]), 64).await.unwrap();
        assert_eq!(body.len(), 64);
    }

    #[tokio::test]
    async fn read_capped_rejects_oversized_bodies() {
        let err = read_capped(response(vec![0u8; 65]), 64).await.unwrap_err();
        assert!(err.to_string().contains("64"));
    }

    #[tokio::test]
    async fn failed_attachment_download_keeps_the_email() {
        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with(Arc::new(FakeMailer::default()), storage.clone());
        let body = received_body(
            "em_att",
            r#"[{"id":"att_1","filename":"a.pdf","content_type":"application/pdf",
                 "download_url":"http://127.0.0.1:9/unreachable"},
                {"id":"att_2","filename":"b.txt"}]"#,
        );

        let outcome = receive(&state, &storage_settings(), &body).await.unwrap();
        assert_eq!(outcome, ReceiveOutcome::Stored("em_att".into()));

        let email = state.store.find_email("em_att").await.unwrap().unwrap();
        assert_eq!(email.attachments.len(), 2);
        assert!(email.attachments.iter().all(|a| a.storage_ref.is_none()));
        assert_eq!(email.attachments[1].content_type, "application/octet-stream");
        assert!(storage.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbox_pages_newest_first() {
        let state = AppState::fake();
        let base = OffsetDateTime::now_utc();
        for i in 0..5 {
            let mut e = stored_email(&format!("em_{i}"), &[]);
            e.received_at = base + time::Duration::seconds(i);
            state.store.insert_email(&e).await.unwrap();
        }

        let page = list_inbox(&state, &member(), Pagination { limit: 2, offset: 0 })
            .await
            .unwrap();
        let ids: Vec<_> = page.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["em_4", "em_3"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.prev_offset(), None);
        assert_eq!(page.next_offset(), Some(2));

        let last = list_inbox(&state, &member(), Pagination { limit: 2, offset: 4 })
            .await
            .unwrap();
        assert_eq!(last.emails.len(), 1);
        assert_eq!(last.prev_offset(), Some(2));
        assert_eq!(last.next_offset(), None);
    }

    #[tokio::test]
    async fn open_marks_read_and_missing_is_not_found() {
        let state = AppState::fake();
        state.store.insert_email(&stored_email("em_1", &[])).await.unwrap();

        let email = open_email(&state, "em_1").await.unwrap();
        assert!(email.is_read);
        assert!(state.store.find_email("em_1").await.unwrap().unwrap().is_read);
        assert!(matches!(
            open_email(&state, "nope").await,
            Err(AppError::NotFound("Email"))
        ));
    }

    #[tokio::test]
    async fn deleted_email_leaves_inbox_and_cannot_be_fetched() {
        let state = AppState::fake();
        state.store.insert_email(&stored_email("em_1", &[])).await.unwrap();
        state.store.insert_email(&stored_email("em_2", &[])).await.unwrap();

        delete(&state, "em_1").await.unwrap();

        let inbox = list_inbox(&state, &member(), Pagination::default()).await.unwrap();
        assert!(inbox.emails.iter().all(|e| e.id != "em_1"));
        assert_eq!(inbox.total, 1);
        assert!(matches!(open_email(&state, "em_1").await, Err(AppError::NotFound(_))));
        assert!(matches!(delete(&state, "em_1").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_stored_objects() {
        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with(Arc::new(FakeMailer::default()), storage.clone());
        state.store.save_settings(&storage_settings()).await.unwrap();
        state
            .store
            .insert_email(&stored_email("em_1", &["attachments/em_1/a", "attachments/em_1/b"]))
            .await
            .unwrap();

        delete(&state, "em_1").await.unwrap();
        assert_eq!(
            *storage.deleted.lock().unwrap(),
            vec!["attachments/em_1/a".to_string(), "attachments/em_1/b".to_string()]
        );
    }

    #[tokio::test]
    async fn storage_failure_does_not_block_delete() {
        let storage = Arc::new(FakeStorage {
            fail_deletes: true,
            ..Default::default()
        });
        let state = AppState::fake_with(Arc::new(FakeMailer::default()), storage);
        state.store.save_settings(&storage_settings()).await.unwrap();
        state
            .store
            .insert_email(&stored_email("em_1", &["attachments/em_1/a"]))
            .await
            .unwrap();

        delete(&state, "em_1").await.unwrap();
        assert!(state.store.find_email("em_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reply_without_api_key_is_config_error() {
        let state = AppState::fake();
        state.store.insert_email(&stored_email("em_1", &[])).await.unwrap();

        let err = reply(&state, "em_1", "hello").await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(!state.store.find_email("em_1").await.unwrap().unwrap().replied);
    }

    #[tokio::test]
    async fn reply_sends_and_marks_replied() {
        let mailer = Arc::new(FakeMailer::default());
        let state = AppState::fake_with(mailer.clone(), Arc::new(FakeStorage::default()));
        state.store.save_settings(&storage_settings()).await.unwrap();
        state.store.insert_email(&stored_email("em_1", &[])).await.unwrap();

        reply(&state, "em_1", "hello").await.unwrap();

        assert!(state.store.find_email("em_1").await.unwrap().unwrap().replied);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (key, out) = &sent[0];
        assert_eq!(key, "re_test");
        assert_eq!(out.from, "inbox@example.com");
        assert_eq!(out.to, vec!["jane@example.com".to_string()]);
        assert_eq!(out.subject, "Re: Hi");
    }

    #[tokio::test]
    async fn provider_failure_leaves_email_unreplied() {
        let mailer = Arc::new(FakeMailer {
            fail: true,
            ..Default::default()
        });
        let state = AppState::fake_with(mailer, Arc::new(FakeStorage::default()));
        state.store.save_settings(&storage_settings()).await.unwrap();
        state.store.insert_email(&stored_email("em_1", &[])).await.unwrap();

        let err = reply(&state, "em_1", "hello").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert!(!state.store.find_email("em_1").await.unwrap().unwrap().replied);
    }

    #[tokio::test]
    async fn reply_validates_message_and_email() {
        let state = AppState::fake();
        assert!(matches!(
            reply(&state, "em_1", "   ").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            reply(&state, "missing", "hello").await,
            Err(AppError::NotFound("Email"))
        ));
    }

    #[tokio::test]
    async fn attachment_url_prefers_public_base() {
        let state = AppState::fake();
        state
            .store
            .insert_email(&stored_email("em_1", &["attachments/em_1/att_0-f.txt"]))
            .await
            .unwrap();

        let mut settings = storage_settings();
        state.store.save_settings(&settings).await.unwrap();
        assert_eq!(
            attachment_url(&state, "em_1", "att_0").await.unwrap(),
            "https://fake.local/attachments/em_1/att_0-f.txt"
        );

        settings.r2_public_url = "https://files.example.com/".into();
        state.store.save_settings(&settings).await.unwrap();
        assert_eq!(
            attachment_url(&state, "em_1", "att_0").await.unwrap(),
            "https://files.example.com/attachments/em_1/att_0-f.txt"
        );

        assert!(matches!(
            attachment_url(&state, "em_1", "att_9").await,
            Err(AppError::NotFound("Attachment"))
        ));
    }
}
