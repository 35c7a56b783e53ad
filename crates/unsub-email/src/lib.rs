//! # unsub-email
//!
//! Email-side helpers for unsubscribe automation: parse RFC 822 messages,
//! pull them over IMAP, and find the unsubscribe link inside a body.
//!
//! ```rust
//! use unsub_email::{extract_candidate_link, scan, LinkScan};
//!
//! let html = r#"<p>Weekly digest</p><a href="https://example.com/u?id=7">Unsubscribe</a>"#;
//! assert_eq!(
//!     extract_candidate_link(html, "").as_deref(),
//!     Some("https://example.com/u?id=7")
//! );
//! assert!(matches!(scan("", ""), LinkScan::Empty));
//! ```

pub mod links;
#[cfg(feature = "async")]
pub mod lock;

pub use links::{
    dedup_links, extract_anchors, extract_candidate_link, extract_text_urls, scan, Anchor,
    Candidates, LinkScan, UNSUBSCRIBE_KEYWORDS,
};
#[cfg(feature = "async")]
pub use lock::AccountLock;

use chrono::{Duration, Utc};
use mailparse::{MailHeaderMap, ParsedMail};

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

impl ImapConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tls: true,
            username: username.into(),
            password: password.into(),
            mailbox: "INBOX".into(),
        }
    }

    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub from: Option<String>,
    pub subject_contains: Option<String>,
    pub unseen_only: bool,
    pub since_minutes: Option<i64>,
    pub mark_seen: bool,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, v: impl Into<String>) -> Self {
        self.from = Some(v.into());
        self
    }

    pub fn subject_contains(mut self, v: impl Into<String>) -> Self {
        self.subject_contains = Some(v.into());
        self
    }

    pub fn unseen_only(mut self, v: bool) -> Self {
        self.unseen_only = v;
        self
    }

    pub fn since_minutes(mut self, v: i64) -> Self {
        self.since_minutes = Some(v);
        self
    }

    pub fn mark_seen(mut self, v: bool) -> Self {
        self.mark_seen = v;
        self
    }
}

/// A parsed email. `uid` is 0 for messages that did not come from IMAP.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub uid: u32,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub raw: Vec<u8>,
}

impl EmailMessage {
    /// Parse a raw RFC 822 message (e.g. the contents of an `.eml` file).
    pub fn parse(raw: impl Into<Vec<u8>>) -> Result<Self> {
        parse_message(0, raw.into())
    }

    /// HTML body, or `""` when the message has none.
    pub fn html(&self) -> &str {
        self.body_html.as_deref().unwrap_or("")
    }

    /// Plain-text body, or `""` when the message has none.
    pub fn text(&self) -> &str {
        self.body_text.as_deref().unwrap_or("")
    }

    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    /// Unsubscribe link found without consulting a model.
    pub fn unsubscribe_link(&self) -> Option<String> {
        extract_candidate_link(self.html(), self.text())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] mailparse::MailParseError),
    #[error("Timeout waiting for email")]
    Timeout,
    #[error("No message found")]
    NotFound,
    #[cfg(feature = "async")]
    #[error("Join error: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct ImapClient {
    session: imap::Session<imap::Connection>,
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        let _ = self.session.logout();
    }
}

impl ImapClient {
    pub fn connect(config: &ImapConfig) -> Result<Self> {
        let mut builder = imap::ClientBuilder::new(&config.host, config.port);
        if config.tls {
            builder = builder.mode(imap::ConnectionMode::AutoTls);
        } else {
            builder = builder.mode(imap::ConnectionMode::Plaintext);
        }

        let client = builder.connect()?;

        let mut session = client
            .login(&config.username, &config.password)
            .map_err(|e| e.0)?;

        session.select(&config.mailbox)?;

        Ok(Self { session })
    }

    /// Newest message matching `criteria`, if any.
    pub fn fetch_latest(&mut self, criteria: &SearchCriteria) -> Result<Option<EmailMessage>> {
        Ok(self.fetch_all(criteria, 1)?.into_iter().next())
    }

    /// Up to `limit` matching messages, newest first.
    pub fn fetch_all(
        &mut self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<EmailMessage>> {
        let query = build_search_query(criteria);
        let mut uids: Vec<u32> = self.session.uid_search(query)?.into_iter().collect();
        uids.sort_unstable_by(|a, b| b.cmp(a));
        uids.truncate(limit);

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            let fetches = self.session.uid_fetch(uid.to_string(), "RFC822")?;
            let fetch = fetches.iter().next().ok_or(Error::NotFound)?;
            let raw = fetch.body().ok_or(Error::NotFound)?.to_vec();

            if criteria.mark_seen {
                let _ = self.session.uid_store(uid.to_string(), "+FLAGS (\\Seen)");
            }

            messages.push(parse_message(uid, raw)?);
        }
        Ok(messages)
    }
}

fn build_search_query(criteria: &SearchCriteria) -> String {
    let mut parts: Vec<String> = Vec::new();

    if criteria.unseen_only {
        parts.push("UNSEEN".into());
    }

    if let Some(ref from) = criteria.from {
        parts.push(format!("FROM \"{}\"", escape_imap(from)));
    }

    if let Some(ref subject) = criteria.subject_contains {
        parts.push(format!("SUBJECT \"{}\"", escape_imap(subject)));
    }

    if let Some(minutes) = criteria.since_minutes {
        let since = Utc::now() - Duration::minutes(minutes);
        let date = since.format("%d-%b-%Y").to_string();
        parts.push(format!("SINCE {}", date));
    }

    if parts.is_empty() {
        "ALL".to_string()
    } else {
        parts.join(" ")
    }
}

fn escape_imap(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control())
        .flat_map(|c| match c {
            '\\' => vec!['\\', '\\'],
            '"' => vec!['\\', '"'],
            other => vec![other],
        })
        .collect()
}

fn parse_message(uid: u32, raw: Vec<u8>) -> Result<EmailMessage> {
    let parsed = mailparse::parse_mail(&raw)?;

    let headers = parsed.get_headers();
    let subject = headers.get_first_value("Subject");
    let from = headers.get_first_value("From");
    let date = headers.get_first_value("Date");

    let mut body_text: Option<String> = None;
    let mut body_html: Option<String> = None;
    collect_bodies(&parsed, &mut body_text, &mut body_html)?;

    Ok(EmailMessage {
        uid,
        subject,
        from,
        date,
        body_text,
        body_html,
        raw,
    })
}

/// First `text/plain` and first `text/html` leaf, depth-first through nested multiparts.
fn collect_bodies(
    part: &ParsedMail<'_>,
    text: &mut Option<String>,
    html: &mut Option<String>,
) -> Result<()> {
    if part.subparts.is_empty() {
        let ct = part.ctype.mimetype.to_lowercase();
        if ct == "text/html" {
            if html.is_none() {
                *html = Some(part.get_body()?);
            }
        } else if (ct == "text/plain" || ct.is_empty()) && text.is_none() {
            *text = Some(part.get_body()?);
        }
        return Ok(());
    }
    for sub in &part.subparts {
        collect_bodies(sub, text, html)?;
    }
    Ok(())
}

#[cfg(feature = "async")]
pub mod async_client {
    use super::*;
    use std::sync::{Arc, Mutex};

    pub struct AsyncImapClient {
        inner: Arc<Mutex<ImapClient>>,
    }

    impl AsyncImapClient {
        pub async fn connect(config: &ImapConfig) -> Result<Self> {
            let cfg = config.clone();
            let client = tokio::task::spawn_blocking(move || ImapClient::connect(&cfg))
                .await
                .map_err(|e| Error::Join(e.to_string()))??;
            Ok(Self {
                inner: Arc::new(Mutex::new(client)),
            })
        }

        pub async fn fetch_all(
            &self,
            criteria: &SearchCriteria,
            limit: usize,
        ) -> Result<Vec<EmailMessage>> {
            let criteria = criteria.clone();
            let inner = self.inner.clone();
            tokio::task::spawn_blocking(move || {
                let mut guard = inner.lock().map_err(|e| Error::Join(e.to_string()))?;
                guard.fetch_all(&criteria, limit)
            })
            .await
            .map_err(|e| Error::Join(e.to_string()))?
        }
    }
}

#[cfg(feature = "async")]
pub use async_client::AsyncImapClient;
