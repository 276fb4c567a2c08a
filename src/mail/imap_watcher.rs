// The `imap_watcher` module implements the mailbox seam over IMAP.

use super::{MailError, MailWatcher, Message};
use async_trait::async_trait;
use mail_parser::MessageParser;
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;
use tokio::task;
use tracing::{debug, info, warn};

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// Connection settings for [`ImapMailWatcher`].
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub email: String,
    pub password: String,
}

/// Mailbox watcher over a TLS IMAP session.
///
/// The session is established once at construction (a failure there is the
/// caller's fatal-startup path). A command failure mid-run drops the cached
/// session and the next call re-establishes it lazily. All protocol calls are
/// blocking and run on the blocking pool, one at a time.
pub struct ImapMailWatcher {
    config: MailConfig,
    session: Option<ImapSession>,
}

impl ImapMailWatcher {
    /// Connects and authenticates. Connection or authentication failure here
    /// means the process cannot proceed.
    pub async fn connect(config: MailConfig) -> Result<Self, MailError> {
        let cfg = config.clone();
        let session = task::spawn_blocking(move || open_session(&cfg)).await??;
        info!(host = %config.host, email = %config.email, "mailbox connection established");
        Ok(Self {
            config,
            session: Some(session),
        })
    }

    /// Runs one blocking operation against the session, reconnecting first if
    /// a previous failure dropped it. On failure the session is discarded so
    /// the next cycle starts fresh.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailError> + Send + 'static,
    {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                info!(host = %self.config.host, "re-establishing mailbox connection");
                let cfg = self.config.clone();
                task::spawn_blocking(move || open_session(&cfg)).await??
            }
        };

        let (session, result) = task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await?;

        match result {
            Ok(value) => {
                self.session = Some(session);
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "mailbox command failed, dropping session");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MailWatcher for ImapMailWatcher {
    async fn search(&mut self, subject_substring: &str) -> Result<Vec<Message>, MailError> {
        let query = format!("UNSEEN SUBJECT \"{}\"", escape_query(subject_substring));
        debug!(%query, "searching mailbox");
        self.with_session(move |session| fetch_unread(session, &query))
            .await
    }

    async fn mark_read(&mut self, id: &str) -> Result<(), MailError> {
        let uid = id.to_string();
        self.with_session(move |session| {
            session
                .uid_store(&uid, "+FLAGS (\\Seen)")
                .map_err(|e| MailError::Protocol(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), MailError> {
        if let Some(mut session) = self.session.take() {
            task::spawn_blocking(move || {
                let _ = session.logout();
            })
            .await?;
        }
        Ok(())
    }
}

fn open_session(config: &MailConfig) -> Result<ImapSession, MailError> {
    let tls = TlsConnector::builder()
        .build()
        .map_err(|e| MailError::Connection(e.to_string()))?;
    let client = imap::connect((config.host.as_str(), config.port), &config.host, &tls)
        .map_err(|e| MailError::Connection(e.to_string()))?;
    let mut session = client
        .login(&config.email, &config.password)
        .map_err(|(e, _)| MailError::Auth(e.to_string()))?;
    session
        .select("INBOX")
        .map_err(|e| MailError::Protocol(e.to_string()))?;
    Ok(session)
}

fn fetch_unread(session: &mut ImapSession, query: &str) -> Result<Vec<Message>, MailError> {
    // Re-select so the view of UNSEEN is current for this cycle.
    session
        .select("INBOX")
        .map_err(|e| MailError::Protocol(e.to_string()))?;

    let uids = session
        .uid_search(query)
        .map_err(|e| MailError::Protocol(e.to_string()))?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetches = session
            .uid_fetch(uid.to_string(), "(RFC822)")
            .map_err(|e| MailError::Protocol(e.to_string()))?;
        for fetch in fetches.iter() {
            let Some(raw) = fetch.body() else {
                debug!(uid, "fetch returned no body, skipping");
                continue;
            };
            messages.push(parse_message(uid, raw));
        }
    }
    Ok(messages)
}

/// Builds a [`Message`] from raw RFC 822 bytes. A body that fails to parse
/// yields empty subject/body rather than an error; the orchestrator's
/// client-side subject check then skips it.
fn parse_message(uid: u32, raw: &[u8]) -> Message {
    match MessageParser::default().parse(raw) {
        Some(parsed) => Message {
            id: uid.to_string(),
            subject: parsed.subject().unwrap_or_default().to_string(),
            body: extract_body(&parsed),
        },
        None => Message {
            id: uid.to_string(),
            subject: String::new(),
            body: String::new(),
        },
    }
}

/// Prefers the plain-text part, falls back to HTML, else empty.
fn extract_body(parsed: &mail_parser::Message<'_>) -> String {
    parsed
        .body_text(0)
        .map(|text| text.into_owned())
        .or_else(|| parsed.body_html(0).map(|html| html.into_owned()))
        .unwrap_or_default()
}

/// Escapes a value for use inside a quoted IMAP SEARCH criterion.
fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query("Invoice"), "Invoice");
        assert_eq!(escape_query(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_query(r"back\slash"), r"back\\slash");
    }

    #[test]
    fn plain_text_message_parses() {
        let raw = b"From: a@example.com\r\n\
            To: b@example.com\r\n\
            Subject: Invoice #1\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            Pay here: https://example.com/pay\r\n";

        let message = parse_message(7, raw);
        assert_eq!(message.id, "7");
        assert_eq!(message.subject, "Invoice #1");
        assert!(message.body.contains("https://example.com/pay"));
    }

    #[test]
    fn html_only_message_falls_back_to_html_body() {
        let raw = b"From: a@example.com\r\n\
            Subject: Task ready\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><a href=\"https://example.com/task\">Go to task</a></body></html>\r\n";

        let message = parse_message(3, raw);
        assert_eq!(message.subject, "Task ready");
        assert!(message.body.contains("https://example.com/task"));
    }

    #[test]
    fn unparseable_bytes_yield_empty_message() {
        let message = parse_message(1, b"");
        assert_eq!(message.id, "1");
        assert!(message.subject.is_empty());
        assert!(message.body.is_empty());
    }
}
