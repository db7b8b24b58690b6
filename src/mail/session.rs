//! IMAP session over TLS with an explicit connection state machine.
//!
//! `Disconnected → Connected → Authenticated → MailboxSelected → Closed`.
//! Every operation checks the current state first. `close()` is the single
//! release path. It is idempotent and also runs from `Drop`, so the
//! connection is released on every exit path.
//!
//! The session is blocking. Async callers go through `ImapMailbox`, which
//! runs it on `spawn_blocking`.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::types::RawMessage;
use crate::config::ImapConfig;
use crate::error::MailboxError;

/// TLS transport used against real servers.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle state of an IMAP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport attached yet.
    Disconnected,
    /// Transport open, server greeting received.
    Connected,
    /// Credentials accepted.
    Authenticated,
    /// A mailbox is selected; search and fetch are allowed.
    MailboxSelected,
    /// Released. Terminal.
    Closed,
}

impl SessionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Disconnected, Connected)
                | (Connected, Authenticated)
                | (Authenticated, MailboxSelected)
                | (_, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::MailboxSelected => "mailbox_selected",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response line with any literals it carried.
#[derive(Debug)]
struct Untagged {
    line: String,
    literals: Vec<Vec<u8>>,
}

/// A completed command.
#[derive(Debug)]
struct Response {
    untagged: Vec<Untagged>,
    status: Status,
    text: String,
}

/// A single IMAP connection.
pub struct ImapSession<S: Read + Write> {
    host: String,
    stream: Option<S>,
    state: SessionState,
    buf: Vec<u8>,
    next_tag: u32,
    /// Set after a transport error; the stream can no longer be trusted.
    poisoned: bool,
}

impl ImapSession<TlsStream> {
    /// Open a TLS connection to the configured server and read its greeting.
    pub fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        let mut session = Self::new(&config.host);
        let stream = open_tls(config).map_err(|reason| MailboxError::Connection {
            host: config.host.clone(),
            reason,
        })?;
        session.attach(stream)?;
        Ok(session)
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Create a session in the `Disconnected` state.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stream: None,
            state: SessionState::Disconnected,
            buf: Vec::new(),
            next_tag: 1,
            poisoned: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Attach an open transport and consume the server greeting.
    pub fn attach(&mut self, stream: S) -> Result<(), MailboxError> {
        self.require(SessionState::Disconnected, "attach a transport")?;
        self.stream = Some(stream);

        let greeting = match self.read_line() {
            Ok(line) => String::from_utf8_lossy(&line).trim_end().to_string(),
            Err(e) => {
                self.poisoned = true;
                return Err(self.connection_error(format!("reading greeting: {e}")));
            }
        };

        if !greeting.starts_with("* OK") {
            self.poisoned = true;
            return Err(self.connection_error(format!("unexpected greeting: {greeting}")));
        }

        self.transition(SessionState::Connected);
        Ok(())
    }

    /// `LOGIN` with plain credentials.
    pub fn login(&mut self, username: &str, password: &SecretString) -> Result<(), MailboxError> {
        self.require(SessionState::Connected, "log in")?;

        let auth_error = |reason: &str| MailboxError::Auth {
            user: username.to_string(),
            reason: reason.to_string(),
        };
        let user = quote(username).ok_or_else(|| auth_error("username contains a line break"))?;
        let pass = quote(password.expose_secret())
            .ok_or_else(|| auth_error("password contains a line break"))?;

        let resp = self.command(&format!("LOGIN {user} {pass}"), "LOGIN")?;
        if resp.status != Status::Ok {
            return Err(auth_error(&resp.text));
        }

        self.transition(SessionState::Authenticated);
        Ok(())
    }

    /// `SELECT` a mailbox. Returns its `EXISTS` count.
    pub fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        self.require(SessionState::Authenticated, "select a mailbox")?;

        let mailbox_error = |reason: &str| MailboxError::Mailbox {
            mailbox: mailbox.to_string(),
            reason: reason.to_string(),
        };
        let name = quote(mailbox).ok_or_else(|| mailbox_error("name contains a line break"))?;

        let resp = self.command(&format!("SELECT {name}"), "SELECT")?;
        if resp.status != Status::Ok {
            return Err(mailbox_error(&resp.text));
        }

        let exists = resp
            .untagged
            .iter()
            .filter_map(|u| u.line.strip_prefix("* ")?.strip_suffix(" EXISTS")?.parse::<u32>().ok())
            .next_back()
            .unwrap_or(0);

        self.transition(SessionState::MailboxSelected);
        Ok(exists)
    }

    /// `UID SEARCH UNSEEN`. UIDs are returned in server order.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        self.require(SessionState::MailboxSelected, "search")?;

        let resp = self.command("UID SEARCH UNSEEN", "UID SEARCH")?;
        if resp.status != Status::Ok {
            return Err(MailboxError::Protocol(format!("SEARCH failed: {}", resp.text)));
        }

        Ok(resp
            .untagged
            .iter()
            .filter_map(|u| u.line.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().filter_map(|s| s.parse::<u32>().ok()))
            .collect())
    }

    /// Fetch the full RFC 822 bytes of one message.
    ///
    /// `mark_seen` uses `RFC822` (server sets `\Seen`); otherwise `BODY.PEEK[]`.
    pub fn fetch_raw(&mut self, uid: u32, mark_seen: bool) -> Result<RawMessage, MailboxError> {
        self.require(SessionState::MailboxSelected, "fetch")?;

        let item = if mark_seen { "RFC822" } else { "BODY.PEEK[]" };
        let resp = self.command(&format!("UID FETCH {uid} ({item})"), "UID FETCH")?;
        if resp.status != Status::Ok {
            return Err(MailboxError::Protocol(format!(
                "FETCH {uid} failed: {}",
                resp.text
            )));
        }

        let bytes = resp
            .untagged
            .into_iter()
            .filter(|u| u.line.contains(" FETCH "))
            .find_map(|u| u.literals.into_iter().next())
            .ok_or_else(|| {
                MailboxError::Protocol(format!("no message body returned for UID {uid}"))
            })?;

        debug!(uid, bytes = bytes.len(), "Fetched message");
        Ok(RawMessage::new(uid, bytes))
    }

    /// Log in, select, search and fetch the `limit` most recent unseen messages.
    ///
    /// All-or-nothing: the first failure aborts and nothing is returned.
    pub fn fetch_recent_unseen(
        &mut self,
        config: &ImapConfig,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MailboxError> {
        self.login(&config.username, &config.password)?;
        let exists = self.select(&config.mailbox)?;
        let unseen = self.search_unseen()?;
        let unseen_count = unseen.len();
        let wanted = most_recent(unseen, limit);

        info!(
            mailbox = %config.mailbox,
            exists,
            unseen = unseen_count,
            fetching = wanted.len(),
            "Unseen messages found"
        );

        wanted
            .into_iter()
            .map(|uid| self.fetch_raw(uid, config.mark_seen))
            .collect()
    }

    /// Release the connection. Safe to call from any state, any number of times.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.stream.is_some() && !self.poisoned {
            if let Err(e) = self.command("LOGOUT", "LOGOUT") {
                debug!(error = %e, "LOGOUT failed, dropping connection");
            }
        }

        self.stream = None;
        self.buf.clear();
        self.transition(SessionState::Closed);
    }

    // ── State machine ───────────────────────────────────────────────

    fn require(&self, expected: SessionState, operation: &str) -> Result<(), MailboxError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MailboxError::InvalidState {
                state: self.state.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    fn transition(&mut self, target: SessionState) {
        debug_assert!(self.state.can_transition_to(target));
        debug!(host = %self.host, from = %self.state, to = %target, "IMAP session transition");
        self.state = target;
    }

    fn connection_error(&self, reason: String) -> MailboxError {
        MailboxError::Connection {
            host: self.host.clone(),
            reason,
        }
    }

    // ── Wire protocol ───────────────────────────────────────────────

    /// Send a tagged command and read until its completion line.
    ///
    /// `label` is what gets logged, so credentials never reach the logs.
    fn command(&mut self, command: &str, label: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        debug!(tag = %tag, command = label, "IMAP command");

        self.exchange(&tag, command).map_err(|e| {
            self.poisoned = true;
            self.connection_error(format!("{label}: {e}"))
        })
    }

    fn exchange(&mut self, tag: &str, command: &str) -> io::Result<Response> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))?;
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let (line, literals) = self.read_response_line()?;
            if let Some(rest) = line.strip_prefix(tag).and_then(|r| r.strip_prefix(' ')) {
                let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    _ => Status::Bad,
                };
                return Ok(Response {
                    untagged,
                    status,
                    text: text.trim().to_string(),
                });
            }
            untagged.push(Untagged { line, literals });
        }
    }

    /// Read one logical response line, pulling in any `{n}` literals.
    fn read_response_line(&mut self) -> io::Result<(String, Vec<Vec<u8>>)> {
        let mut text = String::new();
        let mut literals = Vec::new();
        loop {
            let raw = self.read_line()?;
            let decoded = String::from_utf8_lossy(&raw);
            let line = decoded.trim_end_matches(['\r', '\n']);
            text.push_str(line);
            match literal_len(line) {
                Some(n) => literals.push(self.read_exact_buffered(n)?),
                None => return Ok((text, literals)),
            }
        }
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                return Ok(self.buf.drain(..pos + 2).collect());
            }
            self.fill()?;
        }
    }

    fn read_exact_buffered(&mut self, n: usize) -> io::Result<Vec<u8>> {
        while self.buf.len() < n {
            self.fill()?;
        }
        Ok(self.buf.drain(..n).collect())
    }

    fn fill(&mut self) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))?;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "IMAP connection closed",
                    ));
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: Read + Write> Drop for ImapSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, fetch the `limit` most recent unseen messages, and close.
///
/// Blocking. Run it in `spawn_blocking`.
pub fn fetch_recent_unseen(
    config: &ImapConfig,
    limit: usize,
) -> Result<Vec<RawMessage>, MailboxError> {
    let mut session = ImapSession::connect(config)?;
    let result = session.fetch_recent_unseen(config, limit);
    session.close();
    result
}

/// Keep the `limit` highest UIDs, highest first.
pub fn most_recent(mut uids: Vec<u32>, limit: usize) -> Vec<u32> {
    uids.sort_unstable();
    uids.dedup();
    let start = uids.len().saturating_sub(limit);
    uids.split_off(start).into_iter().rev().collect()
}

/// Size of a literal announced at the end of a response line (`... {123}`).
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// IMAP quoted string. `None` if the value cannot be quoted.
fn quote(value: &str) -> Option<String> {
    if value.contains(['\r', '\n']) {
        return None;
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Some(format!("\"{escaped}\""))
}

fn open_tls(config: &ImapConfig) -> Result<TlsStream, String> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| format!("TCP connect to port {}: {e}", config.port))?;
    tcp.set_read_timeout(config.read_timeout)
        .map_err(|e| format!("setting read timeout: {e}"))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| format!("TLS config: {e}"))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| format!("invalid server name: {e}"))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| format!("TLS setup: {e}"))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}
