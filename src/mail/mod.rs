//! Mail retrieval and MIME decoding.

pub mod decoder;
pub mod mailbox;
pub mod session;
pub mod types;

pub use decoder::decode;
pub use mailbox::{ImapMailbox, Mailbox};
pub use session::{ImapSession, SessionState};
pub use types::{ParsedEmail, RawMessage};
