//! Mail data types shared by the session and the decoder.

use serde::{Deserialize, Serialize};

/// One message as fetched from the server: its UID plus the exact RFC 822 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(uid: u32, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            uid,
            bytes: bytes.into(),
        }
    }
}

/// Human-readable fields extracted from a raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEmail {
    /// `From` header, verbatim.
    pub sender: String,
    /// Decoded subject, empty when absent.
    pub subject: String,
    /// Decoded plain-text body, empty when none found.
    pub body: String,
}
