//! MIME decoding: raw RFC 822 bytes to sender, subject and plain-text body.
//!
//! Decoding never fails as a whole. A field that cannot be decoded falls back
//! to its raw header text or to an empty string.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use super::types::{ParsedEmail, RawMessage};

/// Decode a fetched message into its readable fields.
pub fn decode(raw: &RawMessage) -> ParsedEmail {
    let sender = raw_header(&raw.bytes, "From").unwrap_or_default();

    let Some(parsed) = MessageParser::default().parse(raw.bytes.as_slice()) else {
        debug!(uid = raw.uid, "Unparseable message, keeping raw headers only");
        return ParsedEmail {
            sender,
            subject: raw_header(&raw.bytes, "Subject").unwrap_or_default(),
            body: String::new(),
        };
    };

    let subject = parsed
        .subject()
        .map(str::to_string)
        .or_else(|| raw_header(&raw.bytes, "Subject"))
        .unwrap_or_default();

    let body = match parsed.parts.first() {
        Some(root) if matches!(root.body, PartType::Multipart(_)) => parsed
            .parts
            .iter()
            .skip(1)
            .find(|part| is_text_plain(part))
            .map(part_text)
            .unwrap_or_default(),
        Some(root) => part_text(root),
        None => String::new(),
    };

    ParsedEmail {
        sender,
        subject,
        body,
    }
}

/// Whether a part's content type is exactly `text/plain`.
///
/// A part without a `Content-Type` header defaults to `text/plain`.
fn is_text_plain(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("plain"))
        }
        None => matches!(part.body, PartType::Text(_)),
    }
}

/// Decoded payload of a single leaf part.
fn part_text(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            String::from_utf8(bytes.to_vec()).unwrap_or_default()
        }
        PartType::Message(_) | PartType::Multipart(_) => String::new(),
    }
}

/// First value of a header, unfolded and trimmed, without any decoding.
pub(crate) fn raw_header(bytes: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut value: Option<String> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(v) = value.as_mut() {
                v.push(' ');
                v.push_str(line.trim());
            }
            continue;
        }
        if value.is_some() {
            break;
        }
        if let Some((key, rest)) = line.split_once(':')
            && key.trim().eq_ignore_ascii_case(name)
        {
            value = Some(rest.trim().to_string());
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &str) -> RawMessage {
        RawMessage::new(1, bytes.as_bytes())
    }

    #[test]
    fn plain_message_body_exact() {
        let msg = raw(
            "From: Alice <alice@example.com>\r\n\
             Subject: Lunch\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Are we still on for noon?",
        );
        let parsed = decode(&msg);
        assert_eq!(parsed.sender, "Alice <alice@example.com>");
        assert_eq!(parsed.subject, "Lunch");
        assert_eq!(parsed.body, "Are we still on for noon?");
    }

    #[test]
    fn multipart_takes_first_text_plain_part() {
        let msg = raw(
            "From: shop@example.com\r\n\
             Subject: Sale\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/alternative; boundary=\"XX\"\r\n\
             \r\n\
             --XX\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             \r\n\
             <p>html version</p>\r\n\
             --XX\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             plain version\r\n\
             --XX\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             second plain\r\n\
             --XX--\r\n",
        );
        let parsed = decode(&msg);
        assert_eq!(parsed.body.trim(), "plain version");
        assert!(!parsed.body.contains("html version"));
        assert!(!parsed.body.contains("second plain"));
    }

    #[test]
    fn multipart_without_text_plain_has_empty_body() {
        let msg = raw(
            "From: news@example.com\r\n\
             Subject: Newsletter\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\
             \r\n\
             --B\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             <b>only html</b>\r\n\
             --B--\r\n",
        );
        assert_eq!(decode(&msg).body, "");
    }

    #[test]
    fn attached_message_is_not_searched_for_body() {
        let msg = raw(
            "From: bob@example.com\r\n\
             Subject: Fwd: notes\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"OUT\"\r\n\
             \r\n\
             --OUT\r\n\
             Content-Type: message/rfc822\r\n\
             \r\n\
             From: carol@example.com\r\n\
             Subject: notes\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             forwarded text\r\n\
             --OUT\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             outer plain\r\n\
             --OUT--\r\n",
        );
        let parsed = decode(&msg);
        assert_eq!(parsed.subject, "Fwd: notes");
        assert_eq!(parsed.body.trim(), "outer plain");
        assert!(!parsed.body.contains("forwarded text"));
    }

    #[test]
    fn encoded_subject_decoded() {
        let msg = raw(
            "From: bank@example.com\r\n\
             Subject: =?UTF-8?B?RmFjdHVyZSDDqWxlY3RyaWNpdMOp?=\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             Amount due.",
        );
        assert_eq!(decode(&msg).subject, "Facture électricité");
    }

    #[test]
    fn missing_subject_is_empty() {
        let msg = raw("From: x@example.com\r\nContent-Type: text/plain\r\n\r\nhi");
        let parsed = decode(&msg);
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.body, "hi");
    }

    #[test]
    fn quoted_printable_body_decoded() {
        let msg = raw(
            "From: x@example.com\r\n\
             Subject: qp\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Transfer-Encoding: quoted-printable\r\n\
             \r\n\
             caf=C3=A9 time",
        );
        assert_eq!(decode(&msg).body, "café time");
    }

    #[test]
    fn raw_header_unfolds_and_is_case_insensitive() {
        let bytes = b"Subject: one\r\nfrom: \"Long Name\"\r\n <long@example.com>\r\n\r\nFrom: body@x";
        assert_eq!(
            raw_header(bytes, "From").as_deref(),
            Some("\"Long Name\" <long@example.com>")
        );
        assert_eq!(raw_header(bytes, "X-Missing"), None);
    }

    #[test]
    fn raw_header_stops_at_body() {
        let bytes = b"Subject: one\r\n\r\nFrom: not-a-header@x";
        assert_eq!(raw_header(bytes, "From"), None);
    }
}
