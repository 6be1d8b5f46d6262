/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portolano, a multi-protocol mail server.
 *
 * Portolano is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portolano is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portolano.  If not, see <http://www.gnu.org/licenses/>.
 */

//! RFC 5322 header parsing: splits a message into its header block and body, folds
//! continuation lines, and builds the envelope structure IMAP's `ENVELOPE` fetch
//! item needs. Full MIME body decoding is out of scope here; the body is handled
//! as opaque bytes by the protocol layer.

mod address_parser;
mod date_time;
mod email_address;

pub use email_address::EmailAddress;

use crate::mime::content_id::{parse_content_id, ContentID};
use crate::store::{Address, Envelope};
use address_parser::parse_email_address_list;
use date_time::parse_rfc5322_date;

/// Split a raw RFC 5322 message into `(header block, body)`. The header/body
/// boundary is the first blank line (CRLF CRLF, tolerating bare LF LF).
pub fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut i = 0;
    while i + 1 < raw.len() {
        if raw[i] == b'\n' {
            if i > 0 && raw[i - 1] == b'\r' {
                if i + 2 < raw.len() && raw[i + 1] == b'\r' && raw[i + 2] == b'\n' {
                    return (&raw[..i + 1], &raw[i + 3..]);
                }
                if i + 1 < raw.len() && raw[i + 1] == b'\n' {
                    return (&raw[..i + 1], &raw[i + 2..]);
                }
            } else if i + 1 < raw.len() && raw[i + 1] == b'\n' {
                return (&raw[..i + 1], &raw[i + 2..]);
            }
        }
        i += 1;
    }
    (raw, &[])
}

/// Unfolded `(name, value)` header pairs, in the order they appear.
fn parse_header_lines(header_block: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(header_block);
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.is_empty() {
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && !out.is_empty() {
            let last = out.last_mut().unwrap();
            last.1.push(' ');
            last.1.push_str(line.trim());
            continue;
        }
        if let Some(colon) = line.find(':') {
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            out.push((name, value));
        }
    }
    out
}

fn addresses_for(headers: &[(String, String)], name: &str) -> Vec<Address> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| parse_email_address_list(v))
        .unwrap_or_default()
        .into_iter()
        .map(email_to_store_address)
        .collect()
}

fn email_to_store_address(e: EmailAddress) -> Address {
    Address {
        display_name: e.display_name,
        local_part: e.local_part,
        domain: Some(e.domain),
    }
}

/// Build the IMAP ENVELOPE structure from a raw message's headers:
/// `(date subject from sender reply-to to cc bcc in-reply-to message-id)`.
/// Per RFC 3501, when Sender/Reply-To are absent they default to From.
pub fn parse_envelope(raw: &[u8]) -> Envelope {
    let (header_block, _body) = split_header_body(raw);
    let headers = parse_header_lines(header_block);

    let date = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("date"))
        .and_then(|(_, v)| parse_rfc5322_date(v));
    let subject = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("subject"))
        .map(|(_, v)| v.clone());

    let from = addresses_for(&headers, "from");
    let mut sender = addresses_for(&headers, "sender");
    if sender.is_empty() {
        sender = from.clone();
    }
    let mut reply_to = addresses_for(&headers, "reply-to");
    if reply_to.is_empty() {
        reply_to = from.clone();
    }
    let to = addresses_for(&headers, "to");
    let cc = addresses_for(&headers, "cc");
    let bcc = addresses_for(&headers, "bcc");

    let in_reply_to = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("in-reply-to"))
        .map(|(_, v)| v.clone());
    let message_id = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("message-id"))
        .and_then(|(_, v)| parse_content_id(v))
        .as_ref()
        .map(ContentID::to_string);

    Envelope {
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_envelope_simple() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hello\r\nDate: Fri, 21 Nov 1997 09:55:06 -0600\r\nMessage-ID: <id@host>\r\n\r\nBody";
        let env = parse_envelope(raw);
        assert_eq!(env.from.len(), 1);
        assert_eq!(env.from[0].address(), "alice@example.com");
        assert_eq!(env.to.len(), 1);
        assert_eq!(env.to[0].address(), "bob@example.com");
        assert_eq!(env.subject.as_deref(), Some("Hello"));
        assert!(env.date.is_some());
        assert_eq!(env.message_id.as_deref(), Some("<id@host>"));
    }

    #[test]
    fn sender_and_reply_to_default_to_from() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\n\r\nBody";
        let env = parse_envelope(raw);
        assert_eq!(env.sender[0].address(), "alice@example.com");
        assert_eq!(env.reply_to[0].address(), "alice@example.com");
    }

    #[test]
    fn folded_header_continuation_is_joined() {
        let raw = b"Subject: first line\r\n second line\r\n\r\nBody";
        let env = parse_envelope(raw);
        assert_eq!(env.subject.as_deref(), Some("first line second line"));
    }

    #[test]
    fn split_header_body_finds_blank_line() {
        let raw = b"A: 1\r\nB: 2\r\n\r\nthe body";
        let (headers, body) = split_header_body(raw);
        assert_eq!(body, b"the body");
        assert!(headers.ends_with(b"\r\n"));
    }
}
