/*
 * outbound.rs
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

//! Outbound SMTP relay client: EHLO (falling back to HELO), MAIL/RCPT/DATA,
//! dot-stuffed body, QUIT. Blocking `std::io` throughout, since every
//! protocol engine in this crate runs as a blocking unit of work (see the
//! dispatcher's `spawn_blocking` design).

use super::dot_stuffer::DotStuffer;
use crate::mime::split_header_body;
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct RelayError {
    message: String,
}

impl RelayError {
    fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RelayError {}

impl From<io::Error> for RelayError {
    fn from(e: io::Error) -> Self {
        Self::new(e.to_string())
    }
}

struct SmtpReply {
    code: u16,
    message: String,
}

fn read_response<R: BufRead>(reader: &mut R) -> Result<SmtpReply, RelayError> {
    let mut message = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(RelayError::new("connection closed by peer"));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.len() < 4 {
            return Err(RelayError::new(format!("malformed response line: {:?}", line)));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| RelayError::new(format!("non-numeric response code: {:?}", line)))?;
        message = line[4..].to_string();
        if line.as_bytes()[3] != b'-' {
            return Ok(SmtpReply { code, message });
        }
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> Result<(), RelayError> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()?;
    Ok(())
}

fn expect_code(reply: &SmtpReply, wanted: &[u16]) -> Result<(), RelayError> {
    if wanted.contains(&reply.code) {
        Ok(())
    } else {
        Err(RelayError::new(format!("unexpected {} {}", reply.code, reply.message)))
    }
}

/// Prepend `From:`/`To:` headers if the message lacks them. The stored
/// body is left untouched; only the bytes actually transmitted gain the
/// headers.
fn ensure_from_to_headers(data: &[u8], sender: &str, recipient: &str) -> Vec<u8> {
    let (header_block, _) = split_header_body(data);
    let header_text = String::from_utf8_lossy(header_block);
    let has_from = header_text.lines().any(|l| l.to_ascii_lowercase().starts_with("from:"));
    let has_to = header_text.lines().any(|l| l.to_ascii_lowercase().starts_with("to:"));

    let mut prefix = String::new();
    if !has_from {
        prefix.push_str(&format!("From: <{}>\r\n", sender));
    }
    if !has_to {
        prefix.push_str(&format!("To: <{}>\r\n", recipient));
    }
    if prefix.is_empty() {
        data.to_vec()
    } else {
        let mut out = prefix.into_bytes();
        out.extend_from_slice(data);
        out
    }
}

/// Run the full outbound dialog against `host` (an IP address or resolvable
/// hostname) on port 25, relaying `data` from `sender` to `recipient`.
pub fn relay_message(
    host: &str,
    our_domain: &str,
    sender: &str,
    recipient: &str,
    data: &[u8],
) -> Result<(), RelayError> {
    let stream = TcpStream::connect((host, 25))?;
    stream.set_read_timeout(Some(OUTBOUND_TIMEOUT))?;
    stream.set_write_timeout(Some(OUTBOUND_TIMEOUT))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    expect_code(&read_response(&mut reader)?, &[220])?;

    write_line(&mut writer, &format!("EHLO {}", our_domain))?;
    let mut reply = read_response(&mut reader)?;
    if !(200..300).contains(&reply.code) {
        write_line(&mut writer, &format!("HELO {}", our_domain))?;
        reply = read_response(&mut reader)?;
    }
    expect_code(&reply, &[250])?;

    write_line(&mut writer, &format!("MAIL FROM:<{}>", sender))?;
    expect_code(&read_response(&mut reader)?, &[250])?;

    write_line(&mut writer, &format!("RCPT TO:<{}>", recipient))?;
    expect_code(&read_response(&mut reader)?, &[250, 251])?;

    write_line(&mut writer, "DATA")?;
    expect_code(&read_response(&mut reader)?, &[354])?;

    let body = ensure_from_to_headers(data, sender, recipient);
    let mut stuffed = Vec::with_capacity(body.len() + 8);
    let mut stuffer = DotStuffer::new();
    stuffer.process_chunk(&body, |chunk| stuffed.extend_from_slice(chunk));
    stuffer.end_message(|chunk| stuffed.extend_from_slice(chunk));
    writer.write_all(&stuffed)?;
    writer.flush()?;
    expect_code(&read_response(&mut reader)?, &[250])?;

    write_line(&mut writer, "QUIT")?;
    let _ = read_response(&mut reader); // best-effort; delivery already succeeded

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_headers_adds_missing_from_and_to() {
        let data = b"Subject: hi\r\n\r\nbody";
        let out = ensure_from_to_headers(data, "a@ext.com", "b@uliege.be");
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("From: <a@ext.com>\r\nTo: <b@uliege.be>\r\nSubject: hi"));
    }

    #[test]
    fn ensure_headers_leaves_existing_headers_alone() {
        let data = b"From: x@y.com\r\nTo: z@w.com\r\n\r\nbody";
        let out = ensure_from_to_headers(data, "a@ext.com", "b@uliege.be");
        assert_eq!(out, data);
    }

    #[test]
    fn read_response_parses_multiline_reply() {
        let input = b"250-first\r\n250-second\r\n250 last\r\n" as &[u8];
        let mut reader = BufReader::new(input);
        let reply = read_response(&mut reader).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message, "last");
    }
}
