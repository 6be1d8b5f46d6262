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

//! Inbound SMTP state machine (`COMMAND`/`DATA`) plus the local-vs-remote
//! delivery pipeline. Each connection runs a fully blocking, line-oriented
//! loop; outbound relay (`outbound`) and DNS resolution (`crate::dns`) are
//! both synchronous for the same reason.

pub mod dot_stuffer;
mod outbound;

use crate::config::ServerConfig;
use crate::dns;
use crate::logging::log_line;
use crate::store::{Flag, LockManager, MailboxStore};
use dot_stuffer::unstuff_line;
use std::io::{self, BufRead, BufReader, Read, Write};

enum State {
    Command,
    Data,
}

/// One inbound SMTP session: COMMAND/DATA state plus the current
/// transaction (sender, recipients, accumulated body).
struct Transaction {
    sender: Option<String>,
    recipients: Vec<String>,
    data: Vec<u8>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            sender: None,
            recipients: Vec::new(),
            data: Vec::new(),
        }
    }
}

/// Run one SMTP session to completion: greeting, command loop, and (on
/// socket failure) silent termination without attempting a final reply.
pub fn run_session<S: Read + Write>(config: &ServerConfig, locks: &LockManager, stream: S) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    write_line(reader.get_mut(), &format!("220 {} Simple Mail Transfer Service Ready", config.domain))?;

    let mut state = State::Command;
    let mut tx = Transaction::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(()); // peer closed; FATAL_IO, no reply attempted
        }
        let text = line.trim_end_matches(['\r', '\n']);

        match state {
            State::Command => {
                if handle_command(config, reader.get_mut(), text, &mut tx, &mut state)? {
                    return Ok(());
                }
            }
            State::Data => {
                if text == "." {
                    let ok = process_email(config, locks, &tx);
                    if ok {
                        write_line(reader.get_mut(), "250 OK Message accepted for delivery")?;
                    } else {
                        write_line(reader.get_mut(), "451 Requested action aborted: local error in processing")?;
                    }
                    tx = Transaction::new();
                    state = State::Command;
                } else {
                    tx.data.extend_from_slice(unstuff_line(text).as_bytes());
                    tx.data.extend_from_slice(b"\r\n");
                }
            }
        }
    }
}

fn write_line<W: Write>(w: &mut W, line: &str) -> io::Result<()> {
    w.write_all(line.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()
}

/// Handle one command in the `COMMAND` state. Returns `Ok(true)` when the
/// session should end (QUIT).
fn handle_command<W: Write>(
    config: &ServerConfig,
    writer: &mut W,
    line: &str,
    tx: &mut Transaction,
    state: &mut State,
) -> io::Result<bool> {
    let (verb, rest) = split_verb(line);
    match verb.to_ascii_uppercase().as_str() {
        "HELO" | "EHLO" => {
            write_line(writer, &format!("250 {}", config.domain))?;
        }
        "MAIL" => match extract_address(rest) {
            Some(addr) => {
                tx.sender = Some(addr);
                write_line(writer, "250 OK")?;
            }
            None => write_line(writer, "500 Unrecognized command")?,
        },
        "RCPT" => match extract_address(rest) {
            Some(addr) => {
                tx.recipients.push(addr);
                write_line(writer, "250 OK")?;
            }
            None => write_line(writer, "500 Unrecognized command")?,
        },
        "DATA" => {
            tx.data.clear();
            write_line(writer, "354 Start mail input; end with <CRLF>.<CRLF>")?;
            *state = State::Data;
        }
        "RSET" => {
            *tx = Transaction::new();
            write_line(writer, "250 OK")?;
        }
        "QUIT" => {
            write_line(writer, "221 Bye")?;
            return Ok(true);
        }
        _ => {
            write_line(writer, "500 Unrecognized command")?;
        }
    }
    Ok(false)
}

/// Split `"VERB rest of line"`; `rest` is empty if there is no argument.
fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// "the substring after the first `:` ... strips `<>` plus surrounding whitespace".
fn extract_address(arg: &str) -> Option<String> {
    let idx = arg.find(':')?;
    let raw = arg[idx + 1..].trim();
    let raw = raw.trim_start_matches('<').trim_end_matches('>').trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn domain_of(addr: &str) -> Option<&str> {
    addr.rsplit_once('@').map(|(_, domain)| domain)
}

/// Deliver the transaction to every recipient, aggregating per-recipient
/// failures into one outcome at the command boundary rather than
/// swallowing them mid-loop. Returns true iff every recipient succeeded.
fn process_email(config: &ServerConfig, locks: &LockManager, tx: &Transaction) -> bool {
    let sender = tx.sender.clone().unwrap_or_default();
    let mut all_ok = true;
    for recipient in &tx.recipients {
        let ok = match domain_of(recipient) {
            Some(domain) if config.is_local_domain(domain) => {
                deliver_local(config, locks, &sender, recipient, &tx.data)
            }
            Some(domain) => relay(config, domain, &sender, recipient, &tx.data),
            None => false,
        };
        if !ok {
            all_ok = false;
        }
    }
    all_ok
}

fn deliver_local(config: &ServerConfig, locks: &LockManager, sender: &str, recipient: &str, data: &[u8]) -> bool {
    let user = crate::protocol::local_part(recipient);
    if !config.user_exists(user) {
        log_line("smtp", format!("local delivery rejected: unknown user {}", user));
        return false;
    }
    let mut body = Vec::with_capacity(data.len() + 64);
    body.extend_from_slice(format!("Return-Path: <{}>\r\n", sender).as_bytes());
    body.extend_from_slice(format!("Delivered-To: <{}>\r\n", recipient).as_bytes());
    body.extend_from_slice(data);

    let lock = locks.lock_for(user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    let store = match MailboxStore::new(&config.storage_root, user) {
        Ok(s) => s,
        Err(e) => {
            log_line("smtp", format!("storage error opening mailbox for {}: {}", user, e));
            return false;
        }
    };
    let now = chrono::Utc::now().with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
    match store.append_message(crate::store::INBOX, &body, vec![Flag::Recent], now) {
        Ok(_uid) => {
            log_line("smtp", format!("delivered local message to {}", recipient));
            true
        }
        Err(e) => {
            log_line("smtp", format!("storage error delivering to {}: {}", recipient, e));
            false
        }
    }
}

fn relay(config: &ServerConfig, domain: &str, sender: &str, recipient: &str, data: &[u8]) -> bool {
    let target_host = dns::resolve_mx(domain).or_else(|| dns::resolve_a(domain));
    let target_host = match target_host {
        Some(h) => h,
        None => {
            log_line("smtp", format!("DNS resolution failed for {}", domain));
            return false;
        }
    };
    let ip = dns::resolve_a(&target_host).unwrap_or(target_host);
    match outbound::relay_message(&ip, &config.domain, sender, recipient, data) {
        Ok(()) => {
            log_line("smtp", format!("relayed message to {} via {}", recipient, ip));
            true
        }
        Err(e) => {
            log_line("smtp", format!("relay to {} failed: {}", recipient, e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_address_strips_angle_brackets_and_whitespace() {
        assert_eq!(extract_address("FROM:<a@b.com>"), Some("a@b.com".to_string()));
        assert_eq!(extract_address("FROM: <  a@b.com  >"), Some("a@b.com".to_string()));
        assert_eq!(extract_address("FROM:"), None);
    }

    #[test]
    fn split_verb_separates_command_and_argument() {
        assert_eq!(split_verb("MAIL FROM:<a@b.com>"), ("MAIL", "FROM:<a@b.com>"));
        assert_eq!(split_verb("QUIT"), ("QUIT", ""));
    }

    #[test]
    fn domain_of_returns_part_after_at() {
        assert_eq!(domain_of("dcd@uliege.be"), Some("uliege.be"));
        assert_eq!(domain_of("nouser"), None);
    }

    #[test]
    fn full_local_delivery_round_trip_over_an_in_memory_socket() {
        use std::collections::HashMap;
        use std::io::Cursor;

        struct DuplexMock {
            input: Cursor<Vec<u8>>,
            output: Vec<u8>,
        }
        impl Read for DuplexMock {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }
        impl Write for DuplexMock {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let root = std::env::temp_dir().join(format!("portolano-smtp-test-{}", std::process::id()));
        let mut creds = HashMap::new();
        creds.insert("dcd".to_string(), "password".to_string());
        let config = ServerConfig::new("uliege.be", 4, root.clone()).with_credentials(creds);
        let locks = LockManager::new();

        let script = b"HELO ext.com\r\nMAIL FROM:<x@ext.com>\r\nRCPT TO:<dcd@uliege.be>\r\nDATA\r\nSubject: hi\r\n\r\nhello\r\n.\r\nQUIT\r\n".to_vec();
        let mock = DuplexMock {
            input: Cursor::new(script),
            output: Vec::new(),
        };

        run_session(&config, &locks, mock).unwrap();

        let store = MailboxStore::new(&root, "dcd").unwrap();
        let uids = store.list_uids(crate::store::INBOX).unwrap();
        assert_eq!(uids.len(), 1);
        let bytes = store.read_message(crate::store::INBOX, uids[0]).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("hello"));
        assert!(text.starts_with("Return-Path: <x@ext.com>"));

        std::fs::remove_dir_all(&root).ok();
    }
}
