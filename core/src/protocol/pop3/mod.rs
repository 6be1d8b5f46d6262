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

//! POP3 session state machine (`AUTHORIZATION`/`TRANSACTION`): USER/PASS,
//! STAT/LIST/UIDL, RETR/TOP, DELE/RSET, NOOP, QUIT. Only `INBOX` is ever
//! addressed; POP3 has no notion of folders.

use crate::config::ServerConfig;
use crate::logging::log_line;
use crate::mime::split_header_body;
use crate::protocol::smtp::dot_stuffer::DotStuffer;
use crate::protocol::local_part;
use crate::store::{Flag, LockManager, MailboxStore, StoreError, INBOX};
use std::io::{self, BufRead, BufReader, Read, Write};

enum State {
    Authorization,
    Transaction,
}

/// One message as seen by this session: fixed at `PASS` time, indices are
/// 1-based positions into this snapshot and never renumber mid-session.
struct Entry {
    uid: u64,
    size: u64,
    deleted: bool,
}

struct Session {
    state: State,
    pending_user: Option<String>,
    user: Option<String>,
    entries: Vec<Entry>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: State::Authorization,
            pending_user: None,
            user: None,
            entries: Vec::new(),
        }
    }

    /// Resolve a 1-based message number to its entry, `None` if out of range
    /// or already marked `\Deleted`.
    fn entry(&self, n: usize) -> Option<&Entry> {
        n.checked_sub(1).and_then(|i| self.entries.get(i)).filter(|e| !e.deleted)
    }
}

/// Run one POP3 session to completion.
pub fn run_session<S: Read + Write>(config: &ServerConfig, locks: &LockManager, stream: S) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    write_line(reader.get_mut(), "+OK POP3 server ready")?;

    let mut session = Session::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(()); // peer closed; FATAL_IO, no reply attempted
        }
        let text = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = split_verb(text);

        if handle_command(config, locks, reader.get_mut(), &verb.to_ascii_uppercase(), rest, &mut session)? {
            return Ok(());
        }
    }
}

fn write_line<W: Write>(w: &mut W, line: &str) -> io::Result<()> {
    w.write_all(line.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()
}

fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Dispatch one command. Returns `Ok(true)` when the session should end.
fn handle_command<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    verb: &str,
    rest: &str,
    session: &mut Session,
) -> io::Result<bool> {
    match verb {
        "USER" => {
            session.pending_user = Some(local_part(rest.trim()).to_string());
            write_line(writer, "+OK")?;
        }
        "PASS" => handle_pass(config, locks, writer, rest, session)?,
        "STAT" => handle_stat(writer, session)?,
        "LIST" => handle_list(writer, rest, session)?,
        "UIDL" => handle_uidl(writer, rest, session)?,
        "RETR" => handle_retr(config, locks, writer, rest, session)?,
        "TOP" => handle_top(config, locks, writer, rest, session)?,
        "DELE" => handle_dele(config, locks, writer, rest, session)?,
        "RSET" => handle_rset(config, locks, writer, session)?,
        "NOOP" => {
            if matches!(session.state, State::Transaction) {
                write_line(writer, "+OK")?;
            } else {
                write_line(writer, "-ERR command not valid in this state")?;
            }
        }
        "QUIT" => {
            handle_quit(config, locks, writer, session)?;
            return Ok(true);
        }
        _ => write_line(writer, "-ERR Unrecognized command")?,
    }
    Ok(false)
}

fn handle_pass<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    password: &str,
    session: &mut Session,
) -> io::Result<()> {
    if !matches!(session.state, State::Authorization) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let user = match session.pending_user.take() {
        Some(u) => u,
        None => return write_line(writer, "-ERR USER required first"),
    };
    if !config.authenticate(&user, password) {
        log_line("pop3", format!("authentication failed for {}", user));
        return write_line(writer, "-ERR authentication failed");
    }

    let lock = locks.lock_for(&user);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
    match load_entries(config, &user) {
        Ok(entries) => {
            session.entries = entries;
            session.user = Some(user);
            session.state = State::Transaction;
            write_line(writer, "+OK mailbox ready")
        }
        Err(e) => {
            log_line("pop3", format!("storage error loading mailbox for {}: {}", user, e));
            write_line(writer, "-ERR unable to open mailbox")
        }
    }
}

fn load_entries(config: &ServerConfig, user: &str) -> Result<Vec<Entry>, StoreError> {
    let store = MailboxStore::new(&config.storage_root, user)?;
    let uids = store.list_uids(INBOX)?;
    uids.into_iter()
        .map(|uid| {
            let size = store.message_size(INBOX, uid)?;
            Ok(Entry { uid, size, deleted: false })
        })
        .collect()
}

fn handle_stat<W: Write>(writer: &mut W, session: &Session) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let (count, total): (usize, u64) = session
        .entries
        .iter()
        .filter(|e| !e.deleted)
        .fold((0, 0), |(c, t), e| (c + 1, t + e.size));
    write_line(writer, &format!("+OK {} {}", count, total))
}

fn handle_list<W: Write>(writer: &mut W, rest: &str, session: &Session) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let arg = rest.trim();
    if arg.is_empty() {
        write_line(writer, "+OK scan listing follows")?;
        for (i, e) in session.entries.iter().enumerate() {
            if !e.deleted {
                writer.write_all(format!("{} {}\r\n", i + 1, e.size).as_bytes())?;
            }
        }
        writer.write_all(b".\r\n")?;
        writer.flush()
    } else {
        match arg.parse::<usize>().ok().and_then(|n| session.entry(n).map(|e| (n, e))) {
            Some((n, e)) => write_line(writer, &format!("+OK {} {}", n, e.size)),
            None => write_line(writer, "-ERR no such message"),
        }
    }
}

fn handle_uidl<W: Write>(writer: &mut W, rest: &str, session: &Session) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let arg = rest.trim();
    if arg.is_empty() {
        write_line(writer, "+OK unique-id listing follows")?;
        for (i, e) in session.entries.iter().enumerate() {
            if !e.deleted {
                writer.write_all(format!("{} {}\r\n", i + 1, e.uid).as_bytes())?;
            }
        }
        writer.write_all(b".\r\n")?;
        writer.flush()
    } else {
        match arg.parse::<usize>().ok().and_then(|n| session.entry(n).map(|e| (n, e))) {
            Some((n, e)) => write_line(writer, &format!("+OK {} {}", n, e.uid)),
            None => write_line(writer, "-ERR no such message"),
        }
    }
}

fn handle_retr<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    rest: &str,
    session: &Session,
) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let n: usize = match rest.trim().parse() {
        Ok(n) => n,
        Err(_) => return write_line(writer, "-ERR invalid message number"),
    };
    let uid = match session.entry(n) {
        Some(e) => e.uid,
        None => return write_line(writer, "-ERR no such message"),
    };
    let user = session.user.as_deref().unwrap_or_default();
    let lock = locks.lock_for(user);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
    let store = match MailboxStore::new(&config.storage_root, user) {
        Ok(s) => s,
        Err(_) => return write_line(writer, "-ERR unable to open mailbox"),
    };
    match store.read_message(INBOX, uid) {
        Ok(raw) => {
            write_line(writer, "+OK message follows")?;
            send_dot_stuffed(writer, &raw)
        }
        Err(e) => {
            log_line("pop3", format!("storage error retrieving message {}: {}", uid, e));
            write_line(writer, "-ERR unable to read message")
        }
    }
}

fn handle_top<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    rest: &str,
    session: &Session,
) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let mut parts = rest.split_whitespace();
    let (n, k) = match (
        parts.next().and_then(|s| s.parse::<usize>().ok()),
        parts.next().and_then(|s| s.parse::<usize>().ok()),
    ) {
        (Some(n), Some(k)) => (n, k),
        _ => return write_line(writer, "-ERR syntax: TOP n k"),
    };
    let uid = match session.entry(n) {
        Some(e) => e.uid,
        None => return write_line(writer, "-ERR no such message"),
    };
    let user = session.user.as_deref().unwrap_or_default();
    let lock = locks.lock_for(user);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
    let store = match MailboxStore::new(&config.storage_root, user) {
        Ok(s) => s,
        Err(_) => return write_line(writer, "-ERR unable to open mailbox"),
    };
    match store.read_message(INBOX, uid) {
        Ok(raw) => {
            let (header, body) = split_header_body(&raw);
            let mut out = header.to_vec();
            out.extend_from_slice(b"\r\n");
            for line in body.split(|&b| b == b'\n').take(k) {
                out.extend_from_slice(line);
                out.extend_from_slice(b"\n");
            }
            write_line(writer, "+OK top of message follows")?;
            send_dot_stuffed(writer, &out)
        }
        Err(e) => {
            log_line("pop3", format!("storage error retrieving message {}: {}", uid, e));
            write_line(writer, "-ERR unable to read message")
        }
    }
}

fn send_dot_stuffed<W: Write>(writer: &mut W, raw: &[u8]) -> io::Result<()> {
    let mut stuffed = Vec::with_capacity(raw.len() + 8);
    let mut stuffer = DotStuffer::new();
    stuffer.process_chunk(raw, |chunk| stuffed.extend_from_slice(chunk));
    stuffer.end_message(|chunk| stuffed.extend_from_slice(chunk));
    writer.write_all(&stuffed)?;
    writer.flush()
}

fn handle_dele<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    rest: &str,
    session: &mut Session,
) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let n: usize = match rest.trim().parse() {
        Ok(n) => n,
        Err(_) => return write_line(writer, "-ERR invalid message number"),
    };
    let uid = match session.entry(n) {
        Some(e) => e.uid,
        None => return write_line(writer, "-ERR no such message"),
    };
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    let result: Result<(), StoreError> = (|| {
        let store = MailboxStore::new(&config.storage_root, &user)?;
        let mut flags = store.flags(INBOX, uid)?;
        if !flags.contains(&Flag::Deleted) {
            flags.push(Flag::Deleted);
        }
        store.set_flags(INBOX, uid, flags)
    })();
    match result {
        Ok(()) => {
            session.entries[n - 1].deleted = true;
            write_line(writer, "+OK message deleted")
        }
        Err(e) => {
            log_line("pop3", format!("storage error deleting message {}: {}", uid, e));
            write_line(writer, "-ERR unable to mark message deleted")
        }
    }
}

fn handle_rset<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &mut Session) -> io::Result<()> {
    if !matches!(session.state, State::Transaction) {
        return write_line(writer, "-ERR command not valid in this state");
    }
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    let store = match MailboxStore::new(&config.storage_root, &user) {
        Ok(s) => s,
        Err(_) => return write_line(writer, "-ERR unable to open mailbox"),
    };
    for entry in session.entries.iter_mut().filter(|e| e.deleted) {
        if let Ok(mut flags) = store.flags(INBOX, entry.uid) {
            flags.retain(|f| *f != Flag::Deleted);
            let _ = store.set_flags(INBOX, entry.uid, flags);
        }
        entry.deleted = false;
    }
    write_line(writer, "+OK")
}

fn handle_quit<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &mut Session) -> io::Result<()> {
    if let (State::Transaction, Some(user)) = (&session.state, session.user.clone()) {
        let lock = locks.lock_for(&user);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        if let Ok(store) = MailboxStore::new(&config.storage_root, &user) {
            match store.expunge(INBOX) {
                Ok(removed) => log_line("pop3", format!("{} deleted {} message(s) at QUIT", user, removed.len())),
                Err(e) => log_line("pop3", format!("storage error during QUIT expunge for {}: {}", user, e)),
            }
        }
    }
    write_line(writer, "+OK Bye")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MailboxStore as Store;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::PathBuf;

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

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("portolano-pop3-test-{}-{}", tag, std::process::id()))
    }

    fn config(root: PathBuf) -> ServerConfig {
        let mut creds = HashMap::new();
        creds.insert("dcd".to_string(), "password".to_string());
        ServerConfig::new("uliege.be", 4, root).with_credentials(creds)
    }

    #[test]
    fn retr_round_trips_delivered_message() {
        let root = temp_root("retr");
        let store = Store::new(&root, "dcd").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        store.append_message(INBOX, b"Subject: hi\r\n\r\nhello\r\n", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"USER dcd@uliege.be\r\nPASS password\r\nSTAT\r\nRETR 1\r\nQUIT\r\n".to_vec();
        let mock = DuplexMock { input: Cursor::new(script), output: Vec::new() };
        run_session(&config, &locks, mock).unwrap();

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn dele_then_quit_removes_message_file() {
        let root = temp_root("dele");
        let store = Store::new(&root, "dcd").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        let uid = store.append_message(INBOX, b"one", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"USER dcd\r\nPASS password\r\nDELE 1\r\nQUIT\r\n".to_vec();
        let mock = DuplexMock { input: Cursor::new(script), output: Vec::new() };
        run_session(&config, &locks, mock).unwrap();

        let store = Store::new(&root, "dcd").unwrap();
        assert!(store.read_message(INBOX, uid).is_err());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn rset_restores_deleted_message() {
        let root = temp_root("rset");
        let store = Store::new(&root, "dcd").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        let uid = store.append_message(INBOX, b"one", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"USER dcd\r\nPASS password\r\nDELE 1\r\nRSET\r\nQUIT\r\n".to_vec();
        let mock = DuplexMock { input: Cursor::new(script), output: Vec::new() };
        run_session(&config, &locks, mock).unwrap();

        let store = Store::new(&root, "dcd").unwrap();
        assert!(store.read_message(INBOX, uid).is_ok());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn bad_password_stays_in_authorization() {
        let root = temp_root("badpw");
        Store::new(&root, "dcd").unwrap();
        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"USER dcd\r\nPASS wrong\r\nSTAT\r\nQUIT\r\n".to_vec();
        let mock = DuplexMock { input: Cursor::new(script), output: Vec::new() };
        run_session(&config, &locks, mock).unwrap();
        std::fs::remove_dir_all(&root).ok();
    }
}
