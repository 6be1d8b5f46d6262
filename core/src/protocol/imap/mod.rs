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

//! IMAP4rev1 session state machine (`NOT_AUTHENTICATED`/`AUTHENTICATED`/
//! `SELECTED`/`LOGOUT`): LOGIN, LIST/LSUB, CREATE/DELETE/RENAME/SUBSCRIBE/
//! UNSUBSCRIBE, SELECT, UID FETCH/STORE/COPY, EXPUNGE/CLOSE. Every command
//! that touches the store runs under the per-user lock (`crate::store::LockManager`):
//! reads (LIST, SELECT, FETCH without `\Seen` side effects) take the read
//! lock, any mutation the write lock.

mod fetch;
mod list;
mod sequence_set;

use crate::config::ServerConfig;
use crate::logging::log_line;
use crate::protocol::local_part;
use crate::store::{Flag, LockManager, MailboxStore, StoreError, INBOX};
use fetch::{parse_items, render_fetch, requires_seen_flag, FetchContext};
use list::{has_children, matches_pattern};
use sequence_set::parse_uid_set;
use std::io::{self, BufRead, BufReader, Read, Write};

const CAPABILITY: &str = "CAPABILITY IMAP4rev1 SASL-IR LOGIN-REFERRALS ID ENABLE IDLE LITERAL+";

#[derive(PartialEq, Eq)]
enum State {
    NotAuthenticated,
    Authenticated,
    Selected,
    Logout,
}

struct Session {
    state: State,
    user: Option<String>,
    selected_folder: Option<String>,
    /// UIDs of the selected folder, ascending, fixed until EXPUNGE/CLOSE or a
    /// NOOP-triggered refresh.
    cached_uids: Vec<u64>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: State::NotAuthenticated,
            user: None,
            selected_folder: None,
            cached_uids: Vec::new(),
        }
    }
}

/// Run one IMAP session to completion.
pub fn run_session<S: Read + Write>(config: &ServerConfig, locks: &LockManager, stream: S) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    write_untagged(
        reader.get_mut(),
        &format!("OK [{}] {} IMAP4rev1 Service Ready", CAPABILITY, config.domain),
    )?;

    let mut session = Session::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(()); // peer closed; FATAL_IO, no reply attempted
        }
        let text = line.trim_end_matches(['\r', '\n']);
        let (tag, rest) = split_verb(text);
        if tag.is_empty() {
            continue;
        }
        let (verb, args) = split_verb(rest);
        dispatch(config, locks, reader.get_mut(), &mut session, tag, &verb.to_ascii_uppercase(), args)?;
        if session.state == State::Logout {
            return Ok(());
        }
    }
}

fn write_untagged<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    w.write_all(b"* ")?;
    w.write_all(text.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()
}

fn write_tagged<W: Write>(w: &mut W, tag: &str, status: &str, text: &str) -> io::Result<()> {
    w.write_all(tag.as_bytes())?;
    w.write_all(b" ")?;
    w.write_all(status.as_bytes())?;
    w.write_all(b" ")?;
    w.write_all(text.as_bytes())?;
    w.write_all(b"\r\n")?;
    w.flush()
}

fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

/// Split on whitespace, honoring double-quoted spans as a single token.
fn parse_quoted_args(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut tok = String::new();
            while let Some(c) = chars.next() {
                if c == '"' {
                    break;
                }
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        tok.push(next);
                    }
                } else {
                    tok.push(c);
                }
            }
            out.push(tok);
        } else {
            let mut tok = String::new();
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                tok.push(chars.next().unwrap());
            }
            out.push(tok);
        }
    }
    out
}

/// `INBOX` is addressable case-insensitively; every other folder name is
/// matched case-sensitively.
fn resolve_folder_name(raw: &str) -> String {
    if raw.eq_ignore_ascii_case(INBOX) {
        INBOX.to_string()
    } else {
        raw.to_string()
    }
}

fn open_store(config: &ServerConfig, user: &str) -> Result<MailboxStore, StoreError> {
    MailboxStore::new(&config.storage_root, user)
}

fn dispatch<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &mut Session,
    tag: &str,
    verb: &str,
    args: &str,
) -> io::Result<()> {
    match verb {
        "CAPABILITY" => {
            write_untagged(writer, CAPABILITY)?;
            write_tagged(writer, tag, "OK", "CAPABILITY completed")
        }
        "NOOP" => handle_noop(config, locks, writer, session, tag),
        "LOGIN" => handle_login(config, writer, session, tag, args),
        "LOGOUT" => {
            write_untagged(writer, "BYE IMAP4rev1 Server logging out")?;
            write_tagged(writer, tag, "OK", "LOGOUT completed")?;
            session.state = State::Logout;
            Ok(())
        }
        "LIST" => handle_list(config, locks, writer, session, tag, args, false),
        "LSUB" => handle_list(config, locks, writer, session, tag, args, true),
        "CREATE" => handle_create(config, locks, writer, session, tag, args),
        "DELETE" => handle_delete(config, locks, writer, session, tag, args),
        "RENAME" => handle_rename(config, locks, writer, session, tag, args),
        "SUBSCRIBE" => handle_subscribe(config, locks, writer, session, tag, args, true),
        "UNSUBSCRIBE" => handle_subscribe(config, locks, writer, session, tag, args, false),
        "SELECT" => handle_select(config, locks, writer, session, tag, args),
        "UID" => {
            let (subverb, subargs) = split_verb(args);
            match subverb.to_ascii_uppercase().as_str() {
                "FETCH" => handle_uid_fetch(config, locks, writer, session, tag, subargs),
                "STORE" => handle_uid_store(config, locks, writer, session, tag, subargs),
                "COPY" => handle_uid_copy(config, locks, writer, session, tag, subargs),
                _ => write_tagged(writer, tag, "BAD", "Unknown UID subcommand"),
            }
        }
        "EXPUNGE" => handle_expunge(config, locks, writer, session, tag, false),
        "CLOSE" => handle_expunge(config, locks, writer, session, tag, true),
        _ => write_tagged(writer, tag, "BAD", "Unrecognized command"),
    }
}

fn require_authenticated<W: Write>(writer: &mut W, session: &Session, tag: &str) -> io::Result<bool> {
    if matches!(session.state, State::Authenticated | State::Selected) {
        Ok(true)
    } else {
        write_tagged(writer, tag, "NO", "Command requires authentication")?;
        Ok(false)
    }
}

fn require_selected<W: Write>(writer: &mut W, session: &Session, tag: &str) -> io::Result<bool> {
    if matches!(session.state, State::Selected) {
        Ok(true)
    } else {
        write_tagged(writer, tag, "NO", "Command requires a selected mailbox")?;
        Ok(false)
    }
}

fn handle_noop<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &mut Session, tag: &str) -> io::Result<()> {
    if let (State::Selected, Some(user), Some(folder)) = (&session.state, session.user.clone(), session.selected_folder.clone()) {
        let lock = locks.lock_for(&user);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        if let Ok(store) = open_store(config, &user) {
            if let Ok(uids) = store.list_uids(&folder) {
                if uids.len() > session.cached_uids.len() {
                    let recent = uids
                        .iter()
                        .filter(|&&uid| store.flags(&folder, uid).map(|f| f.contains(&Flag::Recent)).unwrap_or(false))
                        .count();
                    session.cached_uids = uids;
                    write_untagged(writer, &format!("{} EXISTS", session.cached_uids.len()))?;
                    write_untagged(writer, &format!("{} RECENT", recent))?;
                }
            }
        }
    }
    write_tagged(writer, tag, "OK", "NOOP completed")
}

fn handle_login<W: Write>(config: &ServerConfig, writer: &mut W, session: &mut Session, tag: &str, args: &str) -> io::Result<()> {
    if !matches!(session.state, State::NotAuthenticated) {
        return write_tagged(writer, tag, "BAD", "LOGIN not permitted in this state");
    }
    let tokens = parse_quoted_args(args);
    if tokens.len() < 2 {
        return write_tagged(writer, tag, "BAD", "LOGIN requires a username and password");
    }
    let user = local_part(&tokens[0]).to_string();
    if config.authenticate(&user, &tokens[1]) {
        session.user = Some(user);
        session.state = State::Authenticated;
        write_tagged(writer, tag, "OK", "LOGIN completed")
    } else {
        log_line("imap", format!("authentication failed for {}", user));
        write_tagged(writer, tag, "NO", "LOGIN failed")
    }
}

fn handle_list<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &Session,
    tag: &str,
    args: &str,
    lsub: bool,
) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let verb_name = if lsub { "LSUB" } else { "LIST" };
    let tokens = parse_quoted_args(args);
    let reference = tokens.first().map(String::as_str).unwrap_or("");
    let pattern = tokens.get(1).map(String::as_str).unwrap_or("");

    if reference.is_empty() && pattern.is_empty() {
        write_untagged(writer, &format!("{} (\\Noselect) \"/\" \"\"", verb_name))?;
        return write_tagged(writer, tag, "OK", &format!("{} completed", verb_name));
    }

    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
    let store = match open_store(config, &user) {
        Ok(s) => s,
        Err(e) => return write_tagged(writer, tag, "NO", &format!("{} failed: {}", verb_name, e)),
    };
    let mut folders = match store.list_folders() {
        Ok(f) => f,
        Err(e) => return write_tagged(writer, tag, "NO", &format!("{} failed: {}", verb_name, e)),
    };
    folders.sort();

    for name in &folders {
        if !matches_pattern(name, pattern) {
            continue;
        }
        if lsub && !store.is_subscribed(name).unwrap_or(false) {
            continue;
        }
        let attr = if has_children(&folders, name) { "\\HasChildren" } else { "\\HasNoChildren" };
        write_untagged(writer, &format!("{} ({}) \"/\" \"{}\"", verb_name, attr, name))?;
    }
    write_tagged(writer, tag, "OK", &format!("{} completed", verb_name))
}

fn handle_create<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &Session, tag: &str, args: &str) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let tokens = parse_quoted_args(args);
    let name = match tokens.first() {
        Some(n) if !n.is_empty() => n.clone(),
        _ => return write_tagged(writer, tag, "BAD", "CREATE requires a mailbox name"),
    };
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    match open_store(config, &user).and_then(|s| s.create_folder(&name)) {
        Ok(()) => write_tagged(writer, tag, "OK", "CREATE completed"),
        Err(e) => write_tagged(writer, tag, "NO", &format!("CREATE failed: {}", e)),
    }
}

fn handle_delete<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &Session, tag: &str, args: &str) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let tokens = parse_quoted_args(args);
    let name = match tokens.first() {
        Some(n) if !n.is_empty() => n.clone(),
        _ => return write_tagged(writer, tag, "BAD", "DELETE requires a mailbox name"),
    };
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    match open_store(config, &user).and_then(|s| s.delete_folder(&name)) {
        Ok(()) => write_tagged(writer, tag, "OK", "DELETE completed"),
        Err(e) => write_tagged(writer, tag, "NO", &format!("DELETE failed: {}", e)),
    }
}

fn handle_rename<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &Session, tag: &str, args: &str) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let tokens = parse_quoted_args(args);
    if tokens.len() < 2 {
        return write_tagged(writer, tag, "BAD", "RENAME requires two mailbox names");
    }
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    match open_store(config, &user).and_then(|s| s.rename_folder(&tokens[0], &tokens[1])) {
        Ok(()) => write_tagged(writer, tag, "OK", "RENAME completed"),
        Err(e) => write_tagged(writer, tag, "NO", &format!("RENAME failed: {}", e)),
    }
}

fn handle_subscribe<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &Session,
    tag: &str,
    args: &str,
    subscribed: bool,
) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let verb_name = if subscribed { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
    let tokens = parse_quoted_args(args);
    let name = match tokens.first() {
        Some(n) if !n.is_empty() => resolve_folder_name(n),
        _ => return write_tagged(writer, tag, "BAD", &format!("{} requires a mailbox name", verb_name)),
    };
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
    match open_store(config, &user).and_then(|s| s.set_subscribed(&name, subscribed)) {
        Ok(()) => write_tagged(writer, tag, "OK", &format!("{} completed", verb_name)),
        Err(e) => write_tagged(writer, tag, "NO", &format!("{} failed: {}", verb_name, e)),
    }
}

fn handle_select<W: Write>(config: &ServerConfig, locks: &LockManager, writer: &mut W, session: &mut Session, tag: &str, args: &str) -> io::Result<()> {
    if !require_authenticated(writer, session, tag)? {
        return Ok(());
    }
    let tokens = parse_quoted_args(args);
    let name = match tokens.first() {
        Some(n) if !n.is_empty() => resolve_folder_name(n),
        _ => return write_tagged(writer, tag, "BAD", "SELECT requires a mailbox name"),
    };
    let user = session.user.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
    let store = match open_store(config, &user) {
        Ok(s) => s,
        Err(e) => return write_tagged(writer, tag, "NO", &format!("SELECT failed: {}", e)),
    };
    let summary = match store.summary(&name) {
        Ok(s) => s,
        Err(e) => return write_tagged(writer, tag, "NO", &format!("SELECT failed: {}", e)),
    };
    let mut uids = match store.list_uids(&name) {
        Ok(u) => u,
        Err(e) => return write_tagged(writer, tag, "NO", &format!("SELECT failed: {}", e)),
    };
    uids.sort_unstable();

    write_untagged(writer, &format!("{} EXISTS", uids.len()))?;
    write_untagged(writer, "0 RECENT")?;
    write_untagged(writer, "OK [UIDVALIDITY 1] UIDs valid")?;
    write_untagged(writer, &format!("OK [UIDNEXT {}] Predicted next UID", summary.uid_next))?;
    write_untagged(writer, "FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)")?;
    write_untagged(writer, "OK [PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*)] Limited")?;

    session.selected_folder = Some(name);
    session.cached_uids = uids;
    session.state = State::Selected;
    write_tagged(writer, tag, "OK", "[READ-WRITE] SELECT completed")
}

fn handle_uid_fetch<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &Session,
    tag: &str,
    args: &str,
) -> io::Result<()> {
    if !require_selected(writer, session, tag)? {
        return Ok(());
    }
    let (uidset_str, items_str) = split_verb(args);
    let items = parse_items(items_str);
    let need_seen = requires_seen_flag(&items);
    let selected = parse_uid_set(uidset_str, &session.cached_uids);
    let user = session.user.clone().unwrap_or_default();
    let folder = session.selected_folder.clone().unwrap_or_default();

    let lock = locks.lock_for(&user);
    let result: Result<(), StoreError> = (|| {
        let _guard = if need_seen {
            lock.write().unwrap_or_else(|e| e.into_inner())
        } else {
            lock.read().unwrap_or_else(|e| e.into_inner())
        };
        let store = open_store(config, &user)?;
        for (i, &uid) in session.cached_uids.iter().enumerate() {
            if !selected.contains(&uid) {
                continue;
            }
            let msn = (i + 1) as u64;
            let mut flags = store.flags(&folder, uid)?;
            if need_seen && !flags.contains(&Flag::Seen) {
                flags.push(Flag::Seen);
                store.set_flags(&folder, uid, flags.clone())?;
            }
            let raw = store.read_message(&folder, uid)?;
            let internal_date = store.internal_date(&folder, uid)?;
            let ctx = FetchContext {
                uid,
                flags: &flags,
                internal_date,
                raw: &raw,
            };
            writer.write_all(&render_fetch(msn, &ctx, &items))?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => write_tagged(writer, tag, "OK", "UID FETCH completed"),
        Err(e) => write_tagged(writer, tag, "NO", &format!("UID FETCH failed: {}", e)),
    }
}

fn handle_uid_store<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &Session,
    tag: &str,
    args: &str,
) -> io::Result<()> {
    if !require_selected(writer, session, tag)? {
        return Ok(());
    }
    let (range, rest) = split_verb(args);
    let (mode_tok, flags_str) = split_verb(rest);
    let mode_upper = mode_tok.to_ascii_uppercase();
    let silent = mode_upper.ends_with(".SILENT");
    let mode = mode_upper.trim_end_matches(".SILENT");
    let flags_inner = flags_str
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or_else(|| flags_str.trim());
    let requested: Vec<Flag> = flags_inner.split_whitespace().filter_map(Flag::parse).collect();
    if !matches!(mode, "+FLAGS" | "-FLAGS" | "FLAGS") {
        return write_tagged(writer, tag, "BAD", "STORE requires +FLAGS, -FLAGS or FLAGS");
    }

    let selected = parse_uid_set(range, &session.cached_uids);
    let user = session.user.clone().unwrap_or_default();
    let folder = session.selected_folder.clone().unwrap_or_default();

    let lock = locks.lock_for(&user);
    let result: Result<(), StoreError> = (|| {
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let store = open_store(config, &user)?;
        for (i, &uid) in session.cached_uids.iter().enumerate() {
            if !selected.contains(&uid) {
                continue;
            }
            let msn = i + 1;
            let mut flags = store.flags(&folder, uid)?;
            match mode {
                "+FLAGS" => {
                    for f in &requested {
                        if !flags.contains(f) {
                            flags.push(f.clone());
                        }
                    }
                }
                "-FLAGS" => flags.retain(|f| !requested.contains(f)),
                "FLAGS" => flags = requested.clone(),
                _ => unreachable!(),
            }
            store.set_flags(&folder, uid, flags.clone())?;
            if !silent {
                let tokens: Vec<String> = flags.iter().map(Flag::token).collect();
                writer.write_all(format!("* {} FETCH (UID {} FLAGS ({}))\r\n", msn, uid, tokens.join(" ")).as_bytes())?;
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => write_tagged(writer, tag, "OK", "UID STORE completed"),
        Err(e) => write_tagged(writer, tag, "NO", &format!("UID STORE failed: {}", e)),
    }
}

fn handle_uid_copy<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &Session,
    tag: &str,
    args: &str,
) -> io::Result<()> {
    if !require_selected(writer, session, tag)? {
        return Ok(());
    }
    let (range, dest_raw) = split_verb(args);
    let dest_tokens = parse_quoted_args(dest_raw);
    let dest = match dest_tokens.first() {
        Some(d) if !d.is_empty() => resolve_folder_name(d),
        _ => return write_tagged(writer, tag, "BAD", "COPY requires a destination mailbox"),
    };

    let selected = parse_uid_set(range, &session.cached_uids);
    let user = session.user.clone().unwrap_or_default();
    let folder = session.selected_folder.clone().unwrap_or_default();

    let lock = locks.lock_for(&user);
    let mut src_uids = Vec::new();
    let mut dst_uids = Vec::new();
    let result: Result<(), StoreError> = (|| {
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let store = open_store(config, &user)?;
        if dest != INBOX && store.summary(&dest).is_err() {
            return Err(StoreError::new("destination mailbox does not exist"));
        }
        for &uid in &selected {
            let new_uid = store.copy_message(&folder, uid, &dest)?;
            let mut flags = store.flags(&dest, new_uid)?;
            if !flags.contains(&Flag::Seen) {
                flags.push(Flag::Seen);
                store.set_flags(&dest, new_uid, flags)?;
            }
            src_uids.push(uid.to_string());
            dst_uids.push(new_uid.to_string());
        }
        Ok(())
    })();

    match result {
        Ok(()) => write_tagged(
            writer,
            tag,
            "OK",
            &format!("[COPYUID 1 {} {}] COPY completed", src_uids.join(","), dst_uids.join(",")),
        ),
        Err(e) => write_tagged(writer, tag, "NO", &format!("COPY failed: {}", e)),
    }
}

/// Shared EXPUNGE/CLOSE implementation. `silent` suppresses the untagged
/// `* n EXPUNGE` lines (CLOSE) and terminates the session after replying.
fn handle_expunge<W: Write>(
    config: &ServerConfig,
    locks: &LockManager,
    writer: &mut W,
    session: &mut Session,
    tag: &str,
    silent: bool,
) -> io::Result<()> {
    if !require_selected(writer, session, tag)? {
        return Ok(());
    }
    let user = session.user.clone().unwrap_or_default();
    let folder = session.selected_folder.clone().unwrap_or_default();
    let lock = locks.lock_for(&user);
    let mut remaining = session.cached_uids.clone();

    let result: Result<(), StoreError> = (|| {
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let store = open_store(config, &user)?;
        let mut idx = 0;
        while idx < remaining.len() {
            let uid = remaining[idx];
            let flags = store.flags(&folder, uid)?;
            if flags.contains(&Flag::Deleted) {
                store.delete_message(&folder, uid)?;
                remaining.remove(idx);
                if !silent {
                    writer.write_all(format!("* {} EXPUNGE\r\n", idx + 1).as_bytes())?;
                }
                // Counter advances only after a removal: the next item has
                // shifted into this slot, so `idx` itself does not move.
            } else {
                idx += 1;
            }
        }
        Ok(())
    })();

    session.cached_uids = remaining;

    let verb_name = if silent { "CLOSE" } else { "EXPUNGE" };
    let response = match result {
        Ok(()) => write_tagged(writer, tag, "OK", &format!("{} completed", verb_name)),
        Err(e) => write_tagged(writer, tag, "NO", &format!("{} failed: {}", verb_name, e)),
    };
    if silent {
        session.selected_folder = None;
        session.state = State::Logout;
    }
    response
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
        std::env::temp_dir().join(format!("portolano-imap-test-{}-{}", tag, std::process::id()))
    }

    fn config(root: PathBuf) -> ServerConfig {
        let mut creds = HashMap::new();
        creds.insert("dcd".to_string(), "password".to_string());
        ServerConfig::new("uliege.be", 4, root).with_credentials(creds)
    }

    fn run(config: &ServerConfig, locks: &LockManager, script: &[u8]) -> String {
        let mock = DuplexMock {
            input: Cursor::new(script.to_vec()),
            output: Vec::new(),
        };
        let mut reader = BufReader::new(mock);
        write_untagged(reader.get_mut(), &format!("OK [{}] {} IMAP4rev1 Service Ready", CAPABILITY, config.domain)).unwrap();
        let mut session = Session::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            let text = line.trim_end_matches(['\r', '\n']);
            let (tag, rest) = split_verb(text);
            let (verb, args) = split_verb(rest);
            dispatch(config, locks, reader.get_mut(), &mut session, tag, &verb.to_ascii_uppercase(), args).unwrap();
            if session.state == State::Logout {
                break;
            }
        }
        String::from_utf8_lossy(&reader.into_inner().output).into_owned()
    }

    #[test]
    fn greet_and_logout() {
        let root = temp_root("greet");
        let config = config(root.clone());
        let locks = LockManager::new();
        let output = run(&config, &locks, b"A1 LOGOUT\r\n");
        assert!(output.starts_with("* OK [CAPABILITY IMAP4rev1"));
        assert!(output.contains("* BYE"));
        assert!(output.contains("A1 OK LOGOUT completed"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn select_reports_exists_and_uidnext() {
        let root = temp_root("select");
        let store = Store::new(&root, "dcd").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        store.append_message(INBOX, b"one", vec![], now).unwrap();
        store.append_message(INBOX, b"two", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"A1 LOGIN \"dcd\" \"password\"\r\nA2 SELECT INBOX\r\nA3 UID FETCH 1:* (UID)\r\nA4 LOGOUT\r\n";
        let output = run(&config, &locks, script);
        assert!(output.contains("* 2 EXISTS"));
        assert!(output.contains("[UIDNEXT 3]"));
        assert!(output.contains("UID 1"));
        assert!(output.contains("UID 2"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn expunge_renumbers_remaining_messages() {
        let root = temp_root("expunge");
        let store = Store::new(&root, "dcd").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        store.append_message(INBOX, b"one", vec![], now).unwrap();
        store.append_message(INBOX, b"two", vec![], now).unwrap();
        store.append_message(INBOX, b"three", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"A1 LOGIN \"dcd\" \"password\"\r\nA2 SELECT INBOX\r\nA3 UID STORE 2 +FLAGS (\\Deleted)\r\nA4 EXPUNGE\r\nA5 LOGOUT\r\n";
        let output = run(&config, &locks, script);
        assert!(output.contains("* 2 EXPUNGE"));
        assert!(!output.contains("* 1 EXPUNGE"));
        assert!(!output.contains("* 3 EXPUNGE"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn uid_copy_assigns_fresh_uid_in_destination() {
        let root = temp_root("copy");
        let store = Store::new(&root, "dcd").unwrap();
        store.create_folder("Archive").unwrap();
        let now = chrono::DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap());
        store.append_message(INBOX, b"one", vec![], now).unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"A1 LOGIN \"dcd\" \"password\"\r\nA2 SELECT INBOX\r\nA3 UID COPY 1 Archive\r\nA4 LOGOUT\r\n";
        let output = run(&config, &locks, script);
        assert!(output.contains("COPYUID 1 1 1"));

        let uids = Store::new(&root, "dcd").unwrap().list_uids("Archive").unwrap();
        assert_eq!(uids, vec![1]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn list_honors_glob_pattern() {
        let root = temp_root("list");
        let store = Store::new(&root, "dcd").unwrap();
        store.create_folder("Work").unwrap();
        store.create_folder("Work/Projects").unwrap();

        let config = config(root.clone());
        let locks = LockManager::new();
        let script = b"A1 LOGIN \"dcd\" \"password\"\r\nA2 LIST \"\" \"Work*\"\r\nA3 LOGOUT\r\n";
        let output = run(&config, &locks, script);
        assert!(output.contains("\"Work\""));
        assert!(output.contains("\"Work/Projects\""));
        assert!(!output.contains("\"INBOX\""));
        std::fs::remove_dir_all(&root).ok();
    }
}
