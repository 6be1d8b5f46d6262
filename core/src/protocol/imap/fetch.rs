/*
 * fetch.rs
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

//! `UID FETCH` data-item parsing and response rendering: macros (ALL/FAST/FULL),
//! FLAGS/INTERNALDATE/RFC822.SIZE/ENVELOPE/BODYSTRUCTURE, and BODY[section]
//! literals. BODYSTRUCTURE is rendered as a single flat text/plain part: full
//! MIME entity decoding is out of this server's scope.

use crate::mime::{parse_envelope, split_header_body};
use crate::store::{Address, Envelope, Flag};

#[derive(Debug, Clone, PartialEq)]
pub enum FetchItem {
    Flags,
    InternalDate,
    Rfc822Size,
    Envelope,
    BodyStructure,
    BodySection { section: String, peek: bool },
}

/// Parse one data-item specification: a bare macro name (`ALL`/`FAST`/`FULL`),
/// a single item, or a parenthesized list of items.
pub fn parse_items(raw: &str) -> Vec<FetchItem> {
    let trimmed = raw.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "ALL" => {
            return vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
            ]
        }
        "FAST" => return vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size],
        "FULL" => {
            return vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope,
                FetchItem::BodyStructure,
            ]
        }
        _ => {}
    }
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);
    inner.split_whitespace().filter_map(parse_single_item).collect()
}

fn parse_single_item(tok: &str) -> Option<FetchItem> {
    let upper = tok.to_ascii_uppercase();
    match upper.as_str() {
        "FLAGS" => return Some(FetchItem::Flags),
        "INTERNALDATE" => return Some(FetchItem::InternalDate),
        "RFC822.SIZE" => return Some(FetchItem::Rfc822Size),
        "ENVELOPE" => return Some(FetchItem::Envelope),
        "BODYSTRUCTURE" => return Some(FetchItem::BodyStructure),
        _ => {}
    }
    if let Some(section) = upper.strip_prefix("BODY.PEEK[").and_then(|s| s.strip_suffix(']')) {
        return Some(FetchItem::BodySection {
            section: section.to_string(),
            peek: true,
        });
    }
    if let Some(section) = upper.strip_prefix("BODY[").and_then(|s| s.strip_suffix(']')) {
        return Some(FetchItem::BodySection {
            section: section.to_string(),
            peek: false,
        });
    }
    None
}

/// True if any requested item is a non-`.PEEK` BODY section, i.e. this fetch
/// must set `\Seen` on the message (write access to the store is required).
pub fn requires_seen_flag(items: &[FetchItem]) -> bool {
    items
        .iter()
        .any(|i| matches!(i, FetchItem::BodySection { peek: false, .. }))
}

/// Everything `render_fetch` needs about one message; assembled by the caller
/// from the mailbox store under the appropriate lock.
pub struct FetchContext<'a> {
    pub uid: u64,
    pub flags: &'a [Flag],
    pub internal_date: chrono::DateTime<chrono::FixedOffset>,
    pub raw: &'a [u8],
}

/// Render one `* <msn> FETCH (...)` response line, including raw literal
/// bytes for any requested BODY section.
pub fn render_fetch(msn: u64, ctx: &FetchContext, items: &[FetchItem]) -> Vec<u8> {
    let mut out = format!("* {} FETCH (UID {}", msn, ctx.uid).into_bytes();
    for item in items {
        out.push(b' ');
        match item {
            FetchItem::Flags => {
                let tokens: Vec<String> = ctx.flags.iter().map(Flag::token).collect();
                out.extend_from_slice(format!("FLAGS ({})", tokens.join(" ")).as_bytes());
            }
            FetchItem::InternalDate => {
                out.extend_from_slice(
                    format!("INTERNALDATE \"{}\"", ctx.internal_date.format("%d-%b-%Y %H:%M:%S %z")).as_bytes(),
                );
            }
            FetchItem::Rfc822Size => {
                out.extend_from_slice(format!("RFC822.SIZE {}", ctx.raw.len()).as_bytes());
            }
            FetchItem::Envelope => {
                out.extend_from_slice(render_envelope(&parse_envelope(ctx.raw)).as_bytes());
            }
            FetchItem::BodyStructure => {
                out.extend_from_slice(render_bodystructure(ctx.raw).as_bytes());
            }
            FetchItem::BodySection { section, .. } => {
                let bytes = section_bytes(ctx.raw, section);
                out.extend_from_slice(format!("BODY[{}] {{{}}}\r\n", section, bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
    out.push(b')');
    out.extend_from_slice(b"\r\n");
    out
}

fn section_bytes<'a>(raw: &'a [u8], section: &str) -> &'a [u8] {
    match section {
        "HEADER" => split_header_body(raw).0,
        "TEXT" => split_header_body(raw).1,
        _ => raw,
    }
}

fn render_bodystructure(raw: &[u8]) -> String {
    let (_, body) = split_header_body(raw);
    format!(
        "BODYSTRUCTURE (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" {} NIL NIL NIL)",
        body.len()
    )
}

fn render_envelope(env: &Envelope) -> String {
    let date = env.date.map(|d| quote(&d.to_rfc2822())).unwrap_or_else(nil);
    let subject = env.subject.as_deref().map(quote).unwrap_or_else(nil);
    let in_reply_to = env.in_reply_to.as_deref().map(quote).unwrap_or_else(nil);
    let message_id = env.message_id.as_deref().map(quote).unwrap_or_else(nil);
    format!(
        "ENVELOPE ({} {} {} {} {} {} {} {} {} {})",
        date,
        subject,
        render_address_list(&env.from),
        render_address_list(&env.sender),
        render_address_list(&env.reply_to),
        render_address_list(&env.to),
        render_address_list(&env.cc),
        render_address_list(&env.bcc),
        in_reply_to,
        message_id,
    )
}

fn render_address_list(addrs: &[Address]) -> String {
    if addrs.is_empty() {
        return "NIL".to_string();
    }
    let parts: Vec<String> = addrs
        .iter()
        .map(|a| {
            let name = a.display_name.as_deref().map(quote).unwrap_or_else(nil);
            let local = quote(&a.local_part);
            let domain = a.domain.as_deref().map(quote).unwrap_or_else(nil);
            format!("({} NIL {} {})", name, local, domain)
        })
        .collect();
    format!("({})", parts.join(" "))
}

fn nil() -> String {
    "NIL".to_string()
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_items_expands_all_macro() {
        let items = parse_items("ALL");
        assert_eq!(
            items,
            vec![
                FetchItem::Flags,
                FetchItem::InternalDate,
                FetchItem::Rfc822Size,
                FetchItem::Envelope
            ]
        );
    }

    #[test]
    fn parse_items_reads_explicit_list() {
        let items = parse_items("(FLAGS BODY[HEADER] BODY.PEEK[TEXT])");
        assert_eq!(
            items,
            vec![
                FetchItem::Flags,
                FetchItem::BodySection { section: "HEADER".to_string(), peek: false },
                FetchItem::BodySection { section: "TEXT".to_string(), peek: true },
            ]
        );
    }

    #[test]
    fn requires_seen_flag_true_only_for_non_peek_body() {
        assert!(!requires_seen_flag(&parse_items("(FLAGS)")));
        assert!(!requires_seen_flag(&parse_items("(BODY.PEEK[TEXT])")));
        assert!(requires_seen_flag(&parse_items("(BODY[TEXT])")));
    }

    #[test]
    fn render_fetch_embeds_literal_for_whole_message_body() {
        let raw = b"Subject: hi\r\n\r\nhello";
        let ctx = FetchContext {
            uid: 7,
            flags: &[Flag::Seen],
            internal_date: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00+00:00").unwrap(),
            raw,
        };
        let items = parse_items("(FLAGS BODY[])");
        let line = render_fetch(3, &ctx, &items);
        let text = String::from_utf8_lossy(&line);
        assert!(text.starts_with("* 3 FETCH (UID 7 FLAGS (\\Seen) BODY[] {20}\r\n"));
        assert!(text.ends_with(")\r\n"));
    }

    #[test]
    fn render_envelope_uses_nil_for_missing_fields() {
        let raw = b"Subject: hi\r\n\r\nbody";
        let env = parse_envelope(raw);
        let rendered = render_envelope(&env);
        assert!(rendered.contains("NIL"));
        assert!(rendered.contains("\"hi\""));
    }
}
