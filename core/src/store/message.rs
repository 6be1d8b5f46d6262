/*
 * message.rs
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

//! Message flags and addresses shared by the mailbox store and the protocol engines.

/// Message flags. The five system flags plus `\Recent` are spelled out; anything else
/// is a keyword (IMAP calls these "flag" atoms without the backslash).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Keyword(String),
}

impl Flag {
    /// Render in the wire/metadata token form (`\Seen`, `\Deleted`, or the bare keyword).
    pub fn token(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".to_string(),
            Flag::Answered => "\\Answered".to_string(),
            Flag::Flagged => "\\Flagged".to_string(),
            Flag::Deleted => "\\Deleted".to_string(),
            Flag::Draft => "\\Draft".to_string(),
            Flag::Recent => "\\Recent".to_string(),
            Flag::Keyword(k) => k.clone(),
        }
    }

    /// Parse a single flag token (`\Seen`, `\Deleted`, or a bare keyword).
    pub fn parse(token: &str) -> Option<Flag> {
        let t = token.trim();
        if t.is_empty() {
            return None;
        }
        Some(match t {
            "\\Seen" => Flag::Seen,
            "\\Answered" => Flag::Answered,
            "\\Flagged" => Flag::Flagged,
            "\\Deleted" => Flag::Deleted,
            "\\Draft" => Flag::Draft,
            "\\Recent" => Flag::Recent,
            other if other.starts_with('\\') => return None,
            other => Flag::Keyword(other.to_string()),
        })
    }
}

/// An address as it appears in an RFC 5322 header: optional display name, local part, domain.
#[derive(Debug, Clone)]
pub struct Address {
    pub display_name: Option<String>,
    pub local_part: String,
    pub domain: Option<String>,
}

impl Address {
    pub fn address(&self) -> String {
        match &self.domain {
            Some(d) if !d.is_empty() => format!("{}@{}", self.local_part, d),
            _ => self.local_part.clone(),
        }
    }
}

/// Parsed summary of a message's headers, used to build IMAP ENVELOPE responses.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub date: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_token_roundtrip() {
        for f in [
            Flag::Seen,
            Flag::Answered,
            Flag::Flagged,
            Flag::Deleted,
            Flag::Draft,
            Flag::Recent,
            Flag::Keyword("Junk".to_string()),
        ] {
            let tok = f.token();
            assert_eq!(Flag::parse(&tok), Some(f));
        }
    }

    #[test]
    fn unknown_backslash_flag_rejected() {
        assert_eq!(Flag::parse("\\Bogus"), None);
    }

    #[test]
    fn address_formats_bare_local_part_without_domain() {
        let a = Address {
            display_name: None,
            local_part: "postmaster".to_string(),
            domain: None,
        };
        assert_eq!(a.address(), "postmaster");
    }
}
