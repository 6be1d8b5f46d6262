/*
 * config.rs
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

//! Process-wide configuration, built once in `main` and shared by `Arc` with
//! every accepted connection. Replaces global mutable state (domain, user
//! table, worker count) with an explicit context object threaded through
//! construction.

use std::collections::HashMap;
use std::path::PathBuf;

pub const SMTP_PORT: u16 = 25;
pub const IMAP_PORT: u16 = 143;
pub const POP3_PORT: u16 = 110;

/// Authoritative server configuration: domain, credentials, storage root and
/// worker pool size. One instance is built in `main` and handed to every
/// protocol engine by reference.
pub struct ServerConfig {
    /// The single administrative domain this server is authoritative for.
    pub domain: String,
    /// Maximum number of connection-handling tasks running concurrently,
    /// shared across all three listeners.
    pub max_workers: usize,
    /// Directory under which each user gets one mailbox subdirectory.
    pub storage_root: PathBuf,
    /// Static username -> password table. Usernames are the bare local part
    /// (the portion before `@`).
    credentials: HashMap<String, String>,
}

impl ServerConfig {
    pub fn new(domain: impl Into<String>, max_workers: usize, storage_root: PathBuf) -> Self {
        Self {
            domain: domain.into(),
            max_workers,
            storage_root,
            credentials: HashMap::new(),
        }
    }

    /// Build a config with the compiled-in demo credential table used by the
    /// `server` binary. A real deployment would load this from its own
    /// source; the static table is deliberately out of this crate's scope.
    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    /// True iff `user` (bare local part, no `@domain`) is a known account.
    pub fn user_exists(&self, user: &str) -> bool {
        self.credentials.contains_key(user)
    }

    /// Verify a plaintext login. Returns false for unknown users without
    /// distinguishing "no such user" from "wrong password" to the caller.
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        self.credentials.get(user).map(|p| p == password).unwrap_or(false)
    }

    /// True if `domain` names this server or the `localhost` alias,
    /// case-insensitively.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        domain.eq_ignore_ascii_case(&self.domain) || domain.eq_ignore_ascii_case("localhost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        let mut creds = HashMap::new();
        creds.insert("dcd".to_string(), "password".to_string());
        ServerConfig::new("uliege.be", 8, PathBuf::from("/tmp/portolano-test")).with_credentials(creds)
    }

    #[test]
    fn authenticate_accepts_known_password() {
        let cfg = config();
        assert!(cfg.authenticate("dcd", "password"));
        assert!(!cfg.authenticate("dcd", "wrong"));
        assert!(!cfg.authenticate("nobody", "password"));
    }

    #[test]
    fn local_domain_matches_case_insensitively_and_localhost() {
        let cfg = config();
        assert!(cfg.is_local_domain("ULIEGE.BE"));
        assert!(cfg.is_local_domain("localhost"));
        assert!(!cfg.is_local_domain("ext.com"));
    }
}
