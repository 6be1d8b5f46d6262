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

//! The three session state machines (SMTP, IMAP, POP3). Each engine runs a
//! fully blocking, line-oriented loop over a `std::io::Read + Write` socket;
//! there is no cooperative suspension primitive inside any of them. The
//! dispatcher (`crate::dispatcher`) is the only async-aware code in the
//! server: it hands accepted connections to these engines via
//! `spawn_blocking`.

pub mod imap;
pub mod pop3;
pub mod smtp;

/// The bare local part of an address (the portion before `@`), used by all
/// three engines to look a session's login name up in the credential table.
pub fn local_part(addr: &str) -> &str {
    addr.split('@').next().unwrap_or(addr)
}

#[cfg(test)]
mod shared_tests {
    use super::*;

    #[test]
    fn local_part_strips_domain_when_present() {
        assert_eq!(local_part("dcd@uliege.be"), "dcd");
        assert_eq!(local_part("dcd"), "dcd");
    }
}
