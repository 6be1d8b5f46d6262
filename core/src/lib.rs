/*
 * lib.rs
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

//! Core engine for Portolano: the three protocol state machines (SMTP, IMAP,
//! POP3), the raw-UDP DNS resolver used by SMTP relay, and the mailbox store
//! they all read and mutate under per-user locking.

pub mod config;
pub mod dispatcher;
pub mod dns;
pub mod logging;
pub mod mime;
pub mod protocol;
pub mod store;
