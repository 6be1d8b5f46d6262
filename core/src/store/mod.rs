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

//! Mailbox store: per-folder message files, metadata, locking.

mod error;
mod locks;
mod mailbox;
mod message;
mod metadata;

pub use error::StoreError;
pub use locks::LockManager;
pub use mailbox::{FolderSummary, MailboxStore, HIERARCHY_DELIMITER, INBOX};
pub use message::{Address, Envelope, Flag};
pub use metadata::FolderMetadata;
