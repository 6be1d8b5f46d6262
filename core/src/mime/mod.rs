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

//! Header-level RFC 5322 parsing used to build IMAP envelopes. Full MIME entity
//! decoding (multipart, quoted-printable, base64 bodies) is deliberately absent;
//! BODY[] sections are served as raw bytes by the protocol layer.

mod content_id;
mod rfc5322;

pub use content_id::{parse_content_id, ContentID};
pub use rfc5322::{parse_envelope, split_header_body, EmailAddress};
