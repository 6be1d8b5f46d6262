/*
 * logging.rs
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

//! Minimal line logging: `[tag] message` to stderr. No structured/async
//! logging framework is pulled in here; every engine calls through this one
//! function the same way the corpus logs with a plain `eprintln!`.

use std::fmt::Display;

pub fn log_line(tag: &str, msg: impl Display) {
    eprintln!("[{}] {}", tag, msg);
}
