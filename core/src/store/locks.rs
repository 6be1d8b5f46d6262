/*
 * locks.rs
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

//! Per-user read/write lock registry. Two sessions touching different mailboxes
//! never block each other; concurrent sessions on the same mailbox serialize through
//! the per-user `RwLock`. Entries are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (creating if needed) the lock for a given user.
    pub fn lock_for(&self, user: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_user_returns_same_lock_instance() {
        let mgr = LockManager::new();
        let a = mgr.lock_for("alice");
        let b = mgr.lock_for("alice");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_users_get_independent_locks() {
        let mgr = LockManager::new();
        let a = mgr.lock_for("alice");
        let b = mgr.lock_for("bob");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
