/*
 * metadata.rs
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

//! Per-folder metadata file: UID counter, folder UID validity token, subscription
//! bit, and per-message flag sets. Format:
//!
//! ```text
//! LAST_UID=<int>
//! FOLDER_UID=<opaque string>
//! [SUBSCRIBED]
//! <uid>=<flag1>|<flag2>|...
//! ...
//! ```
//!
//! Persisted with write-to-temp-then-rename so a reader never observes a partial file.

use super::error::StoreError;
use super::message::Flag;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FolderMetadata {
    path: PathBuf,
    pub last_uid: u64,
    pub folder_uid: String,
    pub subscribed: bool,
    flags: BTreeMap<u64, Vec<Flag>>,
    /// Delivery timestamp per UID, used for IMAP INTERNALDATE. Absent entries fall
    /// back to the message file's mtime.
    internal_date: BTreeMap<u64, chrono::DateTime<chrono::FixedOffset>>,
    dirty: bool,
}

impl FolderMetadata {
    /// Construct a fresh, unsaved metadata set for a brand new folder.
    pub fn new(folder_dir: &Path, folder_uid: impl Into<String>) -> Self {
        Self {
            path: folder_dir.join(".portolano-meta"),
            last_uid: 0,
            folder_uid: folder_uid.into(),
            subscribed: false,
            flags: BTreeMap::new(),
            internal_date: BTreeMap::new(),
            dirty: true,
        }
    }

    /// Load metadata from `folder_dir`, creating a fresh one (with a random folder UID)
    /// if no metadata file exists yet.
    pub fn load_or_create(folder_dir: &Path) -> Result<Self, StoreError> {
        let path = folder_dir.join(".portolano-meta");
        if !path.exists() {
            let folder_uid = new_folder_uid();
            let meta = Self::new(folder_dir, folder_uid);
            return Ok(meta);
        }
        let f = File::open(&path)?;
        let mut meta = Self {
            path,
            last_uid: 0,
            folder_uid: String::new(),
            subscribed: false,
            flags: BTreeMap::new(),
            internal_date: BTreeMap::new(),
            dirty: false,
        };
        for line in BufReader::new(f).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "[SUBSCRIBED]" {
                meta.subscribed = true;
                continue;
            }
            if let Some(rest) = line.strip_prefix("LAST_UID=") {
                meta.last_uid = rest.trim().parse().unwrap_or(0);
                continue;
            }
            if let Some(rest) = line.strip_prefix("FOLDER_UID=") {
                meta.folder_uid = rest.trim().to_string();
                continue;
            }
            if let Some((uid_str, rest)) = line.split_once('=') {
                if let Ok(uid) = uid_str.trim().parse::<u64>() {
                    // Extra field: "<rfc3339 internaldate>;<flag1>|<flag2>|...",
                    // or bare "<flag1>|<flag2>|..." for metadata written before
                    // INTERNALDATE tracking was added.
                    let flags_str = match rest.split_once(';') {
                        Some((date_str, flags_str)) => {
                            if let Ok(date) =
                                chrono::DateTime::parse_from_rfc3339(date_str)
                            {
                                meta.internal_date.insert(uid, date);
                            }
                            flags_str
                        }
                        None => rest,
                    };
                    let flags = flags_str
                        .split('|')
                        .filter_map(Flag::parse)
                        .collect::<Vec<_>>();
                    meta.flags.insert(uid, flags);
                }
            }
        }
        if meta.folder_uid.is_empty() {
            meta.folder_uid = new_folder_uid();
            meta.dirty = true;
        }
        Ok(meta)
    }

    pub fn next_uid(&mut self) -> u64 {
        self.last_uid += 1;
        self.dirty = true;
        self.last_uid
    }

    pub fn flags(&self, uid: u64) -> Vec<Flag> {
        self.flags.get(&uid).cloned().unwrap_or_default()
    }

    pub fn set_flags(&mut self, uid: u64, flags: Vec<Flag>) {
        self.flags.insert(uid, flags);
        self.dirty = true;
    }

    pub fn remove_uid(&mut self, uid: u64) {
        self.flags.remove(&uid);
        self.internal_date.remove(&uid);
        self.dirty = true;
    }

    pub fn internal_date(&self, uid: u64) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        self.internal_date.get(&uid).copied()
    }

    pub fn set_internal_date(&mut self, uid: u64, date: chrono::DateTime<chrono::FixedOffset>) {
        self.internal_date.insert(uid, date);
        self.dirty = true;
    }

    pub fn set_subscribed(&mut self, subscribed: bool) {
        if self.subscribed != subscribed {
            self.subscribed = subscribed;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let tmp = self.path.with_extension("tmp");
        let f = File::create(&tmp)?;
        let mut w = BufWriter::new(f);
        writeln!(w, "LAST_UID={}", self.last_uid)?;
        writeln!(w, "FOLDER_UID={}", self.folder_uid)?;
        if self.subscribed {
            writeln!(w, "[SUBSCRIBED]")?;
        }
        for (uid, flags) in &self.flags {
            let tokens: Vec<String> = flags.iter().map(Flag::token).collect();
            match self.internal_date.get(uid) {
                Some(date) => writeln!(
                    w,
                    "{}={};{}",
                    uid,
                    date.to_rfc3339(),
                    tokens.join("|")
                )?,
                None => writeln!(w, "{}={}", uid, tokens.join("|"))?,
            }
        }
        w.flush()?;
        drop(w);
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

fn new_folder_uid() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn save_and_reload_roundtrips_flags_and_subscription() {
        let dir = std::env::temp_dir().join(format!("portolano-meta-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut meta = FolderMetadata::load_or_create(&dir).unwrap();
        let uid1 = meta.next_uid();
        let uid2 = meta.next_uid();
        meta.set_flags(uid1, vec![Flag::Seen, Flag::Keyword("Junk".to_string())]);
        meta.set_flags(uid2, vec![Flag::Deleted]);
        meta.set_subscribed(true);
        meta.save().unwrap();

        let reloaded = FolderMetadata::load_or_create(&dir).unwrap();
        assert_eq!(reloaded.last_uid, 2);
        assert_eq!(reloaded.folder_uid, meta.folder_uid);
        assert!(reloaded.subscribed);
        assert_eq!(
            reloaded.flags(uid1),
            vec![Flag::Seen, Flag::Keyword("Junk".to_string())]
        );
        assert_eq!(reloaded.flags(uid2), vec![Flag::Deleted]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn internal_date_survives_a_save_reload_cycle() {
        let dir = std::env::temp_dir().join(format!("portolano-meta-test-date-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut meta = FolderMetadata::load_or_create(&dir).unwrap();
        let uid = meta.next_uid();
        meta.set_flags(uid, vec![Flag::Seen]);
        let date = chrono::DateTime::parse_from_rfc3339("2026-07-26T12:00:00+00:00").unwrap();
        meta.set_internal_date(uid, date);
        meta.save().unwrap();

        let reloaded = FolderMetadata::load_or_create(&dir).unwrap();
        assert_eq!(reloaded.internal_date(uid), Some(date));
        assert_eq!(reloaded.flags(uid), vec![Flag::Seen]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_yields_fresh_metadata_with_random_uid() {
        let dir = std::env::temp_dir().join(format!("portolano-meta-test-fresh-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let meta = FolderMetadata::load_or_create(&dir).unwrap();
        assert_eq!(meta.last_uid, 0);
        assert!(!meta.folder_uid.is_empty());
        fs::remove_dir_all(&dir).ok();
    }
}
