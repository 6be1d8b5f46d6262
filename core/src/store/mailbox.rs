/*
 * mailbox.rs
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

//! Per-user mailbox store: folders are directories under the user's storage root,
//! each message is a fixed `<uid>.eml` file, flags and UID bookkeeping live in the
//! folder's [`FolderMetadata`]. Hierarchy nesting follows the directory tree directly
//! (`Work/Projects` is `<root>/Work/Projects`), using `/` as the delimiter.

use super::error::StoreError;
use super::message::Flag;
use super::metadata::FolderMetadata;
use std::fs;
use std::path::{Path, PathBuf};

pub const INBOX: &str = "INBOX";
pub const HIERARCHY_DELIMITER: char = '/';

pub struct MailboxStore {
    user_root: PathBuf,
}

/// Folder-level counter needed by IMAP SELECT (`UIDNEXT`) and as an
/// existence probe for UID COPY's destination check.
pub struct FolderSummary {
    pub uid_next: u64,
}

impl MailboxStore {
    /// `storage_root` holds one subdirectory per local user; `user` selects it.
    pub fn new(storage_root: impl AsRef<Path>, user: &str) -> Result<Self, StoreError> {
        let user_root = storage_root.as_ref().join(sanitize_user(user));
        fs::create_dir_all(&user_root)?;
        let store = Self { user_root };
        store.ensure_folder(INBOX)?;
        Ok(store)
    }

    fn folder_path(&self, name: &str) -> PathBuf {
        if name.eq_ignore_ascii_case(INBOX) {
            return self.user_root.join(INBOX);
        }
        let mut path = self.user_root.clone();
        for part in name.split(HIERARCHY_DELIMITER) {
            path.push(part);
        }
        path
    }

    fn folder_exists(&self, name: &str) -> bool {
        self.folder_path(name).is_dir()
    }

    /// Create the folder directory if absent. Idempotent; used for INBOX bootstrap
    /// and IMAP CREATE.
    pub fn ensure_folder(&self, name: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.folder_path(name))?;
        Ok(())
    }

    pub fn create_folder(&self, name: &str) -> Result<(), StoreError> {
        if self.folder_exists(name) {
            return Err(StoreError::new("mailbox already exists"));
        }
        self.ensure_folder(name)
    }

    pub fn delete_folder(&self, name: &str) -> Result<(), StoreError> {
        if name.eq_ignore_ascii_case(INBOX) {
            return Err(StoreError::new("INBOX cannot be deleted"));
        }
        let path = self.folder_path(name);
        if !path.is_dir() {
            return Err(StoreError::new("no such mailbox"));
        }
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    pub fn rename_folder(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let src = self.folder_path(from);
        if !src.is_dir() {
            return Err(StoreError::new("no such mailbox"));
        }
        let dst = self.folder_path(to);
        if dst.is_dir() {
            return Err(StoreError::new("destination mailbox already exists"));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src, &dst)?;
        if from.eq_ignore_ascii_case(INBOX) {
            fs::create_dir_all(src)?;
        }
        Ok(())
    }

    /// List every folder under the user root, INBOX first, depth-first otherwise.
    pub fn list_folders(&self) -> Result<Vec<String>, StoreError> {
        let mut names = vec![INBOX.to_string()];
        self.walk_folders(&self.user_root, "", &mut names)?;
        Ok(names)
    }

    fn walk_folders(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let fname = entry.file_name().to_string_lossy().to_string();
            if prefix.is_empty() && fname.eq_ignore_ascii_case(INBOX) {
                continue;
            }
            let full = if prefix.is_empty() {
                fname.clone()
            } else {
                format!("{}{}{}", prefix, HIERARCHY_DELIMITER, fname)
            };
            out.push(full.clone());
            self.walk_folders(&path, &full, out)?;
        }
        Ok(())
    }

    fn metadata(&self, folder: &str) -> Result<FolderMetadata, StoreError> {
        let path = self.folder_path(folder);
        if !path.is_dir() {
            return Err(StoreError::new("no such mailbox"));
        }
        FolderMetadata::load_or_create(&path)
    }

    fn message_path(&self, folder: &str, uid: u64) -> PathBuf {
        self.folder_path(folder).join(format!("{}.eml", uid))
    }

    /// UIDs present in the folder, sorted ascending.
    pub fn list_uids(&self, folder: &str) -> Result<Vec<u64>, StoreError> {
        let path = self.folder_path(folder);
        if !path.is_dir() {
            return Err(StoreError::new("no such mailbox"));
        }
        let mut uids = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = fname.strip_suffix(".eml") {
                if let Ok(uid) = stem.parse::<u64>() {
                    uids.push(uid);
                }
            }
        }
        uids.sort_unstable();
        Ok(uids)
    }

    pub fn summary(&self, folder: &str) -> Result<FolderSummary, StoreError> {
        let meta = self.metadata(folder)?;
        Ok(FolderSummary {
            uid_next: meta.last_uid + 1,
        })
    }

    pub fn flags(&self, folder: &str, uid: u64) -> Result<Vec<Flag>, StoreError> {
        let meta = self.metadata(folder)?;
        Ok(meta.flags(uid))
    }

    pub fn set_flags(&self, folder: &str, uid: u64, flags: Vec<Flag>) -> Result<(), StoreError> {
        let mut meta = self.metadata(folder)?;
        meta.set_flags(uid, flags);
        meta.save()
    }

    pub fn read_message(&self, folder: &str, uid: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.message_path(folder, uid);
        Ok(fs::read(path)?)
    }

    /// Size in bytes of one stored message file, without reading its contents.
    pub fn message_size(&self, folder: &str, uid: u64) -> Result<u64, StoreError> {
        let path = self.message_path(folder, uid);
        Ok(fs::metadata(path)?.len())
    }

    /// Permanently remove a single message: its file and metadata entry.
    /// Unlike [`expunge`](Self::expunge), this targets exactly one UID
    /// regardless of its flags — used by IMAP EXPUNGE/CLOSE, which decide
    /// which UIDs qualify (`\Deleted`) themselves while tracking MSN
    /// renumbering as they go.
    pub fn delete_message(&self, folder: &str, uid: u64) -> Result<(), StoreError> {
        let mut meta = self.metadata(folder)?;
        let path = self.message_path(folder, uid);
        fs::remove_file(&path)?;
        meta.remove_uid(uid);
        meta.save()
    }

    pub fn internal_date(&self, folder: &str, uid: u64) -> Result<chrono::DateTime<chrono::FixedOffset>, StoreError> {
        let meta = self.metadata(folder)?;
        let path = self.message_path(folder, uid);
        Ok(meta.internal_date(uid).unwrap_or_else(|| {
            let mtime = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let secs = mtime
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            chrono::DateTime::from_timestamp(secs, 0)
                .unwrap_or_default()
                .with_timezone(&chrono::FixedOffset::east_opt(0).unwrap())
        }))
    }

    /// Append raw RFC 5322 bytes as a new message, returning the assigned UID.
    /// `received_at` becomes the stored delivery timestamp (IMAP INTERNALDATE).
    pub fn append_message(
        &self,
        folder: &str,
        data: &[u8],
        initial_flags: Vec<Flag>,
        received_at: chrono::DateTime<chrono::FixedOffset>,
    ) -> Result<u64, StoreError> {
        let mut meta = self.metadata(folder)?;
        let uid = meta.next_uid();
        let path = self.message_path(folder, uid);
        fs::write(&path, data)?;
        meta.set_flags(uid, initial_flags);
        meta.set_internal_date(uid, received_at);
        meta.save()?;
        Ok(uid)
    }

    /// Copy a message into another folder, assigning it a fresh UID there.
    pub fn copy_message(&self, from_folder: &str, uid: u64, to_folder: &str) -> Result<u64, StoreError> {
        let data = self.read_message(from_folder, uid)?;
        let flags = self.flags(from_folder, uid)?;
        let received_at = self.internal_date(from_folder, uid)?;
        self.append_message(to_folder, &data, flags, received_at)
    }

    /// Permanently remove the UIDs marked `\Deleted`, returning the removed UIDs
    /// in ascending order (IMAP EXPUNGE/CLOSE semantics).
    pub fn expunge(&self, folder: &str) -> Result<Vec<u64>, StoreError> {
        let mut meta = self.metadata(folder)?;
        let uids = self.list_uids(folder)?;
        let mut removed = Vec::new();
        for uid in uids {
            if meta.flags(uid).contains(&Flag::Deleted) {
                let path = self.message_path(folder, uid);
                fs::remove_file(&path)?;
                meta.remove_uid(uid);
                removed.push(uid);
            }
        }
        meta.save()?;
        Ok(removed)
    }

    pub fn set_subscribed(&self, folder: &str, subscribed: bool) -> Result<(), StoreError> {
        let mut meta = self.metadata(folder)?;
        meta.set_subscribed(subscribed);
        meta.save()
    }

    pub fn is_subscribed(&self, folder: &str) -> Result<bool, StoreError> {
        let meta = self.metadata(folder)?;
        Ok(meta.subscribed)
    }
}

fn sanitize_user(user: &str) -> String {
    user.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}
