/*
 * mailbox_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration test for the mailbox store. Exercises folder and message
 * lifecycle end to end against a real temp directory, without going through
 * any protocol engine.
 *
 * Run with:
 *   cargo test -p portolano_core --test mailbox_integration
 */

use portolano_core::store::{Flag, MailboxStore, INBOX};

fn temp_root(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "portolano-mailbox-integration-{}-{}",
        label,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn deliver_flag_copy_and_expunge_round_trip() {
    let root = temp_root("roundtrip");
    let store = MailboxStore::new(&root, "alice").unwrap();

    // INBOX exists from construction and starts empty.
    assert_eq!(store.list_uids(INBOX).unwrap(), Vec::<u64>::new());

    let received_at = chrono::DateTime::parse_from_rfc3339("2026-07-26T12:00:00+00:00").unwrap();
    let raw = b"From: bob@example.com\r\nTo: alice@example.com\r\nSubject: Hi\r\n\r\nBody\r\n";
    let uid1 = store
        .append_message(INBOX, raw, vec![], received_at)
        .unwrap();
    let uid2 = store
        .append_message(INBOX, raw, vec![Flag::Seen], received_at)
        .unwrap();
    assert_eq!(uid1 + 1, uid2);
    assert_eq!(store.list_uids(INBOX).unwrap(), vec![uid1, uid2]);
    assert_eq!(store.summary(INBOX).unwrap().uid_next, uid2 + 1);

    // Flags round-trip through the metadata file.
    store
        .set_flags(INBOX, uid1, vec![Flag::Seen, Flag::Flagged])
        .unwrap();
    assert_eq!(
        store.flags(INBOX, uid1).unwrap(),
        vec![Flag::Seen, Flag::Flagged]
    );

    // Create a destination folder and copy uid1 into it.
    store.create_folder("Archive").unwrap();
    let copied_uid = store.copy_message(INBOX, uid1, "Archive").unwrap();
    assert_eq!(store.read_message("Archive", copied_uid).unwrap(), raw);
    assert_eq!(
        store.flags("Archive", copied_uid).unwrap(),
        vec![Flag::Seen, Flag::Flagged]
    );

    // EXPUNGE only removes \Deleted messages, and reports exactly those UIDs.
    store.set_flags(INBOX, uid1, vec![Flag::Deleted]).unwrap();
    let removed = store.expunge(INBOX).unwrap();
    assert_eq!(removed, vec![uid1]);
    assert_eq!(store.list_uids(INBOX).unwrap(), vec![uid2]);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn inbox_cannot_be_deleted_and_nested_folders_use_the_hierarchy_delimiter() {
    let root = temp_root("hierarchy");
    let store = MailboxStore::new(&root, "bob").unwrap();

    assert!(store.delete_folder(INBOX).is_err());

    store.create_folder("Work").unwrap();
    store.create_folder("Work/Projects").unwrap();
    let folders = store.list_folders().unwrap();
    assert!(folders.iter().any(|f| f == "Work"));
    assert!(folders.iter().any(|f| f == "Work/Projects"));

    // Creating an existing folder is rejected rather than silently succeeding.
    assert!(store.create_folder("Work").is_err());

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn subscription_state_persists_independently_of_messages() {
    let root = temp_root("subscribe");
    let store = MailboxStore::new(&root, "carol").unwrap();
    store.create_folder("Lists").unwrap();

    assert!(!store.is_subscribed("Lists").unwrap());
    store.set_subscribed("Lists", true).unwrap();
    assert!(store.is_subscribed("Lists").unwrap());

    // Re-opening the store (simulating a new connection) sees the same state.
    let reopened = MailboxStore::new(&root, "carol").unwrap();
    assert!(reopened.is_subscribed("Lists").unwrap());

    std::fs::remove_dir_all(&root).ok();
}
