//! Peer synchronization: frame application, idempotency, fan-out rules.

mod common;

use meshboard::storage::Storage;
use meshboard::sync::{self, SyncApply, SyncFrame};
use tempfile::TempDir;

fn open_temp() -> (TempDir, Storage) {
    let dir = TempDir::new().expect("tempdir");
    let storage = Storage::open(dir.path().to_str().unwrap()).expect("open storage");
    (dir, storage)
}

#[test]
fn mail_frame_applies_and_replay_is_harmless() {
    let (_dir, storage) = open_temp();
    let frame = SyncFrame::parse("MAIL|!a1b2c3d4|ALFA|!0badcafe|supplies|water at camp two|id-1")
        .expect("parse");

    match sync::apply(&frame, &storage).unwrap() {
        SyncApply::NewMail(record) => {
            assert_eq!(record.recipient, "!0badcafe");
            assert_eq!(record.sender_short_name, "ALFA");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(sync::apply(&frame, &storage).unwrap(), SyncApply::Duplicate);
    assert_eq!(storage.mail_for("!0badcafe").unwrap().len(), 1);
}

#[test]
fn delete_frames_round_trip_between_stations() {
    let (_dir, storage_a) = open_temp();
    let (_dir2, storage_b) = open_temp();

    let bulletin =
        SyncFrame::parse("BULLETIN|General|ALFA|meeting|friday 7pm|id-b1").expect("parse");
    sync::apply(&bulletin, &storage_a).unwrap();
    sync::apply(&bulletin, &storage_b).unwrap();

    // Station A deletes and fans out; station B applies the delete.
    let delete = SyncFrame::DeleteBulletin {
        unique_id: "id-b1".into(),
    };
    assert!(storage_a.delete_bulletin("id-b1").unwrap());
    assert_eq!(sync::apply(&delete, &storage_b).unwrap(), SyncApply::Deleted);
    assert!(storage_b.bulletins_for_board("General").unwrap().is_empty());

    // A second delete for the same id finds nothing.
    assert_eq!(sync::apply(&delete, &storage_b).unwrap(), SyncApply::NotFound);
}

#[test]
fn channel_frames_deduplicate_by_name() {
    let (_dir, storage) = open_temp();
    let frame = SyncFrame::parse("CHANNEL|Emergency Net|https://example.com/e/#c").expect("parse");
    assert_eq!(sync::apply(&frame, &storage).unwrap(), SyncApply::ChannelAdded);
    assert_eq!(sync::apply(&frame, &storage).unwrap(), SyncApply::ChannelExists);
    assert_eq!(storage.channels().unwrap().len(), 1);
}

#[test]
fn fan_out_covers_all_peers_except_origin() {
    let frame = SyncFrame::Mail {
        sender: "!a1b2c3d4".into(),
        author: "ALFA".into(),
        recipient: "!0badcafe".into(),
        subject: "s".into(),
        content: "c".into(),
        unique_id: "id-m9".into(),
    };
    let peers = vec![
        "!peer0001".to_string(),
        "!peer0002".to_string(),
        "!peer0003".to_string(),
    ];

    // Locally-originated frames go to every peer.
    let msgs = sync::fan_out(&frame, &peers, None);
    assert_eq!(msgs.len(), 3);

    // A frame received from peer 2 is forwarded to the others only.
    let msgs = sync::fan_out(&frame, &peers, Some("!peer0002"));
    let targets: Vec<_> = msgs.iter().filter_map(|m| m.to.as_deref()).collect();
    assert_eq!(targets, vec!["!peer0001", "!peer0003"]);
}

#[test]
fn payload_detection_matches_frame_prefixes_only() {
    assert!(sync::is_sync_payload("BULLETIN|General|ALFA|s|c|id"));
    assert!(sync::is_sync_payload("DELETE_MAIL|id"));
    assert!(!sync::is_sync_payload("BULLETIN board chatter"));
    assert!(!sync::is_sync_payload("cm"));
}
