//! End-to-end mail flows through the menu system and quick commands.

mod common;

use common::{join_replies, TestBoard};
use meshboard::bbs::commands::Action;
use meshboard::sync::SyncFrame;

const ALFA: &str = "!a1b2c3d4";
const BRAVO: &str = "!0badcafe";

#[test]
fn quick_send_mail_stores_notifies_and_syncs() {
    let mut board = TestBoard::new();
    let actions = board.send(ALFA, "SM,,BRVO,,water report,,tank at 40 percent");

    assert!(join_replies(&actions).contains("Mail has been sent to Bravo Station."));
    assert!(actions.iter().any(|a| matches!(
        a,
        Action::Notify { to, text } if to == BRAVO && text.contains("CM")
    )));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Sync(SyncFrame::Mail { .. }))));

    let inbox = board.storage.mail_for(BRAVO).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].subject, "water report");
    assert_eq!(inbox[0].sender_short_name, "ALFA");
}

#[test]
fn check_mail_lists_and_reads_in_shown_order() {
    let mut board = TestBoard::new();
    let base = chrono::Utc::now();
    for (i, (subject, content)) in [("first", "message one"), ("second", "message two")]
        .iter()
        .enumerate()
    {
        board
            .storage
            .add_mail(&meshboard::storage::MailRecord {
                unique_id: format!("m-{}", i),
                sender: ALFA.into(),
                sender_short_name: "ALFA".into(),
                recipient: BRAVO.into(),
                subject: subject.to_string(),
                content: content.to_string(),
                timestamp: base + chrono::Duration::seconds(i as i64),
            })
            .unwrap();
    }

    let listing = board.reply(BRAVO, "CM");
    assert!(listing.contains("01. From: ALFA, Subject: first"));
    assert!(listing.contains("02. From: ALFA, Subject: second"));

    let shown = board.reply(BRAVO, "2");
    assert!(shown.contains("Subject: second"));
    assert!(shown.contains("message two"));
    assert!(shown.contains("[K]eep  [D]elete  [R]eply"));

    // Keeping leaves both messages in place.
    let kept = board.reply(BRAVO, "k");
    assert!(kept.contains("kept in your inbox"));
    assert_eq!(board.storage.mail_for(BRAVO).unwrap().len(), 2);
}

#[test]
fn check_mail_with_empty_inbox() {
    let mut board = TestBoard::new();
    assert_eq!(board.reply(BRAVO, "CM"), "You have no new messages.");
}

#[test]
fn delete_from_reader_removes_and_propagates() {
    let mut board = TestBoard::new();
    board.send(ALFA, "SM,,BRVO,,old news,,delete me");

    board.send(BRAVO, "CM");
    board.send(BRAVO, "1");
    let actions = board.send(BRAVO, "d");
    assert!(join_replies(&actions).contains("The message has been deleted."));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Sync(SyncFrame::DeleteMail { .. }))));
    assert!(board.storage.mail_for(BRAVO).unwrap().is_empty());
}

#[test]
fn menu_compose_collects_multi_message_body() {
    let mut board = TestBoard::new();
    board.send(ALFA, "b");
    board.send(ALFA, "m");
    board.send(ALFA, "s");
    let prompt = board.reply(ALFA, "BRVO");
    assert!(prompt.contains("subject of your message to Bravo Station"));

    board.send(ALFA, "status update");
    // Two body messages before END; both should land in the content.
    assert!(board.send(ALFA, "part one").is_empty());
    assert!(board.send(ALFA, "part two").is_empty());
    let done = board.reply(ALFA, "END");
    assert!(done.contains("Mail has been posted to the mailbox of Bravo Station."));

    let inbox = board.storage.mail_for(BRAVO).unwrap();
    assert_eq!(inbox[0].content, "part one\npart two");
}

#[test]
fn ambiguous_short_name_offers_numbered_pick() {
    let mut board = TestBoard::new();
    // Second node sharing BRVO's short name.
    board
        .nodes
        .observe_nodeinfo("!b0000002", "BRVO", "Bravo Two", None, None);

    board.send(ALFA, "b");
    board.send(ALFA, "m");
    board.send(ALFA, "s");
    let pick = board.reply(ALFA, "BRVO");
    assert!(pick.contains("multiple nodes with that short name"));
    assert!(pick.contains("[1] Bravo Station"));
    assert!(pick.contains("[2] Bravo Two"));

    let prompt = board.reply(ALFA, "2");
    assert!(prompt.contains("subject of your message to Bravo Two"));
}

#[test]
fn unknown_short_name_returns_to_mail_menu() {
    let mut board = TestBoard::new();
    board.send(ALFA, "b");
    board.send(ALFA, "m");
    board.send(ALFA, "s");
    let reply = board.reply(ALFA, "ZZZZ");
    assert!(reply.contains("I'm unable to find that node in my database."));
    assert!(reply.contains("Mail Menu"));
}

#[test]
fn invalid_message_number_reprompts_without_losing_listing() {
    let mut board = TestBoard::new();
    board.send(ALFA, "SM,,BRVO,,only one,,hi");
    board.send(BRAVO, "CM");
    let reply = board.reply(BRAVO, "9");
    assert!(reply.contains("Invalid message number"));
    // The listing is still live; a valid pick works.
    let shown = board.reply(BRAVO, "1");
    assert!(shown.contains("Subject: only one"));
}
