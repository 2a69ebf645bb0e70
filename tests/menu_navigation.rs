//! Menu navigation, utilities, channel directory, and JS8Call browsing.

mod common;

use chrono::Utc;
use common::TestBoard;
use meshboard::storage::{Js8Bucket, Js8Record};

const ALFA: &str = "!a1b2c3d4";

#[test]
fn main_menu_header_shows_unread_count() {
    let mut board = TestBoard::new();
    board.send("!0badcafe", "SM,,ALFA,,hi,,one for you");
    let menu = board.reply(ALFA, "anything");
    assert!(menu.contains("Meshboard BBS (Mail: 1)"));
}

#[test]
fn quick_help_lists_all_quick_commands() {
    let mut board = TestBoard::new();
    let help = board.reply(ALFA, "q");
    for line in [
        "SM,, - Send Mail",
        "CM - Check Mail",
        "PB,, - Post Bulletin",
        "CB,, - Check Bulletins",
        "CHP,, - Post Channel",
        "CHL - List Channels",
    ] {
        assert!(help.contains(line), "missing {:?}", line);
    }
}

#[test]
fn x_abandons_any_flow() {
    let mut board = TestBoard::new();
    board.send(ALFA, "b");
    board.send(ALFA, "b");
    board.send(ALFA, "g");
    board.send(ALFA, "p");
    board.send(ALFA, "half-finished subject prompt follows");
    let menu = board.reply(ALFA, "x");
    assert!(menu.contains("Meshboard BBS"));
    assert_eq!(board.processor.active_sessions(), 0);
}

#[test]
fn utilities_fortune_and_wall_of_shame() {
    let mut board = TestBoard::new();
    board.nodes.observe_telemetry(ALFA, Some(12));

    board.send(ALFA, "u");
    let fortune = board.reply(ALFA, "f");
    assert!(!fortune.is_empty());

    let wall = board.reply(ALFA, "w");
    assert!(wall.contains("Wall of Shame"));
    assert!(wall.contains("Alfa Station - 12%"));
}

#[test]
fn stats_menu_reports_and_stays_in_menu() {
    let mut board = TestBoard::new();
    board.send(ALFA, "u");
    board.send(ALFA, "s");

    let nodes = board.reply(ALFA, "n");
    assert!(nodes.contains("Nodes seen"));
    assert!(nodes.contains("All time: 3"));
    // Report replies re-show the stats menu.
    assert!(nodes.contains("Stats Menu"));

    let hardware = board.reply(ALFA, "h");
    assert!(hardware.contains("TBEAM: 1"));
}

#[test]
fn channel_directory_via_quick_commands() {
    let mut board = TestBoard::new();
    let posted = board.reply(ALFA, "CHP,,Regional Mesh,,https://example.com/e/#regional");
    assert!(posted.contains("Channel 'Regional Mesh' has been added to the directory."));

    // Duplicate names are refused case-insensitively.
    let dup = board.reply(ALFA, "CHP,,regional mesh,,https://example.com/other");
    assert!(dup.contains("already in the directory"));

    let listing = board.reply(ALFA, "CHL");
    assert!(listing.contains("01. Name: Regional Mesh"));
    let shown = board.reply(ALFA, "1");
    assert!(shown.contains("Channel URL: https://example.com/e/#regional"));
}

#[test]
fn js8_menu_browses_buckets_and_groups() {
    let mut board = TestBoard::new();
    for (bucket, sender, target, body) in [
        (Js8Bucket::Groups, "KN4ABC", "@MESH", "net tonight"),
        (Js8Bucket::Groups, "KN4DEF", "@NET", "roll call"),
        (Js8Bucket::Urgent, "KN4ABC", "@ALERT", "flood warning"),
    ] {
        board
            .storage
            .add_js8(
                bucket,
                &Js8Record {
                    sender: sender.into(),
                    target: target.into(),
                    body: body.into(),
                    received_at: Utc::now(),
                },
            )
            .unwrap();
    }

    board.send(ALFA, "b");
    let menu = board.reply(ALFA, "j");
    assert!(menu.contains("JS8Call Menu"));

    let groups = board.reply(ALFA, "g");
    assert!(groups.contains("[1] @MESH"));
    assert!(groups.contains("[2] @NET"));

    let mesh = board.reply(ALFA, "1");
    assert!(mesh.contains("KN4ABC: net tonight"));

    let urgent = board.reply(ALFA, "u");
    assert!(urgent.contains("flood warning"));
}

#[test]
fn exit_collapse_works_across_menus() {
    let mut board = TestBoard::new();
    board.send(ALFA, "b");
    // "cx" collapses to "c" and opens the channel directory.
    let menu = board.reply(ALFA, "cx");
    assert!(menu.contains("Channel Directory"));
}
