//! Menu command processing.
//!
//! [`CommandProcessor`] interprets every direct message a node sends to the
//! board: quick commands first, then the node's position in the menu tree.
//! It is purely synchronous over the storage and node registry; all radio
//! effects come back as [`Action`]s for the server to schedule, which keeps
//! the whole state machine testable without a gateway.
//!
//! Command conventions, honored everywhere:
//! - `x` returns to the main menu from any flow
//! - a two-character input ending in `x` collapses to its first character
//! - numeric selections are 1-based against the listing the user was shown

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::bbs::fortune::FortuneDeck;
use crate::bbs::session::{normalize_command, MenuState, SessionManager};
use crate::config::Config;
use crate::interface::nodes::NodeRegistry;
use crate::logutil::escape_log;
use crate::stats;
use crate::storage::{
    BulletinRecord, ChannelRecord, Js8Bucket, MailRecord, Storage, StorageError,
};
use crate::sync::SyncFrame;
use crate::validation;

/// Radio side effects produced by handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Reply to the node whose message we are handling.
    Reply(String),
    /// Unsolicited DM to some other node (new-mail notification).
    Notify { to: String, text: String },
    /// Broadcast to the whole mesh.
    Broadcast(String),
    /// Fan a sync frame out to the configured peers.
    Sync(SyncFrame),
}

const BOARDS: [&str; 4] = ["General", "Info", "News", "Urgent"];
const STORAGE_TROUBLE: &str = "The board is having storage trouble. Please try again later.";

fn board_from_choice(choice: &str) -> Option<&'static str> {
    match choice {
        "g" | "0" => Some("General"),
        "i" | "1" => Some("Info"),
        "n" | "2" => Some("News"),
        "u" | "3" => Some("Urgent"),
        _ => None,
    }
}

fn board_by_name(name: &str) -> Option<&'static str> {
    BOARDS
        .iter()
        .find(|b| b.eq_ignore_ascii_case(name.trim()))
        .copied()
}

pub struct CommandProcessor {
    service_name: String,
    main_items: Vec<String>,
    bbs_items: Vec<String>,
    utilities_items: Vec<String>,
    allowed_nodes: Vec<String>,
    fortunes: FortuneDeck,
    sessions: SessionManager,
}

impl CommandProcessor {
    pub fn new(config: &Config, fortunes: FortuneDeck) -> Self {
        Self {
            service_name: config.bbs.name.clone(),
            main_items: config.menu.main_menu_items.clone(),
            bbs_items: config.menu.bbs_menu_items.clone(),
            utilities_items: config.menu.utilities_menu_items.clone(),
            allowed_nodes: config.security.allowed_nodes.clone(),
            fortunes,
            sessions: SessionManager::new(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active_count()
    }

    /// Handle one direct message from `from`. Returns the actions to
    /// schedule; session state is updated in place.
    pub fn handle_message(
        &mut self,
        from: &str,
        text: &str,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        let raw = text.trim();
        let command = normalize_command(raw);
        info!(
            "command from {}: \"{}\"",
            escape_log(from),
            escape_log(raw)
        );

        // Quick commands work from any state and reset the session.
        if let Some(actions) = self.try_quick_command(from, raw, &command, storage, nodes) {
            return actions;
        }

        let state = self.sessions.take(from);

        // Escape hatch: `x` abandons whatever was in progress.
        if command == "x" {
            return self.main_menu(from, storage);
        }

        match state {
            MenuState::Idle => self.handle_main_menu(from, &command, storage),
            MenuState::BbsMenu => self.handle_bbs_menu(from, &command, storage),
            MenuState::UtilitiesMenu => self.handle_utilities_menu(from, &command, storage, nodes),
            MenuState::MailMenu => self.handle_mail_menu(from, &command, storage),
            MenuState::MailRead { listing } => self.handle_mail_read(from, &command, listing),
            MenuState::MailAction { record } => {
                self.handle_mail_action(from, &command, record, storage)
            }
            MenuState::MailRecipient => self.handle_mail_recipient(from, raw, nodes),
            MenuState::MailRecipientPick { matches } => {
                self.handle_mail_recipient_pick(from, &command, matches)
            }
            MenuState::MailSubject { recipient } => {
                self.handle_mail_subject(from, raw, recipient)
            }
            MenuState::MailBody {
                recipient,
                subject,
                body,
            } => self.handle_mail_body(from, raw, &command, recipient, subject, body, storage, nodes),
            MenuState::MailAnother => self.handle_mail_another(from, &command, storage),
            MenuState::BulletinMenu => self.handle_bulletin_menu(from, &command, storage),
            MenuState::BoardAction { board } => {
                self.handle_board_action(from, &command, board, storage)
            }
            MenuState::BulletinRead {
                listing,
                from_quick,
            } => self.handle_bulletin_read(from, &command, listing, from_quick, storage),
            MenuState::BulletinSubject { board } => {
                self.handle_bulletin_subject(from, raw, board)
            }
            MenuState::BulletinBody {
                board,
                subject,
                body,
            } => self.handle_bulletin_body(from, raw, &command, board, subject, body, storage, nodes),
            MenuState::ChannelMenu => self.handle_channel_menu(from, &command, storage),
            MenuState::ChannelPick {
                listing,
                from_quick,
            } => self.handle_channel_pick(from, &command, listing, from_quick, storage),
            MenuState::ChannelName => self.handle_channel_name(from, raw),
            MenuState::ChannelUrl { name } => {
                self.handle_channel_url(from, raw, name, storage)
            }
            MenuState::StatsMenu => self.handle_stats_menu(from, &command, nodes),
            MenuState::Js8Menu => self.handle_js8_menu(from, &command, storage),
            MenuState::Js8GroupPick { groups } => {
                self.handle_js8_group_pick(from, &command, groups, storage)
            }
        }
    }

    // --- menu builders ---

    fn menu_label(item: &str, bulletins_context: bool) -> Option<&'static str> {
        match item.trim() {
            "Q" => Some("[Q]uick Commands"),
            "B" if bulletins_context => Some("[B]ulletins"),
            "B" => Some("[B]BS"),
            "U" => Some("[U]tilities"),
            "M" => Some("[M]ail"),
            "C" => Some("[C]hannel Dir"),
            "J" => Some("[J]S8Call"),
            "S" => Some("[S]tats"),
            "F" => Some("[F]ortune"),
            "W" => Some("[W]all of Shame"),
            "X" => Some("E[X]IT"),
            _ => None,
        }
    }

    fn build_menu(items: &[String], title: &str, bulletins_context: bool) -> String {
        let mut out = title.to_string();
        for item in items {
            if let Some(label) = Self::menu_label(item, bulletins_context) {
                out.push('\n');
                out.push_str(label);
            }
        }
        out
    }

    fn main_menu(&mut self, from: &str, storage: &Storage) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        let unread = storage.mail_count_for(from).unwrap_or(0);
        let title = format!("{} (Mail: {})", self.service_name, unread);
        vec![Action::Reply(Self::build_menu(
            &self.main_items,
            &title,
            false,
        ))]
    }

    fn bbs_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::BbsMenu);
        vec![Action::Reply(Self::build_menu(
            &self.bbs_items,
            "BBS Menu",
            true,
        ))]
    }

    fn utilities_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::UtilitiesMenu);
        vec![Action::Reply(Self::build_menu(
            &self.utilities_items,
            "Utilities Menu",
            false,
        ))]
    }

    fn mail_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::MailMenu);
        vec![Action::Reply(
            "Mail Menu\nWhat would you like to do with mail?\n[R]ead  [S]end  E[X]IT"
                .to_string(),
        )]
    }

    fn bulletin_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::BulletinMenu);
        vec![Action::Reply(
            "Bulletin Menu\nWhich board would you like to enter?\n[G]eneral  [I]nfo  [N]ews  [U]rgent"
                .to_string(),
        )]
    }

    fn channel_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::ChannelMenu);
        vec![Action::Reply(
            "Channel Directory\nWhat would you like to do?\n[V]iew  [P]ost  E[X]IT"
                .to_string(),
        )]
    }

    fn stats_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::StatsMenu);
        vec![Action::Reply(
            "Stats Menu\nWhat stats would you like to view?\n[N]odes  [H]ardware  [R]oles  E[X]IT"
                .to_string(),
        )]
    }

    fn js8_menu(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::Js8Menu);
        vec![Action::Reply(
            "JS8Call Menu\n[G]roup Messages\n[S]tation Messages\n[U]rgent Messages\nE[X]IT"
                .to_string(),
        )]
    }

    fn quick_help(&mut self, from: &str) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        vec![Action::Reply(
            "Quick Commands\nSend command below for usage info:\nSM,, - Send Mail\nCM - Check Mail\nPB,, - Post Bulletin\nCB,, - Check Bulletins\nCHP,, - Post Channel\nCHL - List Channels"
                .to_string(),
        )]
    }

    // --- top-level menus ---

    fn handle_main_menu(&mut self, from: &str, command: &str, storage: &Storage) -> Vec<Action> {
        match command {
            "q" => self.quick_help(from),
            "b" => self.bbs_menu(from),
            "u" => self.utilities_menu(from),
            _ => self.main_menu(from, storage),
        }
    }

    fn handle_bbs_menu(&mut self, from: &str, command: &str, storage: &Storage) -> Vec<Action> {
        match command {
            "m" => self.mail_menu(from),
            "b" => self.bulletin_menu(from),
            "c" => self.channel_menu(from),
            "j" => self.js8_menu(from),
            _ => self.main_menu(from, storage),
        }
    }

    fn handle_utilities_menu(
        &mut self,
        from: &str,
        command: &str,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        match command {
            "s" => self.stats_menu(from),
            "f" => {
                self.sessions.set(from, MenuState::UtilitiesMenu);
                vec![Action::Reply(self.fortunes.draw().to_string())]
            }
            "w" => {
                self.sessions.set(from, MenuState::UtilitiesMenu);
                vec![Action::Reply(stats::wall_of_shame(nodes))]
            }
            _ => self.main_menu(from, storage),
        }
    }

    fn handle_stats_menu(
        &mut self,
        from: &str,
        command: &str,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        let report = match command {
            "n" => stats::nodes_seen_report(nodes, Utc::now()),
            "h" => stats::hardware_report(nodes),
            "r" => stats::role_report(nodes),
            _ => {
                let mut actions = vec![Action::Reply(
                    "Please choose [N]odes, [H]ardware, [R]oles, or E[X]IT.".to_string(),
                )];
                actions.extend(self.stats_menu(from));
                return actions;
            }
        };
        let mut actions = vec![Action::Reply(report)];
        actions.extend(self.stats_menu(from));
        actions
    }

    // --- mail flow ---

    fn mail_listing_reply(listing: &[MailRecord]) -> String {
        let mut out = "You have the following messages:\n".to_string();
        for (i, record) in listing.iter().enumerate() {
            out.push_str(&format!(
                "{:02}. From: {}, Subject: {}\n",
                i + 1,
                record.sender_short_name,
                record.subject
            ));
        }
        out.push_str("\nPlease reply with the number of the message you want to read.");
        out
    }

    fn handle_mail_menu(&mut self, from: &str, command: &str, storage: &Storage) -> Vec<Action> {
        match command {
            "r" => match storage.mail_for(from) {
                Ok(listing) if listing.is_empty() => {
                    self.sessions.set(from, MenuState::Idle);
                    vec![Action::Reply(
                        "There are no messages in your mailbox.".to_string(),
                    )]
                }
                Ok(listing) => {
                    let reply = Self::mail_listing_reply(&listing);
                    self.sessions.set(from, MenuState::MailRead { listing });
                    vec![Action::Reply(reply)]
                }
                Err(e) => storage_trouble(e),
            },
            "s" => {
                self.sessions.set(from, MenuState::MailRecipient);
                vec![Action::Reply(
                    "What is the Short Name of the node you want to leave a message for?"
                        .to_string(),
                )]
            }
            _ => self.mail_menu(from),
        }
    }

    fn handle_mail_read(
        &mut self,
        from: &str,
        command: &str,
        listing: Vec<MailRecord>,
    ) -> Vec<Action> {
        let Some(record) = select_one_based(command, &listing) else {
            let reply = "Invalid message number. Please try again.".to_string();
            self.sessions.set(from, MenuState::MailRead { listing });
            return vec![Action::Reply(reply)];
        };
        let record = record.clone();
        let shown = format!(
            "Date: {}\nFrom: {}\nSubject: {}\n\n{}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.sender_short_name,
            record.subject,
            record.content
        );
        self.sessions.set(from, MenuState::MailAction { record });
        vec![
            Action::Reply(shown),
            Action::Reply(
                "What would you like to do with this message?\n[K]eep  [D]elete  [R]eply"
                    .to_string(),
            ),
        ]
    }

    fn handle_mail_action(
        &mut self,
        from: &str,
        command: &str,
        record: MailRecord,
        storage: &Storage,
    ) -> Vec<Action> {
        match command {
            "d" => {
                if let Err(e) = storage.delete_mail(&record.unique_id) {
                    return storage_trouble(e);
                }
                self.sessions.set(from, MenuState::Idle);
                vec![
                    Action::Reply("The message has been deleted.".to_string()),
                    Action::Sync(SyncFrame::DeleteMail {
                        unique_id: record.unique_id,
                    }),
                ]
            }
            "r" => {
                let reply = format!(
                    "Send your reply to {} now, followed by a message with END",
                    record.sender_short_name
                );
                self.sessions.set(
                    from,
                    MenuState::MailBody {
                        recipient: record.sender,
                        subject: format!("Re: {}", record.subject),
                        body: String::new(),
                    },
                );
                vec![Action::Reply(reply)]
            }
            // Anything else keeps the message, matching the lenient default.
            _ => {
                self.sessions.set(from, MenuState::Idle);
                vec![Action::Reply(
                    "The message has been kept in your inbox.".to_string(),
                )]
            }
        }
    }

    fn handle_mail_recipient(
        &mut self,
        from: &str,
        raw: &str,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        let matches = nodes.find_by_short_name(raw);
        match matches.len() {
            0 => {
                let mut actions = vec![Action::Reply(
                    "I'm unable to find that node in my database.".to_string(),
                )];
                actions.extend(self.mail_menu(from));
                actions
            }
            1 => {
                let recipient = matches[0].id.clone();
                let recipient_name = nodes.long_name_or_default(&recipient);
                self.sessions.set(from, MenuState::MailSubject { recipient });
                vec![Action::Reply(format!(
                    "What is the subject of your message to {}?\nKeep it short.",
                    recipient_name
                ))]
            }
            _ => {
                let mut reply = "There are multiple nodes with that short name. Which one would you like to leave a message for?".to_string();
                let pick: Vec<(String, String)> = matches
                    .iter()
                    .map(|n| (n.id.clone(), nodes.long_name_or_default(&n.id)))
                    .collect();
                for (i, (_, long_name)) in pick.iter().enumerate() {
                    reply.push_str(&format!("\n[{}] {}", i + 1, long_name));
                }
                self.sessions
                    .set(from, MenuState::MailRecipientPick { matches: pick });
                vec![Action::Reply(reply)]
            }
        }
    }

    fn handle_mail_recipient_pick(
        &mut self,
        from: &str,
        command: &str,
        matches: Vec<(String, String)>,
    ) -> Vec<Action> {
        let Some((recipient, long_name)) = select_one_based(command, &matches) else {
            let reply = "Invalid selection. Please try again.".to_string();
            self.sessions
                .set(from, MenuState::MailRecipientPick { matches });
            return vec![Action::Reply(reply)];
        };
        let recipient = recipient.clone();
        let reply = format!(
            "What is the subject of your message to {}?\nKeep it short.",
            long_name
        );
        self.sessions.set(from, MenuState::MailSubject { recipient });
        vec![Action::Reply(reply)]
    }

    fn handle_mail_subject(&mut self, from: &str, raw: &str, recipient: String) -> Vec<Action> {
        match validation::validate_subject(raw) {
            Ok(subject) => {
                self.sessions.set(
                    from,
                    MenuState::MailBody {
                        recipient,
                        subject,
                        body: String::new(),
                    },
                );
                vec![Action::Reply(
                    "Send your message. You can send it in multiple messages if it's too long for one.\nSend a single message with END when you're done"
                        .to_string(),
                )]
            }
            Err(e) => {
                self.sessions.set(from, MenuState::MailSubject { recipient });
                vec![Action::Reply(format!("{}. Please try again.", e))]
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_mail_body(
        &mut self,
        from: &str,
        raw: &str,
        command: &str,
        recipient: String,
        subject: String,
        mut body: String,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        if command != "end" {
            body.push_str(raw);
            body.push('\n');
            self.sessions.set(
                from,
                MenuState::MailBody {
                    recipient,
                    subject,
                    body,
                },
            );
            return Vec::new();
        }

        let content = match validation::validate_body(&body) {
            Ok(content) => content,
            Err(e) => {
                self.sessions.set(
                    from,
                    MenuState::MailBody {
                        recipient,
                        subject,
                        body: String::new(),
                    },
                );
                return vec![Action::Reply(format!(
                    "{}. Your draft was discarded; please send the message again, then END.",
                    e
                ))];
            }
        };

        let sender_short_name = nodes.short_name_or_id(from);
        let record = MailRecord {
            unique_id: Uuid::new_v4().to_string(),
            sender: from.to_string(),
            sender_short_name: sender_short_name.clone(),
            recipient: recipient.clone(),
            subject,
            content,
            timestamp: Utc::now(),
        };
        if let Err(e) = storage.add_mail(&record) {
            return storage_trouble(e);
        }

        let recipient_name = nodes.long_name_or_default(&recipient);
        self.sessions.set(from, MenuState::MailAnother);
        vec![
            Action::Reply(format!(
                "Mail has been posted to the mailbox of {}.\nWould you like to send another message? [Y]es",
                recipient_name
            )),
            Action::Notify {
                to: recipient,
                text: format!(
                    "You have a new mail message from {}. Check your mailbox by responding to this message with CM.",
                    sender_short_name
                ),
            },
            Action::Sync(SyncFrame::Mail {
                sender: record.sender,
                author: record.sender_short_name,
                recipient: record.recipient,
                subject: record.subject,
                content: record.content,
                unique_id: record.unique_id,
            }),
        ]
    }

    fn handle_mail_another(
        &mut self,
        from: &str,
        command: &str,
        storage: &Storage,
    ) -> Vec<Action> {
        if command == "y" {
            self.mail_menu(from)
        } else {
            self.sessions.set(from, MenuState::Idle);
            let mut actions = vec![Action::Reply(
                "Okay, feel free to send another command.".to_string(),
            )];
            actions.extend(self.main_menu(from, storage));
            actions
        }
    }

    // --- bulletin flow ---

    fn bulletin_listing_reply(board: &str, listing: &[BulletinRecord]) -> String {
        let mut out = format!("Bulletins on {} board:\n", board);
        for (i, record) in listing.iter().enumerate() {
            out.push_str(&format!(
                "[{:02}] Subject: {}, From: {}, Date: {}\n",
                i + 1,
                record.subject,
                record.sender_short_name,
                record.timestamp.format("%Y-%m-%d")
            ));
        }
        out.push_str("\nPlease reply with the number of the bulletin you want to read.");
        out
    }

    fn handle_bulletin_menu(
        &mut self,
        from: &str,
        command: &str,
        storage: &Storage,
    ) -> Vec<Action> {
        if command == "e" {
            return self.bbs_menu(from);
        }
        let Some(board) = board_from_choice(command) else {
            return self.bulletin_menu(from);
        };
        let count = match storage.bulletins_for_board(board) {
            Ok(listing) => listing.len(),
            Err(e) => return storage_trouble(e),
        };
        self.sessions.set(
            from,
            MenuState::BoardAction {
                board: board.to_string(),
            },
        );
        vec![Action::Reply(format!(
            "{} has {} messages.\n[R]ead  [P]ost",
            board, count
        ))]
    }

    fn handle_board_action(
        &mut self,
        from: &str,
        command: &str,
        board: String,
        storage: &Storage,
    ) -> Vec<Action> {
        match command {
            "r" => match storage.bulletins_for_board(&board) {
                Ok(listing) if listing.is_empty() => {
                    let mut actions =
                        vec![Action::Reply(format!("No bulletins in {}.", board))];
                    actions.extend(self.bbs_menu(from));
                    actions
                }
                Ok(listing) => {
                    let reply = Self::bulletin_listing_reply(&board, &listing);
                    self.sessions.set(
                        from,
                        MenuState::BulletinRead {
                            listing,
                            from_quick: false,
                        },
                    );
                    vec![Action::Reply(reply)]
                }
                Err(e) => storage_trouble(e),
            },
            "p" => {
                if board.eq_ignore_ascii_case("urgent")
                    && !self.allowed_nodes.is_empty()
                    && !self.allowed_nodes.iter().any(|n| n == from)
                {
                    warn!("{} denied posting to the Urgent board", escape_log(from));
                    let mut actions = vec![Action::Reply(
                        "You don't have permission to post to this board.".to_string(),
                    )];
                    actions.extend(self.bbs_menu(from));
                    return actions;
                }
                self.sessions.set(from, MenuState::BulletinSubject { board });
                vec![Action::Reply(
                    "What is the subject of your bulletin? Keep it short.".to_string(),
                )]
            }
            "e" => self.bbs_menu(from),
            _ => {
                let reply = format!("{}: choose [R]ead or [P]ost.", board);
                self.sessions.set(from, MenuState::BoardAction { board });
                vec![Action::Reply(reply)]
            }
        }
    }

    fn handle_bulletin_read(
        &mut self,
        from: &str,
        command: &str,
        listing: Vec<BulletinRecord>,
        from_quick: bool,
        _storage: &Storage,
    ) -> Vec<Action> {
        let Some(record) = select_one_based(command, &listing) else {
            let reply = "Invalid bulletin number. Please try again.".to_string();
            self.sessions.set(
                from,
                MenuState::BulletinRead {
                    listing,
                    from_quick,
                },
            );
            return vec![Action::Reply(reply)];
        };
        let shown = format!(
            "Date: {}\nFrom: {}\nSubject: {}\n\n{}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.sender_short_name,
            record.subject,
            record.content
        );
        let mut actions = vec![Action::Reply(shown)];
        if from_quick {
            self.sessions.set(from, MenuState::Idle);
        } else {
            actions.extend(self.bbs_menu(from));
        }
        actions
    }

    fn handle_bulletin_subject(&mut self, from: &str, raw: &str, board: String) -> Vec<Action> {
        match validation::validate_subject(raw) {
            Ok(subject) => {
                self.sessions.set(
                    from,
                    MenuState::BulletinBody {
                        board,
                        subject,
                        body: String::new(),
                    },
                );
                vec![Action::Reply(
                    "Send the contents of your bulletin. Send a message with END when finished."
                        .to_string(),
                )]
            }
            Err(e) => {
                self.sessions.set(from, MenuState::BulletinSubject { board });
                vec![Action::Reply(format!("{}. Please try again.", e))]
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_bulletin_body(
        &mut self,
        from: &str,
        raw: &str,
        command: &str,
        board: String,
        subject: String,
        mut body: String,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        if command != "end" {
            body.push_str(raw);
            body.push('\n');
            self.sessions.set(
                from,
                MenuState::BulletinBody {
                    board,
                    subject,
                    body,
                },
            );
            return Vec::new();
        }

        let content = match validation::validate_body(&body) {
            Ok(content) => content,
            Err(e) => {
                self.sessions.set(
                    from,
                    MenuState::BulletinBody {
                        board,
                        subject,
                        body: String::new(),
                    },
                );
                return vec![Action::Reply(format!(
                    "{}. Your draft was discarded; please send the contents again, then END.",
                    e
                ))];
            }
        };

        let author = nodes.short_name_or_id(from);
        match self.post_bulletin(&board, &author, &subject, &content, storage) {
            Ok(mut actions) => {
                actions.insert(
                    0,
                    Action::Reply(format!(
                        "Your bulletin '{}' has been posted to {}.",
                        subject, board
                    )),
                );
                actions.extend(self.bbs_menu(from));
                actions
            }
            Err(e) => storage_trouble(e),
        }
    }

    /// Store a bulletin and produce its broadcast/sync side effects.
    fn post_bulletin(
        &self,
        board: &str,
        author: &str,
        subject: &str,
        content: &str,
        storage: &Storage,
    ) -> Result<Vec<Action>, StorageError> {
        let record = BulletinRecord {
            unique_id: Uuid::new_v4().to_string(),
            board: board.to_string(),
            sender_short_name: author.to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        storage.add_bulletin(&record)?;

        let mut actions = Vec::new();
        if board.eq_ignore_ascii_case("urgent") {
            actions.push(Action::Broadcast(format!(
                "NEW URGENT BULLETIN\nFrom: {}\nTitle: {}",
                author, subject
            )));
        }
        actions.push(Action::Sync(SyncFrame::Bulletin {
            board: record.board,
            author: record.sender_short_name,
            subject: record.subject,
            content: record.content,
            unique_id: record.unique_id,
        }));
        Ok(actions)
    }

    // --- channel directory flow ---

    fn channel_listing_reply(listing: &[ChannelRecord]) -> String {
        let mut out = "Available Channels:\n".to_string();
        for (i, channel) in listing.iter().enumerate() {
            out.push_str(&format!("{:02}. Name: {}\n", i + 1, channel.name));
        }
        out.push_str("\nPlease reply with the number of the channel you want to view.");
        out
    }

    fn handle_channel_menu(
        &mut self,
        from: &str,
        command: &str,
        storage: &Storage,
    ) -> Vec<Action> {
        match command {
            "v" => match storage.channels() {
                Ok(listing) if listing.is_empty() => {
                    let mut actions = vec![Action::Reply(
                        "No channels available in the directory.".to_string(),
                    )];
                    actions.extend(self.channel_menu(from));
                    actions
                }
                Ok(listing) => {
                    let reply = Self::channel_listing_reply(&listing);
                    self.sessions.set(
                        from,
                        MenuState::ChannelPick {
                            listing,
                            from_quick: false,
                        },
                    );
                    vec![Action::Reply(reply)]
                }
                Err(e) => storage_trouble(e),
            },
            "p" => {
                self.sessions.set(from, MenuState::ChannelName);
                vec![Action::Reply(
                    "Name your channel for the directory:".to_string(),
                )]
            }
            _ => self.channel_menu(from),
        }
    }

    fn handle_channel_pick(
        &mut self,
        from: &str,
        command: &str,
        listing: Vec<ChannelRecord>,
        from_quick: bool,
        _storage: &Storage,
    ) -> Vec<Action> {
        let Some(channel) = select_one_based(command, &listing) else {
            let reply = "Invalid channel number. Please try again.".to_string();
            self.sessions.set(
                from,
                MenuState::ChannelPick {
                    listing,
                    from_quick,
                },
            );
            return vec![Action::Reply(reply)];
        };
        let shown = format!(
            "Channel Name: {}\nChannel URL: {}",
            channel.name, channel.url
        );
        let mut actions = vec![Action::Reply(shown)];
        if from_quick {
            self.sessions.set(from, MenuState::Idle);
        } else {
            actions.extend(self.channel_menu(from));
        }
        actions
    }

    fn handle_channel_name(&mut self, from: &str, raw: &str) -> Vec<Action> {
        match validation::validate_channel_name(raw) {
            Ok(name) => {
                self.sessions.set(from, MenuState::ChannelUrl { name });
                vec![Action::Reply(
                    "Send a message with your channel URL or PSK:".to_string(),
                )]
            }
            Err(e) => {
                self.sessions.set(from, MenuState::ChannelName);
                vec![Action::Reply(format!("{}. Please try again.", e))]
            }
        }
    }

    fn handle_channel_url(
        &mut self,
        from: &str,
        raw: &str,
        name: String,
        storage: &Storage,
    ) -> Vec<Action> {
        let url = match validation::validate_channel_url(raw) {
            Ok(url) => url,
            Err(e) => {
                self.sessions.set(from, MenuState::ChannelUrl { name });
                return vec![Action::Reply(format!("{}. Please try again.", e))];
            }
        };
        match self.post_channel(&name, &url, storage) {
            Ok(Some(sync)) => {
                let mut actions = vec![
                    Action::Reply(format!(
                        "Your channel '{}' has been added to the directory.",
                        name
                    )),
                    sync,
                ];
                actions.extend(self.channel_menu(from));
                actions
            }
            Ok(None) => {
                let mut actions = vec![Action::Reply(format!(
                    "A channel named '{}' is already in the directory.",
                    name
                ))];
                actions.extend(self.channel_menu(from));
                actions
            }
            Err(e) => storage_trouble(e),
        }
    }

    /// Store a channel entry; `Ok(Some)` carries the sync fan-out action,
    /// `Ok(None)` means the name was already taken.
    fn post_channel(
        &self,
        name: &str,
        url: &str,
        storage: &Storage,
    ) -> Result<Option<Action>, StorageError> {
        let record = ChannelRecord {
            name: name.to_string(),
            url: url.to_string(),
            added_at: Utc::now(),
        };
        if storage.add_channel(&record)? {
            Ok(Some(Action::Sync(SyncFrame::Channel {
                name: record.name,
                url: record.url,
            })))
        } else {
            Ok(None)
        }
    }

    // --- JS8Call browsing ---

    fn handle_js8_menu(&mut self, from: &str, command: &str, storage: &Storage) -> Vec<Action> {
        match command {
            "g" => match storage.js8_groups() {
                Ok(groups) if groups.is_empty() => {
                    let mut actions =
                        vec![Action::Reply("No group messages available.".to_string())];
                    actions.extend(self.js8_menu(from));
                    actions
                }
                Ok(groups) => {
                    let mut reply = "Group Messages Menu:".to_string();
                    for (i, group) in groups.iter().enumerate() {
                        reply.push_str(&format!("\n[{}] {}", i + 1, group));
                    }
                    self.sessions.set(from, MenuState::Js8GroupPick { groups });
                    vec![Action::Reply(reply)]
                }
                Err(e) => storage_trouble(e),
            },
            "s" => self.js8_bucket_listing(from, Js8Bucket::Messages, "Station", storage),
            "u" => self.js8_bucket_listing(from, Js8Bucket::Urgent, "Urgent", storage),
            _ => {
                let mut actions = vec![Action::Reply(
                    "Invalid option. Please choose again.".to_string(),
                )];
                actions.extend(self.js8_menu(from));
                actions
            }
        }
    }

    fn js8_bucket_listing(
        &mut self,
        from: &str,
        bucket: Js8Bucket,
        label: &str,
        storage: &Storage,
    ) -> Vec<Action> {
        let records = match storage.js8_messages(bucket) {
            Ok(records) => records,
            Err(e) => return storage_trouble(e),
        };
        let mut actions = if records.is_empty() {
            vec![Action::Reply(format!(
                "No {} messages available.",
                label.to_lowercase()
            ))]
        } else {
            let mut reply = format!("{} Messages:", label);
            for (i, record) in records.iter().enumerate() {
                reply.push_str(&format!(
                    "\n[{}] {} -> {}: {} ({})",
                    i + 1,
                    record.sender,
                    record.target,
                    record.body,
                    record.received_at.format("%Y-%m-%d %H:%M")
                ));
            }
            vec![Action::Reply(reply)]
        };
        actions.extend(self.js8_menu(from));
        actions
    }

    fn handle_js8_group_pick(
        &mut self,
        from: &str,
        command: &str,
        groups: Vec<String>,
        storage: &Storage,
    ) -> Vec<Action> {
        let Some(group) = select_one_based(command, &groups) else {
            self.sessions.set(from, MenuState::Js8GroupPick { groups });
            return vec![Action::Reply(
                "Invalid group selection. Please choose again.".to_string(),
            )];
        };
        let group = group.clone();
        let records = match storage.js8_messages(Js8Bucket::Groups) {
            Ok(records) => records,
            Err(e) => return storage_trouble(e),
        };
        let in_group: Vec<_> = records.iter().filter(|r| r.target == group).collect();
        let mut actions = if in_group.is_empty() {
            vec![Action::Reply(format!("No messages for group {}.", group))]
        } else {
            let mut reply = format!("Messages for group {}:", group);
            for (i, record) in in_group.iter().enumerate() {
                reply.push_str(&format!(
                    "\n[{}] {}: {} ({})",
                    i + 1,
                    record.sender,
                    record.body,
                    record.received_at.format("%Y-%m-%d %H:%M")
                ));
            }
            vec![Action::Reply(reply)]
        };
        actions.extend(self.js8_menu(from));
        actions
    }

    // --- quick commands ---

    /// Stateless quick commands, checked before any session dispatch.
    fn try_quick_command(
        &mut self,
        from: &str,
        raw: &str,
        command: &str,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Option<Vec<Action>> {
        let lower = raw.to_lowercase();
        if lower.starts_with("sm,,") {
            Some(self.quick_send_mail(from, raw, storage, nodes))
        } else if command == "cm" {
            Some(self.quick_check_mail(from, storage))
        } else if lower.starts_with("pb,,") {
            Some(self.quick_post_bulletin(from, raw, storage, nodes))
        } else if lower.starts_with("cb,,") {
            Some(self.quick_check_bulletins(from, raw, storage))
        } else if lower.starts_with("chp,,") {
            Some(self.quick_post_channel(from, raw, storage))
        } else if command == "chl" {
            Some(self.quick_list_channels(from, storage))
        } else {
            None
        }
    }

    fn quick_send_mail(
        &mut self,
        from: &str,
        raw: &str,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        let parts: Vec<&str> = raw.splitn(4, ",,").collect();
        let [_, short_name, subject, content] = parts.as_slice() else {
            return vec![Action::Reply(
                "Send Mail Quick Command format:\nSM,,{short_name},,{subject},,{message}"
                    .to_string(),
            )];
        };

        let matches = nodes.find_by_short_name(short_name.trim());
        if matches.is_empty() {
            return vec![Action::Reply(format!(
                "Node with short name '{}' not found.",
                short_name.trim()
            ))];
        }
        if matches.len() > 1 {
            return vec![Action::Reply(format!(
                "Multiple nodes with short name '{}' found. Please be more specific.",
                short_name.trim()
            ))];
        }

        let subject = match validation::validate_subject(subject) {
            Ok(s) => s,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };
        let content = match validation::validate_body(content) {
            Ok(c) => c,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };

        let recipient = matches[0].id.clone();
        let recipient_name = nodes.long_name_or_default(&recipient);
        let sender_short_name = nodes.short_name_or_id(from);
        let record = MailRecord {
            unique_id: Uuid::new_v4().to_string(),
            sender: from.to_string(),
            sender_short_name: sender_short_name.clone(),
            recipient: recipient.clone(),
            subject,
            content,
            timestamp: Utc::now(),
        };
        if let Err(e) = storage.add_mail(&record) {
            return storage_trouble(e);
        }

        vec![
            Action::Reply(format!("Mail has been sent to {}.", recipient_name)),
            Action::Notify {
                to: recipient,
                text: format!(
                    "You have a new mail message from {}. Check your mailbox by responding to this message with CM.",
                    sender_short_name
                ),
            },
            Action::Sync(SyncFrame::Mail {
                sender: record.sender,
                author: record.sender_short_name,
                recipient: record.recipient,
                subject: record.subject,
                content: record.content,
                unique_id: record.unique_id,
            }),
        ]
    }

    fn quick_check_mail(&mut self, from: &str, storage: &Storage) -> Vec<Action> {
        match storage.mail_for(from) {
            Ok(listing) if listing.is_empty() => {
                self.sessions.set(from, MenuState::Idle);
                vec![Action::Reply("You have no new messages.".to_string())]
            }
            Ok(listing) => {
                let reply = Self::mail_listing_reply(&listing);
                self.sessions.set(from, MenuState::MailRead { listing });
                vec![Action::Reply(reply)]
            }
            Err(e) => storage_trouble(e),
        }
    }

    fn quick_post_bulletin(
        &mut self,
        from: &str,
        raw: &str,
        storage: &Storage,
        nodes: &NodeRegistry,
    ) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        let parts: Vec<&str> = raw.splitn(4, ",,").collect();
        let [_, board_name, subject, content] = parts.as_slice() else {
            return vec![Action::Reply(
                "Post Bulletin Quick Command format:\nPB,,{board_name},,{subject},,{content}"
                    .to_string(),
            )];
        };

        let Some(board) = board_by_name(board_name) else {
            return vec![Action::Reply(format!(
                "Unknown board '{}'. Boards are: General, Info, News, Urgent.",
                board_name.trim()
            ))];
        };
        if board.eq_ignore_ascii_case("urgent")
            && !self.allowed_nodes.is_empty()
            && !self.allowed_nodes.iter().any(|n| n == from)
        {
            warn!("{} denied posting to the Urgent board", escape_log(from));
            return vec![Action::Reply(
                "You don't have permission to post to this board.".to_string(),
            )];
        }

        let subject = match validation::validate_subject(subject) {
            Ok(s) => s,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };
        let content = match validation::validate_body(content) {
            Ok(c) => c,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };

        let author = nodes.short_name_or_id(from);
        match self.post_bulletin(board, &author, &subject, &content, storage) {
            Ok(mut actions) => {
                actions.insert(
                    0,
                    Action::Reply(format!(
                        "Your bulletin '{}' has been posted to {}.",
                        subject, board
                    )),
                );
                actions
            }
            Err(e) => storage_trouble(e),
        }
    }

    fn quick_check_bulletins(
        &mut self,
        from: &str,
        raw: &str,
        storage: &Storage,
    ) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        let parts: Vec<&str> = raw.splitn(2, ",,").collect();
        let board_name = match parts.as_slice() {
            [_, name] if !name.trim().is_empty() => name.trim(),
            _ => {
                return vec![Action::Reply(
                    "Check Bulletins Quick Command format:\nCB,,board_name".to_string(),
                )]
            }
        };
        let Some(board) = board_by_name(board_name) else {
            return vec![Action::Reply(format!(
                "Unknown board '{}'. Boards are: General, Info, News, Urgent.",
                board_name
            ))];
        };
        match storage.bulletins_for_board(board) {
            Ok(listing) if listing.is_empty() => vec![Action::Reply(format!(
                "No bulletins available on {} board.",
                board
            ))],
            Ok(listing) => {
                let reply = Self::bulletin_listing_reply(board, &listing);
                self.sessions.set(
                    from,
                    MenuState::BulletinRead {
                        listing,
                        from_quick: true,
                    },
                );
                vec![Action::Reply(reply)]
            }
            Err(e) => storage_trouble(e),
        }
    }

    fn quick_post_channel(&mut self, from: &str, raw: &str, storage: &Storage) -> Vec<Action> {
        self.sessions.set(from, MenuState::Idle);
        let parts: Vec<&str> = raw.splitn(3, ",,").collect();
        let [_, name, url] = parts.as_slice() else {
            return vec![Action::Reply(
                "Post Channel Quick Command format:\nCHP,,{channel_name},,{channel_url}"
                    .to_string(),
            )];
        };
        let name = match validation::validate_channel_name(name) {
            Ok(n) => n,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };
        let url = match validation::validate_channel_url(url) {
            Ok(u) => u,
            Err(e) => return vec![Action::Reply(format!("{}.", e))],
        };
        match self.post_channel(&name, &url, storage) {
            Ok(Some(sync)) => vec![
                Action::Reply(format!(
                    "Channel '{}' has been added to the directory.",
                    name
                )),
                sync,
            ],
            Ok(None) => vec![Action::Reply(format!(
                "A channel named '{}' is already in the directory.",
                name
            ))],
            Err(e) => storage_trouble(e),
        }
    }

    fn quick_list_channels(&mut self, from: &str, storage: &Storage) -> Vec<Action> {
        match storage.channels() {
            Ok(listing) if listing.is_empty() => {
                self.sessions.set(from, MenuState::Idle);
                vec![Action::Reply(
                    "No channels available in the directory.".to_string(),
                )]
            }
            Ok(listing) => {
                let reply = Self::channel_listing_reply(&listing);
                self.sessions.set(
                    from,
                    MenuState::ChannelPick {
                        listing,
                        from_quick: true,
                    },
                );
                vec![Action::Reply(reply)]
            }
            Err(e) => storage_trouble(e),
        }
    }
}

fn storage_trouble(e: StorageError) -> Vec<Action> {
    log::error!("storage error while handling command: {}", e);
    vec![Action::Reply(STORAGE_TROUBLE.to_string())]
}

/// Resolve a 1-based numeric selection against a listing.
fn select_one_based<'a, T>(command: &str, listing: &'a [T]) -> Option<&'a T> {
    let index: usize = command.parse().ok()?;
    if index == 0 {
        return None;
    }
    listing.get(index - 1)
}
