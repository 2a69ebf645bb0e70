//! Per-node session state.
//!
//! Each remote node navigating the board has at most one session, which is
//! just its position in the menu tree plus whatever the current flow has
//! collected so far (a mail listing, a half-composed bulletin). Sessions
//! live in memory only; a restart drops everyone back to the main menu,
//! which is also what an idle node sees on its next message.

use std::collections::HashMap;

use crate::storage::{BulletinRecord, ChannelRecord, MailRecord};

/// Where a node currently is in the menu tree. Listing variants carry the
/// records that were shown, so a numeric selection is resolved against
/// exactly what the user saw even if the store changes underneath.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MenuState {
    /// No flow in progress; next input is treated as a main menu choice.
    #[default]
    Idle,
    BbsMenu,
    UtilitiesMenu,

    MailMenu,
    MailRead {
        listing: Vec<MailRecord>,
    },
    MailAction {
        record: MailRecord,
    },
    MailRecipient,
    MailRecipientPick {
        /// (node id, long name) per candidate, in the order shown.
        matches: Vec<(String, String)>,
    },
    MailSubject {
        recipient: String,
    },
    MailBody {
        recipient: String,
        subject: String,
        body: String,
    },
    MailAnother,

    BulletinMenu,
    BoardAction {
        board: String,
    },
    BulletinRead {
        listing: Vec<BulletinRecord>,
        from_quick: bool,
    },
    BulletinSubject {
        board: String,
    },
    BulletinBody {
        board: String,
        subject: String,
        body: String,
    },

    ChannelMenu,
    ChannelPick {
        listing: Vec<ChannelRecord>,
        from_quick: bool,
    },
    ChannelName,
    ChannelUrl {
        name: String,
    },

    StatsMenu,
    Js8Menu,
    Js8GroupPick {
        groups: Vec<String>,
    },
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, MenuState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the node's current state, leaving it idle. The command logic
    /// decides the next state and stores it back.
    pub fn take(&mut self, node_id: &str) -> MenuState {
        self.sessions.remove(node_id).unwrap_or_default()
    }

    pub fn set(&mut self, node_id: &str, state: MenuState) {
        if state == MenuState::Idle {
            self.sessions.remove(node_id);
        } else {
            self.sessions.insert(node_id.to_string(), state);
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Normalize a command: trim, lowercase, and collapse a two-character
/// message ending in `x` to its first character. Radio clients that
/// auto-complete or double-tap produce things like `mx` for `m`.
pub fn normalize_command(text: &str) -> String {
    let mut lower = text.trim().to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    if chars.len() == 2 && chars[1] == 'x' {
        lower = chars[0].to_string();
    }
    lower
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_exit_suffix() {
        assert_eq!(normalize_command("Mx"), "m");
        assert_eq!(normalize_command("  rx "), "r");
        assert_eq!(normalize_command("x"), "x");
        assert_eq!(normalize_command("end"), "end");
        // Three characters are left alone.
        assert_eq!(normalize_command("box"), "box");
    }

    #[test]
    fn take_defaults_to_idle_and_clears() {
        let mut sessions = SessionManager::new();
        assert_eq!(sessions.take("!aa"), MenuState::Idle);
        sessions.set("!aa", MenuState::MailMenu);
        assert_eq!(sessions.active_count(), 1);
        assert_eq!(sessions.take("!aa"), MenuState::MailMenu);
        assert_eq!(sessions.active_count(), 0);
    }

    #[test]
    fn setting_idle_drops_the_session() {
        let mut sessions = SessionManager::new();
        sessions.set("!aa", MenuState::StatsMenu);
        sessions.set("!aa", MenuState::Idle);
        assert_eq!(sessions.active_count(), 0);
    }
}
