//! Shared helpers for integration tests.

use meshboard::bbs::commands::{Action, CommandProcessor};
use meshboard::bbs::fortune::FortuneDeck;
use meshboard::config::Config;
use meshboard::interface::nodes::NodeRegistry;
use meshboard::storage::Storage;
use tempfile::TempDir;

pub struct TestBoard {
    pub _dir: TempDir,
    pub storage: Storage,
    pub nodes: NodeRegistry,
    pub processor: CommandProcessor,
}

impl TestBoard {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let storage = Storage::open(dir.path().to_str().unwrap()).expect("open storage");
        let mut nodes = NodeRegistry::new();
        nodes.observe_nodeinfo("!a1b2c3d4", "ALFA", "Alfa Station", Some("TBEAM".into()), None);
        nodes.observe_nodeinfo("!0badcafe", "BRVO", "Bravo Station", None, None);
        nodes.observe_nodeinfo("!deadbeef", "CHLY", "Charlie Station", None, None);
        let processor = CommandProcessor::new(&config, FortuneDeck::builtin());
        Self {
            _dir: dir,
            storage,
            nodes,
            processor,
        }
    }

    /// Send one message and collect the resulting actions.
    pub fn send(&mut self, from: &str, text: &str) -> Vec<Action> {
        self.processor
            .handle_message(from, text, &self.storage, &self.nodes)
    }

    /// All Reply texts from one exchange, joined for assertions.
    pub fn reply(&mut self, from: &str, text: &str) -> String {
        join_replies(&self.send(from, text))
    }
}

pub fn join_replies(actions: &[Action]) -> String {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Reply(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}
