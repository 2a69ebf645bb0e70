//! Fortune cookie lines for the utilities menu.

use log::debug;
use rand::seq::SliceRandom;
use std::path::Path;

const BUILTIN: &[&str] = &[
    "The best antenna is the one you actually put up.",
    "A watched mailbox never beeps.",
    "Every hop you add is a friend you have not met.",
    "Low battery, high spirits.",
    "The mesh remembers what the operator forgets.",
    "Propagation favors the patient.",
    "Somewhere, a node is relaying your kindness.",
];

pub struct FortuneDeck {
    lines: Vec<String>,
}

impl FortuneDeck {
    /// Load fortunes from a file, one per line. Falls back to the builtin
    /// set when the file is missing or has no usable lines.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let lines: Vec<String> = contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if lines.is_empty() {
                    debug!("{} has no fortunes, using builtin set", path.display());
                    Self::builtin()
                } else {
                    Self { lines }
                }
            }
            Err(_) => {
                debug!("no fortune file at {}, using builtin set", path.display());
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self {
            lines: BUILTIN.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn draw(&self) -> &str {
        self.lines
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("No fortunes available.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_deck_always_draws() {
        let deck = FortuneDeck::builtin();
        assert!(!deck.draw().is_empty());
    }

    #[test]
    fn file_deck_uses_file_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "only fortune").unwrap();
        let deck = FortuneDeck::load(file.path());
        assert_eq!(deck.draw(), "only fortune");
    }

    #[test]
    fn empty_file_falls_back_to_builtin() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let deck = FortuneDeck::load(file.path());
        assert!(BUILTIN.contains(&deck.draw()));
    }
}
