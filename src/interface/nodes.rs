//! Node registry: everything the BBS has learned about mesh nodes.
//!
//! The registry is fed by `nodeinfo`/`telemetry` frames and consulted by the
//! menu system (short-name lookups for mail addressing) and the stats
//! collector (wall of shame, hardware/role breakdowns). It persists to
//! `nodes.json` in the data directory so names survive restarts.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heard: Option<DateTime<Utc>>,
}

impl NodeEntry {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            short_name: String::new(),
            long_name: String::new(),
            hw_model: None,
            role: None,
            battery_level: None,
            last_heard: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeFile {
    #[serde(default)]
    nodes: HashMap<String, NodeEntry>,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeEntry>,
    path: Option<PathBuf>,
}

impl NodeRegistry {
    /// In-memory registry without persistence (tests, status command).
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry from `<data_dir>/nodes.json`, starting empty when
    /// the file does not exist yet.
    pub fn load(data_dir: &str) -> Result<Self> {
        let path = Path::new(data_dir).join("nodes.json");
        let nodes = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cleaned = content.trim_start_matches('\0');
                let file: NodeFile = serde_json::from_str(cleaned)
                    .map_err(|e| anyhow!("failed to parse {}: {}", path.display(), e))?;
                file.nodes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(anyhow!("failed to read {}: {}", path.display(), e)),
        };
        Ok(Self {
            nodes,
            path: Some(path),
        })
    }

    /// Persist the registry. Writes through a temp file with an advisory
    /// lock so a crash mid-write cannot corrupt the previous snapshot.
    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let file = NodeFile {
            nodes: self.nodes.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.lock_exclusive()?;
            f.write_all(content.as_bytes())?;
            f.sync_all()?;
            FileExt::unlock(&f)?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    pub fn get(&self, id: &str) -> Option<&NodeEntry> {
        self.nodes.get(id)
    }

    /// Record a nodeinfo frame.
    pub fn observe_nodeinfo(
        &mut self,
        id: &str,
        short_name: &str,
        long_name: &str,
        hw_model: Option<String>,
        role: Option<String>,
    ) {
        let entry = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeEntry::new(id));
        entry.short_name = short_name.to_string();
        entry.long_name = long_name.to_string();
        if hw_model.is_some() {
            entry.hw_model = hw_model;
        }
        if role.is_some() {
            entry.role = role;
        }
        entry.last_heard = Some(Utc::now());
    }

    /// Record a telemetry frame.
    pub fn observe_telemetry(&mut self, id: &str, battery_level: Option<u8>) {
        let entry = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeEntry::new(id));
        if battery_level.is_some() {
            entry.battery_level = battery_level;
        }
        entry.last_heard = Some(Utc::now());
    }

    /// Refresh last-heard for any packet from this node.
    pub fn touch(&mut self, id: &str) {
        let entry = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| NodeEntry::new(id));
        entry.last_heard = Some(Utc::now());
    }

    /// Short display name, falling back to the raw node id.
    pub fn short_name_or_id(&self, id: &str) -> String {
        match self.nodes.get(id) {
            Some(entry) if !entry.short_name.is_empty() => entry.short_name.clone(),
            _ => id.to_string(),
        }
    }

    /// Long display name, falling back to "Node <id>".
    pub fn long_name_or_default(&self, id: &str) -> String {
        match self.nodes.get(id) {
            Some(entry) if !entry.long_name.is_empty() => entry.long_name.clone(),
            _ => format!("Node {}", id),
        }
    }

    /// All nodes whose short name matches, case-insensitively. Short names
    /// are not unique on a mesh, so this can return several entries.
    pub fn find_by_short_name(&self, short_name: &str) -> Vec<&NodeEntry> {
        let needle = short_name.to_lowercase();
        let mut matches: Vec<&NodeEntry> = self
            .nodes
            .values()
            .filter(|n| n.short_name.to_lowercase() == needle)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// Best-effort save that only logs on failure; used on the hot path.
    pub fn save_quietly(&self) {
        if let Err(e) = self.save() {
            warn!("failed to persist node registry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn nodeinfo_then_telemetry_merge() {
        let mut reg = NodeRegistry::new();
        reg.observe_nodeinfo("!aa", "AA01", "Alpha One", Some("TBEAM".into()), None);
        reg.observe_telemetry("!aa", Some(77));
        let entry = reg.get("!aa").unwrap();
        assert_eq!(entry.short_name, "AA01");
        assert_eq!(entry.battery_level, Some(77));
        assert!(entry.last_heard.is_some());
    }

    #[test]
    fn short_name_lookup_is_case_insensitive() {
        let mut reg = NodeRegistry::new();
        reg.observe_nodeinfo("!aa", "GW01", "Gateway", None, None);
        reg.observe_nodeinfo("!bb", "gw01", "Other Gateway", None, None);
        reg.observe_nodeinfo("!cc", "XY99", "Unrelated", None, None);
        let found = reg.find_by_short_name("Gw01");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn fallback_names() {
        let reg = NodeRegistry::new();
        assert_eq!(reg.short_name_or_id("!zz"), "!zz");
        assert_eq!(reg.long_name_or_default("!zz"), "Node !zz");
    }

    #[test]
    fn persistence_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let data_dir = dir.path().to_str().unwrap();
        {
            let mut reg = NodeRegistry::load(data_dir).unwrap();
            reg.observe_nodeinfo("!aa", "AA01", "Alpha One", None, Some("ROUTER".into()));
            reg.save().unwrap();
        }
        let reg = NodeRegistry::load(data_dir).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("!aa").unwrap().role.as_deref(), Some("ROUTER"));
    }
}
