//! Mesh statistics reports for the utilities menu.
//!
//! Everything here reads from the node registry and formats a short reply.
//! Report functions take `now` explicitly so windowed counts are testable.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::interface::nodes::NodeRegistry;

/// Threshold for the wall of shame. Strictly below; a node holding at
/// exactly 20% is spared.
const LOW_BATTERY_PERCENT: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounts {
    pub total: usize,
    pub last_24h: usize,
    pub last_8h: usize,
    pub last_hour: usize,
}

pub fn node_counts(registry: &NodeRegistry, now: DateTime<Utc>) -> NodeCounts {
    let mut counts = NodeCounts {
        total: 0,
        last_24h: 0,
        last_8h: 0,
        last_hour: 0,
    };
    for node in registry.iter() {
        counts.total += 1;
        let Some(heard) = node.last_heard else {
            continue;
        };
        let age = now - heard;
        if age <= Duration::hours(24) {
            counts.last_24h += 1;
        }
        if age <= Duration::hours(8) {
            counts.last_8h += 1;
        }
        if age <= Duration::hours(1) {
            counts.last_hour += 1;
        }
    }
    counts
}

pub fn nodes_seen_report(registry: &NodeRegistry, now: DateTime<Utc>) -> String {
    let counts = node_counts(registry, now);
    format!(
        "Nodes seen\nAll time: {}\nLast 24 hours: {}\nLast 8 hours: {}\nLast hour: {}",
        counts.total, counts.last_24h, counts.last_8h, counts.last_hour
    )
}

fn tally_report(title: &str, entries: impl Iterator<Item = String>) -> String {
    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        *tally.entry(entry).or_insert(0) += 1;
    }
    if tally.is_empty() {
        return format!("{}\nNo data yet.", title);
    }
    let mut rows: Vec<(String, usize)> = tally.into_iter().collect();
    // Highest count first; BTreeMap already broke name ties.
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    let mut out = String::from(title);
    for (name, count) in rows {
        out.push_str(&format!("\n{}: {}", name, count));
    }
    out
}

pub fn hardware_report(registry: &NodeRegistry) -> String {
    tally_report(
        "Hardware models",
        registry
            .iter()
            .filter_map(|n| n.hw_model.clone())
            .filter(|m| !m.is_empty()),
    )
}

pub fn role_report(registry: &NodeRegistry) -> String {
    tally_report(
        "Device roles",
        registry
            .iter()
            .filter_map(|n| n.role.clone())
            .filter(|r| !r.is_empty()),
    )
}

/// Nodes reporting a battery level below 20%.
pub fn wall_of_shame(registry: &NodeRegistry) -> String {
    let mut offenders: Vec<(String, u8)> = registry
        .iter()
        .filter_map(|n| {
            n.battery_level
                .filter(|&level| level < LOW_BATTERY_PERCENT)
                .map(|level| (registry.long_name_or_default(&n.id), level))
        })
        .collect();
    if offenders.is_empty() {
        return "Wall of Shame\nNo devices below 20% battery. Well done.".to_string();
    }
    offenders.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let mut out = String::from("Wall of Shame\nDevices below 20% battery:");
    for (name, level) in offenders {
        out.push_str(&format!("\n{} - {}%", name, level));
    }
    out
}
