//! Local relay state cache

use gharswitch_shared::Channel;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// On/off state of every configured channel
///
/// Always holds exactly the configured channel set; a mutation touches one
/// channel or fails without touching any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    switches: BTreeMap<Channel, bool>,
}

impl LocalState {
    /// All configured channels, off
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            switches: channels.into_iter().map(|c| (c, false)).collect(),
        }
    }

    pub fn get(&self, channel: &Channel) -> Option<bool> {
        self.switches.get(channel).copied()
    }

    /// Set one channel; returns whether the value changed, or `None` for an unknown channel
    pub fn set(&mut self, channel: &Channel, on: bool) -> Option<bool> {
        let slot = self.switches.get_mut(channel)?;
        let changed = *slot != on;
        *slot = on;
        Some(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Channel, bool)> {
        self.switches.iter().map(|(c, on)| (c, *on))
    }

    /// Values present in a remote `switches` snapshot for channels we know
    ///
    /// Unknown keys and non-boolean values are skipped.
    pub fn known_values(&self, snapshot: &Map<String, Value>) -> Vec<(Channel, bool)> {
        self.switches
            .keys()
            .filter_map(|channel| {
                snapshot
                    .get(channel.as_str())
                    .and_then(Value::as_bool)
                    .map(|on| (channel.clone(), on))
            })
            .collect()
    }

    /// The whole state as a `switches` node body
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.switches
                .iter()
                .map(|(c, on)| (c.to_string(), Value::Bool(*on)))
                .collect(),
        )
    }

    /// One-line summary, e.g. `s1: ON | s2: OFF`
    pub fn summary(&self) -> String {
        self.switches
            .iter()
            .map(|(c, on)| format!("{}: {}", c, if *on { "ON" } else { "OFF" }))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
