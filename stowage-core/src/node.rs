use crate::error::{Result, StowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
}

/// Configured membership of one store group.
#[derive(Debug, Clone)]
pub struct Membership {
    group: String,
    nodes: Vec<NodeInfo>,
}

impl Membership {
    pub fn new(group: impl Into<String>, nodes: Vec<NodeInfo>) -> Result<Self> {
        let group = group.into();
        if group.trim().is_empty() || group.contains('/') {
            return Err(StowError::Config(format!("invalid group name: '{}'", group)));
        }

        if nodes.is_empty() {
            return Err(StowError::Config(format!(
                "group '{}' has no member nodes",
                group
            )));
        }

        let mut seen = BTreeSet::new();
        for node in &nodes {
            if node.node_id.trim().is_empty() {
                return Err(StowError::Config("node_id cannot be empty".to_string()));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(StowError::Config(format!(
                    "duplicate node_id in group '{}': {}",
                    group, node.node_id
                )));
            }
        }

        Ok(Self { group, nodes })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|node| node.node_id == node_id)
    }

    pub fn resolve(&self, node_id: &str) -> Result<&NodeInfo> {
        self.nodes
            .iter()
            .find(|node| node.node_id == node_id)
            .ok_or_else(|| StowError::Internal(format!("node not in membership: {}", node_id)))
    }

    /// True once every member appears in `node_ids`.
    pub fn covered_by<'a, I>(&self, node_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let present: BTreeSet<&str> = node_ids.into_iter().map(String::as_str).collect();
        self.nodes
            .iter()
            .all(|node| present.contains(node.node_id.as_str()))
    }

    /// Clamp a requested replica count to what this group can satisfy.
    pub fn write_quorum(&self, requested: usize) -> usize {
        requested.min(self.nodes.len()).max(1)
    }
}
