//! Keyed store of source nodes.
//!
//! Pipelines take a copy of their node, work on it for the whole cycle and
//! commit it back in one step. No two pipelines ever own the same key, so
//! the lock is only held for the copy and the commit.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;

use super::node::SourceNode;
use crate::config::{SourceDescriptor, SourceId};

#[derive(Debug, Default)]
pub struct CacheStore {
    nodes: RwLock<HashMap<SourceId, SourceNode>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.nodes.read().contains_key(id)
    }

    /// Copy of the node stored under `id`.
    pub fn get(&self, id: &SourceId) -> Option<SourceNode> {
        self.nodes.read().get(id).cloned()
    }

    /// Copy of every node, sorted by identifier.
    pub fn snapshot(&self) -> Vec<SourceNode> {
        let mut nodes: Vec<SourceNode> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Write back a node processed by a pipeline.
    pub fn commit(&self, node: SourceNode) {
        self.nodes.write().insert(node.id().clone(), node);
    }

    /// Apply a new configuration.
    ///
    /// New sources get fresh nodes, changed ones keep their records with
    /// the downstream stages reset, and configured sources that disappeared
    /// are flagged for deletion together with everything derived from them.
    pub fn sync_descriptors(&self, descriptors: Vec<SourceDescriptor>) {
        let now = Utc::now();
        let configured: HashSet<SourceId> = descriptors.iter().map(|d| d.id.clone()).collect();
        let mut nodes = self.nodes.write();

        let mut removed_parents: HashSet<SourceId> = HashSet::new();
        for node in nodes.values_mut() {
            if node.descriptor.configured && !configured.contains(node.id()) {
                node.mark_to_be_deleted(true);
                removed_parents.insert(node.id().clone());
            }
        }
        for node in nodes.values_mut() {
            let orphaned = !node.descriptor.configured
                && node
                    .descriptor
                    .parent
                    .as_ref()
                    .map_or(false, |p| removed_parents.contains(p));
            if orphaned {
                node.mark_to_be_deleted(true);
            }
        }

        for descriptor in descriptors {
            match nodes.get_mut(&descriptor.id) {
                Some(node) => {
                    node.update_descriptor(descriptor, now);
                    node.mark_to_be_deleted(false);
                }
                None => {
                    nodes.insert(descriptor.id.clone(), SourceNode::new(descriptor));
                }
            }
        }
    }

    /// Make sure a node exists for a derived descriptor (TL or pivot).
    ///
    /// Returns false when a configured source already owns the url.
    pub fn ensure_derived(&self, descriptor: SourceDescriptor) -> bool {
        let now = Utc::now();
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&descriptor.id) {
            Some(node) if node.descriptor.configured => false,
            Some(node) => {
                node.update_descriptor(descriptor, now);
                node.mark_to_be_deleted(false);
                true
            }
            None => {
                nodes.insert(descriptor.id.clone(), SourceNode::new(descriptor));
                true
            }
        }
    }

    /// Flag derived nodes of `parent` that are no longer referenced.
    pub fn mark_unreferenced(&self, parent: &SourceId, referenced: &HashSet<SourceId>) -> Vec<SourceId> {
        let mut flagged = Vec::new();
        for node in self.nodes.write().values_mut() {
            if !node.descriptor.configured
                && node.descriptor.parent.as_ref() == Some(parent)
                && !referenced.contains(node.id())
                && !node.is_to_be_deleted()
            {
                node.mark_to_be_deleted(true);
                flagged.push(node.id().clone());
            }
        }
        flagged.sort();
        flagged
    }

    /// Remove every node flagged for deletion.
    pub fn purge(&self) -> Vec<SourceId> {
        let mut nodes = self.nodes.write();
        let mut purged: Vec<SourceId> = nodes
            .values()
            .filter(|n| n.is_to_be_deleted())
            .map(|n| n.id().clone())
            .collect();
        for id in &purged {
            nodes.remove(id);
        }
        purged.sort();
        purged
    }
}
