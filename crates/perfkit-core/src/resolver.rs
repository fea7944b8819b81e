//! Manifest Resolver (Component D, §4 table): per-connection registry
//! mapping source id to its latest manifest.

use crate::manifest::Manifest;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps `source_id` to the manifest currently governing samples from that
/// source.
///
/// Insertion is atomic replacement: a new manifest for an already-known
/// source id replaces the old `Arc` entry outright, so samples already in
/// flight against the previous manifest (held via a cloned `Arc`) keep
/// decoding against it (§3 invariants).
#[derive(Debug, Default)]
pub struct Resolver {
    manifests: HashMap<u64, Arc<Manifest>>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver { manifests: HashMap::new() }
    }

    /// Inserts or replaces the manifest for its `source_id`, returning the
    /// shared handle callers should hold onto for the decode that follows.
    pub fn insert(&mut self, manifest: Manifest) -> Arc<Manifest> {
        let handle = Arc::new(manifest);
        self.manifests.insert(handle.source_id, handle.clone());
        handle
    }

    pub fn lookup(&self, source_id: u64) -> Option<Arc<Manifest>> {
        self.manifests.get(&source_id).cloned()
    }

    pub fn remove(&mut self, source_id: u64) -> Option<Arc<Manifest>> {
        self.manifests.remove(&source_id)
    }
}
