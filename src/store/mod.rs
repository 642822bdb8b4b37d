pub mod memory;
pub mod redis_store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

// ─── Values passed across the contract ───────────────────────────

/// Result of a point read.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn new(value: Option<Value>) -> Self {
        Self { value }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Approximate payload size: length of the compact JSON encoding.
    pub fn estimated_bytes(&self) -> u64 {
        self.value
            .as_ref()
            .and_then(|v| serde_json::to_vec(v).ok())
            .map(|b| b.len() as u64)
            .unwrap_or(0)
    }
}

/// One entry of a multi-path patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Set(Value),
    /// Explicit deletion marker.
    Delete,
}

/// Multi-path patch, keys relative to the path it is applied at.
/// Applied atomically across all included paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    entries: BTreeMap<String, PatchValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.entries.insert(path.into(), PatchValue::Set(value));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.entries.insert(path.into(), PatchValue::Delete);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchValue)> {
        self.entries.iter()
    }

    /// Every entry rewritten to its absolute path under `base`.
    pub fn absolute(&self, base: &str) -> Vec<(String, PatchValue)> {
        self.entries
            .iter()
            .map(|(k, v)| (join(base, k), v.clone()))
            .collect()
    }
}

/// Invoked with the current value at the subscribed path on every change.
pub type ChangeCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Detach handle returned by [`Store::subscribe`].
///
/// Detaches on [`Subscription::unsubscribe`] or when dropped.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

// ─── The contract ────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    /// Replace the value at `path`.
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Apply `patch` atomically; keys are relative to `path`.
    async fn update(&self, path: &str, patch: Patch) -> Result<(), StoreError>;

    async fn read(&self, path: &str) -> Result<Snapshot, StoreError>;

    /// Attach `on_change` to every change at, above or below `path`.
    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError>;
}

// ─── Path helpers ────────────────────────────────────────────────

/// Non-empty `/`-separated segments of `path`.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn join(base: &str, rel: &str) -> String {
    let mut parts = segments(base);
    parts.extend(segments(rel));
    parts.join("/")
}

/// True if one path is an ancestor of (or equal to) the other.
pub fn overlaps(a: &[&str], b: &[&str]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
