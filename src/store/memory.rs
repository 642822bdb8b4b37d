use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{
    join, overlaps, segments, ChangeCallback, Patch, PatchValue, Snapshot, Store, Subscription,
};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    /// Path fragments that make any touching operation fail.
    failures: Vec<String>,
    update_log: Vec<(String, Patch)>,
}

struct Subscriber {
    id: u64,
    path: String,
    callback: ChangeCallback,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write, update or read whose absolute path contains `fragment`.
    pub fn fail_paths_containing(&self, fragment: impl Into<String>) {
        self.inner.lock().failures.push(fragment.into());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Every multi-path update applied so far, as `(base path, patch)`.
    pub fn update_log(&self) -> Vec<(String, Patch)> {
        self.inner.lock().update_log.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn notify(&self, changed: &[String]) {
        let pending: Vec<(ChangeCallback, Snapshot)> = {
            let inner = self.inner.lock();
            inner
                .subscribers
                .iter()
                .filter(|s| {
                    let sub = segments(&s.path);
                    changed.iter().any(|c| overlaps(&sub, &segments(c)))
                })
                .map(|s| (s.callback.clone(), inner.snapshot(&s.path)))
                .collect()
        };
        for (callback, snapshot) in pending {
            callback(&snapshot);
        }
    }
}

impl Inner {
    fn check(&self, path: &str) -> Result<(), StoreError> {
        match self.failures.iter().find(|f| path.contains(f.as_str())) {
            Some(fragment) => Err(StoreError::Rejected {
                path: path.to_string(),
                reason: format!("injected failure on '{fragment}'"),
            }),
            None => Ok(()),
        }
    }

    fn snapshot(&self, path: &str) -> Snapshot {
        Snapshot::new(get_at(&self.root, &segments(path)).cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock();
            inner.check(path)?;
            set_at(&mut inner.root, &segments(path), Some(value));
        }
        self.notify(&[path.to_string()]);
        Ok(())
    }

    async fn update(&self, path: &str, patch: Patch) -> Result<(), StoreError> {
        let entries = patch.absolute(path);
        {
            let mut inner = self.inner.lock();
            for (abs, _) in &entries {
                inner.check(abs)?;
            }
            for (abs, value) in &entries {
                let value = match value {
                    PatchValue::Set(v) => Some(v.clone()),
                    PatchValue::Delete => None,
                };
                set_at(&mut inner.root, &segments(abs), value);
            }
            inner.update_log.push((path.to_string(), patch));
        }
        let changed: Vec<String> = entries.into_iter().map(|(p, _)| p).collect();
        self.notify(&changed);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Snapshot, StoreError> {
        let inner = self.inner.lock();
        inner.check(&join("", path))?;
        Ok(inner.snapshot(path))
    }

    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError> {
        let (id, initial) = {
            let mut inner = self.inner.lock();
            inner.check(path)?;
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.push(Subscriber {
                id,
                path: path.to_string(),
                callback: on_change.clone(),
            });
            (id, inner.snapshot(path))
        };

        // Attach fires once with the current value.
        on_change(&initial);

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscribers.retain(|s| s.id != id);
            }
        }))
    }
}

// ─── Tree helpers ────────────────────────────────────────────────

fn is_vacant(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

fn get_at<'a>(node: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut cur = node;
    for seg in segs {
        cur = cur.as_object()?.get(*seg)?;
    }
    if is_vacant(cur) {
        None
    } else {
        Some(cur)
    }
}

/// `None` (or a `null` value) deletes.
fn set_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let value = value.filter(|v| !v.is_null());

    let Some((head, rest)) = segs.split_first() else {
        *node = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };

    if value.is_none() && node.get(*head).is_none() {
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                map.insert(head.to_string(), v);
            }
            None => {
                map.remove(*head);
            }
        }
        return;
    }

    let child = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_at(child, rest, value);
    if is_vacant(child) {
        map.remove(*head);
    }
}
