//! In-memory [`KeyedStore`] with production-faithful semantics.
//!
//! Backs every test in the crate. The behaviors that matter to the domain
//! layers are reproduced exactly: deep-path writes replace scalar leaves
//! with nested maps, `Null` (or empty-map) values delete, empty nodes are
//! pruned upward, server-timestamp sentinels resolve to Unix millis at
//! write time, and disconnect registrations fire on
//! [`MemoryStore::simulate_disconnect`].
//!
//! Fault-injection hooks cover the failure modes the domain layers have to
//! survive: rule denials, outages, and a multi-path update that dies
//! partway through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{KeyedStore, OnDisconnect, Snapshot, Subscription, WriteBatch};
use crate::error::StoreError;

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Snapshot>,
    cancel: CancellationToken,
}

struct DisconnectWrite {
    path: String,
    value: Value,
    handle: OnDisconnect,
}

pub struct MemoryStore {
    tree: Mutex<Value>,
    subscribers: DashMap<Uuid, Subscriber>,
    disconnect_writes: DashMap<Uuid, DisconnectWrite>,
    denied_prefixes: Mutex<Vec<String>>,
    offline: AtomicBool,
    update_failure: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Value::Object(Map::new())),
            subscribers: DashMap::new(),
            disconnect_writes: DashMap::new(),
            denied_prefixes: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            update_failure: Mutex::new(None),
        }
    }

    // ── Test hooks ──────────────────────────────────────────────────────

    /// Reject subsequent writes that touch `prefix` with `PermissionDenied`.
    pub fn deny_writes_under(&self, prefix: &str) {
        lock_recover(&self.denied_prefixes).push(prefix.to_string());
    }

    /// Clear all write denials.
    pub fn allow_all_writes(&self) {
        lock_recover(&self.denied_prefixes).clear();
    }

    /// Fail every operation with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `update` apply only its first `applied` entries and
    /// then fail `Unavailable`. One-shot.
    pub fn fail_update_after(&self, applied: usize) {
        *lock_recover(&self.update_failure) = Some(applied);
    }

    /// Fire all uncancelled disconnect registrations, then clear them all.
    pub fn simulate_disconnect(&self) {
        let ids: Vec<Uuid> = self.disconnect_writes.iter().map(|e| *e.key()).collect();
        let mut entries = Vec::new();
        for id in ids {
            if let Some((_, write)) = self.disconnect_writes.remove(&id)
                && !write.handle.is_cancelled()
            {
                entries.push((write.path, write.value));
            }
        }
        self.apply_and_notify(&entries);
    }

    /// Clone of the whole tree, for assertions.
    pub fn dump(&self) -> Value {
        lock_recover(&self.tree).clone()
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn check_allowed(&self, path: &str) -> Result<(), StoreError> {
        let denied = lock_recover(&self.denied_prefixes);
        for prefix in denied.iter() {
            if paths_intersect(prefix, path) {
                return Err(StoreError::PermissionDenied(path.to_string()));
            }
        }
        Ok(())
    }

    fn value_at(&self, path: &str) -> Value {
        value_in(&lock_recover(&self.tree), path)
    }

    fn apply_and_notify(&self, entries: &[(String, Value)]) {
        if entries.is_empty() {
            return;
        }
        let now = Utc::now().timestamp_millis();
        let mut tree = lock_recover(&self.tree);
        for (path, value) in entries {
            let mut value = value.clone();
            resolve_sentinels(&mut value, now);
            let value = sanitize(value);
            let segments = split_path(path);
            if value.is_null() {
                delete_in(&mut tree, &segments);
            } else {
                set_in(&mut tree, &segments, value);
            }
        }
        // One snapshot per affected subscriber for the whole batch. Dead or
        // cancelled subscribers are dropped here.
        self.subscribers.retain(|_, sub| {
            if sub.cancel.is_cancelled() {
                return false;
            }
            if entries.iter().any(|(p, _)| paths_intersect(p, &sub.path)) {
                let snapshot = Snapshot::new(sub.path.clone(), value_in(&tree, &sub.path));
                if sub.tx.send(snapshot).is_err() {
                    return false;
                }
            }
            true
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedStore for MemoryStore {
    fn subscribe(&self, path: &str) -> Subscription {
        let cancel = CancellationToken::new();
        let (tx, subscription) = Subscription::channel(cancel.clone());
        tx.send(Snapshot::new(path, self.value_at(path))).ok();
        self.subscribers.insert(
            Uuid::new_v4(),
            Subscriber {
                path: path.to_string(),
                tx,
                cancel,
            },
        );
        subscription
    }

    async fn read_once(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.check_online()?;
        Ok(Snapshot::new(path, self.value_at(path)))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.check_allowed(path)?;
        self.apply_and_notify(&[(path.to_string(), value)]);
        Ok(())
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_online()?;
        let entries = batch.into_entries();
        for (path, _) in &entries {
            self.check_allowed(path)?;
        }
        let failure = lock_recover(&self.update_failure).take();
        if let Some(applied) = failure
            && applied < entries.len()
        {
            self.apply_and_notify(&entries[..applied]);
            return Err(StoreError::Unavailable("connection lost mid-update".into()));
        }
        self.apply_and_notify(&entries);
        Ok(())
    }

    fn on_disconnect_set(&self, path: &str, value: Value) -> OnDisconnect {
        let handle = OnDisconnect::new();
        self.disconnect_writes.insert(
            handle.id(),
            DisconnectWrite {
                path: path.to_string(),
                value,
                handle: handle.clone(),
            },
        );
        handle
    }
}

// ── Tree helpers ────────────────────────────────────────────────────────

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether one path is an ancestor of (or equal to) the other.
fn paths_intersect(a: &str, b: &str) -> bool {
    let a = split_path(a);
    let b = split_path(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

fn value_in(tree: &Value, path: &str) -> Value {
    let mut node = tree;
    for segment in split_path(path) {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Strip `Null` entries and empty maps; a value that collapses to nothing
/// becomes `Null` (the store has no empty nodes).
fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut clean = Map::new();
            for (key, child) in map {
                let child = sanitize(child);
                if !child.is_null() {
                    clean.insert(key, child);
                }
            }
            if clean.is_empty() {
                Value::Null
            } else {
                Value::Object(clean)
            }
        }
        other => other,
    }
}

/// Replace the subtree at `segments` with `value` (already sanitized,
/// non-null). Intermediate scalars are overwritten by maps.
fn set_in(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_in(child, rest, value);
    }
}

/// Delete the subtree at `segments`, pruning ancestors left empty.
fn delete_in(node: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    let Some(map) = node.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        map.remove(*head);
        return;
    }
    if let Some(child) = map.get_mut(*head) {
        delete_in(child, rest);
        let empty = child.is_null() || child.as_object().is_some_and(|m| m.is_empty());
        if empty {
            map.remove(*head);
        }
    }
}

fn resolve_sentinels(value: &mut Value, now: i64) {
    match value {
        Value::Object(map) => {
            if map.get(".sv").and_then(Value::as_str) == Some("timestamp") {
                *value = Value::from(now);
            } else {
                for (_, child) in map.iter_mut() {
                    resolve_sentinels(child, now);
                }
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                resolve_sentinels(child, now);
            }
        }
        _ => {}
    }
}
