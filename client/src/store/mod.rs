//! Keyed hierarchical store abstraction.
//!
//! Everything in this crate talks to the realtime backend through
//! [`KeyedStore`]: a tree of JSON values addressed by `/`-separated paths,
//! with live subscriptions, multi-path updates and disconnect-triggered
//! writes. The trait is injected into every manager so tests (and any
//! alternative backend) can swap in [`MemoryStore`].
//!
//! Write semantics: writing `Null` deletes, a multi-path update lands as
//! one change set but is not compare-and-set, and empty nodes do not
//! exist (deleting the last child deletes the parent).

pub mod memory;
pub mod paths;

pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll};

use chrono::Utc;
use futures_util::Stream;
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StoreError;

/// A value observed at a path. `value` is `Null` when nothing exists there.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    pub value: Value,
}

impl Snapshot {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Whether anything exists at this path.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Deserialize the snapshot value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// A multi-path write. Entries apply in insertion order; a `Null` value
/// deletes its path. The whole batch lands as one change set on the store,
/// but there is no compare-and-set across paths.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<(String, Value)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write at `path`.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.entries.push((path.into(), value));
        self
    }

    /// Add a delete at `path`.
    pub fn delete(self, path: impl Into<String>) -> Self {
        self.set(path, Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

// ── Subscriptions ───────────────────────────────────────────────────────

/// A live feed of snapshots for one path.
///
/// The current value arrives first, then one snapshot per change that
/// intersects the path. Cancelling (explicitly or by drop) detaches the
/// subscription from the store; `recv` returns `None` afterwards.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Build a subscription plus the sender half the store feeds.
    pub fn channel(cancel: CancellationToken) -> (mpsc::UnboundedSender<Snapshot>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Subscription { rx, cancel })
    }

    /// Receive the next snapshot. Returns `None` once the subscription is
    /// cancelled or the store dropped its end.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            snapshot = self.rx.recv() => snapshot,
        }
    }

    /// Detach from the store. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    /// Cancellation is observed on the next poll; use [`Subscription::recv`]
    /// when a foreign task may cancel a stream that sees no traffic.
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

// ── Disconnect registrations ────────────────────────────────────────────

/// Handle to a write the store will perform if the connection drops.
///
/// Cancelling removes the registration; a cancelled handle is inert.
#[derive(Debug, Clone)]
pub struct OnDisconnect {
    id: Uuid,
    token: CancellationToken,
}

impl OnDisconnect {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the registration. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for OnDisconnect {
    fn default() -> Self {
        Self::new()
    }
}

// ── The store trait ─────────────────────────────────────────────────────

/// A keyed hierarchical realtime store.
///
/// Async methods return `Send` futures so callers can drive them from
/// spawned tasks.
pub trait KeyedStore: Send + Sync + 'static {
    /// Subscribe to the subtree at `path`. Delivers the current value
    /// immediately, then a snapshot after every intersecting change (one
    /// per update batch).
    fn subscribe(&self, path: &str) -> Subscription;

    /// Read the current value at `path` once.
    fn read_once(&self, path: &str) -> impl Future<Output = Result<Snapshot, StoreError>> + Send;

    /// Replace the subtree at `path`. Writing `Null` deletes.
    fn write(&self, path: &str, value: Value)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply a multi-path update as one change set.
    fn update(&self, batch: WriteBatch) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the subtree at `path`.
    fn delete(&self, path: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.write(path, Value::Null)
    }

    /// Sentinel the store resolves to its own clock at write time.
    fn server_timestamp(&self) -> Value {
        json!({ ".sv": "timestamp" })
    }

    /// Register a write to perform if this client's connection drops.
    fn on_disconnect_set(&self, path: &str, value: Value) -> OnDisconnect;
}

// ── Push ids ────────────────────────────────────────────────────────────

/// Alphabet for push ids, ordered so id order matches generation order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct PushState {
    last_ms: i64,
    last_rand: [u8; 12],
}

/// Generate a 20-char key: 8 chars of timestamp followed by 12 random
/// chars. Lexicographic order equals generation order; ids created in the
/// same millisecond (or under a clock that stepped backwards) reuse the
/// previous random suffix incremented by one.
pub fn push_id() -> String {
    static STATE: OnceLock<Mutex<PushState>> = OnceLock::new();
    let state = STATE.get_or_init(|| {
        Mutex::new(PushState {
            last_ms: 0,
            last_rand: [0u8; 12],
        })
    });
    let mut state = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let now = Utc::now().timestamp_millis();
    if now > state.last_ms {
        state.last_ms = now;
        let mut rng = rand::thread_rng();
        for byte in state.last_rand.iter_mut() {
            *byte = rng.gen_range(0..64);
        }
    } else {
        for i in (0..12).rev() {
            if state.last_rand[i] < 63 {
                state.last_rand[i] += 1;
                break;
            }
            state.last_rand[i] = 0;
        }
    }

    let mut id = [0u8; 20];
    let mut ms = state.last_ms;
    for i in (0..8).rev() {
        id[i] = PUSH_CHARS[(ms % 64) as usize];
        ms /= 64;
    }
    for (i, &byte) in state.last_rand.iter().enumerate() {
        id[8 + i] = PUSH_CHARS[byte as usize];
    }
    // PUSH_CHARS is ASCII, so the buffer is valid UTF-8.
    String::from_utf8_lossy(&id).into_owned()
}
