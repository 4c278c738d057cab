//! Idempotent friend-graph repair.
//!
//! Friendship edges and pending requests are written in complementary
//! pairs, but the store applies multi-path updates without cross-path
//! atomicity; a connection lost mid-update strands one-sided state. This
//! pass scans the whole graph and completes every broken pair forward:
//! re-running it on a healthy graph writes nothing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SocialGraph;
use crate::error::Error;
use crate::model::{PendingRequest, RequestDirection};
use crate::store::{KeyedStore, WriteBatch, paths};

/// What one repair pass fixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    /// One-sided friendship edges given their reverse edge.
    pub edges_completed: u32,
    /// Pairs promoted to friends from mutual pending records.
    pub pairs_promoted: u32,
    /// One-sided pending records given their complementary record.
    pub requests_completed: u32,
    /// Stale pending records cleared between users who are already friends.
    pub requests_cleared: u32,
}

impl RepairSummary {
    pub fn total(&self) -> u32 {
        self.edges_completed + self.pairs_promoted + self.requests_completed + self.requests_cleared
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// Everything observed about one unordered user pair. `low`/`high` refer
/// to the lexicographically ordered pair key.
#[derive(Default)]
struct PairScan {
    edge_low_high: bool,
    edge_high_low: bool,
    request_low: Option<PendingRequest>,
    request_high: Option<PendingRequest>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Scan `friends/` and `friendRequests/` and complete every broken pair.
/// One update per broken pair; a pass over a healthy graph writes nothing.
pub async fn repair_social_graph<S: KeyedStore>(store: &S) -> Result<RepairSummary, Error> {
    let friends_root = store.read_once(paths::FRIENDS_ROOT).await?.value;
    let requests_root = store.read_once(paths::FRIEND_REQUESTS_ROOT).await?.value;

    let mut pairs: BTreeMap<(String, String), PairScan> = BTreeMap::new();

    if let Some(users) = friends_root.as_object() {
        for (a, edges) in users {
            let Some(edges) = edges.as_object() else {
                continue;
            };
            for b in edges.keys() {
                if a == b {
                    warn!(user_id = %a, "ignoring self edge in friends tree");
                    continue;
                }
                let scan = pairs.entry(pair_key(a, b)).or_default();
                if a < b {
                    scan.edge_low_high = true;
                } else {
                    scan.edge_high_low = true;
                }
            }
        }
    }

    if let Some(users) = requests_root.as_object() {
        for (a, records) in users {
            let Some(records) = records.as_object() else {
                continue;
            };
            for (b, record) in records {
                if a == b {
                    warn!(user_id = %a, "ignoring self request in requests tree");
                    continue;
                }
                // Unreadable records count as received-now, like every
                // other reader of these records.
                let request = serde_json::from_value::<PendingRequest>(record.clone())
                    .unwrap_or_else(|_| {
                        PendingRequest::new(
                            RequestDirection::Received,
                            Utc::now().timestamp_millis(),
                        )
                    });
                let scan = pairs.entry(pair_key(a, b)).or_default();
                if a < b {
                    scan.request_low = Some(request);
                } else {
                    scan.request_high = Some(request);
                }
            }
        }
    }

    let mut summary = RepairSummary::default();
    for ((low, high), scan) in &pairs {
        let mut batch = WriteBatch::new();
        let friends = scan.edge_low_high || scan.edge_high_low;

        if friends {
            if !scan.edge_low_high {
                batch = batch.set(paths::friend(low, high), json!(true));
                summary.edges_completed += 1;
                warn!(%low, %high, "completing one-sided friendship edge");
            }
            if !scan.edge_high_low {
                batch = batch.set(paths::friend(high, low), json!(true));
                summary.edges_completed += 1;
                warn!(%low, %high, "completing one-sided friendship edge");
            }
            if scan.request_low.is_some() || scan.request_high.is_some() {
                if scan.request_low.is_some() {
                    batch = batch.delete(paths::friend_request(low, high));
                    summary.requests_cleared += 1;
                }
                if scan.request_high.is_some() {
                    batch = batch.delete(paths::friend_request(high, low));
                    summary.requests_cleared += 1;
                }
                warn!(%low, %high, "clearing stale pending records between friends");
            }
        } else {
            match (&scan.request_low, &scan.request_high) {
                // Complementary pair: healthy pending request.
                (Some(a), Some(b)) if a.direction != b.direction => {}
                // Both sides expressed the same thing: both users acted,
                // so complete the pair forward into a friendship.
                (Some(_), Some(_)) => {
                    batch = batch
                        .set(paths::friend(low, high), json!(true))
                        .set(paths::friend(high, low), json!(true))
                        .delete(paths::friend_request(low, high))
                        .delete(paths::friend_request(high, low));
                    summary.pairs_promoted += 1;
                    warn!(%low, %high, "promoting mutual pending records to friendship");
                }
                (Some(request), None) => {
                    let complement =
                        PendingRequest::new(request.direction.opposite(), request.timestamp);
                    batch = batch.set(paths::friend_request(high, low), json!(complement));
                    summary.requests_completed += 1;
                    warn!(%low, %high, "completing one-sided pending request");
                }
                (None, Some(request)) => {
                    let complement =
                        PendingRequest::new(request.direction.opposite(), request.timestamp);
                    batch = batch.set(paths::friend_request(low, high), json!(complement));
                    summary.requests_completed += 1;
                    warn!(%low, %high, "completing one-sided pending request");
                }
                (None, None) => {}
            }
        }

        if !batch.is_empty() {
            store.update(batch).await?;
        }
    }

    if summary.is_clean() {
        debug!("friend graph clean");
    } else {
        info!(
            edges = summary.edges_completed,
            promoted = summary.pairs_promoted,
            completed = summary.requests_completed,
            cleared = summary.requests_cleared,
            "friend graph repaired"
        );
    }
    Ok(summary)
}

impl<S: KeyedStore> SocialGraph<S> {
    /// Run one repair pass over the whole graph.
    pub async fn repair_once(&self) -> Result<RepairSummary, Error> {
        repair_social_graph(self.store.as_ref()).await
    }

    /// Repair on a fixed period until `cancel` fires. Runs one pass
    /// immediately. The caller spawns this; the crate starts no tasks of
    /// its own.
    pub async fn repair_loop(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            match self.repair_once().await {
                Ok(summary) if !summary.is_clean() => {
                    debug!(fixed = summary.total(), "periodic repair pass finished");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "repair pass failed, will retry"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
