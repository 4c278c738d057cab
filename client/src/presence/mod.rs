//! Presence: chosen status vs live connectivity.
//!
//! Two separate ideas meet here. The *preference* is what the user picked
//! (online, idle, dnd, even offline for invisibility); it persists across
//! sessions. *Liveness* is whether this session is connected: an unclean
//! disconnect flips the published record to offline via a pre-registered
//! store-side write, without touching the preference. A user on dnd who
//! loses their connection shows offline and comes back as dnd.

pub mod preference;

pub use preference::{FilePreferences, MemoryPreferences, PreferenceStore};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::Error;
use crate::model::{PresenceRecord, PresenceState};
use crate::store::{KeyedStore, OnDisconnect, Subscription, paths};

/// Publishes one user's presence record and keeps the offline fallback
/// armed while the session lives.
pub struct PresenceTracker<S, P = MemoryPreferences> {
    store: Arc<S>,
    preferences: P,
    user_id: String,
    custom_status: Option<String>,
    disconnect: Option<OnDisconnect>,
}

impl<S: KeyedStore, P: PreferenceStore> PresenceTracker<S, P> {
    pub fn new(store: Arc<S>, preferences: P, user_id: impl Into<String>) -> Self {
        Self {
            store,
            preferences,
            user_id: user_id.into(),
            custom_status: None,
            disconnect: None,
        }
    }

    /// The saved preference, defaulting to online.
    pub fn preferred_state(&self) -> PresenceState {
        self.preferences.load().unwrap_or(PresenceState::Online)
    }

    /// Announce this session: publish the preferred state, then arm the
    /// offline fallback for an unclean disconnect. Reconnecting replaces
    /// the previous registration.
    pub async fn connect(&mut self) -> Result<PresenceState, Error> {
        let state = self.preferred_state();
        self.publish(state).await?;
        self.arm_disconnect();
        info!(user_id = %self.user_id, %state, "presence session connected");
        Ok(state)
    }

    /// Change status: saved as the preference, published immediately.
    /// Offline is allowed (invisible while connected).
    pub async fn set_status(&mut self, state: PresenceState) -> Result<(), Error> {
        self.preferences.save(state);
        self.publish(state).await?;
        info!(user_id = %self.user_id, %state, "status changed");
        Ok(())
    }

    /// Set or clear the free-text status shown next to the state.
    pub async fn set_custom_status(&mut self, custom: Option<String>) -> Result<(), Error> {
        self.custom_status = custom;
        self.publish(self.preferred_state()).await
    }

    /// Clean teardown: disarm the fallback first, then write offline
    /// explicitly. Never relies on the disconnect hook firing.
    pub async fn sign_out(&mut self) -> Result<(), Error> {
        if let Some(handle) = self.disconnect.take() {
            handle.cancel();
        }
        self.custom_status = None;
        self.publish(PresenceState::Offline).await?;
        info!(user_id = %self.user_id, "presence session closed");
        Ok(())
    }

    /// Live feed of everyone's status records.
    pub fn watch_statuses(&self) -> Subscription {
        self.store.subscribe(paths::STATUS_ROOT)
    }

    fn arm_disconnect(&mut self) {
        if let Some(old) = self.disconnect.take() {
            old.cancel();
        }
        let offline = json!({
            "state": PresenceState::Offline,
            "last_changed": self.store.server_timestamp(),
        });
        self.disconnect = Some(
            self.store
                .on_disconnect_set(&paths::user_status(&self.user_id), offline),
        );
    }

    /// The record is replaced wholesale, like the disconnect write does it;
    /// the custom status rides along only while this tracker carries one.
    async fn publish(&self, state: PresenceState) -> Result<(), Error> {
        let mut record = json!({
            "state": state,
            "last_changed": self.store.server_timestamp(),
        });
        if let Some(custom) = &self.custom_status {
            record["custom_status"] = json!(custom);
        }
        self.store
            .write(&paths::user_status(&self.user_id), record)
            .await?;
        Ok(())
    }
}

/// Decode the whole status tree. Entries that fail to decode are skipped;
/// a user with no entry is offline.
pub fn parse_statuses(value: &Value) -> BTreeMap<String, PresenceRecord> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(user_id, record)| {
                    match serde_json::from_value::<PresenceRecord>(record.clone()) {
                        Ok(record) => Some((user_id.clone(), record)),
                        Err(_) => {
                            warn!(%user_id, "skipping malformed status record");
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker(
        store: &Arc<MemoryStore>,
        prefs: &Arc<MemoryPreferences>,
        user_id: &str,
    ) -> PresenceTracker<MemoryStore, Arc<MemoryPreferences>> {
        PresenceTracker::new(store.clone(), prefs.clone(), user_id)
    }

    async fn state_of(store: &MemoryStore, user_id: &str) -> Value {
        store
            .read_once(&paths::user_status(user_id))
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn test_connect_defaults_to_online() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut tracker = tracker(&store, &prefs, "u1");

        let state = tracker.connect().await.unwrap();
        assert_eq!(state, PresenceState::Online);

        let record = state_of(&store, "u1").await;
        assert_eq!(record["state"], json!("online"));
        assert!(record["last_changed"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unclean_disconnect_goes_offline_but_keeps_preference() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = tracker(&store, &prefs, "u1");

        session.connect().await.unwrap();
        session.set_status(PresenceState::Dnd).await.unwrap();
        assert_eq!(state_of(&store, "u1").await["state"], json!("dnd"));

        store.simulate_disconnect();
        assert_eq!(state_of(&store, "u1").await["state"], json!("offline"));

        // The next session re-applies the saved dnd preference.
        let mut next = tracker(&store, &prefs, "u1");
        let state = next.connect().await.unwrap();
        assert_eq!(state, PresenceState::Dnd);
        assert_eq!(state_of(&store, "u1").await["state"], json!("dnd"));
    }

    #[tokio::test]
    async fn test_sign_out_cancels_the_disconnect_write() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = tracker(&store, &prefs, "u1");

        session.connect().await.unwrap();
        session.sign_out().await.unwrap();
        assert_eq!(state_of(&store, "u1").await["state"], json!("offline"));

        // Another client writes a fresh record; the cancelled registration
        // must not clobber it when the old connection finally drops.
        store
            .write(&paths::user_status("u1"), json!({"state": "online"}))
            .await
            .unwrap();
        store.simulate_disconnect();
        assert_eq!(state_of(&store, "u1").await["state"], json!("online"));
    }

    #[tokio::test]
    async fn test_reconnect_rearms_a_single_fallback() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = tracker(&store, &prefs, "u1");

        session.connect().await.unwrap();
        session.connect().await.unwrap();

        store.simulate_disconnect();
        assert_eq!(state_of(&store, "u1").await["state"], json!("offline"));
    }

    #[tokio::test]
    async fn test_invisible_mode_is_allowed() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = tracker(&store, &prefs, "u1");

        session.connect().await.unwrap();
        session.set_status(PresenceState::Offline).await.unwrap();

        assert_eq!(state_of(&store, "u1").await["state"], json!("offline"));
        assert_eq!(prefs.load(), Some(PresenceState::Offline));
    }

    #[tokio::test]
    async fn test_custom_status_rides_until_disconnect() {
        let store = Arc::new(MemoryStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = tracker(&store, &prefs, "u1");

        session.connect().await.unwrap();
        session
            .set_custom_status(Some("brb coffee".into()))
            .await
            .unwrap();
        assert_eq!(
            state_of(&store, "u1").await["custom_status"],
            json!("brb coffee")
        );

        // The offline fallback replaces the whole record.
        store.simulate_disconnect();
        let record = state_of(&store, "u1").await;
        assert_eq!(record["state"], json!("offline"));
        assert!(record.get("custom_status").is_none());
    }

    #[test]
    fn test_parse_statuses_tolerates_garbage() {
        let tree = json!({
            "u1": {"state": "idle", "last_changed": 9},
            "u2": {"state": "napping"},
            "u3": 17,
        });
        let statuses = parse_statuses(&tree);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses["u1"].state, PresenceState::Idle);
    }
}
