//! Friend graph: requests, acceptance, and listings.
//!
//! The graph is stored twice by design. A friendship is a pair of
//! complementary `true` edges under `friends/`, a pending request a pair
//! of complementary records under `friendRequests/` (direction `sent` on
//! the sender's side, `received` on the target's). Every operation writes
//! or deletes both sides in a single multi-path update; [`repair`] handles
//! the asymmetric leftovers a mid-update failure can strand.

pub mod repair;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::Error;
use crate::model::{PendingRequest, RequestDirection, UserProfile};
use crate::store::{KeyedStore, Subscription, WriteBatch, paths};
use crate::validation;

/// Relationship between two users, from one user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    None,
    /// We sent a request that is still pending.
    PendingOut,
    /// They sent us a request we have not answered.
    PendingIn,
    Friends,
}

/// A friends-list entry hydrated with the user's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendEntry {
    pub user_id: String,
    pub profile: UserProfile,
}

/// An unanswered request someone sent us.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub user_id: String,
    pub profile: UserProfile,
    pub timestamp: i64,
}

/// Friend graph operations for one store.
pub struct SocialGraph<S> {
    store: Arc<S>,
}

impl<S: KeyedStore> SocialGraph<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Find a user id by username in the user directory. First match wins;
    /// usernames are not guaranteed unique historically.
    pub async fn resolve_username(&self, username: &str) -> Result<Option<String>, Error> {
        let snapshot = self.store.read_once(paths::USERS_ROOT).await?;
        let Some(users) = snapshot.value.as_object() else {
            return Ok(None);
        };
        for (user_id, record) in users {
            if record.get("username").and_then(|v| v.as_str()) == Some(username) {
                return Ok(Some(user_id.clone()));
            }
        }
        Ok(None)
    }

    /// Send a friend request by username. Writes the complementary pending
    /// records on both sides; returns the resolved target user id.
    pub async fn send_friend_request(
        &self,
        self_id: &str,
        target_username: &str,
    ) -> Result<String, Error> {
        validation::validate_username(target_username).map_err(Error::InvalidArgument)?;

        let Some(target_id) = self.resolve_username(target_username).await? else {
            return Err(Error::not_found("user"));
        };
        if target_id == self_id {
            return Err(Error::invalid_argument(
                "cannot send a friend request to yourself",
            ));
        }
        if self
            .store
            .read_once(&paths::friend(self_id, &target_id))
            .await?
            .exists()
        {
            return Err(Error::AlreadyFriends);
        }
        let pending = self
            .store
            .read_once(&paths::friend_request(self_id, &target_id))
            .await?;
        if pending.exists() {
            // A record without a readable direction is treated as received,
            // like every other reader of these records.
            return match pending.decode::<PendingRequest>() {
                Ok(request) if request.direction == RequestDirection::Sent => {
                    Err(Error::RequestAlreadySent)
                }
                _ => Err(Error::RequestAlreadyReceived),
            };
        }

        let timestamp = Utc::now().timestamp_millis();
        let batch = WriteBatch::new()
            .set(
                paths::friend_request(&target_id, self_id),
                json!(PendingRequest::new(RequestDirection::Received, timestamp)),
            )
            .set(
                paths::friend_request(self_id, &target_id),
                json!(PendingRequest::new(RequestDirection::Sent, timestamp)),
            );
        self.store.update(batch).await?;
        info!(%self_id, %target_id, "sent friend request");
        Ok(target_id)
    }

    /// Accept a request we received: friendship edges both ways, both
    /// pending records gone, in one update.
    pub async fn accept_friend_request(&self, self_id: &str, other_id: &str) -> Result<(), Error> {
        let own = self
            .store
            .read_once(&paths::friend_request(self_id, other_id))
            .await?;
        if !own.exists() {
            return Err(Error::not_found("friend request"));
        }
        if let Ok(request) = own.decode::<PendingRequest>()
            && request.direction == RequestDirection::Sent
        {
            return Err(Error::invalid_argument(
                "cannot accept a request you sent; the other user has to accept it",
            ));
        }

        let batch = WriteBatch::new()
            .set(paths::friend(self_id, other_id), json!(true))
            .set(paths::friend(other_id, self_id), json!(true))
            .delete(paths::friend_request(self_id, other_id))
            .delete(paths::friend_request(other_id, self_id));
        self.store.update(batch).await?;
        info!(%self_id, %other_id, "accepted friend request");
        Ok(())
    }

    /// Delete both pending records. No precondition and idempotent, so it
    /// also cancels a request we sent.
    pub async fn reject_friend_request(&self, self_id: &str, other_id: &str) -> Result<(), Error> {
        let batch = WriteBatch::new()
            .delete(paths::friend_request(self_id, other_id))
            .delete(paths::friend_request(other_id, self_id));
        self.store.update(batch).await?;
        info!(%self_id, %other_id, "rejected friend request");
        Ok(())
    }

    /// Current relationship with `other_id`, from `self_id`'s side.
    pub async fn pair_state(&self, self_id: &str, other_id: &str) -> Result<PairState, Error> {
        if self
            .store
            .read_once(&paths::friend(self_id, other_id))
            .await?
            .exists()
        {
            return Ok(PairState::Friends);
        }
        let pending = self
            .store
            .read_once(&paths::friend_request(self_id, other_id))
            .await?;
        if !pending.exists() {
            return Ok(PairState::None);
        }
        Ok(match pending.decode::<PendingRequest>() {
            Ok(request) if request.direction == RequestDirection::Sent => PairState::PendingOut,
            _ => PairState::PendingIn,
        })
    }

    /// Friends list hydrated with profiles. Entries whose profile is
    /// missing are skipped.
    pub async fn list_friends(&self, self_id: &str) -> Result<Vec<FriendEntry>, Error> {
        let snapshot = self
            .store
            .read_once(&paths::user_friends(self_id))
            .await?;
        let Some(edges) = snapshot.value.as_object() else {
            return Ok(Vec::new());
        };
        let mut friends = Vec::new();
        for other_id in edges.keys() {
            match self.profile(other_id).await? {
                Some(profile) => friends.push(FriendEntry {
                    user_id: other_id.clone(),
                    profile,
                }),
                None => warn!(%self_id, %other_id, "friend has no profile, skipping"),
            }
        }
        Ok(friends)
    }

    /// Unanswered incoming requests, hydrated with sender profiles.
    pub async fn list_incoming_requests(
        &self,
        self_id: &str,
    ) -> Result<Vec<IncomingRequest>, Error> {
        let snapshot = self
            .store
            .read_once(&paths::user_friend_requests(self_id))
            .await?;
        let Some(records) = snapshot.value.as_object() else {
            return Ok(Vec::new());
        };
        let mut incoming = Vec::new();
        for (other_id, record) in records {
            let Ok(request) = serde_json::from_value::<PendingRequest>(record.clone()) else {
                warn!(%self_id, %other_id, "skipping malformed friend request record");
                continue;
            };
            if request.direction != RequestDirection::Received {
                continue;
            }
            match self.profile(other_id).await? {
                Some(profile) => incoming.push(IncomingRequest {
                    user_id: other_id.clone(),
                    profile,
                    timestamp: request.timestamp,
                }),
                None => warn!(%self_id, %other_id, "request sender has no profile, skipping"),
            }
        }
        Ok(incoming)
    }

    /// Live feed of our friends edges.
    pub fn watch_friends(&self, user_id: &str) -> Subscription {
        self.store.subscribe(&paths::user_friends(user_id))
    }

    /// Live feed of our pending request records.
    pub fn watch_requests(&self, user_id: &str) -> Subscription {
        self.store.subscribe(&paths::user_friend_requests(user_id))
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, Error> {
        let snapshot = self.store.read_once(&paths::user(user_id)).await?;
        if !snapshot.exists() {
            return Ok(None);
        }
        Ok(snapshot.decode::<UserProfile>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    async fn seed_user(store: &MemoryStore, user_id: &str, username: &str) {
        store
            .write(&paths::user(user_id), json!({"username": username}))
            .await
            .unwrap();
    }

    async fn graph_with_users() -> (Arc<MemoryStore>, SocialGraph<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "u1", "alice").await;
        seed_user(&store, "u2", "bob").await;
        (store.clone(), SocialGraph::new(store))
    }

    #[tokio::test]
    async fn test_send_writes_complementary_records() {
        let (store, graph) = graph_with_users().await;
        let target = graph.send_friend_request("u1", "bob").await.unwrap();
        assert_eq!(target, "u2");

        let mine = store.read_once("friendRequests/u1/u2").await.unwrap();
        let theirs = store.read_once("friendRequests/u2/u1").await.unwrap();
        assert_eq!(mine.value["type"], json!("sent"));
        assert_eq!(theirs.value["type"], json!("received"));
        assert_eq!(mine.value["status"], json!("pending"));
        assert_eq!(mine.value["timestamp"], theirs.value["timestamp"]);

        assert_eq!(graph.pair_state("u1", "u2").await.unwrap(), PairState::PendingOut);
        assert_eq!(graph.pair_state("u2", "u1").await.unwrap(), PairState::PendingIn);
    }

    #[tokio::test]
    async fn test_send_to_unknown_username_is_not_found() {
        let (_, graph) = graph_with_users().await;
        let err = graph.send_friend_request("u1", "charlie").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_send_to_self_is_invalid() {
        let (_, graph) = graph_with_users().await;
        let err = graph.send_friend_request("u1", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_duplicate_send_conflicts_both_ways() {
        let (_, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();

        let again = graph.send_friend_request("u1", "bob").await.unwrap_err();
        assert_eq!(again, Error::RequestAlreadySent);

        // The other side trying to send hits the mirrored conflict.
        let crossed = graph.send_friend_request("u2", "alice").await.unwrap_err();
        assert_eq!(crossed, Error::RequestAlreadyReceived);
        assert_eq!(crossed.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_accept_links_both_sides_and_clears_pendings() {
        let (store, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();

        graph.accept_friend_request("u2", "u1").await.unwrap();

        assert_eq!(graph.pair_state("u1", "u2").await.unwrap(), PairState::Friends);
        assert_eq!(graph.pair_state("u2", "u1").await.unwrap(), PairState::Friends);
        assert!(!store.read_once("friendRequests/u1/u2").await.unwrap().exists());
        assert!(!store.read_once("friendRequests/u2/u1").await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_send_after_friends_is_a_conflict() {
        let (_, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();
        graph.accept_friend_request("u2", "u1").await.unwrap();

        let err = graph.send_friend_request("u1", "bob").await.unwrap_err();
        assert_eq!(err, Error::AlreadyFriends);
    }

    #[tokio::test]
    async fn test_accept_requires_a_received_request() {
        let (_, graph) = graph_with_users().await;

        let err = graph.accept_friend_request("u2", "u1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        graph.send_friend_request("u1", "bob").await.unwrap();
        // The sender cannot accept their own outgoing request.
        let err = graph.accept_friend_request("u1", "u2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_reject_clears_both_sides_and_is_idempotent() {
        let (store, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();

        graph.reject_friend_request("u2", "u1").await.unwrap();
        assert_eq!(graph.pair_state("u1", "u2").await.unwrap(), PairState::None);
        assert!(!store.read_once("friendRequests/u1/u2").await.unwrap().exists());

        // Nothing left to delete; still fine.
        graph.reject_friend_request("u2", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn test_reject_doubles_as_cancel() {
        let (_, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();

        // The sender withdraws their own request.
        graph.reject_friend_request("u1", "u2").await.unwrap();
        assert_eq!(graph.pair_state("u2", "u1").await.unwrap(), PairState::None);
    }

    #[tokio::test]
    async fn test_list_friends_hydrates_profiles() {
        let (store, graph) = graph_with_users().await;
        graph.send_friend_request("u1", "bob").await.unwrap();
        graph.accept_friend_request("u2", "u1").await.unwrap();

        let friends = graph.list_friends("u1").await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].user_id, "u2");
        assert_eq!(friends[0].profile.username, "bob");

        // A friend whose profile vanished is skipped, not an error.
        store.delete("users/u2").await.unwrap();
        assert!(graph.list_friends("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_incoming_requests_filters_direction() {
        let (store, graph) = graph_with_users().await;
        seed_user(&store, "u3", "carol").await;
        graph.send_friend_request("u1", "bob").await.unwrap();
        graph.send_friend_request("u3", "bob").await.unwrap();
        graph.send_friend_request("u2", "carol").await.unwrap_err(); // crossed, conflict

        let incoming = graph.list_incoming_requests("u2").await.unwrap();
        let senders: Vec<&str> = incoming.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(senders, vec!["u1", "u3"]);

        // The senders see nothing incoming.
        assert!(graph.list_incoming_requests("u1").await.unwrap().is_empty());
    }
}
