//! Wire records stored in the realtime tree.
//!
//! Field names and shapes match the production database exactly; decoding
//! is tolerant (defaults for missing fields) because records written by
//! older clients are still live.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::roles::permissions::Permissions;

/// Default color assigned to new roles.
pub const DEFAULT_ROLE_COLOR: &str = "#99AAB5";

fn default_role_color() -> String {
    DEFAULT_ROLE_COLOR.to_string()
}

/// A role record under `servers/{server}/roles/{role}`.
///
/// `id` is the store key, not part of the record body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_role_color")]
    pub color: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub position: i64,
}

impl Role {
    /// Decode a role record, attaching the store key. `None` for values
    /// that are not records at all.
    pub fn decode(id: &str, value: &Value) -> Option<Role> {
        if !value.is_object() {
            return None;
        }
        let mut role: Role = serde_json::from_value(value.clone()).ok()?;
        role.id = id.to_string();
        Some(role)
    }
}

/// A member's role set under `servers/{server}/members/{user}`.
///
/// Not being a member is the absence of the record; a member without roles
/// is the literal `true` marker. The `WithRoles` set is never empty: any
/// operation that would empty it produces `NoRoles` instead, and decoding
/// normalizes the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    NoRoles,
    WithRoles(BTreeSet<String>),
}

impl Membership {
    /// Interpret any stored value as a membership. Total: the marker
    /// `true`, legacy shapes and garbage all read as `NoRoles`.
    pub fn from_value(value: &Value) -> Membership {
        let ids: BTreeSet<String> = value
            .get("roles")
            .and_then(Value::as_object)
            .map(|roles| roles.keys().cloned().collect())
            .unwrap_or_default();
        if ids.is_empty() {
            Membership::NoRoles
        } else {
            Membership::WithRoles(ids)
        }
    }

    /// Build from role ids, normalizing empty to `NoRoles`.
    pub fn from_role_ids<I, T>(ids: I) -> Membership
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            Membership::NoRoles
        } else {
            Membership::WithRoles(ids)
        }
    }

    pub fn roles(&self) -> Option<&BTreeSet<String>> {
        match self {
            Membership::NoRoles => None,
            Membership::WithRoles(ids) => Some(ids),
        }
    }

    pub fn role_ids(&self) -> impl Iterator<Item = &str> {
        self.roles().into_iter().flatten().map(String::as_str)
    }

    pub fn role_count(&self) -> usize {
        self.roles().map_or(0, BTreeSet::len)
    }

    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles().is_some_and(|ids| ids.contains(role_id))
    }

    /// Copy with `role_id` added.
    pub fn with_role(&self, role_id: &str) -> Membership {
        let mut ids = self.roles().cloned().unwrap_or_default();
        ids.insert(role_id.to_string());
        Membership::WithRoles(ids)
    }

    /// Copy with `role_id` removed, collapsing an emptied set to `NoRoles`.
    pub fn without_role(&self, role_id: &str) -> Membership {
        let mut ids = self.roles().cloned().unwrap_or_default();
        ids.remove(role_id);
        Membership::from_role_ids(ids)
    }
}

impl Serialize for Membership {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Membership::NoRoles => serializer.serialize_bool(true),
            Membership::WithRoles(ids) => {
                use serde::ser::SerializeMap;
                let inner: serde_json::Map<String, Value> = ids
                    .iter()
                    .map(|id| (id.clone(), Value::Bool(true)))
                    .collect();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("roles", &inner)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Membership {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Membership::from_value(&value))
    }
}

/// A user profile under `users/{user}`. The profile carries more fields
/// (server links, auth metadata); only what this crate reads is modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Which side of a friend request a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDirection {
    Sent,
    Received,
}

impl RequestDirection {
    /// The direction the complementary record on the other side carries.
    pub fn opposite(self) -> RequestDirection {
        match self {
            RequestDirection::Sent => RequestDirection::Received,
            RequestDirection::Received => RequestDirection::Sent,
        }
    }
}

fn default_pending_status() -> String {
    "pending".to_string()
}

/// A pending friend request under `friendRequests/{user}/{other}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    #[serde(rename = "type")]
    pub direction: RequestDirection,
    #[serde(default = "default_pending_status")]
    pub status: String,
    /// Client-clock Unix millis at send time.
    #[serde(default)]
    pub timestamp: i64,
}

impl PendingRequest {
    pub fn new(direction: RequestDirection, timestamp: i64) -> Self {
        Self {
            direction,
            status: default_pending_status(),
            timestamp,
        }
    }
}

/// Connectivity-facing presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Idle,
    Dnd,
    #[default]
    Offline,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Idle => "idle",
            PresenceState::Dnd => "dnd",
            PresenceState::Offline => "offline",
        }
    }

    pub fn parse(raw: &str) -> Option<PresenceState> {
        match raw {
            "online" => Some(PresenceState::Online),
            "idle" => Some(PresenceState::Idle),
            "dnd" => Some(PresenceState::Dnd),
            "offline" => Some(PresenceState::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence record under `status/{user}`. Missing records read as
/// offline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(default)]
    pub state: PresenceState,
    /// Unix millis, resolved server-side at write time.
    #[serde(default)]
    pub last_changed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
}
