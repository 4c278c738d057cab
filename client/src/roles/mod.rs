//! Role hierarchy and the member-role ledger.
//!
//! Roles are ranked by `position` (higher = more senior). Creation appends
//! at the top; repositioning happens only through
//! [`RoleManager::batch_update_roles`], which rewrites every position in
//! one multi-path update so a partially applied reorder can never
//! interleave with a second client's.
//!
//! The ledger stores a member as `true` (no roles) or `{roles: {...}}`.
//! The bare marker matters: the store prunes empty nodes, so deleting a
//! member's last role key without writing the marker back would erase the
//! membership itself.

pub mod permissions;
pub mod roster;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::model::{Membership, Role};
use crate::store::{KeyedStore, Subscription, WriteBatch, paths, push_id};
use crate::validation;
use permissions::Permissions;

/// Partial role update. Omitted fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub color: Option<String>,
    pub permissions: Option<Permissions>,
}

impl RoleChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.permissions.is_none()
    }
}

/// Role and membership operations for one store.
pub struct RoleManager<S> {
    store: Arc<S>,
}

impl<S: KeyedStore> RoleManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // ── Roles ───────────────────────────────────────────────────────────

    /// Create a role at the top of the hierarchy. Returns the new role id.
    pub async fn create_role(
        &self,
        server_id: &str,
        name: &str,
        color: &str,
        permissions: Permissions,
    ) -> Result<String, Error> {
        validation::validate_role_name(name).map_err(Error::InvalidArgument)?;
        validation::validate_color(color).map_err(Error::InvalidArgument)?;

        let roles = self.roles(server_id).await?;
        let position = roles
            .iter()
            .map(|r| r.position)
            .max()
            .map_or(1, |highest| highest + 1);
        let role_id = push_id();

        self.store
            .write(
                &paths::server_role(server_id, &role_id),
                json!({
                    "name": name,
                    "color": color,
                    "permissions": permissions,
                    "position": position,
                }),
            )
            .await?;
        info!(%server_id, %role_id, name, position, "created role");
        Ok(role_id)
    }

    /// Merge the provided fields into an existing role. Position is not a
    /// field here; ordering changes go through [`Self::batch_update_roles`].
    pub async fn update_role(
        &self,
        server_id: &str,
        role_id: &str,
        changes: &RoleChanges,
    ) -> Result<(), Error> {
        if let Some(name) = &changes.name {
            validation::validate_role_name(name).map_err(Error::InvalidArgument)?;
        }
        if let Some(color) = &changes.color {
            validation::validate_color(color).map_err(Error::InvalidArgument)?;
        }
        if changes.is_empty() {
            debug!(%server_id, %role_id, "empty role update");
            return Ok(());
        }

        let existing = self
            .store
            .read_once(&paths::server_role(server_id, role_id))
            .await?;
        if !existing.exists() {
            return Err(Error::not_found("role"));
        }

        let mut batch = WriteBatch::new();
        if let Some(name) = &changes.name {
            batch = batch.set(paths::role_field(server_id, role_id, "name"), json!(name));
        }
        if let Some(color) = &changes.color {
            batch = batch.set(paths::role_field(server_id, role_id, "color"), json!(color));
        }
        if let Some(permissions) = &changes.permissions {
            batch = batch.set(
                paths::role_field(server_id, role_id, "permissions"),
                json!(permissions),
            );
        }
        self.store.update(batch).await?;
        info!(%server_id, %role_id, "updated role");
        Ok(())
    }

    /// Delete the role entity. Ledger entries referencing it are left in
    /// place; readers skip ids with no matching role.
    pub async fn delete_role(&self, server_id: &str, role_id: &str) -> Result<(), Error> {
        self.store
            .delete(&paths::server_role(server_id, role_id))
            .await?;
        info!(%server_id, %role_id, "deleted role");
        Ok(())
    }

    /// Rewrite every role's position from a full ordering (index 0 = top,
    /// which gets the highest position) in one multi-path update.
    pub async fn batch_update_roles(
        &self,
        server_id: &str,
        ordered_ids: &[String],
    ) -> Result<(), Error> {
        let existing: BTreeSet<String> =
            self.roles(server_id).await?.into_iter().map(|r| r.id).collect();

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for role_id in ordered_ids {
            if !seen.insert(role_id.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "duplicate role id in ordering: {}",
                    role_id
                )));
            }
            if !existing.contains(role_id.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "unknown role id in ordering: {}",
                    role_id
                )));
            }
        }
        if seen.len() != existing.len() {
            return Err(Error::invalid_argument(
                "ordering must cover every role on the server",
            ));
        }
        if ordered_ids.is_empty() {
            return Ok(());
        }

        let count = ordered_ids.len() as i64;
        let mut batch = WriteBatch::new();
        for (index, role_id) in ordered_ids.iter().enumerate() {
            batch = batch.set(
                paths::role_field(server_id, role_id, "position"),
                json!(count - index as i64),
            );
        }
        self.store.update(batch).await?;
        info!(%server_id, roles = ordered_ids.len(), "repositioned roles");
        Ok(())
    }

    /// All roles on the server, most senior first.
    pub async fn roles(&self, server_id: &str) -> Result<Vec<Role>, Error> {
        let snapshot = self
            .store
            .read_once(&paths::server_roles(server_id))
            .await?;
        Ok(parse_roles(&snapshot.value))
    }

    /// Live feed of the server's roles subtree.
    pub fn watch_roles(&self, server_id: &str) -> Subscription {
        self.store.subscribe(&paths::server_roles(server_id))
    }

    // ── Member ledger ───────────────────────────────────────────────────

    /// Add the user to the server and link the server on their profile.
    /// Joining again is a no-op that keeps existing roles.
    pub async fn join_server(&self, server_id: &str, user_id: &str) -> Result<(), Error> {
        let member_path = paths::server_member(server_id, user_id);
        if self.store.read_once(&member_path).await?.exists() {
            debug!(%server_id, %user_id, "already a member");
            return Ok(());
        }
        let batch = WriteBatch::new()
            .set(member_path, json!(true))
            .set(paths::user_server(user_id, server_id), json!(true));
        self.store.update(batch).await?;
        info!(%server_id, %user_id, "joined server");
        Ok(())
    }

    /// Remove the user's membership and the server link on their profile.
    pub async fn leave_server(&self, server_id: &str, user_id: &str) -> Result<(), Error> {
        let batch = WriteBatch::new()
            .delete(paths::server_member(server_id, user_id))
            .delete(paths::user_server(user_id, server_id));
        self.store.update(batch).await?;
        info!(%server_id, %user_id, "left server");
        Ok(())
    }

    /// The user's membership, or `None` when they are not a member.
    pub async fn membership(
        &self,
        server_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>, Error> {
        let snapshot = self
            .store
            .read_once(&paths::server_member(server_id, user_id))
            .await?;
        if !snapshot.exists() {
            return Ok(None);
        }
        Ok(Some(Membership::from_value(&snapshot.value)))
    }

    /// Every member on the server with their role sets.
    pub async fn members(&self, server_id: &str) -> Result<BTreeMap<String, Membership>, Error> {
        let snapshot = self
            .store
            .read_once(&paths::server_members(server_id))
            .await?;
        Ok(parse_members(&snapshot.value))
    }

    /// Live feed of the server's members subtree.
    pub fn watch_members(&self, server_id: &str) -> Subscription {
        self.store.subscribe(&paths::server_members(server_id))
    }

    /// Grant a role to a member. Idempotent; the user must be a member.
    pub async fn assign_role(
        &self,
        server_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), Error> {
        let Some(membership) = self.membership(server_id, user_id).await? else {
            return Err(Error::not_found("member"));
        };
        if membership.has_role(role_id) {
            debug!(%server_id, %user_id, %role_id, "role already assigned");
            return Ok(());
        }
        // Writing the deep path converts a bare `true` marker into the
        // `{roles: {...}}` shape in the same stroke.
        self.store
            .write(&paths::member_role(server_id, user_id, role_id), json!(true))
            .await?;
        info!(%server_id, %user_id, %role_id, "assigned role");
        Ok(())
    }

    /// Take a role from a member. Removing the last role writes the bare
    /// membership marker back so the member record survives pruning.
    /// Removing a role the user does not hold is a no-op.
    pub async fn remove_role(
        &self,
        server_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), Error> {
        let Some(membership) = self.membership(server_id, user_id).await? else {
            debug!(%server_id, %user_id, "remove_role on non-member");
            return Ok(());
        };
        if !membership.has_role(role_id) {
            debug!(%server_id, %user_id, %role_id, "role not held");
            return Ok(());
        }
        if membership.role_count() == 1 {
            self.store
                .write(&paths::server_member(server_id, user_id), json!(true))
                .await?;
        } else {
            self.store
                .delete(&paths::member_role(server_id, user_id, role_id))
                .await?;
        }
        info!(%server_id, %user_id, %role_id, "removed role");
        Ok(())
    }
}

// ── Parsing and ordering ────────────────────────────────────────────────

/// Compare two roles by seniority: higher position wins, id order (which
/// is creation order) breaks ties. `Greater` means `a` is more senior.
pub fn seniority(a: &Role, b: &Role) -> Ordering {
    a.position
        .cmp(&b.position)
        .then_with(|| b.id.cmp(&a.id))
}

/// Decode a roles subtree into a list sorted most senior first. Malformed
/// records are skipped.
pub fn parse_roles(value: &Value) -> Vec<Role> {
    let mut roles: Vec<Role> = value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(id, record)| {
                    let role = Role::decode(id, record);
                    if role.is_none() {
                        warn!(%id, "skipping malformed role record");
                    }
                    role
                })
                .collect()
        })
        .unwrap_or_default();
    roles.sort_by(|a, b| seniority(b, a));
    roles
}

/// Decode a members subtree. Every present entry decodes to some
/// membership; garbage shapes read as `NoRoles`.
pub fn parse_members(value: &Value) -> BTreeMap<String, Membership> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(user_id, record)| (user_id.clone(), Membership::from_value(record)))
                .collect()
        })
        .unwrap_or_default()
}
