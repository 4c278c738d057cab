use bitflags::bitflags;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::model::{Membership, Role};

bitflags! {
    /// Permission bitfield for roles.
    ///
    /// On the wire a permission set is a map of flag name to `true`
    /// (absent flags are unset); unknown names are ignored so newer
    /// clients can add flags without breaking older ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const ADMIN           = 1 << 0;
        const MANAGE_CHANNELS = 1 << 1;
        const KICK_MEMBERS    = 1 << 2;
        /// Members holding this role are listed under it, separately from
        /// the plain online list.
        const HOIST           = 1 << 3;
        const MENTIONABLE     = 1 << 4;
    }
}

impl Permissions {
    /// Names of the set flags, for messages and logs.
    pub fn names(&self) -> String {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, _) in self.iter_names() {
            map.serialize_entry(name, &true)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Map::deserialize(deserializer)?;
        let mut flags = Permissions::empty();
        for (name, value) in raw {
            if value == serde_json::Value::Bool(true)
                && let Some(flag) = Permissions::from_name(&name)
            {
                flags |= flag;
            }
        }
        Ok(flags)
    }
}

/// OR-union of the permissions of every role the member holds.
///
/// No flag implies another and there is no deny side; role ids with no
/// matching role record (deleted roles) contribute nothing.
pub fn effective_permissions(membership: &Membership, roles: &[Role]) -> Permissions {
    let mut permissions = Permissions::empty();
    for role_id in membership.role_ids() {
        if let Some(role) = roles.iter().find(|r| r.id == role_id) {
            permissions |= role.permissions;
        }
    }
    permissions
}

/// Whether the member's effective permissions contain `needed`.
pub fn has_permission(membership: &Membership, roles: &[Role], needed: Permissions) -> bool {
    effective_permissions(membership, roles).contains(needed)
}

/// Gate an action on a permission. The server owner always passes;
/// non-members and members without `needed` get `Forbidden`.
///
/// This is the caller-side check. The store's own rules remain the
/// authority and their rejections surface as `Forbidden` too.
pub fn require_permission(
    is_owner: bool,
    membership: Option<&Membership>,
    roles: &[Role],
    needed: Permissions,
) -> Result<(), Error> {
    if is_owner {
        return Ok(());
    }
    let Some(membership) = membership else {
        return Err(Error::Forbidden("not a member of this server".into()));
    };
    if has_permission(membership, roles, needed) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "missing permission: {}",
            needed.names()
        )))
    }
}
