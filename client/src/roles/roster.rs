//! Derived member-list views: hoist grouping and name colors.
//!
//! Pure functions over decoded state; the UI feeds them the latest roles,
//! members and statuses snapshots and renders the result as-is.

use std::collections::BTreeMap;

use crate::model::{Membership, PresenceRecord, PresenceState, Role};

use super::permissions::Permissions;
use super::seniority;

/// One hoisted role with the online members displayed under it.
#[derive(Debug, Clone, PartialEq)]
pub struct HoistGroup {
    pub role: Role,
    pub member_ids: Vec<String>,
}

/// The full grouped member list.
///
/// Hoisted groups come first (most senior role first), then the plain
/// online bucket, then everyone offline. Members within a bucket are in
/// user-id order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemberRoster {
    pub groups: Vec<HoistGroup>,
    pub online: Vec<String>,
    pub offline: Vec<String>,
}

/// The member's most senior role, hoisted or not.
pub fn dominant_role<'a>(membership: &Membership, roles: &'a [Role]) -> Option<&'a Role> {
    roles
        .iter()
        .filter(|role| membership.has_role(&role.id))
        .max_by(|a, b| seniority(a, b))
}

/// The member's most senior role carrying the HOIST flag.
pub fn hoisted_role<'a>(membership: &Membership, roles: &'a [Role]) -> Option<&'a Role> {
    roles
        .iter()
        .filter(|role| {
            membership.has_role(&role.id) && role.permissions.contains(Permissions::HOIST)
        })
        .max_by(|a, b| seniority(a, b))
}

/// Display color for the member's name, from their most senior role.
pub fn name_color<'a>(membership: &Membership, roles: &'a [Role]) -> Option<&'a str> {
    dominant_role(membership, roles).map(|role| role.color.as_str())
}

/// Group members for display. A member counts as online when they have a
/// status record in a state other than offline; only online members are
/// hoisted, everyone else lands in the offline bucket.
pub fn build_roster(
    roles: &[Role],
    members: &BTreeMap<String, Membership>,
    statuses: &BTreeMap<String, PresenceRecord>,
) -> MemberRoster {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut online = Vec::new();
    let mut offline = Vec::new();

    for (user_id, membership) in members {
        let is_online = statuses
            .get(user_id)
            .is_some_and(|record| record.state != PresenceState::Offline);
        if !is_online {
            offline.push(user_id.clone());
            continue;
        }
        match hoisted_role(membership, roles) {
            Some(role) => grouped
                .entry(role.id.as_str())
                .or_default()
                .push(user_id.clone()),
            None => online.push(user_id.clone()),
        }
    }

    let mut groups: Vec<HoistGroup> = grouped
        .into_iter()
        .filter_map(|(role_id, member_ids)| {
            roles
                .iter()
                .find(|role| role.id == role_id)
                .map(|role| HoistGroup {
                    role: role.clone(),
                    member_ids,
                })
        })
        .collect();
    groups.sort_by(|a, b| seniority(&b.role, &a.role));

    MemberRoster {
        groups,
        online,
        offline,
    }
}
