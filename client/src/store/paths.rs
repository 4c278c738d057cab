//! Path layout of the store tree.
//!
//! Kept identical to the production database so data written here stays
//! readable by existing clients:
//!
//! ```text
//! servers/{server}/roles/{role}      role record
//! servers/{server}/members/{user}    true | {roles: {role: true}}
//! users/{user}                       profile + server links
//! friends/{user}/{other}             true
//! friendRequests/{user}/{other}      pending request record
//! status/{user}                      presence record
//! ```

/// Root of the user profile directory.
pub const USERS_ROOT: &str = "users";

/// Root of the friends adjacency tree.
pub const FRIENDS_ROOT: &str = "friends";

/// Root of the pending friend request tree.
pub const FRIEND_REQUESTS_ROOT: &str = "friendRequests";

/// Root of the presence tree.
pub const STATUS_ROOT: &str = "status";

pub fn server_roles(server_id: &str) -> String {
    format!("servers/{}/roles", server_id)
}

pub fn server_role(server_id: &str, role_id: &str) -> String {
    format!("servers/{}/roles/{}", server_id, role_id)
}

pub fn role_field(server_id: &str, role_id: &str, field: &str) -> String {
    format!("servers/{}/roles/{}/{}", server_id, role_id, field)
}

pub fn server_members(server_id: &str) -> String {
    format!("servers/{}/members", server_id)
}

pub fn server_member(server_id: &str, user_id: &str) -> String {
    format!("servers/{}/members/{}", server_id, user_id)
}

pub fn member_role(server_id: &str, user_id: &str, role_id: &str) -> String {
    format!("servers/{}/members/{}/roles/{}", server_id, user_id, role_id)
}

pub fn user(user_id: &str) -> String {
    format!("users/{}", user_id)
}

pub fn user_server(user_id: &str, server_id: &str) -> String {
    format!("users/{}/servers/{}", user_id, server_id)
}

pub fn friend(user_id: &str, other_id: &str) -> String {
    format!("friends/{}/{}", user_id, other_id)
}

pub fn user_friends(user_id: &str) -> String {
    format!("friends/{}", user_id)
}

pub fn friend_request(user_id: &str, other_id: &str) -> String {
    format!("friendRequests/{}/{}", user_id, other_id)
}

pub fn user_friend_requests(user_id: &str) -> String {
    format!("friendRequests/{}", user_id)
}

pub fn user_status(user_id: &str) -> String {
    format!("status/{}", user_id)
}
