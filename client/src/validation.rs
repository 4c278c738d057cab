//! Input validation for user-supplied fields.

/// Maximum role name length.
pub const MAX_ROLE_NAME_LENGTH: usize = 100;

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Validate a role name. Must be non-empty (after trimming) and under the
/// length limit.
pub fn validate_role_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Role name cannot be empty".into());
    }
    if name.len() > MAX_ROLE_NAME_LENGTH {
        return Err(format!(
            "Role name too long (max {} characters)",
            MAX_ROLE_NAME_LENGTH
        ));
    }
    Ok(())
}

/// Validate a role color. Must be `#RGB` or `#RRGGBB` hex.
pub fn validate_color(color: &str) -> Result<(), String> {
    let Some(hex) = color.strip_prefix('#') else {
        return Err("Color must start with #".into());
    };
    if hex.len() != 3 && hex.len() != 6 {
        return Err("Color must be #RGB or #RRGGBB".into());
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("Color can only contain hex digits".into());
    }
    Ok(())
}

/// Validate a username. Must be 1-32 chars, alphanumeric + underscore/hyphen.
pub fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Username cannot be empty".into());
    }
    if name.len() > MAX_USERNAME_LENGTH {
        return Err(format!(
            "Username too long (max {} characters)",
            MAX_USERNAME_LENGTH
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Username can only contain letters, numbers, underscores, and hyphens".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_role_names() {
        assert!(validate_role_name("Moderator").is_ok());
        assert!(validate_role_name("New Role").is_ok());
        assert!(validate_role_name(&"x".repeat(100)).is_ok());
    }

    #[test]
    fn test_invalid_role_names() {
        assert!(validate_role_name("").is_err());
        assert!(validate_role_name("   ").is_err());
        assert!(validate_role_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_valid_colors() {
        assert!(validate_color("#99AAB5").is_ok());
        assert!(validate_color("#fff").is_ok());
        assert!(validate_color("#00FF00").is_ok());
    }

    #[test]
    fn test_invalid_colors() {
        assert!(validate_color("99AAB5").is_err());
        assert!(validate_color("#99AAB").is_err());
        assert!(validate_color("#GGGGGG").is_err());
        assert!(validate_color("#").is_err());
    }

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("void_user-42").is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
    }
}
