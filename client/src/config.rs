use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::model::PresenceState;

/// Top-level client configuration, loaded from voidchat.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub presence: PresenceSection,
    pub social: SocialSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    /// Where the preferred status is remembered between sessions. When
    /// unset, the preference only lives for the process lifetime.
    pub preference_file: Option<PathBuf>,
    /// Status published on connect before any preference has been saved.
    pub default_status: PresenceState,
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            preference_file: None,
            default_status: PresenceState::Online,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocialSection {
    /// Seconds between background friend graph repair passes.
    pub repair_interval_secs: u64,
    /// Run one repair pass as part of signing in.
    pub repair_on_connect: bool,
}

impl Default for SocialSection {
    fn default() -> Self {
        Self {
            repair_interval_secs: 300,
            repair_on_connect: true,
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file. Falls back to defaults if the file
    /// doesn't exist or doesn't parse. Environment variables override
    /// TOML values.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => config,
                    Err(err) => {
                        warn!(%err, path, "failed to parse config file, using defaults");
                        Self::default()
                    }
                },
                Err(err) => {
                    warn!(%err, path, "failed to read config file, using defaults");
                    Self::default()
                }
            }
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VOIDCHAT_PREFERENCE_FILE")
            && !v.is_empty()
        {
            self.presence.preference_file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("VOIDCHAT_DEFAULT_STATUS")
            && let Some(state) = PresenceState::parse(&v)
        {
            self.presence.default_status = state;
        }
        if let Ok(v) = std::env::var("VOIDCHAT_REPAIR_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.social.repair_interval_secs = secs;
        }
        if let Ok(v) = std::env::var("VOIDCHAT_REPAIR_ON_CONNECT")
            && let Ok(flag) = v.parse()
        {
            self.social.repair_on_connect = flag;
        }
    }

    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.social.repair_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.presence.default_status, PresenceState::Online);
        assert!(config.presence.preference_file.is_none());
        assert_eq!(config.repair_interval(), Duration::from_secs(300));
        assert!(config.social.repair_on_connect);
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [presence]
            default_status = "dnd"
            "#,
        )
        .unwrap();
        assert_eq!(config.presence.default_status, PresenceState::Dnd);
        assert_eq!(config.social.repair_interval_secs, 300);
    }

    #[test]
    fn test_full_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            [presence]
            preference_file = "/tmp/voidchat-status"
            default_status = "idle"

            [social]
            repair_interval_secs = 60
            repair_on_connect = false
            "#,
        )
        .unwrap();
        assert_eq!(
            config.presence.preference_file.as_deref(),
            Some(Path::new("/tmp/voidchat-status"))
        );
        assert_eq!(config.presence.default_status, PresenceState::Idle);
        assert_eq!(config.repair_interval(), Duration::from_secs(60));
        assert!(!config.social.repair_on_connect);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ClientConfig::load("/nonexistent/voidchat.toml");
        assert_eq!(config.social.repair_interval_secs, 300);
    }
}
