//! Mesh configuration.

use campfire_sync::SyncConfig;

/// Configuration for a [`MeshCoordinator`](crate::MeshCoordinator).
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Per-link connection settings.
    pub sync: SyncConfig,
    /// Display name carried in every outgoing chat message.
    pub friendly_name: String,
    /// Events buffered per room before slow subscribers start lagging.
    pub room_channel_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            friendly_name: String::new(),
            room_channel_capacity: 256,
        }
    }
}

impl MeshConfig {
    /// Default settings with a display name.
    pub fn named(friendly_name: impl Into<String>) -> Self {
        Self {
            friendly_name: friendly_name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.room_channel_capacity, 256);
        assert!(config.friendly_name.is_empty());
        assert_eq!(config.sync.max_batch_size, 50);

        let config = MeshConfig::named("fred");
        assert_eq!(config.friendly_name, "fred");
    }
}
