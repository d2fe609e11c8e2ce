//! Sprite availability shared by every projectile renderer.
//!
//! The client owns one [`AssetRegistry`] and hands it to `render` calls. A
//! requested sprite moves from `Pending` to `Loaded` or `Failed` exactly
//! once; any render that happens before `Loaded` uses the shape fallback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpriteKey {
    PlayerRocket,
    EnemyRocket,
}

impl SpriteKey {
    pub const ALL: [SpriteKey; 2] = [SpriteKey::PlayerRocket, SpriteKey::EnemyRocket];

    pub fn path(self) -> &'static str {
        match self {
            SpriteKey::PlayerRocket => "/rocket.png",
            SpriteKey::EnemyRocket => "/enemey_rockets.png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRegistry {
    states: BTreeMap<SpriteKey, AssetState>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the sprite as requested. Returns `true` only for the first
    /// request, which is when the caller should start the actual load.
    pub fn request(&mut self, key: SpriteKey) -> bool {
        if self.states.contains_key(&key) {
            return false;
        }
        self.states.insert(key, AssetState::Pending);
        true
    }

    /// Only a pending sprite transitions; returns whether it did.
    fn settle(&mut self, key: SpriteKey, outcome: AssetState) -> bool {
        match self.states.get_mut(&key) {
            Some(state) if *state == AssetState::Pending => {
                *state = outcome;
                true
            }
            _ => false,
        }
    }

    pub fn mark_loaded(&mut self, key: SpriteKey) {
        if self.settle(key, AssetState::Loaded) {
            info!(sprite = key.path(), "sprite loaded");
        }
    }

    pub fn mark_failed(&mut self, key: SpriteKey) {
        if self.settle(key, AssetState::Failed) {
            warn!(sprite = key.path(), "sprite failed to load, using shape fallback");
        }
    }

    pub fn state(&self, key: SpriteKey) -> Option<AssetState> {
        self.states.get(&key).copied()
    }

    pub fn is_loaded(&self, key: SpriteKey) -> bool {
        self.state(key) == Some(AssetState::Loaded)
    }

    pub fn pending(&self) -> impl Iterator<Item = SpriteKey> + '_ {
        self.states
            .iter()
            .filter(|(_, state)| **state == AssetState::Pending)
            .map(|(key, _)| *key)
    }
}
