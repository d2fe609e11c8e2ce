pub mod api;
pub mod assets;
pub mod color;
pub mod miniapp;
pub mod pickup;
pub mod projectile;
pub mod session;
pub mod stats;
pub mod weapon;

pub use api::{ApiOutbox, ApiOutcome, ApiPurpose, ApiRequest, HttpMethod};
pub use assets::{AssetRegistry, AssetState, SpriteKey};
pub use color::Rgb;
pub use miniapp::{HostAction, HostActionResult, HostContextReport, MiniApp, MiniAppUser};
pub use pickup::{WeaponGrant, WeaponPickup};
pub use projectile::{DrawCommand, Projectile, ProjectileKind, Side, Target};
pub use session::{
    GamePhase, GameSession, SessionData, SessionOverrides, SessionSnapshot, SessionSubmission,
};
pub use stats::{
    GameStats, PersistedPlayerStats, PlayerStatsStore, StatKey, StatsPatch, StatsSyncBody,
};
pub use weapon::{WeaponEffect, WeaponKind, WeaponSystem};

pub const PLAYFIELD_WIDTH: f32 = 800.0;
pub const PLAYFIELD_HEIGHT: f32 = 600.0;
pub const SHIP_SPEED: f32 = 5.0;
pub const SHIP_HALF_EXTENT: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShipInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

pub fn clamp_axis(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

/// Ship velocity in canvas space (y grows downward), normalized on diagonals.
pub fn ship_velocity(input: ShipInput, speed: f32) -> Velocity {
    let mut dx = 0.0f32;
    let mut dy = 0.0f32;

    if input.up {
        dy -= 1.0;
    }
    if input.down {
        dy += 1.0;
    }
    if input.left {
        dx -= 1.0;
    }
    if input.right {
        dx += 1.0;
    }

    if dx == 0.0 && dy == 0.0 {
        return Velocity { x: 0.0, y: 0.0 };
    }

    let magnitude = (dx * dx + dy * dy).sqrt();
    Velocity {
        x: (dx / magnitude) * speed,
        y: (dy / magnitude) * speed,
    }
}

/// One frame of ship movement, kept inside the playfield.
pub fn ship_step(x: f32, y: f32, input: ShipInput, speed: f32) -> (f32, f32) {
    let velocity = ship_velocity(input, speed);
    (
        clamp_axis(
            x + velocity.x,
            SHIP_HALF_EXTENT,
            PLAYFIELD_WIDTH - SHIP_HALF_EXTENT,
        ),
        clamp_axis(
            y + velocity.y,
            SHIP_HALF_EXTENT,
            PLAYFIELD_HEIGHT - SHIP_HALF_EXTENT,
        ),
    )
}
