use crate::color::Rgb;
use crate::projectile::DrawCommand;
use crate::weapon::{WeaponKind, DEFAULT_WEAPON_DURATION_MS};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

pub const PICKUP_SIZE: f32 = 25.0;
pub const PICKUP_FALL_SPEED: f32 = 1.0;
const PICKUP_PULSE_STEP: f32 = 0.15;
const PICKUP_BASE_GLOW: f32 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponPickup {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub weapon: WeaponKind,
    pub color: Rgb,
    pub speed: f32,
    pub pulse_time: f32,
    pub duration_ms: Option<i64>,
    pub ammo: Option<i32>,
}

/// What a collected pickup hands to `WeaponSystem::set_weapon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeaponGrant {
    pub weapon: WeaponKind,
    pub duration_ms: i64,
    pub ammo: Option<i32>,
}

impl WeaponPickup {
    pub fn new(x: f32, y: f32, weapon: WeaponKind) -> Self {
        let (color, duration_ms, ammo) = match weapon {
            WeaponKind::Laser => (Rgb::from_hex(0xff00ff), Some(8_000), None),
            WeaponKind::Spread => (Rgb::from_hex(0xffaa00), Some(12_000), None),
            WeaponKind::Homing => (Rgb::from_hex(0x00ffff), None, Some(20)),
            WeaponKind::Plasma => (Rgb::from_hex(0x00ff88), None, Some(15)),
            WeaponKind::Basic => (Rgb::WHITE, None, None),
        };

        Self {
            x,
            y,
            width: PICKUP_SIZE,
            height: PICKUP_SIZE,
            weapon,
            color,
            speed: PICKUP_FALL_SPEED,
            pulse_time: 0.0,
            duration_ms,
            ammo,
        }
    }

    pub fn random_weapon<R: Rng>(rng: &mut R) -> WeaponKind {
        WeaponKind::POWER_UPS[rng.random_range(0..WeaponKind::POWER_UPS.len())]
    }

    pub fn update(&mut self) {
        self.y += self.speed;
        self.pulse_time += PICKUP_PULSE_STEP;
    }

    pub fn grant(&self) -> WeaponGrant {
        WeaponGrant {
            weapon: self.weapon,
            duration_ms: self.duration_ms.unwrap_or(DEFAULT_WEAPON_DURATION_MS),
            ammo: self.ammo,
        }
    }

    pub fn overlaps(&self, x: f32, y: f32, half_extent: f32) -> bool {
        (self.x - x).abs() < self.width / 2.0 + half_extent
            && (self.y - y).abs() < self.height / 2.0 + half_extent
    }

    pub fn glow(&self) -> f32 {
        PICKUP_BASE_GLOW * (0.7 + 0.3 * (self.pulse_time * 4.0).sin())
    }

    pub fn render(&self) -> Vec<DrawCommand> {
        let (cx, cy) = (self.x, self.y);
        let size = self.width / 2.0;
        let glow = self.glow();
        let mut commands = Vec::new();

        let stroke = |points: Vec<(f32, f32)>| DrawCommand::Polyline {
            points,
            color: Rgb::WHITE,
            fill: None,
            closed: false,
            glow,
        };

        match self.weapon {
            WeaponKind::Laser => {
                commands.push(DrawCommand::Polyline {
                    points: vec![
                        (cx, cy - size),
                        (cx + size / 2.0, cy - size / 3.0),
                        (cx - size / 3.0, cy - size / 3.0),
                        (cx + size / 3.0, cy + size / 3.0),
                        (cx - size / 2.0, cy + size / 3.0),
                        (cx, cy + size),
                    ],
                    color: Rgb::WHITE,
                    fill: Some(self.color),
                    closed: true,
                    glow,
                });
            }
            WeaponKind::Spread => {
                commands.push(DrawCommand::Arc {
                    x: cx,
                    y: cy,
                    radius: size * 0.8,
                    start_angle: -PI * 0.75,
                    end_angle: -PI * 0.25,
                    color: Rgb::WHITE,
                    glow,
                });
                for ray in 0..5 {
                    let angle = -PI * 0.75 + (ray as f32 * PI * 0.5 / 4.0);
                    commands.push(stroke(vec![
                        (cx, cy),
                        (cx + angle.cos() * size, cy + angle.sin() * size),
                    ]));
                }
            }
            WeaponKind::Homing => {
                for ring in [0.6, 0.3] {
                    commands.push(DrawCommand::Circle {
                        x: cx,
                        y: cy,
                        radius: size * ring,
                        color: Rgb::WHITE,
                        glow,
                        filled: false,
                    });
                }
                commands.push(stroke(vec![(cx - size, cy), (cx + size, cy)]));
                commands.push(stroke(vec![(cx, cy - size), (cx, cy + size)]));
            }
            WeaponKind::Plasma => {
                commands.push(DrawCommand::Circle {
                    x: cx,
                    y: cy,
                    radius: size * 0.8,
                    color: self.color,
                    glow,
                    filled: true,
                });
                commands.push(DrawCommand::Circle {
                    x: cx,
                    y: cy,
                    radius: size * 0.4,
                    color: Rgb::WHITE,
                    glow,
                    filled: true,
                });
            }
            WeaponKind::Basic => {}
        }

        if let Some(ammo) = self.ammo.filter(|ammo| *ammo != 0) {
            commands.push(DrawCommand::Label {
                x: cx,
                y: cy + size + 12.0,
                text: ammo.to_string(),
                color: Rgb::WHITE,
            });
        }

        commands
    }
}
