use crate::assets::{AssetRegistry, SpriteKey};
use crate::color::Rgb;
use serde::{Deserialize, Serialize};

pub const HOMING_TURN_SPEED: f32 = 0.1;
pub const HOMING_CRUISE_SPEED: f32 = 6.0;
pub const PLASMA_PULSE_STEP: f32 = 0.2;

const STANDARD_GLOW: f32 = 5.0;
const HOMING_GLOW: f32 = 8.0;
const PLASMA_BASE_GLOW: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player,
    Enemy,
}

impl Side {
    pub fn sprite(self) -> SpriteKey {
        match self {
            Side::Player => SpriteKey::PlayerRocket,
            Side::Enemy => SpriteKey::EnemyRocket,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectileKind {
    Standard,
    Homing { target: Target, turn_speed: f32 },
    Plasma { pulse_time: f32 },
}

/// Renderer-agnostic draw primitives in canvas space (origin top-left, y down).
/// Positions are shape centers.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Sprite {
        key: SpriteKey,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Rgb,
        glow: f32,
    },
    Circle {
        x: f32,
        y: f32,
        radius: f32,
        color: Rgb,
        glow: f32,
        filled: bool,
    },
    /// `fill` paints the closed shape before the stroke.
    Polyline {
        points: Vec<(f32, f32)>,
        color: Rgb,
        fill: Option<Rgb>,
        closed: bool,
        glow: f32,
    },
    Arc {
        x: f32,
        y: f32,
        radius: f32,
        start_angle: f32,
        end_angle: f32,
        color: Rgb,
        glow: f32,
    },
    Label {
        x: f32,
        y: f32,
        text: String,
        color: Rgb,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub width: f32,
    pub height: f32,
    pub color: Rgb,
    pub side: Side,
    pub kind: ProjectileKind,
}

impl Projectile {
    pub fn new(x: f32, y: f32, vx: f32, vy: f32, radius: f32, color: Rgb, side: Side) -> Self {
        Self {
            x,
            y,
            vx,
            vy,
            width: radius * 2.0,
            height: radius * 2.0,
            color,
            side,
            kind: ProjectileKind::Standard,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn homing(
        x: f32,
        y: f32,
        vx: f32,
        vy: f32,
        radius: f32,
        color: Rgb,
        side: Side,
        target: Target,
    ) -> Self {
        Self {
            kind: ProjectileKind::Homing {
                target,
                turn_speed: HOMING_TURN_SPEED,
            },
            ..Self::new(x, y, vx, vy, radius, color, side)
        }
    }

    pub fn plasma(x: f32, y: f32, vx: f32, vy: f32, radius: f32, color: Rgb, side: Side) -> Self {
        Self {
            kind: ProjectileKind::Plasma { pulse_time: 0.0 },
            ..Self::new(x, y, vx, vy, radius, color, side)
        }
    }

    pub fn update(&mut self) {
        match &mut self.kind {
            ProjectileKind::Standard => self.integrate(),
            ProjectileKind::Homing { target, turn_speed } => {
                let dx = target.x - self.x;
                let dy = target.y - self.y;
                let distance = (dx * dx + dy * dy).sqrt();

                if distance > 0.0 {
                    let ideal_vx = (dx / distance) * HOMING_CRUISE_SPEED;
                    let ideal_vy = (dy / distance) * HOMING_CRUISE_SPEED;
                    self.vx += (ideal_vx - self.vx) * *turn_speed;
                    self.vy += (ideal_vy - self.vy) * *turn_speed;
                }

                self.integrate();
            }
            ProjectileKind::Plasma { pulse_time } => {
                *pulse_time += PLASMA_PULSE_STEP;
                self.integrate();
            }
        }
    }

    fn integrate(&mut self) {
        self.x += self.vx;
        self.y += self.vy;
    }

    pub fn render(&self, assets: &AssetRegistry) -> Vec<DrawCommand> {
        match self.kind {
            ProjectileKind::Standard => self.render_standard(assets),
            ProjectileKind::Homing { .. } => self.render_homing(),
            ProjectileKind::Plasma { pulse_time } => self.render_plasma(pulse_time),
        }
    }

    fn render_standard(&self, assets: &AssetRegistry) -> Vec<DrawCommand> {
        let sprite = self.side.sprite();
        if assets.is_loaded(sprite) {
            return vec![DrawCommand::Sprite {
                key: sprite,
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            }];
        }

        match self.side {
            Side::Player => vec![DrawCommand::Rect {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                color: self.color,
                glow: STANDARD_GLOW,
            }],
            Side::Enemy => vec![DrawCommand::Circle {
                x: self.x,
                y: self.y,
                radius: self.width / 2.0,
                color: self.color,
                glow: STANDARD_GLOW,
                filled: true,
            }],
        }
    }

    fn render_homing(&self) -> Vec<DrawCommand> {
        // flame sits just below the body, 4 wide and 6 tall
        vec![
            DrawCommand::Rect {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                color: self.color,
                glow: HOMING_GLOW,
            },
            DrawCommand::Rect {
                x: self.x,
                y: self.y + self.height / 2.0 + 3.0,
                width: 4.0,
                height: 6.0,
                color: Rgb::THRUSTER,
                glow: HOMING_GLOW,
            },
        ]
    }

    fn render_plasma(&self, pulse_time: f32) -> Vec<DrawCommand> {
        let glow = PLASMA_BASE_GLOW * plasma_glow_intensity(pulse_time);
        vec![
            DrawCommand::Circle {
                x: self.x,
                y: self.y,
                radius: self.width / 2.0,
                color: self.color,
                glow,
                filled: true,
            },
            DrawCommand::Circle {
                x: self.x,
                y: self.y,
                radius: self.width / 4.0,
                color: Rgb::WHITE,
                glow,
                filled: true,
            },
        ]
    }

    pub fn is_off_screen(&self, width: f32, height: f32) -> bool {
        self.x + self.width < 0.0
            || self.x - self.width > width
            || self.y + self.height < 0.0
            || self.y - self.height > height
    }
}

pub fn plasma_glow_intensity(pulse_time: f32) -> f32 {
    0.8 + 0.4 * (pulse_time * 3.0).sin()
}
