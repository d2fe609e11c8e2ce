use crate::color::Rgb;
use crate::projectile::{Projectile, Side, Target};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BASE_FIRE_DELAY_TICKS: u32 = 15;
pub const DEFAULT_WEAPON_DURATION_MS: i64 = 10_000;
pub const MUZZLE_OFFSET_Y: f32 = 20.0;
pub const SPREAD_ANGLES: [f32; 5] = [-0.6, -0.3, 0.0, 0.3, 0.6];
const SPREAD_LATERAL_OFFSET: f32 = 10.0;
const SPREAD_LATERAL_SPEED: f32 = 4.0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    #[default]
    Basic,
    Laser,
    Spread,
    Homing,
    Plasma,
}

impl WeaponKind {
    pub const POWER_UPS: [WeaponKind; 4] = [
        WeaponKind::Laser,
        WeaponKind::Spread,
        WeaponKind::Homing,
        WeaponKind::Plasma,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponProfile {
    pub color: Rgb,
    pub radius: f32,
    pub speed: f32,
    pub fire_delay_multiplier: f64,
}

pub fn weapon_profile(kind: WeaponKind) -> WeaponProfile {
    match kind {
        WeaponKind::Basic => WeaponProfile {
            color: Rgb::from_hex(0x00ff00),
            radius: 7.0,
            speed: 8.0,
            fire_delay_multiplier: 1.0,
        },
        WeaponKind::Laser => WeaponProfile {
            color: Rgb::from_hex(0xff00ff),
            radius: 4.0,
            speed: 12.0,
            fire_delay_multiplier: 0.3,
        },
        WeaponKind::Spread => WeaponProfile {
            color: Rgb::from_hex(0xffaa00),
            radius: 6.0,
            speed: 8.0,
            fire_delay_multiplier: 1.5,
        },
        WeaponKind::Homing => WeaponProfile {
            color: Rgb::from_hex(0x00ffff),
            radius: 8.0,
            speed: 6.0,
            fire_delay_multiplier: 2.0,
        },
        WeaponKind::Plasma => WeaponProfile {
            color: Rgb::from_hex(0x00ff88),
            radius: 14.0,
            speed: 5.0,
            fire_delay_multiplier: 0.8,
        },
    }
}

pub fn weapon_description(kind: WeaponKind) -> &'static str {
    match kind {
        WeaponKind::Basic => "Standard blaster",
        WeaponKind::Laser => "High-speed laser beam",
        WeaponKind::Spread => "Five-way spread shot",
        WeaponKind::Homing => "Auto-targeting missiles",
        WeaponKind::Plasma => "Devastating plasma cannon",
    }
}

pub fn weapon_fire_delay(kind: WeaponKind, base_delay: u32) -> u32 {
    (base_delay as f64 * weapon_profile(kind).fire_delay_multiplier).floor() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponEffect {
    pub kind: WeaponKind,
    pub duration_ms: i64,
    pub is_active: bool,
    pub start_time: i64,
    pub ammo: Option<i32>,
}

impl WeaponEffect {
    fn is_expired(&self, now: i64) -> bool {
        now - self.start_time > self.duration_ms || self.ammo.is_some_and(|ammo| ammo <= 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeaponSystem {
    current: WeaponKind,
    effects: BTreeMap<WeaponKind, WeaponEffect>,
    fire_timer: u32,
    targets: Vec<Target>,
}

impl WeaponSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weapon(&mut self, kind: WeaponKind, duration_ms: i64, ammo: Option<i32>, now: i64) {
        self.effects.insert(
            kind,
            WeaponEffect {
                kind,
                duration_ms,
                is_active: true,
                start_time: now,
                ammo,
            },
        );
        self.current = kind;
    }

    pub fn update_weapon_effects(&mut self, now: i64) {
        for (kind, effect) in self.effects.iter_mut() {
            if effect.is_active && effect.is_expired(now) {
                effect.is_active = false;
                if self.current == *kind {
                    self.current = WeaponKind::Basic;
                }
            }
        }
    }

    pub fn current_weapon(&mut self, now: i64) -> WeaponKind {
        self.update_weapon_effects(now);
        self.current
    }

    pub fn effect(&self, kind: WeaponKind) -> Option<&WeaponEffect> {
        self.effects.get(&kind)
    }

    pub fn update_targets(&mut self, targets: Vec<Target>) {
        self.targets = targets;
    }

    pub fn advance_fire_timer(&mut self) {
        self.fire_timer = self.fire_timer.saturating_add(1);
    }

    pub fn weapon_fire_delay(&self, base_delay: u32) -> u32 {
        weapon_fire_delay(self.current, base_delay)
    }

    pub fn can_fire(&mut self, base_delay: u32) -> bool {
        if self.fire_timer >= self.weapon_fire_delay(base_delay) {
            self.fire_timer = 0;
            return true;
        }
        false
    }

    /// Projectiles spawned this tick, empty while the cadence gate is closed.
    pub fn fire<R: Rng>(
        &mut self,
        x: f32,
        y: f32,
        scale: f32,
        now: i64,
        rng: &mut R,
    ) -> Vec<Projectile> {
        self.update_weapon_effects(now);
        if !self.can_fire(BASE_FIRE_DELAY_TICKS) {
            return Vec::new();
        }

        if let Some(ammo) = self
            .effects
            .get_mut(&self.current)
            .and_then(|effect| effect.ammo.as_mut())
        {
            *ammo -= 1;
        }

        let profile = weapon_profile(self.current);
        let muzzle_y = y - MUZZLE_OFFSET_Y;
        let radius = profile.radius * scale;

        match self.current {
            WeaponKind::Basic | WeaponKind::Laser => vec![Projectile::new(
                x,
                muzzle_y,
                0.0,
                -profile.speed,
                radius,
                profile.color,
                Side::Player,
            )],
            WeaponKind::Spread => SPREAD_ANGLES
                .iter()
                .map(|angle| {
                    Projectile::new(
                        x + angle.sin() * SPREAD_LATERAL_OFFSET,
                        muzzle_y,
                        angle.sin() * SPREAD_LATERAL_SPEED,
                        -profile.speed * angle.cos(),
                        radius,
                        profile.color,
                        Side::Player,
                    )
                })
                .collect(),
            WeaponKind::Homing => {
                if self.targets.is_empty() {
                    return vec![Projectile::new(
                        x,
                        muzzle_y,
                        0.0,
                        -profile.speed,
                        radius,
                        profile.color,
                        Side::Player,
                    )];
                }

                let target = self.targets[rng.random_range(0..self.targets.len())];
                let dx = target.x - x;
                let dy = target.y - y;
                let distance = (dx * dx + dy * dy).sqrt();
                if distance <= 0.0 {
                    return Vec::new();
                }

                vec![Projectile::homing(
                    x,
                    muzzle_y,
                    (dx / distance) * profile.speed,
                    (dy / distance) * profile.speed,
                    radius,
                    profile.color,
                    Side::Player,
                    target,
                )]
            }
            WeaponKind::Plasma => vec![Projectile::plasma(
                x,
                muzzle_y,
                0.0,
                -profile.speed,
                radius,
                profile.color,
                Side::Player,
            )],
        }
    }

    pub fn remaining_ammo(&self, kind: WeaponKind) -> Option<i32> {
        self.effects.get(&kind).and_then(|effect| effect.ammo)
    }

    pub fn remaining_time(&self, kind: WeaponKind, now: i64) -> i64 {
        match self.effects.get(&kind) {
            Some(effect) if effect.is_active => {
                (effect.duration_ms - (now - effect.start_time)).max(0)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projectile::ProjectileKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn primed(system: &mut WeaponSystem) {
        for _ in 0..64 {
            system.advance_fire_timer();
        }
    }

    #[test]
    fn fire_delay_table_floors_scaled_base() {
        assert_eq!(weapon_fire_delay(WeaponKind::Laser, 15), 4);
        assert_eq!(weapon_fire_delay(WeaponKind::Spread, 15), 22);
        assert_eq!(weapon_fire_delay(WeaponKind::Homing, 15), 30);
        assert_eq!(weapon_fire_delay(WeaponKind::Plasma, 15), 12);
        assert_eq!(weapon_fire_delay(WeaponKind::Basic, 15), 15);
    }

    #[test]
    fn can_fire_opens_once_counter_reaches_delay() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Laser, 10_000, None, 0);

        for _ in 0..3 {
            system.advance_fire_timer();
            assert!(!system.can_fire(BASE_FIRE_DELAY_TICKS));
        }
        system.advance_fire_timer();
        assert!(system.can_fire(BASE_FIRE_DELAY_TICKS));
        assert!(!system.can_fire(BASE_FIRE_DELAY_TICKS), "counter resets after firing");
    }

    #[test]
    fn zero_duration_expires_on_next_tick() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Spread, 0, None, 1_000);
        assert_eq!(system.current_weapon(1_000), WeaponKind::Spread);
        assert_eq!(system.current_weapon(1_001), WeaponKind::Basic);
        assert!(!system.effect(WeaponKind::Spread).unwrap().is_active);
    }

    #[test]
    fn duration_boundary_is_exclusive() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Laser, 8_000, None, 0);
        assert_eq!(system.current_weapon(8_000), WeaponKind::Laser);
        assert_eq!(system.remaining_time(WeaponKind::Laser, 6_000), 2_000);
        assert_eq!(system.current_weapon(8_001), WeaponKind::Basic);
        assert_eq!(system.remaining_time(WeaponKind::Laser, 8_001), 0);
    }

    #[test]
    fn zero_ammo_expires_immediately() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Plasma, 10_000, Some(0), 0);
        assert_eq!(system.current_weapon(0), WeaponKind::Basic);
    }

    #[test]
    fn expiring_a_non_current_effect_keeps_current_weapon() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Laser, 100, None, 0);
        system.set_weapon(WeaponKind::Homing, 10_000, Some(5), 0);

        assert_eq!(system.current_weapon(500), WeaponKind::Homing);
        assert!(!system.effect(WeaponKind::Laser).unwrap().is_active);
    }

    #[test]
    fn ammo_is_consumed_per_shot_until_weapon_reverts() {
        let mut system = WeaponSystem::new();
        let mut rng = rng();
        system.set_weapon(WeaponKind::Plasma, 10_000, Some(2), 0);

        primed(&mut system);
        assert_eq!(system.fire(100.0, 500.0, 1.0, 10, &mut rng).len(), 1);
        assert_eq!(system.remaining_ammo(WeaponKind::Plasma), Some(1));

        primed(&mut system);
        let last = system.fire(100.0, 500.0, 1.0, 20, &mut rng);
        assert!(matches!(last[0].kind, ProjectileKind::Plasma { .. }));
        assert_eq!(system.current_weapon(30), WeaponKind::Basic);
    }

    #[test]
    fn spread_emits_five_projectiles_along_fixed_fan() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Spread, 10_000, None, 0);
        primed(&mut system);

        let shots = system.fire(200.0, 400.0, 1.0, 0, &mut rng());
        assert_eq!(shots.len(), 5);
        for (shot, angle) in shots.iter().zip(SPREAD_ANGLES) {
            assert!((shot.vx - angle.sin() * 4.0).abs() < 1e-6);
            assert!((shot.vy + 8.0 * angle.cos()).abs() < 1e-6);
            assert!((shot.x - (200.0 + angle.sin() * 10.0)).abs() < 1e-4);
            assert_eq!(shot.y, 380.0);
            assert_eq!(shot.width, 12.0);
        }
    }

    #[test]
    fn basic_and_laser_use_lookup_table() {
        let mut system = WeaponSystem::new();
        primed(&mut system);
        let basic = system.fire(10.0, 100.0, 2.0, 0, &mut rng());
        assert_eq!(basic[0].vy, -8.0);
        assert_eq!(basic[0].width, 28.0);
        assert_eq!(basic[0].color, Rgb::from_hex(0x00ff00));

        system.set_weapon(WeaponKind::Laser, 10_000, None, 0);
        primed(&mut system);
        let laser = system.fire(10.0, 100.0, 1.0, 0, &mut rng());
        assert_eq!(laser[0].vy, -12.0);
        assert_eq!(laser[0].color, Rgb::from_hex(0xff00ff));
    }

    #[test]
    fn fire_respects_cadence_gate() {
        let mut system = WeaponSystem::new();
        assert!(system.fire(0.0, 0.0, 1.0, 0, &mut rng()).is_empty());
    }

    #[test]
    fn homing_without_targets_fires_straight() {
        let mut system = WeaponSystem::new();
        system.set_weapon(WeaponKind::Homing, 10_000, Some(20), 0);
        primed(&mut system);

        let shots = system.fire(300.0, 500.0, 1.0, 0, &mut rng());
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].kind, ProjectileKind::Standard);
        assert_eq!((shots[0].vx, shots[0].vy), (0.0, -6.0));
    }

    #[test]
    fn homing_locks_onto_one_tracked_target() {
        let mut system = WeaponSystem::new();
        let targets = vec![Target { x: 300.0, y: 100.0 }, Target { x: 100.0, y: 100.0 }];
        system.update_targets(targets.clone());
        system.set_weapon(WeaponKind::Homing, 10_000, Some(20), 0);
        primed(&mut system);

        let shots = system.fire(300.0, 500.0, 1.0, 0, &mut rng());
        assert_eq!(shots.len(), 1);
        match shots[0].kind {
            ProjectileKind::Homing { target, .. } => {
                assert!(targets.contains(&target));
                let speed = (shots[0].vx.powi(2) + shots[0].vy.powi(2)).sqrt();
                assert!((speed - 6.0).abs() < 1e-4);
            }
            other => panic!("expected homing projectile, got {other:?}"),
        }
        assert_eq!(system.remaining_ammo(WeaponKind::Homing), Some(19));
    }

    #[test]
    fn descriptions_cover_every_weapon() {
        assert_eq!(weapon_description(WeaponKind::Basic), "Standard blaster");
        assert_eq!(weapon_description(WeaponKind::Plasma), "Devastating plasma cannon");
    }
}
