use bevy::prelude::*;
use bevy::render::texture::ImagePlugin;
use bevy::window::WindowResolution;
use galaxiga_core::{
    ship_step, ApiOutbox, ApiOutcome, ApiPurpose, ApiRequest, AssetRegistry, AssetState,
    DrawCommand, GamePhase, GameSession, GameStats, HostAction, HostActionResult,
    HostContextReport, MiniApp, MiniAppUser, PersistedPlayerStats, PlayerStatsStore, Projectile,
    Rgb, SessionOverrides, SessionSnapshot, ShipInput, SpriteKey, Target, WeaponKind,
    WeaponPickup, WeaponSystem, PLAYFIELD_HEIGHT, PLAYFIELD_WIDTH, SHIP_HALF_EXTENT, SHIP_SPEED,
};
use galaxiga_core::pickup::PICKUP_SIZE;
use galaxiga_core::weapon::weapon_description;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use wasm_bindgen::prelude::*;

const SHIP_START_Y: f32 = PLAYFIELD_HEIGHT - 60.0;
const SHIP_COLOR: Rgb = Rgb::from_hex(0x00ccff);
const PROJECTILE_Z: f32 = 5.0;
const PICKUP_SPAWN_INTERVAL_FRAMES: u64 = 900;
const MAX_OUTBOUND_HOST_ACTIONS: usize = 64;
const GLOW_ALPHA: f32 = 0.35;
const GLOW_SPREAD: f32 = 0.25;
const ARC_SEGMENTS: usize = 16;
const FILL_STEP: f32 = 1.0;

static HOST_COMMANDS: Lazy<Mutex<Vec<HostCommand>>> = Lazy::new(|| Mutex::new(Vec::new()));
static OUTBOUND_API_REQUESTS: Lazy<Mutex<Vec<ApiRequest>>> = Lazy::new(|| Mutex::new(Vec::new()));
static OUTBOUND_HOST_ACTIONS: Lazy<Mutex<Vec<HostAction>>> = Lazy::new(|| Mutex::new(Vec::new()));
static LATEST_HUD: Lazy<Mutex<String>> = Lazy::new(|| Mutex::new("null".to_string()));
static LATEST_PLAYER_STATS: Lazy<Mutex<String>> = Lazy::new(|| Mutex::new("null".to_string()));
static STARTED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Everything the host page can ask of the running game. Applied at the
/// start of each frame so the ECS owns all game state.
#[derive(Debug, Clone)]
enum HostCommand {
    StartGame,
    PauseGame,
    ResumeGame,
    EndGame(SessionOverrides),
    RestartGame,
    SetScore(i64),
    SetLives(i32),
    SetLevel(i32),
    EnemyKilled { points: i64 },
    BulletHit,
    EnemyTargets(Vec<Target>),
    MiniAppContext(HostContextReport),
    MiniAppResult(HostActionResult),
    ShareScore { origin: String },
    SignIn,
    AddToApp,
    NotifyReady,
    ApiResolved { id: u64, outcome: ApiOutcome },
    HydrateStats(PersistedPlayerStats),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HudLabel {
    x: f32,
    y: f32,
    text: String,
    color: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HudSnapshot {
    phase: GamePhase,
    score: i64,
    lives: i32,
    level: i32,
    is_saving: bool,
    weapon: WeaponKind,
    weapon_description: &'static str,
    weapon_ammo: Option<i32>,
    weapon_time_left_ms: i64,
    session: SessionSnapshot,
    stats: GameStats,
    user: Option<MiniAppUser>,
    sprites: BTreeMap<SpriteKey, AssetState>,
    labels: Vec<HudLabel>,
}

#[derive(Component, Debug, Clone, Copy)]
struct PlayerShip {
    x: f32,
    y: f32,
}

impl Default for PlayerShip {
    fn default() -> Self {
        Self {
            x: PLAYFIELD_WIDTH / 2.0,
            y: SHIP_START_Y,
        }
    }
}

#[derive(Component)]
struct ProjectileActor(Projectile);

#[derive(Component)]
struct PickupActor(WeaponPickup);

#[derive(Resource, Default)]
struct Session(GameSession);

#[derive(Resource, Default)]
struct PlayerStats(PlayerStatsStore);

#[derive(Resource, Default)]
struct Outbox(ApiOutbox);

#[derive(Resource, Default)]
struct MiniAppState(MiniApp);

#[derive(Resource, Default)]
struct Weapons(WeaponSystem);

#[derive(Resource, Default)]
struct Sprites(AssetRegistry);

#[derive(Resource, Default)]
struct SpriteHandles(BTreeMap<SpriteKey, Handle<Image>>);

#[derive(Resource)]
struct GameRng(StdRng);

#[derive(Resource, Default)]
struct PickupSpawnClock(u64);

#[derive(Resource, Default)]
struct HudLabels(Vec<HudLabel>);

fn now_ms() -> i64 {
    js_sys::Date::now() as i64
}

fn clear_protocol_queues() {
    if let Ok(mut queue) = HOST_COMMANDS.lock() {
        queue.clear();
    }
    if let Ok(mut queue) = OUTBOUND_API_REQUESTS.lock() {
        queue.clear();
    }
    if let Ok(mut queue) = OUTBOUND_HOST_ACTIONS.lock() {
        queue.clear();
    }
}

fn queue_host_command(command: HostCommand) {
    if let Ok(mut queue) = HOST_COMMANDS.lock() {
        queue.push(command);
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T, JsValue> {
    serde_json::from_str::<T>(json)
        .map_err(|error| JsValue::from_str(&format!("invalid {what} payload: {error}")))
}

#[wasm_bindgen]
pub fn boot_game(canvas_id: String) -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    clear_protocol_queues();

    let mut started = STARTED
        .lock()
        .map_err(|_| JsValue::from_str("mutex poisoned"))?;
    if *started {
        return Ok(());
    }
    *started = true;
    drop(started);

    let primary_window = Window {
        canvas: Some(format!("#{canvas_id}")),
        fit_canvas_to_parent: true,
        prevent_default_event_handling: false,
        resolution: WindowResolution::new(PLAYFIELD_WIDTH, PLAYFIELD_HEIGHT),
        ..default()
    };

    let seed = getrandom::u64().unwrap_or_else(|_| now_ms() as u64);

    let mut app = App::new();
    app.insert_resource(ClearColor(Color::srgb_u8(0, 0, 16)))
        .insert_resource(Session::default())
        .insert_resource(PlayerStats::default())
        .insert_resource(Outbox::default())
        .insert_resource(MiniAppState::default())
        .insert_resource(Weapons::default())
        .insert_resource(Sprites::default())
        .insert_resource(SpriteHandles::default())
        .insert_resource(GameRng(StdRng::seed_from_u64(seed)))
        .insert_resource(PickupSpawnClock::default())
        .insert_resource(HudLabels::default())
        .add_plugins(
            DefaultPlugins
                .set(AssetPlugin {
                    file_path: "/".to_string(),
                    ..default()
                })
                .set(WindowPlugin {
                    primary_window: Some(primary_window),
                    ..default()
                })
                .set(ImagePlugin::default_nearest()),
        )
        .add_systems(Startup, setup_world)
        .add_systems(
            Update,
            (
                apply_host_commands,
                track_sprite_loads,
                (
                    steer_ship,
                    fire_weapon,
                    spawn_pickups,
                    advance_entities,
                    collect_pickups,
                )
                    .chain()
                    .run_if(session_is_playing),
                draw_entities,
                publish_outboxes,
            )
                .chain(),
        );

    app.run();
    Ok(())
}

#[wasm_bindgen]
pub fn start_game() {
    queue_host_command(HostCommand::StartGame);
}

#[wasm_bindgen]
pub fn pause_game() {
    queue_host_command(HostCommand::PauseGame);
}

#[wasm_bindgen]
pub fn resume_game() {
    queue_host_command(HostCommand::ResumeGame);
}

/// An empty string ends the game with the tracked session data as is.
#[wasm_bindgen]
pub fn end_game(overrides_json: String) -> Result<(), JsValue> {
    let overrides = if overrides_json.trim().is_empty() {
        SessionOverrides::default()
    } else {
        parse_json::<SessionOverrides>(&overrides_json, "session overrides")?
    };
    queue_host_command(HostCommand::EndGame(overrides));
    Ok(())
}

#[wasm_bindgen]
pub fn restart_game() {
    queue_host_command(HostCommand::RestartGame);
}

#[wasm_bindgen]
pub fn set_score(score: i64) {
    queue_host_command(HostCommand::SetScore(score));
}

#[wasm_bindgen]
pub fn set_lives(lives: i32) {
    queue_host_command(HostCommand::SetLives(lives));
}

#[wasm_bindgen]
pub fn set_level(level: i32) {
    queue_host_command(HostCommand::SetLevel(level));
}

#[wasm_bindgen]
pub fn record_enemy_killed(points: i64) {
    queue_host_command(HostCommand::EnemyKilled { points });
}

#[wasm_bindgen]
pub fn record_bullet_hit() {
    queue_host_command(HostCommand::BulletHit);
}

/// Enemy positions in canvas space, used by homing shots.
#[wasm_bindgen]
pub fn update_enemy_targets(targets_json: String) -> Result<(), JsValue> {
    let targets = parse_json::<Vec<Target>>(&targets_json, "enemy targets")?;
    queue_host_command(HostCommand::EnemyTargets(targets));
    Ok(())
}

#[wasm_bindgen]
pub fn apply_miniapp_context(report_json: String) -> Result<(), JsValue> {
    let report = parse_json::<HostContextReport>(&report_json, "mini-app context")?;
    queue_host_command(HostCommand::MiniAppContext(report));
    Ok(())
}

#[wasm_bindgen]
pub fn resolve_miniapp_action(result_json: String) -> Result<(), JsValue> {
    let result = parse_json::<HostActionResult>(&result_json, "mini-app action result")?;
    queue_host_command(HostCommand::MiniAppResult(result));
    Ok(())
}

#[wasm_bindgen]
pub fn share_score(origin: String) {
    queue_host_command(HostCommand::ShareScore { origin });
}

#[wasm_bindgen]
pub fn sign_in() {
    queue_host_command(HostCommand::SignIn);
}

#[wasm_bindgen]
pub fn add_to_app() {
    queue_host_command(HostCommand::AddToApp);
}

#[wasm_bindgen]
pub fn notify_ready() {
    queue_host_command(HostCommand::NotifyReady);
}

/// Status 0 reports a transport failure; `body` then carries the message.
#[wasm_bindgen]
pub fn resolve_api_request(id: u64, status: u16, body: String) {
    let outcome = if status == 0 {
        ApiOutcome::transport_error(body)
    } else {
        ApiOutcome::new(status, body)
    };
    queue_host_command(HostCommand::ApiResolved { id, outcome });
}

#[wasm_bindgen]
pub fn hydrate_player_stats(record_json: String) -> Result<(), JsValue> {
    let record = parse_json::<PersistedPlayerStats>(&record_json, "player stats")?;
    queue_host_command(HostCommand::HydrateStats(record));
    Ok(())
}

#[wasm_bindgen]
pub fn drain_api_requests() -> String {
    let mut queue = match OUTBOUND_API_REQUESTS.lock() {
        Ok(queue) => queue,
        Err(_) => return "[]".to_string(),
    };

    if queue.is_empty() {
        return "[]".to_string();
    }

    let drained: Vec<ApiRequest> = queue.drain(..).collect();
    serde_json::to_string(&drained).unwrap_or_else(|_| "[]".to_string())
}

#[wasm_bindgen]
pub fn drain_host_actions() -> String {
    let mut queue = match OUTBOUND_HOST_ACTIONS.lock() {
        Ok(queue) => queue,
        Err(_) => return "[]".to_string(),
    };

    if queue.is_empty() {
        return "[]".to_string();
    }

    let drained: Vec<HostAction> = queue.drain(..).collect();
    serde_json::to_string(&drained).unwrap_or_else(|_| "[]".to_string())
}

/// The record the host keeps in local storage under `player-stats-storage`.
#[wasm_bindgen]
pub fn export_player_stats() -> String {
    match LATEST_PLAYER_STATS.lock() {
        Ok(latest) => latest.clone(),
        Err(_) => "null".to_string(),
    }
}

#[wasm_bindgen]
pub fn hud_snapshot() -> String {
    match LATEST_HUD.lock() {
        Ok(latest) => latest.clone(),
        Err(_) => "null".to_string(),
    }
}

fn setup_world(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    mut sprites: ResMut<Sprites>,
    mut handles: ResMut<SpriteHandles>,
    mut miniapp: ResMut<MiniAppState>,
) {
    commands.spawn(Camera2dBundle::default());
    commands.spawn(PlayerShip::default());

    for key in SpriteKey::ALL {
        if sprites.0.request(key) {
            let handle: Handle<Image> = asset_server.load(key.path().trim_start_matches('/'));
            handles.0.insert(key, handle);
        }
    }

    miniapp.0.initialize();
    miniapp.0.notify_ready();
    info!("galaxiga client booted");
}

fn take_host_commands() -> Vec<HostCommand> {
    match HOST_COMMANDS.lock() {
        Ok(mut queue) => std::mem::take(&mut *queue),
        Err(_) => Vec::new(),
    }
}

/// Identity is copied into the stats store and the server copy is fetched.
fn adopt_user(user: &MiniAppUser, stats: &mut PlayerStatsStore, outbox: &mut ApiOutbox) {
    let display_name = user
        .display_name
        .clone()
        .or_else(|| user.username.clone())
        .unwrap_or_default();
    stats.set_user_data(
        user.fid,
        display_name,
        user.pfp_url.clone().unwrap_or_default(),
    );
    stats.load_player_stats(user.fid, outbox);
}

#[allow(clippy::too_many_arguments)]
fn apply_host_commands(
    mut commands: Commands,
    mut session: ResMut<Session>,
    mut stats: ResMut<PlayerStats>,
    mut outbox: ResMut<Outbox>,
    mut miniapp: ResMut<MiniAppState>,
    mut weapons: ResMut<Weapons>,
    mut rng: ResMut<GameRng>,
    mut ships: Query<&mut PlayerShip>,
    field_entities: Query<Entity, Or<(With<ProjectileActor>, With<PickupActor>)>>,
) {
    let pending = take_host_commands();
    if pending.is_empty() {
        return;
    }

    let session = &mut session.0;
    let stats = &mut stats.0;
    let outbox = &mut outbox.0;
    let miniapp = &mut miniapp.0;

    for command in pending {
        match command {
            HostCommand::StartGame => {
                session.start_game(now_ms());
                weapons.0 = WeaponSystem::new();
            }
            HostCommand::PauseGame => session.pause_game(),
            HostCommand::ResumeGame => session.resume_game(),
            HostCommand::EndGame(overrides) => {
                let submission = session.end_game(overrides, now_ms(), outbox);
                info!(score = submission.score, level = submission.level, "game over");
            }
            HostCommand::RestartGame => {
                session.restart_game();
                weapons.0 = WeaponSystem::new();
                for entity in &field_entities {
                    commands.entity(entity).despawn();
                }
                for mut ship in &mut ships {
                    *ship = PlayerShip::default();
                }
            }
            HostCommand::SetScore(score) => session.set_score(score),
            HostCommand::SetLives(lives) => session.set_lives(lives),
            HostCommand::SetLevel(level) => session.set_level(level),
            HostCommand::EnemyKilled { points } => {
                session.set_score(session.score() + points);
                session.increment_enemies_killed();
            }
            HostCommand::BulletHit => session.increment_bullet_stats(false, true),
            HostCommand::EnemyTargets(targets) => weapons.0.update_targets(targets),
            HostCommand::MiniAppContext(report) => {
                let user = miniapp.apply_context(&report).clone();
                adopt_user(&user, stats, outbox);
            }
            HostCommand::MiniAppResult(result) => {
                if let Some(user) = miniapp.resolve_action(result, stats, outbox) {
                    adopt_user(&user, stats, outbox);
                }
            }
            HostCommand::ShareScore { origin } => miniapp.share_score(session.score(), origin),
            HostCommand::SignIn => miniapp.sign_in(&mut rng.0),
            HostCommand::AddToApp => miniapp.add_to_app(),
            HostCommand::NotifyReady => miniapp.notify_ready(),
            HostCommand::ApiResolved { id, outcome } => match outbox.resolve(id) {
                Some(ApiPurpose::SaveSession) => session.resolve_submission(&outcome, stats, outbox),
                Some(ApiPurpose::SyncStats) => stats.on_sync_resolved(&outcome, outbox, now_ms()),
                Some(ApiPurpose::LoadStats { fid }) => {
                    stats.on_load_resolved(fid, &outcome, now_ms())
                }
                None => warn!(id, "resolved an api request that is not pending"),
            },
            HostCommand::HydrateStats(record) => stats.hydrate(record),
        }
    }
}

fn track_sprite_loads(
    asset_server: Res<AssetServer>,
    handles: Res<SpriteHandles>,
    mut sprites: ResMut<Sprites>,
) {
    let pending: Vec<SpriteKey> = sprites.0.pending().collect();
    for key in pending {
        let Some(handle) = handles.0.get(&key) else {
            continue;
        };
        match asset_server.get_load_state(handle.id()) {
            Some(bevy::asset::LoadState::Loaded) => sprites.0.mark_loaded(key),
            Some(bevy::asset::LoadState::Failed(_)) => sprites.0.mark_failed(key),
            _ => {}
        }
    }
}

fn session_is_playing(session: Res<Session>) -> bool {
    session.0.phase() == GamePhase::Playing
}

fn sample_ship_input(input: &ButtonInput<KeyCode>) -> ShipInput {
    ShipInput {
        up: input.pressed(KeyCode::KeyW) || input.pressed(KeyCode::ArrowUp),
        down: input.pressed(KeyCode::KeyS) || input.pressed(KeyCode::ArrowDown),
        left: input.pressed(KeyCode::KeyA) || input.pressed(KeyCode::ArrowLeft),
        right: input.pressed(KeyCode::KeyD) || input.pressed(KeyCode::ArrowRight),
    }
}

fn steer_ship(keys: Res<ButtonInput<KeyCode>>, mut ships: Query<&mut PlayerShip>) {
    let input = sample_ship_input(&keys);
    for mut ship in &mut ships {
        let (x, y) = ship_step(ship.x, ship.y, input, SHIP_SPEED);
        ship.x = x;
        ship.y = y;
    }
}

fn spawn_projectile(commands: &mut Commands, handles: &SpriteHandles, projectile: Projectile) {
    let texture = handles
        .0
        .get(&projectile.side.sprite())
        .cloned()
        .unwrap_or_default();
    let world = canvas_to_world(projectile.x, projectile.y);
    commands.spawn((
        SpriteBundle {
            texture,
            transform: Transform::from_xyz(world.x, world.y, PROJECTILE_Z),
            visibility: Visibility::Hidden,
            ..default()
        },
        ProjectileActor(projectile),
    ));
}

fn fire_weapon(
    mut commands: Commands,
    keys: Res<ButtonInput<KeyCode>>,
    handles: Res<SpriteHandles>,
    mut weapons: ResMut<Weapons>,
    mut session: ResMut<Session>,
    mut rng: ResMut<GameRng>,
    ships: Query<&PlayerShip>,
) {
    weapons.0.advance_fire_timer();
    if !keys.pressed(KeyCode::Space) {
        return;
    }
    let Ok(ship) = ships.get_single() else {
        return;
    };

    let volley = weapons.0.fire(ship.x, ship.y, 1.0, now_ms(), &mut rng.0);
    record_volley(&mut session.0, &volley);
    for projectile in volley {
        spawn_projectile(&mut commands, &handles, projectile);
    }
}

/// Every projectile counts as a shot; hits are reported per projectile.
fn record_volley(session: &mut GameSession, volley: &[Projectile]) {
    for _ in volley {
        session.increment_bullet_stats(true, false);
    }
}

fn spawn_pickups(
    mut commands: Commands,
    mut clock: ResMut<PickupSpawnClock>,
    mut rng: ResMut<GameRng>,
) {
    clock.0 += 1;
    if clock.0 % PICKUP_SPAWN_INTERVAL_FRAMES != 0 {
        return;
    }

    let x = rng.0.random_range(PICKUP_SIZE..PLAYFIELD_WIDTH - PICKUP_SIZE);
    let weapon = WeaponPickup::random_weapon(&mut rng.0);
    commands.spawn(PickupActor(WeaponPickup::new(x, -PICKUP_SIZE, weapon)));
}

fn advance_entities(
    mut commands: Commands,
    mut projectiles: Query<(Entity, &mut ProjectileActor)>,
    mut pickups: Query<(Entity, &mut PickupActor)>,
) {
    for (entity, mut actor) in &mut projectiles {
        actor.0.update();
        if actor.0.is_off_screen(PLAYFIELD_WIDTH, PLAYFIELD_HEIGHT) {
            commands.entity(entity).despawn();
        }
    }

    for (entity, mut actor) in &mut pickups {
        actor.0.update();
        if actor.0.y - actor.0.height > PLAYFIELD_HEIGHT {
            commands.entity(entity).despawn();
        }
    }
}

fn collect_pickups(
    mut commands: Commands,
    mut weapons: ResMut<Weapons>,
    mut session: ResMut<Session>,
    ships: Query<&PlayerShip>,
    pickups: Query<(Entity, &PickupActor)>,
) {
    let Ok(ship) = ships.get_single() else {
        return;
    };

    for (entity, actor) in &pickups {
        if !actor.0.overlaps(ship.x, ship.y, SHIP_HALF_EXTENT) {
            continue;
        }
        let grant = actor.0.grant();
        weapons
            .0
            .set_weapon(grant.weapon, grant.duration_ms, grant.ammo, now_ms());
        session.0.increment_power_ups_collected();
        info!(weapon = ?grant.weapon, "weapon pickup collected");
        commands.entity(entity).despawn();
    }
}

/// Canvas space has its origin top-left with y down; the camera looks at
/// the playfield center with y up.
fn canvas_to_world(x: f32, y: f32) -> Vec2 {
    Vec2::new(x - PLAYFIELD_WIDTH / 2.0, PLAYFIELD_HEIGHT / 2.0 - y)
}

fn rgb_color(color: Rgb, alpha: f32) -> Color {
    Color::srgba_u8(color.r, color.g, color.b, (alpha.clamp(0.0, 1.0) * 255.0) as u8)
}

fn rect_outline(x: f32, y: f32, width: f32, height: f32) -> [Vec2; 5] {
    let (hw, hh) = (width / 2.0, height / 2.0);
    [
        canvas_to_world(x - hw, y - hh),
        canvas_to_world(x + hw, y - hh),
        canvas_to_world(x + hw, y + hh),
        canvas_to_world(x - hw, y + hh),
        canvas_to_world(x - hw, y - hh),
    ]
}

/// Angles follow the canvas convention, so positive sweeps run clockwise on
/// screen.
fn arc_points(x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32) -> Vec<Vec2> {
    (0..=ARC_SEGMENTS)
        .map(|step| {
            let t = step as f32 / ARC_SEGMENTS as f32;
            let angle = start_angle + (end_angle - start_angle) * t;
            canvas_to_world(x + angle.cos() * radius, y + angle.sin() * radius)
        })
        .collect()
}

fn centroid(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }
    points.iter().copied().sum::<Vec2>() / points.len() as f32
}

/// Spokes from the centroid to samples along every edge of the closed shape.
fn fan_fill_lines(points: &[Vec2]) -> Vec<(Vec2, Vec2)> {
    let center = centroid(points);
    let mut lines = Vec::new();
    for (index, from) in points.iter().enumerate() {
        let to = points[(index + 1) % points.len()];
        let steps = (from.distance(to) / FILL_STEP).ceil().max(1.0) as usize;
        for step in 0..steps {
            lines.push((center, from.lerp(to, step as f32 / steps as f32)));
        }
    }
    lines
}

fn inflate(points: &[Vec2], amount: f32) -> Vec<Vec2> {
    let center = centroid(points);
    points
        .iter()
        .map(|point| *point + (*point - center).normalize_or_zero() * amount)
        .collect()
}

fn ship_outline(ship: &PlayerShip) -> Vec<Vec2> {
    let extent = SHIP_HALF_EXTENT;
    vec![
        canvas_to_world(ship.x, ship.y - extent),
        canvas_to_world(ship.x + extent, ship.y + extent),
        canvas_to_world(ship.x, ship.y + extent / 2.0),
        canvas_to_world(ship.x - extent, ship.y + extent),
        canvas_to_world(ship.x, ship.y - extent),
    ]
}

fn draw_command(gizmos: &mut Gizmos, labels: &mut Vec<HudLabel>, command: &DrawCommand) {
    match command {
        DrawCommand::Sprite { .. } => {}
        DrawCommand::Rect {
            x,
            y,
            width,
            height,
            color,
            glow,
        } => {
            let solid = rgb_color(*color, 1.0);
            let mut row = y - height / 2.0;
            while row <= y + height / 2.0 {
                gizmos.line_2d(
                    canvas_to_world(x - width / 2.0, row),
                    canvas_to_world(x + width / 2.0, row),
                    solid,
                );
                row += FILL_STEP;
            }
            if *glow > 0.0 {
                let spread = glow * GLOW_SPREAD;
                gizmos.linestrip_2d(
                    rect_outline(*x, *y, width + spread, height + spread),
                    rgb_color(*color, GLOW_ALPHA),
                );
            }
        }
        DrawCommand::Circle {
            x,
            y,
            radius,
            color,
            glow,
            filled,
        } => {
            let center = canvas_to_world(*x, *y);
            let solid = rgb_color(*color, 1.0);
            gizmos.circle_2d(center, *radius, solid);
            if *filled {
                let mut ring = radius - FILL_STEP;
                while ring > 0.0 {
                    gizmos.circle_2d(center, ring, solid);
                    ring -= FILL_STEP;
                }
            }
            if *glow > 0.0 {
                gizmos.circle_2d(center, radius + glow * GLOW_SPREAD, rgb_color(*color, GLOW_ALPHA));
            }
        }
        DrawCommand::Polyline {
            points,
            color,
            fill,
            closed,
            glow,
        } => {
            let mut world: Vec<Vec2> = points.iter().map(|(x, y)| canvas_to_world(*x, *y)).collect();
            if let Some(fill) = fill {
                let fill = rgb_color(*fill, 1.0);
                for (from, to) in fan_fill_lines(&world) {
                    gizmos.line_2d(from, to, fill);
                }
            }
            if *closed {
                if let Some(first) = world.first().copied() {
                    world.push(first);
                }
            }
            if *glow > 0.0 {
                let halo_color = rgb_color(fill.unwrap_or(*color), GLOW_ALPHA);
                gizmos.linestrip_2d(inflate(&world, glow * GLOW_SPREAD), halo_color);
            }
            gizmos.linestrip_2d(world, rgb_color(*color, 1.0));
        }
        DrawCommand::Arc {
            x,
            y,
            radius,
            start_angle,
            end_angle,
            color,
            glow,
        } => {
            if *glow > 0.0 {
                gizmos.linestrip_2d(
                    arc_points(*x, *y, radius + glow * GLOW_SPREAD, *start_angle, *end_angle),
                    rgb_color(*color, GLOW_ALPHA),
                );
            }
            gizmos.linestrip_2d(
                arc_points(*x, *y, *radius, *start_angle, *end_angle),
                rgb_color(*color, 1.0),
            );
        }
        DrawCommand::Label { x, y, text, color } => labels.push(HudLabel {
            x: *x,
            y: *y,
            text: text.clone(),
            color: color.to_css(),
        }),
    }
}

fn draw_entities(
    mut gizmos: Gizmos,
    sprites: Res<Sprites>,
    mut labels: ResMut<HudLabels>,
    mut projectiles: Query<(&ProjectileActor, &mut Transform, &mut Sprite, &mut Visibility)>,
    pickups: Query<&PickupActor>,
    ships: Query<&PlayerShip>,
) {
    labels.0.clear();

    for ship in &ships {
        gizmos.linestrip_2d(ship_outline(ship), rgb_color(SHIP_COLOR, 1.0));
    }

    for (actor, mut transform, mut sprite, mut visibility) in &mut projectiles {
        let mut shows_sprite = false;
        for command in actor.0.render(&sprites.0) {
            if let DrawCommand::Sprite {
                x,
                y,
                width,
                height,
                ..
            } = command
            {
                let world = canvas_to_world(x, y);
                transform.translation.x = world.x;
                transform.translation.y = world.y;
                sprite.custom_size = Some(Vec2::new(width, height));
                shows_sprite = true;
            } else {
                draw_command(&mut gizmos, &mut labels.0, &command);
            }
        }
        *visibility = if shows_sprite {
            Visibility::Visible
        } else {
            Visibility::Hidden
        };
    }

    for actor in &pickups {
        for command in actor.0.render() {
            draw_command(&mut gizmos, &mut labels.0, &command);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn publish_outboxes(
    session: Res<Session>,
    stats: Res<PlayerStats>,
    mut outbox: ResMut<Outbox>,
    mut miniapp: ResMut<MiniAppState>,
    mut weapons: ResMut<Weapons>,
    sprites: Res<Sprites>,
    labels: Res<HudLabels>,
    mut last_persisted: Local<Option<PersistedPlayerStats>>,
) {
    let requests = outbox.0.drain();
    if !requests.is_empty() {
        if let Ok(mut queue) = OUTBOUND_API_REQUESTS.lock() {
            queue.extend(requests);
        }
    }

    let actions = miniapp.0.drain_actions();
    if !actions.is_empty() {
        if let Ok(mut queue) = OUTBOUND_HOST_ACTIONS.lock() {
            queue.extend(actions);
            if queue.len() > MAX_OUTBOUND_HOST_ACTIONS {
                let overflow = queue.len() - MAX_OUTBOUND_HOST_ACTIONS;
                queue.drain(0..overflow);
            }
        }
    }

    let persisted = stats.0.persisted();
    if last_persisted.as_ref() != Some(&persisted) {
        if let (Ok(json), Ok(mut latest)) = (
            serde_json::to_string(&persisted),
            LATEST_PLAYER_STATS.lock(),
        ) {
            *latest = json;
        }
        *last_persisted = Some(persisted);
    }

    let now = now_ms();
    let weapon = weapons.0.current_weapon(now);
    let snapshot = HudSnapshot {
        phase: session.0.phase(),
        score: session.0.score(),
        lives: session.0.lives(),
        level: session.0.level(),
        is_saving: session.0.is_saving(),
        weapon,
        weapon_description: weapon_description(weapon),
        weapon_ammo: weapons.0.remaining_ammo(weapon),
        weapon_time_left_ms: weapons.0.remaining_time(weapon, now),
        session: session.0.session_stats(now),
        stats: *stats.0.stats(),
        user: miniapp.0.user().cloned(),
        sprites: SpriteKey::ALL
            .into_iter()
            .filter_map(|key| sprites.0.state(key).map(|state| (key, state)))
            .collect(),
        labels: labels.0.clone(),
    };
    if let (Ok(json), Ok(mut latest)) = (serde_json::to_string(&snapshot), LATEST_HUD.lock()) {
        *latest = json;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Vec2, expected: Vec2) {
        assert!(
            (actual - expected).length() < 1e-3,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn canvas_corners_map_to_world_edges() {
        assert_close(canvas_to_world(0.0, 0.0), Vec2::new(-400.0, 300.0));
        assert_close(
            canvas_to_world(PLAYFIELD_WIDTH, PLAYFIELD_HEIGHT),
            Vec2::new(400.0, -300.0),
        );
        assert_close(canvas_to_world(400.0, 300.0), Vec2::ZERO);
    }

    #[test]
    fn rect_outline_is_closed_around_center() {
        let outline = rect_outline(400.0, 300.0, 10.0, 20.0);
        assert_eq!(outline[0], outline[4]);
        assert_close(outline[0], Vec2::new(-5.0, 10.0));
        assert_close(outline[2], Vec2::new(5.0, -10.0));
    }

    #[test]
    fn arc_points_follow_canvas_angles() {
        let points = arc_points(400.0, 300.0, 10.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert_eq!(points.len(), ARC_SEGMENTS + 1);
        assert_close(points[0], Vec2::new(10.0, 0.0));
        // a quarter turn in canvas space ends below the center on screen
        assert_close(points[ARC_SEGMENTS], Vec2::new(0.0, -10.0));
    }

    #[test]
    fn rgb_color_clamps_alpha() {
        let color = rgb_color(Rgb::from_hex(0xff0000), 2.0).to_srgba();
        assert!((color.red - 1.0).abs() < 1e-3);
        assert!((color.alpha - 1.0).abs() < 1e-3);
    }

    #[test]
    fn spread_volley_counts_each_projectile_as_a_shot() {
        let mut weapons = WeaponSystem::new();
        let mut session = GameSession::new();
        let mut rng = StdRng::seed_from_u64(3);
        session.start_game(0);
        weapons.set_weapon(WeaponKind::Spread, 10_000, None, 0);
        for _ in 0..30 {
            weapons.advance_fire_timer();
        }

        let volley = weapons.fire(400.0, 500.0, 1.0, 100, &mut rng);
        assert_eq!(volley.len(), 5);
        record_volley(&mut session, &volley);
        for _ in &volley {
            session.increment_bullet_stats(false, true);
        }

        assert_eq!(session.data().bullets_shot, 5);
        assert!(session.data().accuracy() <= 1.0);
        assert_eq!(session.data().accuracy(), 1.0);
    }

    #[test]
    fn empty_volley_records_no_shots() {
        let mut session = GameSession::new();
        record_volley(&mut session, &[]);
        assert_eq!(session.data().bullets_shot, 0);
    }

    #[test]
    fn fan_fill_reaches_every_vertex() {
        let square = [
            Vec2::new(-2.0, -2.0),
            Vec2::new(2.0, -2.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(-2.0, 2.0),
        ];
        let lines = fan_fill_lines(&square);
        assert_eq!(lines.len(), 16);
        for corner in square {
            assert!(lines.iter().any(|(from, to)| *from == Vec2::ZERO && *to == corner));
        }
        assert!(fan_fill_lines(&[]).is_empty());
    }

    #[test]
    fn inflate_pushes_points_away_from_center() {
        let grown = inflate(&[Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0)], 2.0);
        assert_close(grown[0], Vec2::new(-3.0, 0.0));
        assert_close(grown[1], Vec2::new(3.0, 0.0));
    }

    #[test]
    fn ship_outline_tip_points_up_the_screen() {
        let outline = ship_outline(&PlayerShip::default());
        assert_eq!(outline.first(), outline.last());
        assert!(outline[0].y > outline[1].y);
    }
}
