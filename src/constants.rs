use glam::Vec3;

pub const TICK_RATE: u32 = 50;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;
pub const TICK_SECONDS: f32 = 1.0 / TICK_RATE as f32;

pub const WORLD_GRAVITY: f32 = 9.81;
pub const DRIFT_STEER_THRESHOLD: f32 = 0.2;
pub const MIN_STEER_SPEED: f32 = 0.1;
pub const STEER_LERP_FLOOR: f32 = 0.3;
pub const FLIP_UP_DOT_THRESHOLD: f32 = 0.1;
pub const RESPAWN_LIFT: f32 = 0.5;
pub const GROUND_SNAP_DEPTH: f32 = 0.5;

pub const CHECKPOINT_LIFT: f32 = 0.25;
pub const CHECKPOINT_HEIGHT: f32 = 1.0;
pub const SPAWN_SPACING: f32 = 2.6;
pub const SPAWN_ROW_FACTOR: f32 = 1.6;
pub const SPAWN_LIFT: f32 = 0.3;

pub const MAX_RACERS: usize = 4;
pub const MAX_NAME_LEN: usize = 16;
pub const MIN_CHECKPOINTS: usize = 3;

pub const DEFAULT_WAYPOINTS: [Vec3; 8] = [
    Vec3::new(0.0, 0.0, 30.0),
    Vec3::new(20.0, 0.0, 20.0),
    Vec3::new(30.0, 0.0, 0.0),
    Vec3::new(20.0, 0.0, -20.0),
    Vec3::new(0.0, 0.0, -30.0),
    Vec3::new(-20.0, 0.0, -20.0),
    Vec3::new(-30.0, 0.0, 0.0),
    Vec3::new(-20.0, 0.0, 20.0),
];

pub fn normalize_total_laps(value: Option<i64>, fallback: u32) -> u32 {
    match value {
        Some(laps) => laps.clamp(1, 20) as u32,
        None => fallback,
    }
}
