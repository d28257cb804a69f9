use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::constants::{DEFAULT_WAYPOINTS, MIN_CHECKPOINTS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("track needs at least 3 checkpoints, got {0}")]
    TooFewCheckpoints(usize),
    #[error("setting {name} is out of range: {value}")]
    InvalidSetting { name: &'static str, value: f32 },
    #[error("no spawn points for {0} racers")]
    NoSpawnPoints(usize),
    #[error("no participants")]
    NoParticipants,
    #[error("duplicate participant id {0}")]
    DuplicateParticipant(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VehicleSettings {
    pub max_speed: f32,
    pub max_reverse_speed: f32,
    pub acceleration: f32,
    pub brake_acceleration: f32,
    /// Degrees per second at full steer and full speed.
    pub steer_strength: f32,
    pub lateral_friction: f32,
    pub drift_lateral_friction: f32,
    pub drift_charge_rate: f32,
    pub max_drift_charge: f32,
    pub min_drift_for_boost: f32,
    pub drift_boost_force: f32,
    pub drift_steer_bonus: f32,
    pub min_drift_speed: f32,
    pub extra_gravity: f32,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            max_speed: 18.0,
            max_reverse_speed: 6.0,
            acceleration: 18.0,
            brake_acceleration: 28.0,
            steer_strength: 140.0,
            lateral_friction: 0.85,
            drift_lateral_friction: 0.6,
            drift_charge_rate: 1.1,
            max_drift_charge: 2.5,
            min_drift_for_boost: 0.7,
            drift_boost_force: 8.0,
            drift_steer_bonus: 1.2,
            min_drift_speed: 4.0,
            extra_gravity: 20.0,
        }
    }
}

impl VehicleSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("maxSpeed", self.max_speed)?;
        require_positive("maxReverseSpeed", self.max_reverse_speed)?;
        require_positive("acceleration", self.acceleration)?;
        require_positive("brakeAcceleration", self.brake_acceleration)?;
        require_positive("steerStrength", self.steer_strength)?;
        require_positive("maxDriftCharge", self.max_drift_charge)?;
        require_non_negative("lateralFriction", self.lateral_friction)?;
        require_non_negative("driftLateralFriction", self.drift_lateral_friction)?;
        require_non_negative("driftChargeRate", self.drift_charge_rate)?;
        require_non_negative("minDriftForBoost", self.min_drift_for_boost)?;
        require_non_negative("driftBoostForce", self.drift_boost_force)?;
        require_non_negative("driftSteerBonus", self.drift_steer_bonus)?;
        require_non_negative("minDriftSpeed", self.min_drift_speed)?;
        require_non_negative("extraGravity", self.extra_gravity)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RaceSettings {
    pub total_laps: u32,
    pub countdown_seconds: f32,
    pub respawn_delay: f32,
    pub out_of_bounds_y: f32,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            total_laps: 3,
            countdown_seconds: 3.0,
            respawn_delay: 1.5,
            out_of_bounds_y: -3.0,
        }
    }
}

impl RaceSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.total_laps == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "totalLaps",
                value: 0.0,
            });
        }
        require_non_negative("countdownSeconds", self.countdown_seconds)?;
        require_non_negative("respawnDelay", self.respawn_delay)?;
        if !self.out_of_bounds_y.is_finite() {
            return Err(ConfigError::InvalidSetting {
                name: "outOfBoundsY",
                value: self.out_of_bounds_y,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackSettings {
    pub checkpoint_width: f32,
    pub checkpoint_depth: f32,
    /// Width of the drivable band around the centerline, infield included.
    pub surface_width: f32,
    pub waypoints: Option<Vec<Vec3>>,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            checkpoint_width: 8.0,
            checkpoint_depth: 2.0,
            surface_width: 80.0,
            waypoints: None,
        }
    }
}

impl TrackSettings {
    pub fn resolved_waypoints(&self) -> Vec<Vec3> {
        match self.waypoints.as_ref() {
            Some(points) if points.len() >= MIN_CHECKPOINTS => points.clone(),
            Some(points) => {
                warn!(
                    count = points.len(),
                    "track waypoints below minimum, using default loop"
                );
                DEFAULT_WAYPOINTS.to_vec()
            }
            None => DEFAULT_WAYPOINTS.to_vec(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("checkpointWidth", self.checkpoint_width)?;
        require_positive("checkpointDepth", self.checkpoint_depth)?;
        require_positive("surfaceWidth", self.surface_width)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub vehicle: VehicleSettings,
    pub race: RaceSettings,
    pub track: TrackSettings,
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vehicle.validate()?;
        self.race.validate()?;
        self.track.validate()?;
        Ok(())
    }
}

fn require_positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting { name, value })
    }
}

fn require_non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting { name, value })
    }
}
