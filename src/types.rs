use glam::{Quat, Vec3};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    Waiting,
    Countdown,
    Racing,
    Finished,
}

impl RaceState {
    pub fn can_drive(self) -> bool {
        self == Self::Racing
    }

    /// The single state reachable from `self`, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Countdown),
            Self::Countdown => Some(Self::Racing),
            Self::Racing => Some(Self::Finished),
            Self::Finished => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KartInput {
    pub throttle: f32,
    pub steer: f32,
    pub drift: bool,
    pub brake: bool,
}

impl KartInput {
    pub fn sanitized(self) -> Self {
        Self {
            throttle: clamp_axis(self.throttle),
            steer: clamp_axis(self.steer),
            drift: self.drift,
            brake: self.brake,
        }
    }
}

fn clamp_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn looking_along(position: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            rotation: look_rotation(forward),
        }
    }
}

/// Yaw-only rotation whose +Z axis points along the horizontal part of `forward`.
pub fn look_rotation(forward: Vec3) -> Quat {
    let flat = Vec3::new(forward.x, 0.0, forward.z);
    if flat.length_squared() <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_y(flat.x.atan2(flat.z))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RaceResult {
    #[serde(rename = "participantId")]
    pub participant_id: String,
    pub time: f64,
}

#[derive(Clone, Debug)]
pub struct StartRacer {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RaceTransition {
    pub from: RaceState,
    pub to: RaceState,
    pub at: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckpointView {
    pub index: usize,
    pub position: Vec3,
    pub forward: Vec3,
}

#[derive(Clone, Debug, Serialize)]
pub struct KartView {
    pub id: String,
    pub name: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub speed: f32,
    #[serde(rename = "driftCharge")]
    pub drift_charge: f32,
    #[serde(rename = "lapsCompleted")]
    pub laps_completed: u32,
    #[serde(rename = "lastCheckpoint")]
    pub last_checkpoint: usize,
    #[serde(rename = "lastLapStartTime")]
    pub last_lap_start_time: f64,
    pub finished: bool,
    #[serde(rename = "finishTime")]
    pub finish_time: f64,
    pub respawning: bool,
    pub placement: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    StateChanged {
        from: RaceState,
        to: RaceState,
        at: f64,
    },
    CheckpointPassed {
        #[serde(rename = "kartId")]
        kart_id: String,
        index: usize,
    },
    LapCompleted {
        #[serde(rename = "kartId")]
        kart_id: String,
        lap: u32,
        #[serde(rename = "lapTime")]
        lap_time: f64,
    },
    KartFinished {
        #[serde(rename = "kartId")]
        kart_id: String,
        time: f64,
        position: usize,
    },
    DriftBoost {
        #[serde(rename = "kartId")]
        kart_id: String,
    },
    KartDown {
        #[serde(rename = "kartId")]
        kart_id: String,
        #[serde(rename = "dueAt")]
        due_at: f64,
    },
    KartRespawned {
        #[serde(rename = "kartId")]
        kart_id: String,
        checkpoint: usize,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct RaceSnapshot {
    pub tick: u64,
    pub now: f64,
    pub state: RaceState,
    #[serde(rename = "countdownEndTime")]
    pub countdown_end_time: f64,
    #[serde(rename = "raceStartTime")]
    pub race_start_time: f64,
    #[serde(rename = "totalLaps")]
    pub total_laps: u32,
    pub karts: Vec<KartView>,
    pub results: Vec<RaceResult>,
    pub events: Vec<RuntimeEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryEntry {
    pub position: usize,
    #[serde(rename = "participantId")]
    pub participant_id: String,
    pub name: String,
    pub time: f64,
    #[serde(rename = "timeText")]
    pub time_text: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RaceSummary {
    pub state: RaceState,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: f64,
    #[serde(rename = "totalLaps")]
    pub total_laps: u32,
    pub results: Vec<SummaryEntry>,
}
