use glam::Vec3;

use crate::config::{ConfigError, TrackSettings};
use crate::constants::{
    CHECKPOINT_HEIGHT, CHECKPOINT_LIFT, MIN_CHECKPOINTS, RESPAWN_LIFT, SPAWN_LIFT,
    SPAWN_ROW_FACTOR, SPAWN_SPACING,
};
use crate::types::{CheckpointView, Transform};

const PARALLEL_EPSILON: f32 = 1e-6;

#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub index: usize,
    pub position: Vec3,
    pub forward: Vec3,
}

impl Checkpoint {
    fn right(&self) -> Vec3 {
        Vec3::Y.cross(self.forward)
    }

    fn to_local(&self, point: Vec3) -> Vec3 {
        let delta = point - self.position;
        Vec3::new(delta.dot(self.right()), delta.y, delta.dot(self.forward))
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    waypoints: Vec<Vec3>,
    checkpoints: Vec<Checkpoint>,
    gate_half_extents: Vec3,
    surface_half_width: f32,
}

impl Track {
    pub fn from_settings(settings: &TrackSettings) -> Result<Self, ConfigError> {
        Self::new(settings.resolved_waypoints(), settings)
    }

    pub fn new(waypoints: Vec<Vec3>, settings: &TrackSettings) -> Result<Self, ConfigError> {
        if waypoints.len() < MIN_CHECKPOINTS {
            return Err(ConfigError::TooFewCheckpoints(waypoints.len()));
        }

        let count = waypoints.len();
        let checkpoints = (0..count)
            .map(|index| {
                let current = waypoints[index];
                let next = waypoints[(index + 1) % count];
                Checkpoint {
                    index,
                    position: current + Vec3::Y * CHECKPOINT_LIFT,
                    forward: horizontal(next - current).normalize_or(Vec3::Z),
                }
            })
            .collect();

        Ok(Self {
            waypoints,
            checkpoints,
            gate_half_extents: Vec3::new(
                settings.checkpoint_width * 0.5,
                CHECKPOINT_HEIGHT * 0.5,
                settings.checkpoint_depth * 0.5,
            ),
            surface_half_width: settings.surface_width * 0.5,
        })
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn checkpoint_views(&self) -> Vec<CheckpointView> {
        self.checkpoints
            .iter()
            .map(|checkpoint| CheckpointView {
                index: checkpoint.index,
                position: checkpoint.position,
                forward: checkpoint.forward,
            })
            .collect()
    }

    /// Index of the checkpoint closest to `position`; ties go to the lowest index.
    pub fn nearest_checkpoint(&self, position: Vec3) -> Option<usize> {
        let mut nearest = None;
        let mut best_distance = f32::MAX;
        for checkpoint in &self.checkpoints {
            let distance = position.distance(checkpoint.position);
            if distance < best_distance {
                best_distance = distance;
                nearest = Some(checkpoint.index);
            }
        }
        nearest
    }

    /// Placement for a kart recovered at checkpoint `index`, facing the next gate.
    pub fn respawn_transform(&self, index: usize) -> Option<Transform> {
        let checkpoint = self.checkpoints.get(index)?;
        let next = &self.checkpoints[(index + 1) % self.checkpoints.len()];
        let forward = (next.position - checkpoint.position).normalize_or(checkpoint.forward);
        Some(Transform::looking_along(
            checkpoint.position + Vec3::Y * RESPAWN_LIFT,
            forward,
        ))
    }

    /// Gates whose trigger volume the segment `from -> to` enters, in the
    /// order the segment reaches them. A gate already containing `from` is
    /// not re-entered.
    pub fn entered_checkpoints(&self, from: Vec3, to: Vec3) -> Vec<usize> {
        let mut hits: Vec<(f32, usize)> = self
            .checkpoints
            .iter()
            .filter_map(|checkpoint| {
                self.entry_parameter(checkpoint, from, to)
                    .map(|t| (t, checkpoint.index))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().map(|(_, index)| index).collect()
    }

    fn inside_gate(&self, local: Vec3) -> bool {
        local.x.abs() <= self.gate_half_extents.x
            && local.y.abs() <= self.gate_half_extents.y
            && local.z.abs() <= self.gate_half_extents.z
    }

    fn entry_parameter(&self, checkpoint: &Checkpoint, from: Vec3, to: Vec3) -> Option<f32> {
        let start = checkpoint.to_local(from);
        if self.inside_gate(start) {
            return None;
        }
        let delta = checkpoint.to_local(to) - start;
        let half = self.gate_half_extents;

        let mut t_enter = 0.0f32;
        let mut t_exit = 1.0f32;
        for (origin, direction, extent) in [
            (start.x, delta.x, half.x),
            (start.y, delta.y, half.y),
            (start.z, delta.z, half.z),
        ] {
            if direction.abs() < PARALLEL_EPSILON {
                if origin.abs() > extent {
                    return None;
                }
                continue;
            }
            let a = (-extent - origin) / direction;
            let b = (extent - origin) / direction;
            t_enter = t_enter.max(a.min(b));
            t_exit = t_exit.min(a.max(b));
            if t_enter > t_exit {
                return None;
            }
        }
        Some(t_enter)
    }

    /// Ground height under `position`, or `None` when it is off the drivable band.
    pub fn surface_height_at(&self, position: Vec3) -> Option<f32> {
        let point = horizontal(position);
        let count = self.waypoints.len();
        let mut best: Option<(f32, f32)> = None;
        for index in 0..count {
            let a = self.waypoints[index];
            let b = self.waypoints[(index + 1) % count];
            let (distance, t) = distance_to_segment(point, horizontal(a), horizontal(b));
            if best.map(|(d, _)| distance < d).unwrap_or(true) {
                best = Some((distance, a.y + (b.y - a.y) * t));
            }
        }
        match best {
            Some((distance, height)) if distance <= self.surface_half_width => Some(height),
            _ => None,
        }
    }

    /// Number of grid slots that fit on the straight behind checkpoint 0
    /// without reaching into the last gate.
    pub fn spawn_slots(&self) -> usize {
        let count = self.waypoints.len();
        let straight = horizontal(self.waypoints[0] - self.waypoints[count - 1]).length();
        let usable = (straight - 2.0 * self.gate_half_extents.z).max(0.0);
        let rows = (usable / (SPAWN_SPACING * SPAWN_ROW_FACTOR)).floor() as usize + 1;
        rows * 2
    }

    /// Two-column starting grid behind checkpoint 0, facing checkpoint 1.
    /// Holds at most `spawn_slots()` entries.
    pub fn spawn_grid(&self, count: usize) -> Vec<Transform> {
        let start = self.waypoints[0];
        let forward = horizontal(self.waypoints[1] - start).normalize_or(Vec3::Z);
        let right = Vec3::Y.cross(forward);

        (0..count.min(self.spawn_slots()))
            .map(|index| {
                let row = (index / 2) as f32;
                let column_offset = if index % 2 == 0 { -1.0 } else { 1.0 };
                let position = start - forward * (row * SPAWN_SPACING * SPAWN_ROW_FACTOR)
                    + right * (column_offset * SPAWN_SPACING)
                    + Vec3::Y * SPAWN_LIFT;
                Transform::looking_along(position, forward)
            })
            .collect()
    }

    /// Continuous race progress: laps * N + last checkpoint + fraction of the
    /// way to the next gate.
    pub fn progress(&self, laps_completed: u32, last_checkpoint: usize, position: Vec3) -> f32 {
        let total = self.checkpoints.len();
        if total == 0 {
            return 0.0;
        }
        let last = last_checkpoint.min(total - 1);
        let next = (last + 1) % total;
        let last_pos = self.checkpoints[last].position;
        let next_pos = self.checkpoints[next].position;
        let segment_length = last_pos.distance(next_pos);
        let fraction = if segment_length > 0.01 {
            1.0 - (position.distance(next_pos) / segment_length).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (laps_completed as usize * total + last) as f32 + fraction
    }
}

fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

fn distance_to_segment(point: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared <= f32::EPSILON {
        return (point.distance(a), 0.0);
    }
    let t = ((point - a).dot(ab) / length_squared).clamp(0.0, 1.0);
    (point.distance(a + ab * t), t)
}
