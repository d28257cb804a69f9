use glam::Vec3;

use crate::rng::Rng;
use crate::track::Track;
use crate::types::KartInput;
use crate::vehicle::KartKinematics;

const STEER_GAIN: f32 = 2.0;
const HARD_TURN_RADIANS: f32 = 1.2;
const DRIFT_TURN_RADIANS: f32 = 0.45;

#[derive(Clone, Debug)]
pub struct BotDriver {
    rng: Rng,
    think_at_tick: u64,
    throttle_bias: f32,
    wants_drift: bool,
}

impl BotDriver {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: Rng::new(seed),
            think_at_tick: 0,
            throttle_bias: 1.0,
            wants_drift: false,
        }
    }

    /// Input that heads the kart toward the gate after `last_checkpoint`.
    pub fn drive(
        &mut self,
        tick: u64,
        kinematics: &KartKinematics,
        last_checkpoint: usize,
        track: &Track,
    ) -> KartInput {
        if tick >= self.think_at_tick {
            self.think_at_tick = tick + self.rng.int(10, 30) as u64;
            self.throttle_bias = self.rng.range_f32(0.85, 1.0);
            self.wants_drift = self.rng.bool(0.35);
        }

        let Some(target) = track
            .checkpoints()
            .get((last_checkpoint + 1) % track.len().max(1))
        else {
            return KartInput::default();
        };

        let angle = heading_error(kinematics.forward(), target.position - kinematics.position);
        let throttle = if angle.abs() > HARD_TURN_RADIANS {
            0.5
        } else {
            self.throttle_bias
        };
        KartInput {
            throttle,
            steer: (angle * STEER_GAIN).clamp(-1.0, 1.0),
            drift: self.wants_drift && angle.abs() > DRIFT_TURN_RADIANS,
            brake: false,
        }
    }
}

/// Signed yaw from `forward` to `to_target`, positive toward +X of a kart
/// facing +Z.
fn heading_error(forward: Vec3, to_target: Vec3) -> f32 {
    let forward = Vec3::new(forward.x, 0.0, forward.z).normalize_or_zero();
    let to_target = Vec3::new(to_target.x, 0.0, to_target.z).normalize_or_zero();
    let cross = forward.cross(to_target).y;
    let dot = forward.dot(to_target);
    cross.atan2(dot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_error_sign_matches_steer_direction() {
        assert!(heading_error(Vec3::Z, Vec3::X) > 0.0);
        assert!(heading_error(Vec3::Z, Vec3::NEG_X) < 0.0);
        assert!(heading_error(Vec3::Z, Vec3::Z).abs() < 1e-6);
    }

    #[test]
    fn same_seed_drives_the_same_way() {
        let track = Track::from_settings(&Default::default()).expect("default track");
        let kinematics = KartKinematics::at(crate::types::Transform::looking_along(
            Vec3::new(0.0, 0.0, 25.0),
            Vec3::X,
        ));
        let mut a = BotDriver::new(9);
        let mut b = BotDriver::new(9);
        for tick in 0..200 {
            assert_eq!(
                a.drive(tick, &kinematics, 0, &track),
                b.drive(tick, &kinematics, 0, &track)
            );
        }
    }
}
