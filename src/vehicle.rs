use glam::{Quat, Vec3};

use crate::config::VehicleSettings;
use crate::constants::{
    DRIFT_STEER_THRESHOLD, GROUND_SNAP_DEPTH, MIN_STEER_SPEED, STEER_LERP_FLOOR, WORLD_GRAVITY,
};
use crate::types::{KartInput, Transform};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KartKinematics {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub drift_charge: f32,
    pub was_drifting: bool,
}

impl KartKinematics {
    pub fn at(transform: Transform) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            drift_charge: 0.0,
            was_drifting: false,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn forward_speed(&self) -> f32 {
        (self.rotation.inverse() * self.velocity).z
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.rotation.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
            && self.drift_charge.is_finite()
    }

    fn frozen(&self) -> Self {
        Self {
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            ..*self
        }
    }
}

/// Race-level facts the vehicle model needs but does not own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepContext {
    pub drivable: bool,
    pub finished: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    pub kinematics: KartKinematics,
    pub boosted: bool,
}

/// Same state, input, settings and `dt` always give the same result.
pub fn step(
    state: &KartKinematics,
    input: KartInput,
    settings: Option<&VehicleSettings>,
    context: StepContext,
    dt: f32,
) -> StepOutcome {
    let Some(settings) = settings else {
        return freeze(state);
    };
    if !context.drivable || context.finished {
        return freeze(state);
    }

    let input = input.sanitized();
    let mut next = *state;
    let forward = state.forward();

    let mut accel_input = input.throttle;
    if input.brake {
        accel_input = accel_input.min(0.0);
    }
    let accel_force = if accel_input >= 0.0 {
        settings.acceleration
    } else {
        settings.brake_acceleration
    };
    let velocity = state.velocity
        + forward * (accel_input * accel_force * dt)
        + Vec3::NEG_Y * (settings.extra_gravity * dt);

    let mut local = state.rotation.inverse() * velocity;
    let forward_speed = local.z;
    let speed_factor = (forward_speed.abs() / settings.max_speed).clamp(0.0, 1.0);

    let drifting = input.drift
        && input.steer.abs() > DRIFT_STEER_THRESHOLD
        && forward_speed.abs() > settings.min_drift_speed;
    let mut boosted = false;
    if drifting {
        next.drift_charge =
            (state.drift_charge + settings.drift_charge_rate * dt).min(settings.max_drift_charge);
        next.was_drifting = true;
    } else {
        boosted = state.was_drifting && state.drift_charge >= settings.min_drift_for_boost;
        next.drift_charge = 0.0;
        next.was_drifting = false;
    }

    let mut steer_strength = settings.steer_strength * lerp(STEER_LERP_FLOOR, 1.0, speed_factor);
    if drifting {
        steer_strength *= settings.drift_steer_bonus;
    }
    if forward_speed.abs() > MIN_STEER_SPEED {
        let yaw = (input.steer * steer_strength * dt).to_radians();
        next.rotation = (state.rotation * Quat::from_rotation_y(yaw)).normalize();
    }

    let lateral_friction = if drifting {
        settings.drift_lateral_friction
    } else {
        settings.lateral_friction
    };
    local.x *= lateral_friction;
    local.z = local.z.clamp(-settings.max_reverse_speed, settings.max_speed);

    // Recomposed in the frame the tick started with; the yaw above takes
    // effect on the next tick's decomposition.
    next.velocity = state.rotation * local;
    if boosted {
        next.velocity += forward * settings.drift_boost_force;
    }

    StepOutcome {
        kinematics: next,
        boosted,
    }
}

fn freeze(state: &KartKinematics) -> StepOutcome {
    StepOutcome {
        kinematics: state.frozen(),
        boosted: false,
    }
}

/// Advances the pose by one tick. `surface` is the ground height under the
/// kart, `None` when it is off the drivable band.
pub fn integrate(state: &KartKinematics, surface: Option<f32>, dt: f32) -> KartKinematics {
    let mut next = *state;
    next.velocity.y -= WORLD_GRAVITY * dt;
    next.position += next.velocity * dt;

    if next.angular_velocity != Vec3::ZERO {
        next.rotation =
            (Quat::from_scaled_axis(next.angular_velocity * dt) * next.rotation).normalize();
    }

    if let Some(height) = surface {
        if next.position.y <= height && next.position.y >= height - GROUND_SNAP_DEPTH {
            next.position.y = height;
            if next.velocity.y < 0.0 {
                next.velocity.y = 0.0;
            }
        }
    }
    next
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TICK_SECONDS;

    const DRIVING: StepContext = StepContext {
        drivable: true,
        finished: false,
    };

    fn moving_kart(forward_speed: f32) -> KartKinematics {
        KartKinematics {
            velocity: Vec3::new(0.0, 0.0, forward_speed),
            ..KartKinematics::at(Transform {
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
            })
        }
    }

    fn full_throttle() -> KartInput {
        KartInput {
            throttle: 1.0,
            ..KartInput::default()
        }
    }

    #[test]
    fn identical_arguments_give_identical_results() {
        let settings = VehicleSettings::default();
        let state = KartKinematics {
            velocity: Vec3::new(1.5, -0.2, 9.0),
            drift_charge: 0.4,
            was_drifting: true,
            ..moving_kart(0.0)
        };
        let input = KartInput {
            throttle: 0.7,
            steer: -0.6,
            drift: true,
            brake: false,
        };
        let a = step(&state, input, Some(&settings), DRIVING, TICK_SECONDS);
        let b = step(&state, input, Some(&settings), DRIVING, TICK_SECONDS);
        assert_eq!(
            a.kinematics.velocity.to_array().map(f32::to_bits),
            b.kinematics.velocity.to_array().map(f32::to_bits)
        );
        assert_eq!(
            a.kinematics.rotation.to_array().map(f32::to_bits),
            b.kinematics.rotation.to_array().map(f32::to_bits)
        );
        assert_eq!(a.kinematics.drift_charge.to_bits(), b.kinematics.drift_charge.to_bits());
        assert_eq!(a.boosted, b.boosted);
    }

    #[test]
    fn freezes_without_settings_or_outside_racing_or_when_finished() {
        let settings = VehicleSettings::default();
        let state = KartKinematics {
            angular_velocity: Vec3::new(0.0, 1.0, 0.0),
            ..moving_kart(10.0)
        };

        let no_settings = step(&state, full_throttle(), None, DRIVING, TICK_SECONDS);
        assert_eq!(no_settings.kinematics.velocity, Vec3::ZERO);
        assert_eq!(no_settings.kinematics.angular_velocity, Vec3::ZERO);

        let countdown = StepContext {
            drivable: false,
            finished: false,
        };
        let frozen = step(&state, full_throttle(), Some(&settings), countdown, TICK_SECONDS);
        assert_eq!(frozen.kinematics.velocity, Vec3::ZERO);
        assert_eq!(frozen.kinematics.position, state.position);

        let finished = StepContext {
            drivable: true,
            finished: true,
        };
        let frozen = step(&state, full_throttle(), Some(&settings), finished, TICK_SECONDS);
        assert_eq!(frozen.kinematics.velocity, Vec3::ZERO);
    }

    #[test]
    fn throttle_accelerates_forward_and_gravity_bias_pulls_down() {
        let settings = VehicleSettings::default();
        let outcome = step(
            &moving_kart(0.0),
            full_throttle(),
            Some(&settings),
            DRIVING,
            TICK_SECONDS,
        );
        let velocity = outcome.kinematics.velocity;
        assert!((velocity.z - settings.acceleration * TICK_SECONDS).abs() < 1e-5);
        assert!((velocity.y + settings.extra_gravity * TICK_SECONDS).abs() < 1e-5);
    }

    #[test]
    fn brake_cancels_positive_throttle_and_uses_brake_acceleration() {
        let settings = VehicleSettings::default();
        let input = KartInput {
            throttle: 1.0,
            brake: true,
            ..KartInput::default()
        };
        let outcome = step(&moving_kart(0.0), input, Some(&settings), DRIVING, TICK_SECONDS);
        assert!(outcome.kinematics.velocity.z.abs() < 1e-6);

        let input = KartInput {
            throttle: -1.0,
            brake: true,
            ..KartInput::default()
        };
        let outcome = step(&moving_kart(5.0), input, Some(&settings), DRIVING, TICK_SECONDS);
        let expected = 5.0 - settings.brake_acceleration * TICK_SECONDS;
        assert!((outcome.kinematics.velocity.z - expected).abs() < 1e-4);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        let settings = VehicleSettings::default();
        let wild = KartInput {
            throttle: 50.0,
            steer: -9.0,
            ..KartInput::default()
        };
        let clamped = KartInput {
            throttle: 1.0,
            steer: -1.0,
            ..KartInput::default()
        };
        let a = step(&moving_kart(6.0), wild, Some(&settings), DRIVING, TICK_SECONDS);
        let b = step(&moving_kart(6.0), clamped, Some(&settings), DRIVING, TICK_SECONDS);
        assert_eq!(a, b);
    }

    #[test]
    fn forward_speed_is_clamped_to_limits() {
        let settings = VehicleSettings::default();
        let outcome = step(
            &moving_kart(30.0),
            KartInput::default(),
            Some(&settings),
            DRIVING,
            TICK_SECONDS,
        );
        assert!((outcome.kinematics.velocity.z - settings.max_speed).abs() < 1e-5);

        let outcome = step(
            &moving_kart(-20.0),
            KartInput::default(),
            Some(&settings),
            DRIVING,
            TICK_SECONDS,
        );
        assert!((outcome.kinematics.velocity.z + settings.max_reverse_speed).abs() < 1e-5);
    }

    #[test]
    fn lateral_slip_is_damped_by_friction() {
        let settings = VehicleSettings::default();
        let state = KartKinematics {
            velocity: Vec3::new(4.0, 0.0, 10.0),
            ..moving_kart(0.0)
        };
        let outcome = step(&state, KartInput::default(), Some(&settings), DRIVING, TICK_SECONDS);
        assert!((outcome.kinematics.velocity.x - 4.0 * settings.lateral_friction).abs() < 1e-5);
    }

    #[test]
    fn steering_yaws_only_when_moving() {
        let settings = VehicleSettings::default();
        let input = KartInput {
            steer: 1.0,
            ..KartInput::default()
        };
        let still = step(&moving_kart(0.0), input, Some(&settings), DRIVING, TICK_SECONDS);
        assert_eq!(still.kinematics.rotation, Quat::IDENTITY);

        let moving = step(&moving_kart(10.0), input, Some(&settings), DRIVING, TICK_SECONDS);
        let forward = moving.kinematics.forward();
        assert!(forward.x > 0.0, "positive steer turns toward +X");
    }

    #[test]
    fn drift_charges_while_held_and_caps() {
        let settings = VehicleSettings::default();
        let input = KartInput {
            throttle: 1.0,
            steer: 0.8,
            drift: true,
            brake: false,
        };
        let outcome = step(&moving_kart(10.0), input, Some(&settings), DRIVING, TICK_SECONDS);
        assert!(outcome.kinematics.was_drifting);
        let expected = settings.drift_charge_rate * TICK_SECONDS;
        assert!((outcome.kinematics.drift_charge - expected).abs() < 1e-6);
        assert!(!outcome.boosted);

        let nearly_full = KartKinematics {
            drift_charge: settings.max_drift_charge - 0.001,
            was_drifting: true,
            ..moving_kart(10.0)
        };
        let outcome = step(&nearly_full, input, Some(&settings), DRIVING, TICK_SECONDS);
        assert_eq!(outcome.kinematics.drift_charge, settings.max_drift_charge);
    }

    #[test]
    fn drift_needs_steer_and_speed() {
        let settings = VehicleSettings::default();
        let weak_steer = KartInput {
            steer: 0.1,
            drift: true,
            ..KartInput::default()
        };
        let outcome = step(&moving_kart(10.0), weak_steer, Some(&settings), DRIVING, TICK_SECONDS);
        assert!(!outcome.kinematics.was_drifting);

        let slow = KartInput {
            steer: 1.0,
            drift: true,
            ..KartInput::default()
        };
        let outcome = step(&moving_kart(2.0), slow, Some(&settings), DRIVING, TICK_SECONDS);
        assert!(!outcome.kinematics.was_drifting);
    }

    #[test]
    fn releasing_a_charged_drift_boosts_once() {
        let settings = VehicleSettings::default();
        let charged = KartKinematics {
            drift_charge: 1.0,
            was_drifting: true,
            ..moving_kart(10.0)
        };
        let released = step(&charged, KartInput::default(), Some(&settings), DRIVING, TICK_SECONDS);
        assert!(released.boosted);
        assert_eq!(released.kinematics.drift_charge, 0.0);
        assert!(!released.kinematics.was_drifting);
        assert!(released.kinematics.velocity.z > 10.0 + settings.drift_boost_force - 0.5);

        let again = step(
            &released.kinematics,
            KartInput::default(),
            Some(&settings),
            DRIVING,
            TICK_SECONDS,
        );
        assert!(!again.boosted);
    }

    #[test]
    fn weak_charge_is_discarded_without_boost() {
        let settings = VehicleSettings::default();
        let weak = KartKinematics {
            drift_charge: settings.min_drift_for_boost * 0.5,
            was_drifting: true,
            ..moving_kart(10.0)
        };
        let released = step(&weak, KartInput::default(), Some(&settings), DRIVING, TICK_SECONDS);
        assert!(!released.boosted);
        assert_eq!(released.kinematics.drift_charge, 0.0);
    }

    #[test]
    fn integrate_rests_on_surface_and_falls_without_it() {
        let resting = moving_kart(0.0);
        let grounded = integrate(&resting, Some(0.0), TICK_SECONDS);
        assert_eq!(grounded.position.y, 0.0);
        assert_eq!(grounded.velocity.y, 0.0);

        let falling = integrate(&resting, None, TICK_SECONDS);
        assert!(falling.position.y < 0.0);
        assert!(falling.velocity.y < 0.0);
    }

    #[test]
    fn integrate_moves_along_velocity_and_spins() {
        let state = KartKinematics {
            position: Vec3::new(0.0, 5.0, 0.0),
            velocity: Vec3::new(0.0, 0.0, 10.0),
            angular_velocity: Vec3::new(0.0, 0.0, 3.0),
            ..moving_kart(0.0)
        };
        let next = integrate(&state, None, TICK_SECONDS);
        assert!((next.position.z - 10.0 * TICK_SECONDS).abs() < 1e-5);
        assert!(next.up().dot(Vec3::Y) < 1.0);
    }
}
