use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::checkpoint_tracker::{on_crossing, CrossingContext, CrossingOutcome, KartProgress};
use crate::config::{ConfigError, SessionConfig};
use crate::constants::{TICK_RATE, TICK_SECONDS};
use crate::ledger::ResultsLedger;
use crate::race_state::{RaceStateMachine, TransitionListener};
use crate::respawn::RespawnSupervisor;
use crate::track::Track;
use crate::types::{
    KartInput, KartView, RaceResult, RaceSnapshot, RaceState, RaceSummary, RaceTransition,
    RuntimeEvent, StartRacer, SummaryEntry,
};
use crate::vehicle::{integrate, step, KartKinematics, StepContext};

mod respawn_system;
mod spawn_system;
mod utils;

pub use self::utils::format_race_time;
use self::utils::standings;

#[derive(Clone, Debug)]
struct KartInternal {
    id: String,
    name: String,
    owner_id: String,
    kinematics: KartKinematics,
    progress: KartProgress,
    input: KartInput,
}

/// One race from grid to results. Owns every piece of mutable race state and
/// is advanced only through `step`.
pub struct RaceSession {
    config: SessionConfig,
    track: Track,
    machine: RaceStateMachine,
    ledger: ResultsLedger,
    respawns: RespawnSupervisor,
    karts: Vec<KartInternal>,
    kart_index: BTreeMap<String, usize>,
    events: Vec<RuntimeEvent>,
    tick_counter: u64,
    now: f64,
    dt: f32,
    torn_down: bool,
}

impl RaceSession {
    pub fn new(config: SessionConfig, racers: Vec<StartRacer>) -> Result<Self, ConfigError> {
        config.validate()?;
        if racers.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        let track = Track::from_settings(&config.track)?;
        let karts = spawn_system::place_karts(&track, &racers)?;
        let kart_index = karts
            .iter()
            .enumerate()
            .map(|(idx, kart)| (kart.id.clone(), idx))
            .collect();

        info!(
            racers = karts.len(),
            checkpoints = track.len(),
            laps = config.race.total_laps,
            "race session created"
        );

        Ok(Self {
            machine: RaceStateMachine::new(karts.len(), config.race.countdown_seconds),
            respawns: RespawnSupervisor::new(&config.race),
            ledger: ResultsLedger::new(),
            track,
            config,
            karts,
            kart_index,
            events: Vec::new(),
            tick_counter: 0,
            now: 0.0,
            dt: TICK_SECONDS,
            torn_down: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn state(&self) -> RaceState {
        self.machine.state()
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick_counter
    }

    pub fn countdown_end_time(&self) -> f64 {
        self.machine.countdown_end_time()
    }

    pub fn race_start_time(&self) -> f64 {
        self.machine.race_start_time()
    }

    pub fn participant_count(&self) -> usize {
        self.machine.participant_count()
    }

    pub fn total_laps(&self) -> u32 {
        self.config.race.total_laps
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn is_finished(&self) -> bool {
        self.machine.state() == RaceState::Finished
    }

    pub fn kart_ids(&self) -> Vec<String> {
        self.karts.iter().map(|kart| kart.id.clone()).collect()
    }

    pub fn kart_progress(&self, kart_id: &str) -> Option<KartProgress> {
        self.kart(kart_id).map(|kart| kart.progress)
    }

    pub fn kart_kinematics(&self, kart_id: &str) -> Option<KartKinematics> {
        self.kart(kart_id).map(|kart| kart.kinematics)
    }

    pub fn kart_owner(&self, kart_id: &str) -> Option<&str> {
        self.kart(kart_id).map(|kart| kart.owner_id.as_str())
    }

    pub fn is_respawning(&self, kart_id: &str) -> bool {
        self.respawns.is_recovering(kart_id)
    }

    pub fn ledger(&self) -> &ResultsLedger {
        &self.ledger
    }

    pub fn results(&self) -> Vec<RaceResult> {
        self.ledger.snapshot()
    }

    pub fn subscribe(&mut self, listener: TransitionListener) {
        self.machine.subscribe(listener);
    }

    /// Waiting -> Countdown. A torn-down session ignores the request.
    pub fn start_countdown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        if self.karts.is_empty() {
            warn!("countdown requested with no karts placed");
            return false;
        }
        match self.machine.begin_countdown(self.now) {
            Some(transition) => {
                self.record_transition(transition);
                true
            }
            None => false,
        }
    }

    /// Stores the latest sample for `kart_id` if `sender` owns it. The sample
    /// is reused every tick until replaced.
    pub fn receive_input(&mut self, sender: &str, kart_id: &str, input: KartInput) -> bool {
        if self.torn_down {
            return false;
        }
        let Some(&idx) = self.kart_index.get(kart_id) else {
            return false;
        };
        let kart = &mut self.karts[idx];
        if kart.owner_id != sender {
            debug!(sender, kart_id, "input rejected, sender does not own kart");
            return false;
        }
        kart.input = input.sanitized();
        true
    }

    /// Zeroes the sticky sample, e.g. when the owner disconnects.
    pub fn clear_input(&mut self, kart_id: &str) {
        if self.torn_down {
            return;
        }
        if let Some(&idx) = self.kart_index.get(kart_id) {
            self.karts[idx].input = KartInput::default();
        }
    }

    pub fn step(&mut self) {
        if self.torn_down {
            return;
        }
        self.tick_counter += 1;
        self.now = self.tick_counter as f64 / TICK_RATE as f64;

        let now = self.now;
        if let Some(transition) = self
            .machine
            .poll_countdown(now, self.karts.iter_mut().map(|kart| &mut kart.progress))
        {
            self.record_transition(transition);
        }

        self.update_karts(now);
        self.apply_due_respawns(now);
        self.detect_down_karts(now);

        if let Some(transition) = self.machine.record_finish_count(self.ledger.len(), now) {
            self.record_transition(transition);
        }
    }

    fn update_karts(&mut self, now: f64) {
        let drivable = self.machine.state().can_drive();
        let context = CrossingContext {
            total_checkpoints: self.track.len(),
            total_laps: self.config.race.total_laps,
            race_start_time: self.machine.race_start_time(),
            now,
        };

        for kart in self.karts.iter_mut() {
            let outcome = step(
                &kart.kinematics,
                kart.input,
                Some(&self.config.vehicle),
                StepContext {
                    drivable,
                    finished: kart.progress.finished,
                },
                self.dt,
            );
            let surface = self.track.surface_height_at(outcome.kinematics.position);
            let next = integrate(&outcome.kinematics, surface, self.dt);
            let from = kart.kinematics.position;
            kart.kinematics = next;

            if outcome.boosted {
                self.events.push(RuntimeEvent::DriftBoost {
                    kart_id: kart.id.clone(),
                });
            }
            if !drivable {
                continue;
            }

            for checkpoint in self.track.entered_checkpoints(from, next.position) {
                let outcome = on_crossing(
                    &mut kart.progress,
                    &kart.id,
                    checkpoint,
                    context,
                    &mut self.ledger,
                );
                match outcome {
                    CrossingOutcome::Ignored => {}
                    CrossingOutcome::Advanced { index } => {
                        self.events.push(RuntimeEvent::CheckpointPassed {
                            kart_id: kart.id.clone(),
                            index,
                        });
                    }
                    CrossingOutcome::LapCompleted { lap, lap_time } => {
                        debug!(kart_id = %kart.id, lap, lap_time, "lap completed");
                        self.events.push(RuntimeEvent::LapCompleted {
                            kart_id: kart.id.clone(),
                            lap,
                            lap_time,
                        });
                    }
                    CrossingOutcome::Finished {
                        lap,
                        lap_time,
                        finish_time,
                        position,
                    } => {
                        info!(
                            kart_id = %kart.id,
                            position,
                            time = %format_race_time(finish_time),
                            "kart finished"
                        );
                        self.events.push(RuntimeEvent::LapCompleted {
                            kart_id: kart.id.clone(),
                            lap,
                            lap_time,
                        });
                        self.events.push(RuntimeEvent::KartFinished {
                            kart_id: kart.id.clone(),
                            time: finish_time,
                            position,
                        });
                        break;
                    }
                }
            }
        }
    }

    pub fn build_snapshot(&mut self, include_events: bool) -> RaceSnapshot {
        let placements = self.placements();
        let snapshot = RaceSnapshot {
            tick: self.tick_counter,
            now: self.now,
            state: self.machine.state(),
            countdown_end_time: self.machine.countdown_end_time(),
            race_start_time: self.machine.race_start_time(),
            total_laps: self.config.race.total_laps,
            karts: self
                .karts
                .iter()
                .zip(placements)
                .map(|(kart, placement)| self.kart_view(kart, placement))
                .collect(),
            results: self.ledger.snapshot(),
            events: if include_events {
                self.events.clone()
            } else {
                Vec::new()
            },
        };
        if include_events {
            self.events.clear();
        }
        snapshot
    }

    /// Results in arrival order, with display names and formatted times.
    pub fn build_summary(&self) -> RaceSummary {
        let results = self
            .ledger
            .entries()
            .iter()
            .enumerate()
            .map(|(idx, entry)| SummaryEntry {
                position: idx + 1,
                participant_id: entry.participant_id.clone(),
                name: self
                    .kart(&entry.participant_id)
                    .map(|kart| kart.name.clone())
                    .unwrap_or_default(),
                time: entry.time,
                time_text: format_race_time(entry.time),
            })
            .collect();

        let duration_seconds = if self.machine.state() >= RaceState::Racing {
            self.now - self.machine.race_start_time()
        } else {
            0.0
        };

        RaceSummary {
            state: self.machine.state(),
            duration_seconds,
            total_laps: self.config.race.total_laps,
            results,
        }
    }

    /// Current placement per kart, in kart order.
    pub fn placements(&self) -> Vec<usize> {
        let entries: Vec<(f32, Option<usize>)> = self
            .karts
            .iter()
            .map(|kart| {
                let progress = self.track.progress(
                    kart.progress.laps_completed,
                    kart.progress.last_checkpoint,
                    kart.kinematics.position,
                );
                (progress, self.ledger.position_of(&kart.id))
            })
            .collect();
        standings(&entries)
    }

    /// Stops the session for good. Pending respawns are discarded and every
    /// later mutating call is ignored.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let cancelled = self.respawns.cancel_all();
        info!(
            tick = self.tick_counter,
            cancelled_respawns = cancelled,
            "race session torn down"
        );
    }

    fn kart(&self, kart_id: &str) -> Option<&KartInternal> {
        self.kart_index.get(kart_id).map(|&idx| &self.karts[idx])
    }

    fn kart_view(&self, kart: &KartInternal, placement: usize) -> KartView {
        KartView {
            id: kart.id.clone(),
            name: kart.name.clone(),
            owner_id: kart.owner_id.clone(),
            position: kart.kinematics.position,
            rotation: kart.kinematics.rotation,
            velocity: kart.kinematics.velocity,
            speed: kart.kinematics.velocity.length(),
            drift_charge: kart.kinematics.drift_charge,
            laps_completed: kart.progress.laps_completed,
            last_checkpoint: kart.progress.last_checkpoint,
            last_lap_start_time: kart.progress.last_lap_start_time,
            finished: kart.progress.finished,
            finish_time: kart.progress.finish_time,
            respawning: self.respawns.is_recovering(&kart.id),
            placement,
        }
    }

    fn record_transition(&mut self, transition: RaceTransition) {
        self.events.push(RuntimeEvent::StateChanged {
            from: transition.from,
            to: transition.to,
            at: transition.at,
        });
    }
}

#[cfg(test)]
mod tests;
