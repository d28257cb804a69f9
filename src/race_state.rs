use tracing::info;

use crate::checkpoint_tracker::KartProgress;
use crate::types::{RaceState, RaceTransition};

pub type TransitionListener = Box<dyn FnMut(&RaceTransition) + Send>;

pub struct RaceStateMachine {
    state: RaceState,
    countdown_seconds: f64,
    countdown_end_time: f64,
    race_start_time: f64,
    participant_count: usize,
    finish_count: usize,
    listeners: Vec<TransitionListener>,
}

impl RaceStateMachine {
    pub fn new(participant_count: usize, countdown_seconds: f32) -> Self {
        Self {
            state: RaceState::Waiting,
            countdown_seconds: countdown_seconds as f64,
            countdown_end_time: 0.0,
            race_start_time: 0.0,
            participant_count,
            finish_count: 0,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn countdown_end_time(&self) -> f64 {
        self.countdown_end_time
    }

    pub fn race_start_time(&self) -> f64 {
        self.race_start_time
    }

    pub fn participant_count(&self) -> usize {
        self.participant_count
    }

    /// Listeners run synchronously inside the call that applies a transition.
    pub fn subscribe(&mut self, listener: TransitionListener) {
        self.listeners.push(listener);
    }

    /// Waiting -> Countdown, triggered once spawn setup is complete.
    pub fn begin_countdown(&mut self, now: f64) -> Option<RaceTransition> {
        if self.state != RaceState::Waiting {
            return None;
        }
        self.countdown_end_time = now + self.countdown_seconds;
        Some(self.apply(RaceState::Countdown, now))
    }

    /// Countdown -> Racing once `now` reaches the countdown end. Resets every
    /// kart in `karts` before returning.
    pub fn poll_countdown<'a, I>(&mut self, now: f64, karts: I) -> Option<RaceTransition>
    where
        I: IntoIterator<Item = &'a mut KartProgress>,
    {
        if self.state != RaceState::Countdown || now < self.countdown_end_time {
            return None;
        }
        self.race_start_time = now;
        for progress in karts {
            progress.begin_race(now);
        }
        Some(self.apply(RaceState::Racing, now))
    }

    /// Racing -> Finished once every participant has a ledger entry.
    pub fn record_finish_count(&mut self, finish_count: usize, now: f64) -> Option<RaceTransition> {
        if self.state != RaceState::Racing {
            return None;
        }
        self.finish_count = self.finish_count.max(finish_count);
        if self.participant_count == 0 || self.finish_count < self.participant_count {
            return None;
        }
        Some(self.apply(RaceState::Finished, now))
    }

    /// Generic entry point for externally requested transitions. Only the
    /// immediate successor is considered, and only when its trigger holds.
    pub fn request(&mut self, target: RaceState, now: f64) -> Option<RaceTransition> {
        if self.state.successor() != Some(target) {
            return None;
        }
        match target {
            RaceState::Countdown => self.begin_countdown(now),
            RaceState::Racing => self.poll_countdown(now, std::iter::empty()),
            RaceState::Finished => self.record_finish_count(self.finish_count, now),
            RaceState::Waiting => None,
        }
    }

    fn apply(&mut self, to: RaceState, now: f64) -> RaceTransition {
        let transition = RaceTransition {
            from: self.state,
            to,
            at: now,
        };
        self.state = to;
        info!(from = ?transition.from, to = ?transition.to, at = now, "race state changed");
        for listener in &mut self.listeners {
            listener(&transition);
        }
        transition
    }
}
