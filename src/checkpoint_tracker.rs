use crate::ledger::ResultsLedger;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KartProgress {
    pub last_checkpoint: usize,
    pub laps_completed: u32,
    pub last_lap_start_time: f64,
    pub finished: bool,
    pub finish_time: f64,
}

impl KartProgress {
    /// The one-time reset applied when the race goes green.
    pub fn begin_race(&mut self, race_start_time: f64) {
        self.laps_completed = 0;
        self.last_checkpoint = 0;
        self.last_lap_start_time = race_start_time;
        self.finished = false;
        self.finish_time = 0.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossingContext {
    pub total_checkpoints: usize,
    pub total_laps: u32,
    pub race_start_time: f64,
    pub now: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CrossingOutcome {
    Ignored,
    Advanced { index: usize },
    LapCompleted { lap: u32, lap_time: f64 },
    Finished {
        lap: u32,
        lap_time: f64,
        finish_time: f64,
        position: usize,
    },
}

/// Applies one trigger crossing. Anything but the next gate in sequence is
/// ignored without touching `progress`; a finish appends to `ledger`.
pub fn on_crossing(
    progress: &mut KartProgress,
    participant_id: &str,
    checkpoint_index: usize,
    context: CrossingContext,
    ledger: &mut ResultsLedger,
) -> CrossingOutcome {
    if progress.finished || context.total_checkpoints == 0 {
        return CrossingOutcome::Ignored;
    }

    let total = context.total_checkpoints;
    let expected = (progress.last_checkpoint + 1) % total;
    if checkpoint_index != expected {
        return CrossingOutcome::Ignored;
    }

    let previous = progress.last_checkpoint;
    progress.last_checkpoint = checkpoint_index;
    if checkpoint_index != 0 || previous != total - 1 {
        return CrossingOutcome::Advanced {
            index: checkpoint_index,
        };
    }

    let lap_time = context.now - progress.last_lap_start_time;
    progress.laps_completed += 1;
    progress.last_lap_start_time = context.now;

    if progress.laps_completed >= context.total_laps {
        progress.finished = true;
        progress.finish_time = context.now - context.race_start_time;
        let position = ledger.append(participant_id, progress.finish_time);
        return CrossingOutcome::Finished {
            lap: progress.laps_completed,
            lap_time,
            finish_time: progress.finish_time,
            position,
        };
    }

    CrossingOutcome::LapCompleted {
        lap: progress.laps_completed,
        lap_time,
    }
}
