use crate::types::RaceResult;

/// Finish events in arrival order. One entry per participant is guaranteed
/// by the finished-flag guard upstream, not here.
#[derive(Clone, Debug, Default)]
pub struct ResultsLedger {
    entries: Vec<RaceResult>,
}

impl ResultsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, participant_id: &str, time: f64) -> usize {
        self.entries.push(RaceResult {
            participant_id: participant_id.to_string(),
            time,
        });
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RaceResult] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<RaceResult> {
        self.entries.clone()
    }

    /// 1-based arrival position of `participant_id`, if it has finished.
    pub fn position_of(&self, participant_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.participant_id == participant_id)
            .map(|index| index + 1)
    }
}
