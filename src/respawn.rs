use std::collections::BTreeMap;

use glam::Vec3;
use tracing::debug;

use crate::config::RaceSettings;
use crate::constants::FLIP_UP_DOT_THRESHOLD;
use crate::track::Track;
use crate::vehicle::KartKinematics;

/// True when the kart is upside down (or on its side) or below the kill plane.
pub fn is_down(kinematics: &KartKinematics, settings: &RaceSettings) -> bool {
    kinematics.up().dot(Vec3::Y) < FLIP_UP_DOT_THRESHOLD
        || kinematics.position.y < settings.out_of_bounds_y
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relocation {
    pub checkpoint: usize,
    pub kinematics: KartKinematics,
}

/// Pending recoveries keyed by kart id. Polled by the session each tick.
#[derive(Clone, Debug, Default)]
pub struct RespawnSupervisor {
    pending: BTreeMap<String, f64>,
    respawn_delay: f64,
}

impl RespawnSupervisor {
    pub fn new(settings: &RaceSettings) -> Self {
        Self {
            pending: BTreeMap::new(),
            respawn_delay: settings.respawn_delay as f64,
        }
    }

    pub fn is_recovering(&self, kart_id: &str) -> bool {
        self.pending.contains_key(kart_id)
    }

    pub fn due_at(&self, kart_id: &str) -> Option<f64> {
        self.pending.get(kart_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Files a recovery for `kart_id` if it is down and not already recovering.
    /// Returns the due time of a newly filed entry.
    pub fn detect(
        &mut self,
        kart_id: &str,
        kinematics: &KartKinematics,
        settings: &RaceSettings,
        now: f64,
    ) -> Option<f64> {
        if self.is_recovering(kart_id) || !is_down(kinematics, settings) {
            return None;
        }
        let due_at = now + self.respawn_delay;
        self.pending.insert(kart_id.to_string(), due_at);
        debug!(kart_id, due_at, "kart down, respawn scheduled");
        Some(due_at)
    }

    /// Removes and returns every entry due at `now`, ordered by kart id.
    pub fn take_due(&mut self, now: f64) -> Vec<String> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, due_at)| **due_at <= now)
            .map(|(kart_id, _)| kart_id.clone())
            .collect();
        for kart_id in &due {
            self.pending.remove(kart_id);
        }
        due
    }

    /// Drops every pending entry. Used on teardown.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

/// Pose for a kart recovered near `kinematics.position`: the nearest
/// checkpoint, lifted and facing the next gate, with motion and drift cleared.
pub fn relocate(kinematics: &KartKinematics, track: &Track) -> Option<Relocation> {
    let checkpoint = track.nearest_checkpoint(kinematics.position)?;
    let transform = track.respawn_transform(checkpoint)?;
    Some(Relocation {
        checkpoint,
        kinematics: KartKinematics::at(transform),
    })
}
