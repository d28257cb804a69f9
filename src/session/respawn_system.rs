use super::*;
use crate::respawn::relocate;

impl RaceSession {
    pub(super) fn apply_due_respawns(&mut self, now: f64) {
        for kart_id in self.respawns.take_due(now) {
            let Some(&idx) = self.kart_index.get(&kart_id) else {
                continue;
            };
            let kart = &mut self.karts[idx];
            let Some(relocation) = relocate(&kart.kinematics, &self.track) else {
                warn!(kart_id = %kart_id, "no checkpoint to respawn at");
                continue;
            };
            kart.kinematics = relocation.kinematics;
            kart.progress.last_checkpoint = relocation.checkpoint;
            debug!(kart_id = %kart_id, checkpoint = relocation.checkpoint, "kart respawned");
            self.events.push(RuntimeEvent::KartRespawned {
                kart_id,
                checkpoint: relocation.checkpoint,
            });
        }
    }

    pub(super) fn detect_down_karts(&mut self, now: f64) {
        for kart in &self.karts {
            if let Some(due_at) =
                self.respawns.detect(&kart.id, &kart.kinematics, &self.config.race, now)
            {
                self.events.push(RuntimeEvent::KartDown {
                    kart_id: kart.id.clone(),
                    due_at,
                });
            }
        }
    }
}
