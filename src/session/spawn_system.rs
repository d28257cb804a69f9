use std::collections::BTreeSet;

use super::*;

/// Places one kart per racer on the starting grid, in racer order.
pub(super) fn place_karts(
    track: &Track,
    racers: &[StartRacer],
) -> Result<Vec<KartInternal>, ConfigError> {
    let grid = track.spawn_grid(racers.len());
    if grid.len() < racers.len() {
        return Err(ConfigError::NoSpawnPoints(racers.len()));
    }

    let mut seen = BTreeSet::new();
    let mut karts = Vec::with_capacity(racers.len());
    for (racer, transform) in racers.iter().zip(grid) {
        if !seen.insert(racer.id.as_str()) {
            return Err(ConfigError::DuplicateParticipant(racer.id.clone()));
        }
        karts.push(KartInternal {
            id: racer.id.clone(),
            name: racer.name.clone(),
            owner_id: racer.owner_id.clone(),
            kinematics: KartKinematics::at(transform),
            progress: KartProgress::default(),
            input: KartInput::default(),
        });
    }
    Ok(karts)
}
