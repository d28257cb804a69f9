use std::cmp::Ordering;

/// `mm:ss.mmm`, truncated to the millisecond, minutes uncapped. Negative or
/// non-finite input reads as zero.
pub fn format_race_time(seconds: f64) -> String {
    let seconds = if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    };
    let total_ms = (seconds * 1000.0).floor() as u64;
    let minutes = total_ms / 60_000;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{minutes:02}:{secs:02}.{millis:03}")
}

/// 1-based placement for each `(progress, finish_position)` entry, returned in
/// input order. Finishers rank ahead of everyone in arrival order; the rest
/// rank by progress, ties keeping input order.
pub(super) fn standings(entries: &[(f32, Option<usize>)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        let (progress_a, finish_a) = entries[a];
        let (progress_b, finish_b) = entries[b];
        match (finish_a, finish_b) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => progress_b.total_cmp(&progress_a),
        }
    });

    let mut placements = vec![0; entries.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        placements[idx] = rank + 1;
    }
    placements
}
