use crate::constants::{normalize_total_laps, MAX_NAME_LEN};

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Racer".to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

/// Lap count requested in `lobby_start`, falling back to the configured value.
pub fn resolve_total_laps(requested: Option<i64>, configured: u32) -> u32 {
    normalize_total_laps(requested, configured)
}

/// Sort key from an id's numeric suffix, so `player_2` comes before `player_10`.
pub fn player_order_key(player_id: &str) -> u64 {
    player_id
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}

pub fn kart_id_for(player_id: &str) -> String {
    format!("kart_{}", player_order_key(player_id))
}
