use clap::Parser;
use kart_race_server::bot::BotDriver;
use kart_race_server::config::SessionConfig;
use kart_race_server::constants::{normalize_total_laps, MAX_RACERS, TICK_RATE};
use kart_race_server::logging::init_tracing;
use kart_race_server::session::{format_race_time, RaceSession};
use kart_race_server::types::{RaceSnapshot, RaceState, RuntimeEvent, StartRacer};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a bot-only race and checks race invariants")]
struct Cli {
    #[arg(long, default_value_t = 4)]
    racers: usize,
    #[arg(long)]
    laps: Option<i64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 300)]
    max_seconds: u64,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct RaceResultLine {
    #[serde(rename = "matchId")]
    match_id: String,
    seed: u32,
    racers: usize,
    laps: u32,
    state: RaceState,
    #[serde(rename = "durationSeconds")]
    duration_seconds: f64,
    finishers: usize,
    #[serde(rename = "finishOrder")]
    finish_order: Vec<String>,
    #[serde(rename = "bestTimeText")]
    best_time_text: Option<String>,
    #[serde(rename = "lapsCompleted")]
    laps_completed: usize,
    #[serde(rename = "driftBoosts")]
    drift_boosts: usize,
    respawns: usize,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "eventCounts")]
    event_counts: BTreeMap<String, usize>,
    result: RaceResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

/// Per-tick invariant checks over consecutive snapshots.
#[derive(Debug, Default)]
struct InvariantMonitor {
    participant_count: usize,
    checkpoint_count: usize,
    last_state: Option<RaceState>,
    last_laps: BTreeMap<String, u32>,
    last_checkpoint: BTreeMap<String, usize>,
}

impl InvariantMonitor {
    fn new(participant_count: usize, checkpoint_count: usize) -> Self {
        Self {
            participant_count,
            checkpoint_count,
            ..Self::default()
        }
    }

    fn observe(&mut self, snapshot: &RaceSnapshot) -> Vec<String> {
        let mut anomalies = Vec::new();

        if let Some(previous) = self.last_state {
            if snapshot.state < previous {
                anomalies.push(format!(
                    "race state regressed: {previous:?} -> {:?}",
                    snapshot.state
                ));
            }
        }
        self.last_state = Some(snapshot.state);

        if snapshot.results.len() > self.participant_count {
            anomalies.push(format!(
                "ledger exceeds participants: {} > {}",
                snapshot.results.len(),
                self.participant_count
            ));
        }
        let unique: BTreeSet<&str> = snapshot
            .results
            .iter()
            .map(|result| result.participant_id.as_str())
            .collect();
        if unique.len() != snapshot.results.len() {
            anomalies.push("participant finished more than once".to_string());
        }

        let respawned: HashSet<&str> = snapshot
            .events
            .iter()
            .filter_map(|event| match event {
                RuntimeEvent::KartRespawned { kart_id, .. } => Some(kart_id.as_str()),
                _ => None,
            })
            .collect();
        let went_green = snapshot.events.iter().any(|event| {
            matches!(
                event,
                RuntimeEvent::StateChanged {
                    to: RaceState::Racing,
                    ..
                }
            )
        });

        for kart in &snapshot.karts {
            if !kart.position.is_finite()
                || !kart.velocity.is_finite()
                || !kart.rotation.is_finite()
            {
                anomalies.push(format!("non-finite kinematics: {}", kart.id));
            }

            if let Some(&previous) = self.last_laps.get(&kart.id) {
                if kart.laps_completed < previous && !went_green {
                    anomalies.push(format!(
                        "laps regressed: {} {} -> {}",
                        kart.id, previous, kart.laps_completed
                    ));
                }
            }
            self.last_laps.insert(kart.id.clone(), kart.laps_completed);

            if let Some(&previous) = self.last_checkpoint.get(&kart.id) {
                let expected = (previous + 1) % self.checkpoint_count.max(1);
                let moved = kart.last_checkpoint != previous && kart.last_checkpoint != expected;
                if moved && !respawned.contains(kart.id.as_str()) && !went_green {
                    anomalies.push(format!(
                        "checkpoint skipped: {} {} -> {}",
                        kart.id, previous, kart.last_checkpoint
                    ));
                }
            }
            self.last_checkpoint.insert(kart.id.clone(), kart.last_checkpoint);
        }
        anomalies
    }
}

fn main() {
    init_tracing("warn");
    let cli = Cli::parse();
    let run_started_at_ms = now_ms();
    let seed = normalize_seed(cli.seed.unwrap_or(run_started_at_ms));
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed, run_started_at_ms));

    let mut config = match SessionConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            emit_log(
                "error",
                "config_load_failed",
                &match_id,
                Some(seed),
                None,
                json!({ "error": err.to_string() }),
            );
            std::process::exit(2);
        }
    };
    config.race.total_laps = normalize_total_laps(cli.laps, config.race.total_laps);
    let racers = cli.racers.clamp(1, MAX_RACERS);

    emit_log(
        "info",
        "race_started",
        &match_id,
        Some(seed),
        None,
        json!({
            "racers": racers,
            "laps": config.race.total_laps,
            "maxSeconds": cli.max_seconds,
        }),
    );

    let run = match run_race(&match_id, seed, racers, config, cli.max_seconds) {
        Ok(run) => run,
        Err(err) => {
            emit_log(
                "error",
                "session_setup_failed",
                &match_id,
                Some(seed),
                None,
                json!({ "error": err }),
            );
            std::process::exit(2);
        }
    };

    for anomaly in &run.anomaly_records {
        emit_log(
            "warn",
            "anomaly_detected",
            &match_id,
            Some(seed),
            Some(anomaly.tick),
            json!({ "message": anomaly.message }),
        );
    }

    emit_log(
        "info",
        "race_finished",
        &match_id,
        Some(seed),
        Some(run.finished_tick),
        json!({
            "state": run.result.state,
            "durationSeconds": run.result.duration_seconds,
            "finishers": run.result.finishers,
            "anomalyCount": run.anomaly_records.len(),
        }),
    );

    println!(
        "{}",
        serde_json::to_string(&run.result).unwrap_or_default()
    );

    let has_anomaly = !run.result.anomalies.is_empty();
    let summary = RunSummary {
        started_at_ms: run_started_at_ms,
        finished_at_ms: now_ms(),
        anomaly_count: run.anomaly_records.len(),
        event_counts: run.event_counts,
        result: run.result,
        anomaly_records: run.anomaly_records,
    };

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                Some(seed),
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
    }

    if has_anomaly {
        std::process::exit(1);
    }
}

struct RaceRun {
    result: RaceResultLine,
    anomaly_records: Vec<AnomalyRecord>,
    event_counts: BTreeMap<String, usize>,
    finished_tick: u64,
}

fn run_race(
    match_id: &str,
    seed: u32,
    racers: usize,
    config: SessionConfig,
    max_seconds: u64,
) -> Result<RaceRun, String> {
    let start_racers: Vec<StartRacer> = (0..racers)
        .map(|idx| StartRacer {
            id: format!("kart_{}", idx + 1),
            name: format!("BOT-{:02}", idx + 1),
            owner_id: format!("bot_{}", idx + 1),
        })
        .collect();
    let laps = config.race.total_laps;
    let mut session =
        RaceSession::new(config, start_racers.clone()).map_err(|err| err.to_string())?;
    let mut bots: Vec<BotDriver> = (0..racers)
        .map(|idx| BotDriver::new(seed.wrapping_add(idx as u32)))
        .collect();
    let mut monitor = InvariantMonitor::new(racers, session.track().len());

    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();
    let max_ticks = max_seconds.saturating_mul(TICK_RATE as u64);

    session.start_countdown();
    while !session.is_finished() {
        for (racer, bot) in start_racers.iter().zip(bots.iter_mut()) {
            let (Some(kinematics), Some(progress)) = (
                session.kart_kinematics(&racer.id),
                session.kart_progress(&racer.id),
            ) else {
                continue;
            };
            let input = bot.drive(
                session.tick(),
                &kinematics,
                progress.last_checkpoint,
                session.track(),
            );
            session.receive_input(&racer.owner_id, &racer.id, input);
        }

        session.step();
        let snapshot = session.build_snapshot(true);
        for message in monitor.observe(&snapshot) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                snapshot.tick,
                message,
            );
        }
        for event in &snapshot.events {
            *event_counts.entry(event_key(event).to_string()).or_insert(0) += 1;
        }

        if !session.is_finished() && snapshot.tick >= max_ticks {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                snapshot.tick,
                format!("race did not finish within {max_seconds}s"),
            );
            break;
        }
    }

    let summary = session.build_summary();
    let finished_tick = session.tick();
    session.teardown();

    let count = |key: &str| event_counts.get(key).copied().unwrap_or(0);
    let result = RaceResultLine {
        match_id: match_id.to_string(),
        seed,
        racers,
        laps,
        state: summary.state,
        duration_seconds: summary.duration_seconds,
        finishers: summary.results.len(),
        finish_order: summary
            .results
            .iter()
            .map(|entry| entry.participant_id.clone())
            .collect(),
        best_time_text: summary
            .results
            .first()
            .map(|entry| format_race_time(entry.time)),
        laps_completed: count("lap_completed"),
        drift_boosts: count("drift_boost"),
        respawns: count("kart_respawned"),
        anomalies,
    };

    Ok(RaceRun {
        result,
        anomaly_records,
        event_counts,
        finished_tick,
    })
}

fn event_key(event: &RuntimeEvent) -> &'static str {
    match event {
        RuntimeEvent::StateChanged { .. } => "state_changed",
        RuntimeEvent::CheckpointPassed { .. } => "checkpoint_passed",
        RuntimeEvent::LapCompleted { .. } => "lap_completed",
        RuntimeEvent::KartFinished { .. } => "kart_finished",
        RuntimeEvent::DriftBoost { .. } => "drift_boost",
        RuntimeEvent::KartDown { .. } => "kart_down",
        RuntimeEvent::KartRespawned { .. } => "kart_respawned",
    }
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("race-{seed}-{timestamp_ms}")
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    seed: Option<u32>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        seed,
        tick,
        details,
    };
    eprintln!("{}", serde_json::to_string(&log_line).unwrap_or_default());
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
