use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use kart_race_server::config::SessionConfig;
use kart_race_server::constants::{MAX_RACERS, TICK_MS};
use kart_race_server::logging::init_tracing;
use kart_race_server::server_protocol::{parse_client_message, ParsedClientMessage};
use kart_race_server::server_utils::{
    kart_id_for, player_order_key, resolve_total_laps, sanitize_name,
};
use kart_race_server::session::RaceSession;
use kart_race_server::types::{KartInput, StartRacer};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone, Debug)]
struct LobbyPlayerInternal {
    id: String,
    name: String,
    connected: bool,
    reconnect_token: String,
    kart_id: Option<String>,
}

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: Option<String>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    lobby_players: HashMap<String, LobbyPlayerInternal>,
    active_client_by_player_id: HashMap<String, String>,
    host_id: Option<String>,
    session: Option<RaceSession>,
    config: SessionConfig,
}

impl ServerState {
    fn new(config: SessionConfig) -> Self {
        Self {
            clients: HashMap::new(),
            lobby_players: HashMap::new(),
            active_client_by_player_id: HashMap::new(),
            host_id: None,
            session: None,
            config,
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing("info");

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let config_path = std::env::var("RACE_CONFIG_PATH").ok().map(PathBuf::from);
    let config = match SessionConfig::load_or_default(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid race configuration");
            std::process::exit(1);
        }
    };

    let state = Arc::new(Mutex::new(ServerState::new(config)));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found, serving websocket only");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(port, "listening");
    axum::serve(listener, app).await
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist/client"), PathBuf::from("public")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    match message {
        ParsedClientMessage::Hello {
            name,
            reconnect_token,
        } => {
            handle_hello(state, client_id, name, reconnect_token).await;
        }
        ParsedClientMessage::Ping { t } => {
            let mut guard = state.lock().await;
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "pong",
                    "t": t,
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        ParsedClientMessage::LobbyStart { laps } => {
            let player_id = bound_player_id(&state, client_id).await;
            let Some(player_id) = player_id else {
                send_error_to_client(&state, client_id, "send hello first").await;
                return;
            };
            handle_lobby_start(state, &player_id, laps).await;
        }
        ParsedClientMessage::Input { input } => {
            let player_id = bound_player_id(&state, client_id).await;
            let Some(player_id) = player_id else {
                send_error_to_client(&state, client_id, "send hello first").await;
                return;
            };
            handle_input(state, &player_id, input).await;
        }
    }
}

async fn bound_player_id(state: &SharedState, client_id: &str) -> Option<String> {
    let guard = state.lock().await;
    guard
        .clients
        .get(client_id)
        .and_then(|ctx| ctx.player_id.clone())
}

async fn handle_hello(
    state: SharedState,
    client_id: &str,
    requested_name: String,
    reconnect_token: Option<String>,
) {
    let mut guard = state.lock().await;
    let name = sanitize_name(&requested_name);

    if let Some(token) = reconnect_token {
        if let Some(existing_id) = find_player_id_by_token(&guard, &token) {
            if let Some(member) = guard.lobby_players.get_mut(&existing_id) {
                member.name = name;
                member.connected = true;
            }
            bind_client_to_player(&mut guard, client_id, &existing_id);
            ensure_host_assigned(&mut guard, Some(existing_id.clone()));
            send_welcome_and_initial_state(&mut guard, client_id, &existing_id);
            broadcast_lobby(&mut guard, None);
            info!(player_id = %existing_id, "player reconnected");
            return;
        }
    }

    if guard.session.is_some() {
        send_to_client(
            &mut guard,
            client_id,
            &json!({
                "type": "error",
                "message": "race already running; reconnection only",
            }),
            QueuePolicy::DisconnectOnFull,
        );
        return;
    }

    if guard.lobby_players.len() >= MAX_RACERS {
        send_to_client(
            &mut guard,
            client_id,
            &json!({
                "type": "error",
                "message": "lobby is full",
            }),
            QueuePolicy::DisconnectOnFull,
        );
        return;
    }

    let player_id = make_id("player");
    let player = LobbyPlayerInternal {
        id: player_id.clone(),
        name,
        connected: true,
        reconnect_token: make_reconnect_token(),
        kart_id: None,
    };

    guard.lobby_players.insert(player_id.clone(), player);
    bind_client_to_player(&mut guard, client_id, &player_id);
    ensure_host_assigned(&mut guard, Some(player_id.clone()));
    send_welcome_and_initial_state(&mut guard, client_id, &player_id);
    broadcast_lobby(&mut guard, None);
    info!(player_id = %player_id, "player joined lobby");
}

async fn handle_lobby_start(state: SharedState, requested_by: &str, laps: Option<i64>) {
    let mut guard = state.lock().await;
    if guard.session.is_some() {
        return;
    }

    ensure_host_assigned(&mut guard, None);
    if guard.host_id.as_deref() != Some(requested_by) {
        if let Some(client_id) = guard.active_client_by_player_id.get(requested_by).cloned() {
            send_to_client(
                &mut guard,
                &client_id,
                &json!({
                    "type": "error",
                    "message": "only host can start",
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        return;
    }

    let mut racer_ids: Vec<String> = guard
        .lobby_players
        .values()
        .filter(|player| player.connected)
        .map(|player| player.id.clone())
        .collect();
    racer_ids.sort_by_key(|id| player_order_key(id));

    let racers: Vec<StartRacer> = racer_ids
        .iter()
        .filter_map(|player_id| guard.lobby_players.get(player_id))
        .map(|player| StartRacer {
            id: kart_id_for(&player.id),
            name: player.name.clone(),
            owner_id: player.id.clone(),
        })
        .collect();

    let mut config = guard.config.clone();
    config.race.total_laps = resolve_total_laps(laps, config.race.total_laps);

    let mut session = match RaceSession::new(config, racers.clone()) {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "race session could not be created");
            if let Some(client_id) = guard.active_client_by_player_id.get(requested_by).cloned() {
                send_to_client(
                    &mut guard,
                    &client_id,
                    &json!({
                        "type": "error",
                        "message": err.to_string(),
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
            return;
        }
    };
    session.start_countdown();
    let total_laps = session.total_laps();
    guard.session = Some(session);

    let disconnected: Vec<String> = guard
        .lobby_players
        .values()
        .filter(|player| !player.connected)
        .map(|player| player.id.clone())
        .collect();
    for player_id in disconnected {
        guard.lobby_players.remove(&player_id);
    }
    for racer in &racers {
        if let Some(member) = guard.lobby_players.get_mut(&racer.owner_id) {
            member.kart_id = Some(racer.id.clone());
        }
    }

    broadcast_lobby(
        &mut guard,
        Some(format!("race started: {} racers, {} laps", racers.len(), total_laps)),
    );

    for racer in &racers {
        if let Some(client_id) = guard.active_client_by_player_id.get(&racer.owner_id).cloned() {
            send_race_init(&mut guard, &client_id, &racer.owner_id);
        }
    }
}

async fn handle_input(state: SharedState, player_id: &str, input: KartInput) {
    let mut guard = state.lock().await;
    let Some(kart_id) = guard
        .lobby_players
        .get(player_id)
        .and_then(|member| member.kart_id.clone())
    else {
        return;
    };
    if let Some(session) = guard.session.as_mut() {
        session.receive_input(player_id, &kart_id, input);
    }
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id, true);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str, broadcast_after: bool) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let Some(bound_player_id) = context.player_id else {
        return;
    };

    if state
        .active_client_by_player_id
        .get(&bound_player_id)
        .map(|active| active != client_id)
        .unwrap_or(true)
    {
        return;
    }

    state.active_client_by_player_id.remove(&bound_player_id);

    let race_running = state.session.is_some();
    let mut remove_member = false;
    if let Some(member) = state.lobby_players.get_mut(&bound_player_id) {
        if race_running {
            member.connected = false;
            if let (Some(session), Some(kart_id)) =
                (state.session.as_mut(), member.kart_id.as_ref())
            {
                session.clear_input(kart_id);
            }
        } else {
            remove_member = true;
        }
    }

    if remove_member {
        state.lobby_players.remove(&bound_player_id);
    }

    if state.host_id.as_deref() == Some(&bound_player_id) {
        state.host_id = choose_next_host(state);
    }
    info!(player_id = %bound_player_id, race_running, "player disconnected");

    if broadcast_after {
        broadcast_lobby(state, None);
    }
}

fn send_welcome_and_initial_state(state: &mut ServerState, client_id: &str, player_id: &str) {
    let Some(member) = state.lobby_players.get(player_id).cloned() else {
        return;
    };

    send_to_client(
        state,
        client_id,
        &json!({
            "type": "welcome",
            "playerId": member.id,
            "reconnectToken": member.reconnect_token,
            "isHost": state.host_id.as_deref() == Some(player_id),
        }),
        QueuePolicy::DisconnectOnFull,
    );

    if state.session.is_none() {
        return;
    }
    send_race_init(state, client_id, player_id);

    let Some(snapshot) = state
        .session
        .as_mut()
        .map(|session| session.build_snapshot(false))
    else {
        return;
    };
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "state",
            "snapshot": snapshot,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn send_race_init(state: &mut ServerState, client_id: &str, player_id: &str) {
    let kart_id = state
        .lobby_players
        .get(player_id)
        .and_then(|member| member.kart_id.clone());
    let Some(payload) = state.session.as_ref().map(|session| {
        json!({
            "type": "race_init",
            "meId": player_id,
            "kartId": kart_id,
            "checkpoints": session.track().checkpoint_views(),
            "vehicle": session.config().vehicle,
            "race": session.config().race,
            "totalLaps": session.total_laps(),
            "countdownEndTime": session.countdown_end_time(),
        })
    }) else {
        return;
    };
    send_to_client(state, client_id, &payload, QueuePolicy::DisconnectOnFull);
}

fn bind_client_to_player(state: &mut ServerState, client_id: &str, player_id: &str) {
    if let Some(old_client_id) = state.active_client_by_player_id.get(player_id).cloned() {
        if old_client_id != client_id {
            if let Some(old_client) = state.clients.get_mut(&old_client_id) {
                old_client.player_id = None;
                let _ = old_client.tx.try_send(OutboundMessage::Close {
                    code: 4001,
                    reason: "superseded by new connection".to_string(),
                });
            }
        }
    }

    if let Some(ctx) = state.clients.get_mut(client_id) {
        ctx.player_id = Some(player_id.to_string());
    }
    state
        .active_client_by_player_id
        .insert(player_id.to_string(), client_id.to_string());
}

fn broadcast_lobby(state: &mut ServerState, note: Option<String>) {
    ensure_host_assigned(state, None);

    let mut players: Vec<LobbyPlayerInternal> = state.lobby_players.values().cloned().collect();
    players.sort_by_key(|player| player_order_key(&player.id));

    let can_start = state.session.is_none()
        && state
            .host_id
            .as_ref()
            .and_then(|host_id| state.lobby_players.get(host_id))
            .map(|host| host.connected)
            .unwrap_or(false);

    let players_payload: Vec<Value> = players
        .iter()
        .map(|player| {
            json!({
                "id": player.id,
                "name": player.name,
                "connected": player.connected,
                "kartId": player.kart_id,
                "isHost": state.host_id.as_deref() == Some(player.id.as_str()),
            })
        })
        .collect();

    broadcast(
        state,
        &json!({
            "type": "lobby",
            "players": players_payload,
            "hostId": state.host_id,
            "canStart": can_start,
            "running": state.session.is_some(),
            "maxRacers": MAX_RACERS,
            "note": note,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_race(&mut guard);
        }
    });
}

fn tick_race(state: &mut ServerState) {
    let snapshot = {
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.step();
        session.build_snapshot(true)
    };

    broadcast(
        state,
        &json!({
            "type": "state",
            "snapshot": snapshot,
        }),
        QueuePolicy::DropOnFull,
    );

    let summary = {
        let Some(session) = state.session.as_ref() else {
            return;
        };
        if session.is_finished() {
            Some(session.build_summary())
        } else {
            None
        }
    };

    if let Some(summary) = summary {
        info!(
            finishers = summary.results.len(),
            duration_seconds = summary.duration_seconds,
            "race over"
        );
        broadcast(
            state,
            &json!({
                "type": "race_over",
                "summary": summary,
                "generatedAtIso": chrono::Utc::now().to_rfc3339(),
            }),
            QueuePolicy::DisconnectOnFull,
        );

        if let Some(mut session) = state.session.take() {
            session.teardown();
        }
        let departed: Vec<String> = state
            .lobby_players
            .values()
            .filter(|player| !player.connected)
            .map(|player| player.id.clone())
            .collect();
        for player_id in departed {
            state.lobby_players.remove(&player_id);
        }
        for player in state.lobby_players.values_mut() {
            player.kart_id = None;
        }

        ensure_host_assigned(state, None);
        broadcast_lobby(state, Some("race finished, host may start again".to_string()));
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id, false);
    }
}

fn broadcast(state: &mut ServerState, message: &Value, policy: QueuePolicy) {
    let payload = message.to_string();
    let client_ids: Vec<String> = state.clients.keys().cloned().collect();
    let mut failed_clients = Vec::new();
    for client_id in client_ids {
        let Some(client) = state.clients.get(&client_id) else {
            continue;
        };
        if !can_receive_broadcast(state, &client_id, client) {
            continue;
        }
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id);
        }
    }
    if policy == QueuePolicy::DisconnectOnFull {
        for client_id in failed_clients {
            disconnect_client_internal(state, &client_id, false);
        }
    }
}

fn can_receive_broadcast(state: &ServerState, client_id: &str, client: &ClientContext) -> bool {
    let Some(player_id) = client.player_id.as_ref() else {
        return false;
    };
    if state
        .active_client_by_player_id
        .get(player_id)
        .map(|id| id.as_str())
        != Some(client_id)
    {
        return false;
    }
    state.lobby_players.contains_key(player_id)
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        &mut guard,
        client_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn ensure_host_assigned(state: &mut ServerState, preferred_player_id: Option<String>) {
    if state
        .host_id
        .as_ref()
        .and_then(|host_id| state.lobby_players.get(host_id))
        .map(|host| host.connected)
        .unwrap_or(false)
    {
        return;
    }

    if let Some(preferred_player_id) = preferred_player_id {
        if state
            .lobby_players
            .get(&preferred_player_id)
            .map(|player| player.connected)
            .unwrap_or(false)
        {
            state.host_id = Some(preferred_player_id);
            return;
        }
    }

    state.host_id = choose_next_host(state);
}

fn choose_next_host(state: &ServerState) -> Option<String> {
    state
        .lobby_players
        .values()
        .filter(|player| player.connected)
        .min_by_key(|player| player_order_key(&player.id))
        .map(|player| player.id.clone())
}

fn find_player_id_by_token(state: &ServerState, token: &str) -> Option<String> {
    state
        .lobby_players
        .values()
        .find(|player| player.reconnect_token == token)
        .map(|player| player.id.clone())
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn make_reconnect_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
