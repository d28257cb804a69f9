use serde_json::Value;

use crate::types::KartInput;

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
        reconnect_token: Option<String>,
    },
    LobbyStart {
        laps: Option<i64>,
    },
    Input {
        input: KartInput,
    },
    Ping {
        t: f64,
    },
}

/// Parses one text frame. Anything malformed, including a known field with
/// the wrong type, yields `None`.
pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let reconnect_token = match object.get("reconnectToken") {
                None | Some(Value::Null) => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            Some(ParsedClientMessage::Hello {
                name,
                reconnect_token,
            })
        }
        "lobby_start" => {
            let laps = parse_optional_i64(object.get("laps"))?;
            Some(ParsedClientMessage::LobbyStart { laps })
        }
        "input" => {
            let throttle = parse_axis(object.get("throttle"))?;
            let steer = parse_axis(object.get("steer"))?;
            let drift = parse_optional_bool(object.get("drift"))?;
            let brake = parse_optional_bool(object.get("brake"))?;
            Some(ParsedClientMessage::Input {
                input: KartInput {
                    throttle,
                    steer,
                    drift,
                    brake,
                }
                .sanitized(),
            })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_axis(value: Option<&Value>) -> Option<f32> {
    match value {
        None => Some(0.0),
        Some(value) => value.as_f64().map(|number| number as f32),
    }
}

fn parse_optional_bool(value: Option<&Value>) -> Option<bool> {
    match value {
        None => Some(false),
        Some(value) => value.as_bool(),
    }
}

fn parse_optional_i64(value: Option<&Value>) -> Option<Option<i64>> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let Some(value) = value else {
        return Some(None);
    };
    if let Some(number) = value.as_i64() {
        return Some(Some(number));
    }
    if let Some(number) = value.as_u64() {
        return i64::try_from(number).ok().map(Some);
    }
    if let Some(number) = value.as_f64() {
        let floored = number.floor();
        if !floored.is_finite() || floored.abs() > MAX_SAFE_INTEGER_F64 {
            return None;
        }
        return Some(Some(floored as i64));
    }
    None
}
