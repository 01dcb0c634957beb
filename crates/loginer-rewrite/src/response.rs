use bytes::Bytes;
use serde_json::{json, Value};

use crate::constants::{login_methods, ALL_SELECT_PLATFORMS};
use crate::errors::RewriteError;
use crate::events::{EngineEvent, EventKind};

/// Response handlers. Each one parses the body on its own, converts any
/// failure into an `ERROR` event and returns `None` so the original body
/// passes through; a transaction is never dropped because a rewrite failed.
pub(crate) type ResponseHandler = fn(&[u8], &mut Vec<EngineEvent>) -> Option<Bytes>;

fn parse_object(body: &[u8]) -> Result<Value, RewriteError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|error| RewriteError::Parse(error.to_string()))?;
    if !value.is_object() {
        return Err(RewriteError::Shape(
            "expected a JSON object response".to_string(),
        ));
    }
    Ok(value)
}

fn recover(context: &str, error: RewriteError, events: &mut Vec<EngineEvent>) -> Option<Bytes> {
    events.push(EngineEvent::new(
        EventKind::Error,
        format!("{context}: {error}"),
    ));
    None
}

/// Forces the review gate open in the PC configuration response:
/// `game.config.cv_review_status` becomes `1`.
pub(crate) fn handle_pc_config(body: &[u8], events: &mut Vec<EngineEvent>) -> Option<Bytes> {
    let mut payload = match parse_object(body) {
        Ok(payload) => payload,
        Err(error) => return recover("pc config response", error, events),
    };

    let Some(config) = payload
        .get_mut("game")
        .and_then(|game| game.get_mut("config"))
        .and_then(Value::as_object_mut)
    else {
        return recover(
            "pc config response",
            RewriteError::Shape("missing game.config object".to_string()),
            events,
        );
    };
    config.insert("cv_review_status".to_string(), json!(1));

    match serde_json::to_vec(&payload) {
        Ok(rewritten) => {
            events.push(EngineEvent::new(EventKind::Info, "pc config updated"));
            Some(Bytes::from(rewritten))
        }
        Err(error) => recover(
            "pc config response",
            RewriteError::Parse(error.to_string()),
            events,
        ),
    }
}

/// Rewrites the login-methods response: injects the fixed descriptor list
/// under `entrance`, enables platform selection for both flows, and opens
/// every configured channel to all platforms.
pub(crate) fn handle_login_methods(body: &[u8], events: &mut Vec<EngineEvent>) -> Option<Bytes> {
    let mut payload = match parse_object(body) {
        Ok(payload) => payload,
        Err(error) => return recover("login methods response", error, events),
    };

    payload["entrance"] = json!([login_methods()]);
    payload["select_platform"] = json!(true);
    payload["qrcode_select_platform"] = json!(true);

    if let Some(channels) = payload.get_mut("config").and_then(Value::as_object_mut) {
        for (name, channel) in channels.iter_mut() {
            let Some(channel) = channel.as_object_mut() else {
                return recover(
                    "login methods response",
                    RewriteError::Shape(format!("channel {name} is not an object")),
                    events,
                );
            };
            channel.insert("select_platforms".to_string(), json!(ALL_SELECT_PLATFORMS));
        }
    }

    match serde_json::to_vec(&payload) {
        Ok(rewritten) => {
            events.push(EngineEvent::new(EventKind::Info, "login methods updated"));
            Some(Bytes::from(rewritten))
        }
        Err(error) => recover(
            "login methods response",
            RewriteError::Parse(error.to_string()),
            events,
        ),
    }
}

/// Observation only: surfaces the QR-code creation payload to the supervisor
/// without touching the body. Mutation hooks may land here later.
pub(crate) fn observe_qrcode_create(body: &[u8], events: &mut Vec<EngineEvent>) -> Option<Bytes> {
    match parse_object(body) {
        Ok(payload) => events.push(EngineEvent::new(EventKind::Qrcode, payload.to_string())),
        Err(error) => {
            recover("qrcode create response", error, events);
        }
    }
    None
}

/// Observation only: surfaces the QR-code token-exchange payload.
pub(crate) fn observe_qrcode_exchange(body: &[u8], events: &mut Vec<EngineEvent>) -> Option<Bytes> {
    match parse_object(body) {
        Ok(payload) => events.push(EngineEvent::new(EventKind::QrcodeLogin, payload.to_string())),
        Err(error) => {
            recover("qrcode exchange response", error, events);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{handle_login_methods, handle_pc_config, observe_qrcode_create};
    use crate::events::EventKind;

    #[test]
    fn pc_config_review_status_is_forced_on() {
        let mut events = Vec::new();
        let body = br#"{"game":{"config":{"cv_review_status":0}}}"#;
        let rewritten = handle_pc_config(body, &mut events).expect("rewritten body");
        let payload: Value = serde_json::from_slice(&rewritten).expect("valid json");
        assert_eq!(payload["game"]["config"]["cv_review_status"], 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Info);
    }

    #[test]
    fn malformed_pc_config_passes_through_with_an_error_event() {
        let mut events = Vec::new();
        assert!(handle_pc_config(b"not json at all", &mut events).is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
    }

    #[test]
    fn pc_config_without_game_section_is_an_error() {
        let mut events = Vec::new();
        assert!(handle_pc_config(br#"{"other":{}}"#, &mut events).is_none());
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(events[0].payload.contains("game.config"));
    }

    #[test]
    fn pc_config_with_a_non_object_config_is_an_error() {
        let mut events = Vec::new();
        let body = br#"{"game":{"config":"oops"}}"#;
        assert!(handle_pc_config(body, &mut events).is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
    }

    #[test]
    fn login_methods_rewrite_covers_entrance_flags_and_platforms() {
        let mut events = Vec::new();
        let body = br#"{"config":{"g1":{},"g2":{}}}"#;
        let rewritten = handle_login_methods(body, &mut events).expect("rewritten body");
        let payload: Value = serde_json::from_slice(&rewritten).expect("valid json");

        assert_eq!(payload["select_platform"], true);
        assert_eq!(payload["qrcode_select_platform"], true);
        let entrance = payload["entrance"].as_array().expect("entrance wrapper");
        assert_eq!(entrance.len(), 1);
        assert_eq!(entrance[0].as_array().expect("descriptor list").len(), 4);

        for channel in ["g1", "g2"] {
            let platforms: Vec<i64> = payload["config"][channel]["select_platforms"]
                .as_array()
                .expect("platform list")
                .iter()
                .map(|value| value.as_i64().expect("platform index"))
                .collect();
            assert_eq!(platforms, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn login_methods_without_config_map_still_rewrites() {
        let mut events = Vec::new();
        let rewritten = handle_login_methods(b"{}", &mut events).expect("rewritten body");
        let payload: Value = serde_json::from_slice(&rewritten).expect("valid json");
        assert!(payload["entrance"].is_array());
    }

    #[test]
    fn login_methods_with_a_non_object_channel_is_an_error() {
        let mut events = Vec::new();
        let body = br#"{"config":{"g1":"not-an-object"}}"#;
        assert!(handle_login_methods(body, &mut events).is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(events[0].payload.contains("g1"));
    }

    #[test]
    fn qrcode_create_is_observed_but_never_mutated() {
        let mut events = Vec::new();
        let body = br#"{"qrcode_url":"https://example/qr"}"#;
        assert!(observe_qrcode_create(body, &mut events).is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Qrcode);
        assert!(events[0].payload.contains("qrcode_url"));
    }
}
