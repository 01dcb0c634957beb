use regex::Regex;

use crate::constants::{
    EXEMPT_PATH_PATTERNS, GOVERNED_DOMAIN, LOGIN_METHODS_PATTERN, PC_CONFIG_PATTERN,
    QRCODE_CREATE_PATTERN, QRCODE_EXCHANGE_PATTERN,
};
use crate::events::{EngineEvent, EventKind};
use crate::request::inject_client_version;
use crate::response::{
    handle_login_methods, handle_pc_config, observe_qrcode_create, observe_qrcode_exchange,
    ResponseHandler,
};
use crate::types::{set_content_length, InterceptedRequest, InterceptedResponse};

struct ResponseRule {
    pattern: Regex,
    handler: ResponseHandler,
}

/// Rule-based rewrite engine for the governed login API.
///
/// Requests get the client-version injection unless the path is exempt;
/// responses are dispatched through an ordered path-pattern table. Every
/// mutation or failure is reported as an [`EngineEvent`] so the supervisor
/// can relay it.
pub struct RewriteEngine {
    qrcode_create: Regex,
    exempt: Vec<Regex>,
    response_rules: Vec<ResponseRule>,
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteEngine {
    pub fn new() -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).expect("built-in path patterns must be valid regexes")
        };
        Self {
            qrcode_create: compile(QRCODE_CREATE_PATTERN),
            exempt: EXEMPT_PATH_PATTERNS.iter().map(|p| compile(p)).collect(),
            response_rules: vec![
                ResponseRule {
                    pattern: compile(PC_CONFIG_PATTERN),
                    handler: handle_pc_config,
                },
                ResponseRule {
                    pattern: compile(LOGIN_METHODS_PATTERN),
                    handler: handle_login_methods,
                },
                ResponseRule {
                    pattern: compile(QRCODE_CREATE_PATTERN),
                    handler: observe_qrcode_create,
                },
                ResponseRule {
                    pattern: compile(QRCODE_EXCHANGE_PATTERN),
                    handler: observe_qrcode_exchange,
                },
            ],
        }
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|pattern| pattern.is_match(path))
    }

    /// Request phase. Mutates governed POST bodies in place and returns the
    /// events to report; exempt paths pass silently and failures leave the
    /// request untouched.
    pub fn on_request(&self, request: &mut InterceptedRequest) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        if self.qrcode_create.is_match(&request.path) {
            events.push(EngineEvent::new(
                EventKind::CreateLoginQrcode,
                request.path.clone(),
            ));
        }

        if request.path == "/" || request.host != GOVERNED_DOMAIN {
            return events;
        }
        if self.is_exempt(&request.path) {
            return events;
        }

        if let Err(error) = inject_client_version(request) {
            events.push(EngineEvent::new(
                EventKind::Error,
                format!(
                    "client version injection failed for {}: {error}",
                    request.path
                ),
            ));
        }
        events.push(EngineEvent::new(EventKind::Request, request.path.clone()));
        events
    }

    /// Response phase. Every rule whose pattern matches runs, in table
    /// order; a handler that returns a new body also gets its framing
    /// header fixed up before the next rule sees it.
    pub fn on_response(&self, response: &mut InterceptedResponse) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for rule in &self.response_rules {
            if !rule.pattern.is_match(&response.request_path) {
                continue;
            }
            if let Some(rewritten) = (rule.handler)(&response.body, &mut events) {
                set_content_length(&mut response.headers, rewritten.len());
                response.body = rewritten;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::Value;

    use super::RewriteEngine;
    use crate::events::EventKind;
    use crate::types::{header_value, InterceptedRequest, InterceptedResponse};

    fn governed_post(path: &str, body: &[u8]) -> InterceptedRequest {
        InterceptedRequest {
            method: "POST".to_string(),
            host: "service.mkey.163.com".to_string(),
            path: path.to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            body: Bytes::copy_from_slice(body),
        }
    }

    fn response_for(path: &str, body: &[u8]) -> InterceptedResponse {
        InterceptedResponse {
            request_path: path.to_string(),
            status: 200,
            headers: vec![("Content-Length".to_string(), body.len().to_string())],
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn governed_requests_get_the_client_version() {
        let engine = RewriteEngine::new();
        let mut request = governed_post("/mpay/api/users/login", br#"{"arch":"x64"}"#);
        let events = engine.on_request(&mut request);

        assert_eq!(request.body.as_ref(), br#"{"cv":"i4.7.0"}"#);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Request);
        assert_eq!(events[0].payload, "/mpay/api/users/login");
    }

    #[test]
    fn exempt_paths_keep_their_bodies_byte_identical() {
        let engine = RewriteEngine::new();
        let body = br#"{"token":"signed-opaque-blob","arch":"x64"}"#;
        let mut request =
            governed_post("/mpay/api/users/login/qrcode/exchange_token", body);
        let events = engine.on_request(&mut request);

        assert_eq!(request.body.as_ref(), body.as_slice());
        assert!(events.is_empty(), "exempt paths are not announced: {events:?}");
    }

    #[test]
    fn foreign_hosts_and_probe_paths_are_ignored() {
        let engine = RewriteEngine::new();

        let mut foreign = governed_post("/mpay/api/users/login", br#"{"arch":"x64"}"#);
        foreign.host = "example.com".to_string();
        assert!(engine.on_request(&mut foreign).is_empty());
        assert_eq!(foreign.body.as_ref(), br#"{"arch":"x64"}"#);

        let mut probe = governed_post("/", b"{}");
        assert!(engine.on_request(&mut probe).is_empty());
    }

    #[test]
    fn qrcode_create_request_is_announced() {
        let engine = RewriteEngine::new();
        let mut request = governed_post("/mpay/api/qrcode/create_login", b"{}");
        let events = engine.on_request(&mut request);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CreateLoginQrcode);
        assert_eq!(events[0].payload, "/mpay/api/qrcode/create_login");
        // create_login sits under the exempt /mpay/api/qrcode prefix
        assert_eq!(request.body.as_ref(), b"{}");
    }

    #[test]
    fn failed_injection_reports_an_error_and_passes_through() {
        let engine = RewriteEngine::new();
        let mut request = governed_post("/mpay/api/users/login", b"not json");
        let events = engine.on_request(&mut request);

        assert_eq!(request.body.as_ref(), b"not json");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(events[0].payload.contains("/mpay/api/users/login"));
        assert_eq!(events[1].kind, EventKind::Request);
    }

    #[test]
    fn pc_config_response_forces_the_review_gate() {
        let engine = RewriteEngine::new();
        let mut response = response_for(
            "/mpay/games/pc_config",
            br#"{"game":{"config":{"cv_review_status":0}}}"#,
        );
        let events = engine.on_response(&mut response);

        let payload: Value = serde_json::from_slice(&response.body).expect("valid json");
        assert_eq!(payload["game"]["config"]["cv_review_status"], 1);
        assert_eq!(
            header_value(&response.headers, "content-length"),
            Some(response.body.len().to_string().as_str()),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Info);
    }

    #[test]
    fn login_methods_response_is_rewritten_per_channel() {
        let engine = RewriteEngine::new();
        let mut response = response_for(
            "/mpay/games/h55/login_methods",
            br#"{"config":{"g1":{},"g2":{}}}"#,
        );
        engine.on_response(&mut response);

        let payload: Value = serde_json::from_slice(&response.body).expect("valid json");
        assert_eq!(payload["select_platform"], true);
        assert_eq!(payload["qrcode_select_platform"], true);
        for channel in ["g1", "g2"] {
            assert_eq!(
                payload["config"][channel]["select_platforms"],
                serde_json::json!([0, 1, 2, 3, 4]),
            );
        }
    }

    #[test]
    fn malformed_governed_response_passes_through_with_an_error() {
        let engine = RewriteEngine::new();
        let mut response = response_for("/mpay/games/pc_config", b"<html>oops</html>");
        let events = engine.on_response(&mut response);

        assert_eq!(response.body.as_ref(), b"<html>oops</html>");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
    }

    #[test]
    fn non_object_sections_pass_through_with_an_error() {
        let engine = RewriteEngine::new();

        let body = br#"{"game":{"config":"oops"}}"#;
        let mut response = response_for("/mpay/games/pc_config", body);
        let events = engine.on_response(&mut response);
        assert_eq!(response.body.as_ref(), body.as_slice());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);

        let body = br#"{"config":{"g1":"not-an-object"}}"#;
        let mut response = response_for("/mpay/games/h55/login_methods", body);
        let events = engine.on_response(&mut response);
        assert_eq!(response.body.as_ref(), body.as_slice());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
    }

    #[test]
    fn unmatched_response_paths_are_untouched() {
        let engine = RewriteEngine::new();
        let mut response = response_for("/mpay/api/users/login", br#"{"ok":true}"#);
        let events = engine.on_response(&mut response);

        assert!(events.is_empty());
        assert_eq!(response.body.as_ref(), br#"{"ok":true}"#);
    }

    #[test]
    fn qrcode_exchange_response_is_observed_only() {
        let engine = RewriteEngine::new();
        let body = br#"{"user":{"token":"abc"}}"#;
        let mut response =
            response_for("/mpay/api/users/login/qrcode/exchange_token", body);
        let events = engine.on_response(&mut response);

        assert_eq!(response.body.as_ref(), body.as_slice());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::QrcodeLogin);
    }
}
