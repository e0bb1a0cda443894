//! The inbound RPC endpoint: verify the signature, decode the envelope, run
//! the locally-bound method, and wrap the result.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use silorpc_core::dispatch::{dispatch_to_local, DispatchError};
use silorpc_core::{registry, RequestSigner, TopologyMode};
use silorpc_protocol::{rpc_path, ErrorBody, RequestEnvelope, SIGNATURE_SCHEME};

#[derive(Clone)]
pub(crate) struct AppState {
    pub signer: Arc<RequestSigner>,
    pub mode: TopologyMode,
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "mode": state.mode,
        "services": registry::service_keys(),
    }))
}

pub(crate) async fn rpc_endpoint(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // The tag covers the canonical path, not whatever URL the caller hit, so
    // both sides derive it from the same function.
    let path = rpc_path(&service, &method);
    let tag = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(SIGNATURE_SCHEME))
        .and_then(|rest| rest.strip_prefix(' '));
    let verified = match tag {
        Some(tag) => state.signer.verify(&path, &body, tag),
        None => false,
    };
    if !verified {
        warn!(target: "rpc.server", service, method, "rejected unsigned or mis-signed request");
        return error_response(StatusCode::FORBIDDEN, "invalid_signature", None);
    }

    let envelope: RequestEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "malformed_envelope",
                Some(err.to_string()),
            )
        }
    };

    match dispatch_to_local(&service, &method, &envelope.args) {
        Ok(response) => {
            debug!(target: "rpc.server", service, method, "rpc served");
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => dispatch_error_response(err),
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    let (status, code) = match &err {
        DispatchError::Resolution(_) => (StatusCode::NOT_FOUND, "unknown_endpoint"),
        DispatchError::ArgumentValidation { .. }
        | DispatchError::ArgumentDeserialization { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_arguments")
        }
        DispatchError::Configuration { .. } => (StatusCode::SERVICE_UNAVAILABLE, "not_local"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "handler_error"),
    };
    if status.is_server_error() {
        tracing::error!(target: "rpc.server", %err, "local dispatch failed");
    }
    // Callers passed signature verification, so the detail is safe to share.
    error_response(status, code, Some(err.to_string()))
}

fn error_response(status: StatusCode, code: &str, detail: Option<String>) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        code: code.to_string(),
        detail,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{json, Value};
    use silorpc_core::contract::{ContractBuilder, MethodDecl};
    use silorpc_core::dispatch::{bind_for_topology, DispatchContext, ServiceHandler};
    use silorpc_core::schema::ArgumentMap;
    use silorpc_core::{HttpTransport, ServiceAffinity, ValueType};
    use silorpc_protocol::ResponseEnvelope;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Echo;

    impl ServiceHandler for Echo {
        fn methods(&self) -> Vec<&'static str> {
            vec!["get_user", "touch"]
        }

        fn call(&self, method: &str, args: ArgumentMap) -> anyhow::Result<Value> {
            match method {
                "get_user" => Ok(json!({"id": args["id"]})),
                "touch" => Ok(Value::Null),
                other => anyhow::bail!("unexpected method {other}"),
            }
        }
    }

    fn test_signer() -> Arc<RequestSigner> {
        Arc::new(RequestSigner::new(vec!["primary".into(), "fallback".into()]).unwrap())
    }

    fn test_state() -> AppState {
        AppState {
            signer: test_signer(),
            mode: TopologyMode::Monolith,
        }
    }

    fn register_echo_service(state: &AppState) -> String {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let key = format!("echo-{}", NEXT.fetch_add(1, Ordering::Relaxed));
        let contract = ContractBuilder::new(key.clone(), ServiceAffinity::Control)
            .method(
                MethodDecl::new("get_user")
                    .param("id", ValueType::Int)
                    .returns(ValueType::option_of(ValueType::Json)),
            )
            .method(MethodDecl::new("touch").param("id", ValueType::Int))
            .build()
            .unwrap();
        let ctx = Arc::new(DispatchContext {
            signer: state.signer.clone(),
            transport: Arc::new(HttpTransport),
            control_address: None,
        });
        let service = bind_for_topology(
            contract,
            Some(Arc::new(Echo)),
            None,
            TopologyMode::Monolith,
            ctx,
        )
        .unwrap();
        registry::register_service(Arc::new(service)).unwrap();
        key
    }

    fn envelope_bytes(args: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({"meta": {}, "args": args})).unwrap()
    }

    async fn call(
        state: &AppState,
        service: &str,
        method: &str,
        body: Vec<u8>,
        tag: Option<String>,
    ) -> (StatusCode, Vec<u8>) {
        let mut headers = HeaderMap::new();
        if let Some(tag) = tag {
            headers.insert(
                header::AUTHORIZATION,
                format!("{SIGNATURE_SCHEME} {tag}").parse().unwrap(),
            );
        }
        let response = rpc_endpoint(
            State(state.clone()),
            Path((service.to_string(), method.to_string())),
            headers,
            Bytes::from(body),
        )
        .await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn sign(state: &AppState, service: &str, method: &str, body: &[u8]) -> String {
        state.signer.sign(&rpc_path(service, method), body)
    }

    #[tokio::test]
    async fn signed_request_executes_locally() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": 7}));
        let tag = sign(&state, &key, "get_user", &body);

        let (status, raw) = call(&state, &key, "get_user", body, Some(tag)).await;
        assert_eq!(status, StatusCode::OK);
        let envelope: ResponseEnvelope = serde_json::from_slice(&raw).unwrap();
        assert_eq!(envelope.value, Some(json!({"id": 7})));
    }

    #[tokio::test]
    async fn void_method_returns_null_value() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": 7}));
        let tag = sign(&state, &key, "touch", &body);

        let (status, raw) = call(&state, &key, "touch", body, Some(tag)).await;
        assert_eq!(status, StatusCode::OK);
        let envelope: ResponseEnvelope = serde_json::from_slice(&raw).unwrap();
        assert_eq!(envelope.value, None);
        assert!(String::from_utf8(raw).unwrap().contains("\"value\":null"));
    }

    #[tokio::test]
    async fn missing_or_bogus_signature_is_forbidden() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": 7}));

        let (status, raw) = call(&state, &key, "get_user", body.clone(), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let error: ErrorBody = serde_json::from_slice(&raw).unwrap();
        assert_eq!(error.code, "invalid_signature");

        let (status, _) = call(
            &state,
            &key,
            "get_user",
            body,
            Some("rpc0:deadbeef".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn tampered_body_is_forbidden() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": 7}));
        let tag = sign(&state, &key, "get_user", &body);

        let tampered = envelope_bytes(json!({"id": 8}));
        let (status, _) = call(&state, &key, "get_user", tampered, Some(tag)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn signature_from_demoted_secret_still_verifies() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": 7}));
        let old_signer = RequestSigner::new(vec!["fallback".into()]).unwrap();
        let tag = old_signer.sign(&rpc_path(&key, "get_user"), &body);

        let (status, _) = call(&state, &key, "get_user", body, Some(tag)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_envelope_is_a_bad_request() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = b"not json at all".to_vec();
        let tag = sign(&state, &key, "get_user", &body);

        let (status, raw) = call(&state, &key, "get_user", body, Some(tag)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_slice(&raw).unwrap();
        assert_eq!(error.code, "malformed_envelope");
    }

    #[tokio::test]
    async fn unknown_service_and_method_are_not_found() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({}));

        let tag = sign(&state, "no-such-service", "get_user", &body);
        let (status, _) = call(&state, "no-such-service", "get_user", body.clone(), Some(tag)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let tag = sign(&state, &key, "no_such_method", &body);
        let (status, raw) = call(&state, &key, "no_such_method", body, Some(tag)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorBody = serde_json::from_slice(&raw).unwrap();
        assert_eq!(error.code, "unknown_endpoint");
    }

    #[tokio::test]
    async fn mistyped_arguments_are_a_bad_request() {
        let state = test_state();
        let key = register_echo_service(&state);
        let body = envelope_bytes(json!({"id": "seven"}));
        let tag = sign(&state, &key, "get_user", &body);

        let (status, raw) = call(&state, &key, "get_user", body, Some(tag)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_slice(&raw).unwrap();
        assert_eq!(error.code, "invalid_arguments");
    }

    #[tokio::test]
    async fn router_serves_rpc_and_healthz() {
        use axum::body::Body;
        use axum::http::Request;
        use http_body_util::BodyExt;
        use silorpc_protocol::CONTENT_TYPE_JSON;
        use tower::util::ServiceExt;

        let state = test_state();
        let key = register_echo_service(&state);
        let app = crate::router::build_router(state.clone());

        let body = envelope_bytes(json!({"id": 3}));
        let tag = sign(&state, &key, "get_user", &body);
        let request = Request::builder()
            .method("POST")
            .uri(format!("/rpc/{key}/get_user"))
            .header(header::AUTHORIZATION, format!("{SIGNATURE_SCHEME} {tag}"))
            .header(header::CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: ResponseEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.value, Some(json!({"id": 3})));

        let health = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_reports_mode_and_services() {
        let state = test_state();
        register_echo_service(&state);
        let Json(body) = healthz(State(state)).await;
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["mode"], json!("monolith"));
        assert!(body["services"].as_array().is_some());
    }
}
