use axum::{
    Json,
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::LeadError;
use crate::metrics::{
    LEAD_REQUESTS_TOTAL, RATE_LIMIT_FAIL_OPEN_TOTAL, RATE_LIMITED_TOTAL, REQUEST_LATENCY,
};
use crate::models::RawLead;
use crate::rate_limit::AdmitDecision;
use crate::sinks::fan_out;
use crate::state::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

pub async fn lead_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    LEAD_REQUESTS_TOTAL.inc();
    let start_time = Instant::now();

    let response = match intake(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, "lead rejected");
            err.into_response()
        }
    };

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}

// method check -> rate check -> body + validation -> fan-out
async fn intake(state: &AppState, request: Request) -> Result<Response, LeadError> {
    let (parts, body) = request.into_parts();

    if parts.method == Method::OPTIONS {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if parts.method != Method::POST {
        return Err(LeadError::MethodNotAllowed);
    }

    let client = client_id(&parts);
    match state
        .rate_limiter
        .admit(client.as_deref(), Utc::now().timestamp_millis())
        .await
    {
        AdmitDecision::Allowed => {}
        AdmitDecision::FailedOpen(_) => RATE_LIMIT_FAIL_OPEN_TOTAL.inc(),
        AdmitDecision::Limited { retry_after_secs } => {
            RATE_LIMITED_TOTAL.inc();
            return Err(LeadError::TooManyRequests { retry_after: retry_after_secs });
        }
    }

    let bytes = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| LeadError::PayloadTooLarge)?;
    let lead = RawLead::from_slice(&bytes).validate(&state.default_language)?;

    let out = fan_out(&state.sinks, Arc::new(lead), state.sink_timeout).await;
    let receipt = out.receipt();
    let status = if receipt.ok { StatusCode::OK } else { StatusCode::ACCEPTED };

    info!(
        client = client.as_deref().unwrap_or("-"),
        store = out.store.status.as_str(),
        sheet = out.spreadsheet.status.as_str(),
        email = out.email.status.as_str(),
        "lead accepted"
    );

    Ok((status, Json(receipt)).into_response())
}

// First X-Forwarded-For hop, else the peer address, else unknown
fn client_id(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty());
    if let Some(first) = forwarded {
        return Some(first.to_string());
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::handlers::{LEAD_PATH, router};
    use crate::rate_limit::RateLimiter;
    use crate::sinks::test_support::{Behaviour, FakeSink};
    use crate::sinks::{Sinks, StoreSink};
    use crate::store::test_support::FailingStore;
    use crate::store::{DocumentStore, MemoryStore};
    use crate::models::SinkKind;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, header};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    const DANA: &str = r#"{"name":"Dana","email":"dana@example.com","message":"Hi there"}"#;

    fn app_with(sinks: Sinks, max: u32) -> Router {
        let state = AppState {
            rate_limiter: RateLimiter::new(
                Arc::new(MemoryStore::new()),
                "rateLimits",
                RateLimitConfig { window_ms: 60_000, max },
            ),
            sinks,
            default_language: "he".to_string(),
            sink_timeout: Some(Duration::from_secs(2)),
            max_body_bytes: 1024,
        };
        router(Arc::new(state))
    }

    fn fake_sinks(sheet: Behaviour, email: Behaviour) -> Sinks {
        Sinks::new(
            FakeSink::new(SinkKind::Store, Behaviour::Deliver(Some("lead-1"))),
            Some(FakeSink::new(SinkKind::Spreadsheet, sheet)),
            Some(FakeSink::new(SinkKind::Email, email)),
        )
    }

    fn request(method: Method, body: &str, ip: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri(LEAD_PATH)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(ip) = ip {
            builder = builder.header(FORWARDED_FOR, ip);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, request: Request) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn assert_cors(headers: &HeaderMap) {
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, Authorization");
    }

    #[tokio::test]
    async fn accepts_lead_with_unconfigured_sinks() {
        let store = Arc::new(MemoryStore::new());
        let sinks = Sinks::new(Arc::new(StoreSink::new(store.clone(), "contactMessages")), None, None);
        let app = app_with(sinks, 5);

        let (status, headers, body) = send(&app, request(Method::POST, DANA, Some("10.0.0.1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(body["ok"], true);
        assert_eq!(body["sheet"], "skipped");
        assert_eq!(body["email"], "skipped");
        assert!(body.get("sheetError").is_none());

        let id = body["firestoreId"].as_str().unwrap();
        let stored = store.get("contactMessages", id).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Dana");
        assert_eq!(stored["status"], "new");
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_limited() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 5);
        for _ in 0..5 {
            let (status, _, _) = send(&app, request(Method::POST, DANA, Some("10.0.0.2"))).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, headers, body) = send(&app, request(Method::POST, DANA, Some("10.0.0.2"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_cors(&headers);
        assert_eq!(body["error"], "Too many requests");
        let retry_after = body["retryAfter"].as_u64().unwrap();
        assert!((1..=60).contains(&retry_after));
    }

    #[tokio::test]
    async fn rate_check_runs_before_validation() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 1);
        send(&app, request(Method::POST, DANA, Some("10.0.0.3"))).await;
        let (status, _, body) = send(&app, request(Method::POST, "{not json", Some("10.0.0.3"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Too many requests");
    }

    #[tokio::test]
    async fn unidentified_clients_are_not_limited() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 1);
        for _ in 0..5 {
            let (status, _, _) = send(&app, request(Method::POST, DANA, None)).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn peer_address_is_used_without_forwarded_for() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 1);
        let peer: SocketAddr = "192.0.2.7:41000".parse().unwrap();
        let with_peer = || {
            let mut req = request(Method::POST, DANA, None);
            req.extensions_mut().insert(ConnectInfo(peer));
            req
        };
        assert_eq!(send(&app, with_peer()).await.0, StatusCode::OK);
        assert_eq!(send(&app, with_peer()).await.0, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn preflight_is_answered_without_touching_quota() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 1);
        for _ in 0..3 {
            let (status, headers, body) = send(&app, request(Method::OPTIONS, "", Some("10.0.0.4"))).await;
            assert_eq!(status, StatusCode::NO_CONTENT);
            assert_cors(&headers);
            assert_eq!(body, Value::Null);
        }
        let (status, _, _) = send(&app, request(Method::POST, DANA, Some("10.0.0.4"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn other_methods_are_rejected() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 5);
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let (status, headers, body) = send(&app, request(method, "", Some("10.0.0.5"))).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
            assert_cors(&headers);
            assert_eq!(body, json!({ "error": "Method not allowed" }));
        }
    }

    #[tokio::test]
    async fn validation_errors_name_the_first_problem() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 0);
        let cases = [
            (r#"{"message":"hi"}"#, "Missing name"),
            (r#"{"name":"Dana","message":"hi"}"#, "Missing email"),
            (r#"{"name":"Dana","email":"dana@example.com"}"#, "Missing message"),
            (r#"{"name":"Dana","email":"not-an-email","message":"hi"}"#, "Invalid email"),
            ("garbage", "Missing name"),
        ];
        for (body, expected) in cases {
            let (status, headers, json) = send(&app, request(Method::POST, body, Some("10.0.0.6"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_cors(&headers);
            assert_eq!(json, json!({ "error": expected }));
        }
    }

    #[tokio::test]
    async fn failing_spreadsheet_degrades_to_accepted() {
        let app = app_with(fake_sinks(Behaviour::Fail("sheet quota"), Behaviour::Deliver(None)), 5);
        let (status, _, body) = send(&app, request(Method::POST, DANA, Some("10.0.0.7"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["ok"], false);
        assert_eq!(body["firestoreId"], "lead-1");
        assert_eq!(body["sheet"], "error");
        assert_eq!(body["sheetError"], "sheet quota");
        assert_eq!(body["email"], "ok");
    }

    #[tokio::test]
    async fn store_failure_degrades_to_accepted() {
        let sinks = Sinks::new(Arc::new(StoreSink::new(Arc::new(FailingStore), "contactMessages")), None, None);
        let app = app_with(sinks, 5);
        let (status, _, body) = send(&app, request(Method::POST, DANA, Some("10.0.0.8"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["store"], "error");
        assert!(body.get("firestoreId").is_none());
        assert_eq!(body["sheet"], "skipped");
    }

    #[tokio::test]
    async fn rate_limiter_outage_lets_requests_through() {
        let state = AppState {
            rate_limiter: RateLimiter::new(
                Arc::new(FailingStore) as Arc<dyn DocumentStore>,
                "rateLimits",
                RateLimitConfig { window_ms: 60_000, max: 1 },
            ),
            sinks: fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)),
            default_language: "he".to_string(),
            sink_timeout: None,
            max_body_bytes: 1024,
        };
        let app = router(Arc::new(state));
        for _ in 0..3 {
            let (status, _, _) = send(&app, request(Method::POST, DANA, Some("10.0.0.9"))).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 5);
        let big = format!(r#"{{"name":"Dana","email":"dana@example.com","message":"{}"}}"#, "x".repeat(2048));
        let (status, _, body) = send(&app, request(Method::POST, &big, Some("10.0.0.10"))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Payload too large");
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let app = app_with(fake_sinks(Behaviour::Deliver(None), Behaviour::Deliver(None)), 5);
        let req = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(body["status"], "healthy");
    }

    #[test]
    fn client_id_prefers_first_forwarded_hop() {
        let parts = |value: Option<&str>| {
            let mut builder = axum::http::Request::builder().uri(LEAD_PATH);
            if let Some(value) = value {
                builder = builder.header(FORWARDED_FOR, value);
            }
            builder.body(()).unwrap().into_parts().0
        };
        assert_eq!(client_id(&parts(Some(" 203.0.113.9 , 10.0.0.1"))).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_id(&parts(Some("203.0.113.9"))).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_id(&parts(Some(" , 10.0.0.1"))), None);
        assert_eq!(client_id(&parts(None)), None);

        let mut with_peer = parts(Some(""));
        with_peer
            .extensions
            .insert(ConnectInfo("198.51.100.4:5000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_id(&with_peer).as_deref(), Some("198.51.100.4"));
    }
}
