use anyhow::{Context, Result};
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use plantcare_link::{Device, Message, Mode};

use crate::state::{self, SharedState};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub commands: mpsc::Sender<Message>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/data", get(api_data))
        .route("/api/control", post(api_control))
        .route("/api/events", get(api_events))
        .layer(middleware::map_response(no_cache))
        .with_state(app)
}

async fn api_data(State(app): State<AppState>) -> impl IntoResponse {
    let free_kb = state::free_memory_kb();
    let st = app.shared.read().await;
    Json(st.to_status(Instant::now(), free_kb))
}

async fn api_events(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.recent_events())
}

#[derive(Debug, Deserialize)]
pub struct ControlParams {
    device: Option<String>,
    action: Option<String>,
}

/// Validate `device` + `action` and queue the mode command for the link.
/// `200 OK` means the command was handed over, not that the controller
/// applied it.
async fn api_control(
    State(app): State<AppState>,
    params: Result<Form<ControlParams>, FormRejection>,
) -> Response {
    let (device, action) = match params {
        Ok(Form(ControlParams {
            device: Some(d),
            action: Some(a),
        })) if !d.is_empty() && !a.is_empty() => (d, a),
        _ => {
            return (StatusCode::BAD_REQUEST, "Missing device or action parameter").into_response()
        }
    };

    let Some((device, mode)) = parse_command(&device, &action) else {
        warn!(%device, %action, "rejected control request");
        return (StatusCode::BAD_REQUEST, "Invalid command").into_response();
    };

    info!(%device, %mode, "control request");
    match app.commands.try_send(Message::SetMode { device, mode }) {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(TrySendError::Full(_)) => {
            warn!("command queue full");
            (StatusCode::SERVICE_UNAVAILABLE, "Link busy").into_response()
        }
        Err(TrySendError::Closed(_)) => {
            app.shared
                .write()
                .await
                .record_error("control request while link is down".to_string());
            (StatusCode::SERVICE_UNAVAILABLE, "Link unavailable").into_response()
        }
    }
}

fn parse_command(device: &str, action: &str) -> Option<(Device, Mode)> {
    let device = device.parse::<Device>().ok()?;
    let mode = Mode::from_action(action)?;
    Some((device, mode))
}

async fn no_cache(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    res
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BridgeState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use plantcare_link::translator::decode;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn app(capacity: usize) -> (AppState, mpsc::Receiver<Message>) {
        let shared: SharedState = Arc::new(RwLock::new(BridgeState::new()));
        let (tx, rx) = mpsc::channel(capacity);
        (
            AppState {
                shared,
                commands: tx,
            },
            rx,
        )
    }

    fn control(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/control")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(res: Response) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // -- GET /api/data ------------------------------------------------------

    #[tokio::test]
    async fn data_reports_mirror() {
        let (app, _rx) = app(4);
        let update = decode(
            r#"{"light":75,"moisture":12,"rain":0,"temp":"24.3","hum":"60.0","pump":0,"pMode":2}"#,
        )
        .unwrap();
        app.shared.write().await.record_data(&update, false);

        let res = router(app)
            .oneshot(Request::get("/api/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );

        let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
        assert_eq!(json["light"], 75);
        assert_eq!(json["soil"], 12);
        assert_eq!(json["temperature"], 24.3);
        assert_eq!(json["pumpActive"], false);
        assert_eq!(json["pumpMode"], 2);
        assert_eq!(json["connected"], false);
    }

    #[tokio::test]
    async fn data_before_any_frame_is_safe_defaults() {
        let (app, _rx) = app(4);
        let res = router(app)
            .oneshot(Request::get("/api/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["humidity"], 0.0);
        assert_eq!(json["connected"], false);
    }

    // -- POST /api/control --------------------------------------------------

    #[tokio::test]
    async fn control_queues_mode_command() {
        let (app, mut rx) = app(4);
        let res = router(app.clone())
            .oneshot(control("device=pump&action=on"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res).await, "OK");
        assert_eq!(
            rx.try_recv().unwrap(),
            Message::SetMode {
                device: Device::Pump,
                mode: Mode::On
            }
        );
        // Fire and forget: the mirror is untouched until the controller reports.
        assert!(!app.shared.read().await.mirror.pump_active);
    }

    #[tokio::test]
    async fn control_missing_parameter_is_400() {
        let (app, mut rx) = app(4);
        for body in ["device=fan", "action=auto", "device=&action=on", ""] {
            let res = router(app.clone()).oneshot(control(body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(body_string(res).await, "Missing device or action parameter");
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_unknown_device_or_action_is_400() {
        let (app, mut rx) = app(4);
        for body in [
            "device=heater&action=on",
            "device=light&action=blink",
            "device=PUMP&action=on",
        ] {
            let res = router(app.clone()).oneshot(control(body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(body_string(res).await, "Invalid command");
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_with_full_queue_is_503() {
        let (app, _rx) = app(1);
        let first = router(app.clone())
            .oneshot(control("device=fan&action=off"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router(app)
            .oneshot(control("device=fan&action=on"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn control_with_link_down_is_503() {
        let (app, rx) = app(4);
        drop(rx);
        let res = router(app.clone())
            .oneshot(control("device=light&action=auto"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            app.shared.read().await.recent_events()[0].detail,
            "control request while link is down"
        );
    }

    // -- GET /api/events ----------------------------------------------------

    #[tokio::test]
    async fn events_newest_first() {
        let (app, _rx) = app(4);
        {
            let mut st = app.shared.write().await;
            st.record_system("bridge started".to_string());
            st.record_command(Device::Fan, Mode::Auto);
        }
        let res = router(app)
            .oneshot(Request::get("/api/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
        assert_eq!(json[0]["kind"], "command");
        assert_eq!(json[0]["detail"], "fan set AUTO");
        assert_eq!(json[1]["kind"], "system");
    }
}
