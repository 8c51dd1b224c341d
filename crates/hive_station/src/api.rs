//! Superfície HTTP do dashboard (axum).
//!
//! - `GET /api/sensor` – leitura ao vivo (ou último registro) + movimento
//! - `GET /api/dht_record` – lê, registra e devolve o registro
//! - `GET /api/dht_records` – registros mais recentes
//! - `GET /api/motion` – estado do PIR
//! - `GET /camera_feed` – stream MJPEG (`?size=WxH&framerate=N&quality=Q`)
//! - `GET /healthz` – backends ativos
//!
//! Leituras de sensor e criação de câmera são bloqueantes e rodam em
//! `spawn_blocking`.

use crate::camera::{CameraError, CameraManager, StreamConfig};
use crate::station::Station;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use hive_core::config::CameraConfig;
use hive_core::protocol::STREAM_CONTENT_TYPE;
use hive_core::types::{InterpretedRecord, MotionState, SensorSnapshot};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Estado compartilhado pelos handlers.
pub struct AppState {
    pub station: Arc<Station>,
    pub camera: Arc<CameraManager>,
    pub camera_defaults: CameraConfig,
    pub api_limit: usize,
}

/// Erros visíveis ao cliente HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Camera unavailable: {0}")]
    Camera(#[from] CameraError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("{status}: {self}");
        (status, self.to_string()).into_response()
    }
}

/// Monta o router. `static_dir` vira fallback quando existe.
pub fn create_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/api/sensor", get(sensor))
        .route("/api/dht_record", get(dht_record))
        .route("/api/dht_records", get(dht_records))
        .route("/api/motion", get(motion))
        .route("/camera_feed", get(camera_feed))
        .route("/healthz", get(healthz))
        .with_state(state);

    if let Some(dir) = static_dir {
        if dir.is_dir() {
            info!("Servindo arquivos estáticos de {}", dir.display());
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        } else {
            warn!("Diretório estático {} não existe, ignorando", dir.display());
        }
    }

    app.layer(TraceLayer::new_for_http())
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn sensor(State(state): State<Arc<AppState>>) -> Result<Json<SensorSnapshot>, ApiError> {
    let station = Arc::clone(&state.station);
    Ok(Json(blocking(move || station.snapshot()).await?))
}

async fn dht_record(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InterpretedRecord>, ApiError> {
    let station = Arc::clone(&state.station);
    Ok(Json(blocking(move || station.read_and_record()).await?))
}

async fn dht_records(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InterpretedRecord>>, ApiError> {
    let station = Arc::clone(&state.station);
    let limit = state.api_limit;
    Ok(Json(blocking(move || station.recent(limit)).await?))
}

async fn motion(State(state): State<Arc<AppState>>) -> Result<Json<MotionState>, ApiError> {
    let station = Arc::clone(&state.station);
    Ok(Json(blocking(move || station.motion_state()).await?))
}

/// Parâmetros crus de `/camera_feed`; valores inválidos caem nos padrões.
#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    size: Option<String>,
    framerate: Option<String>,
    quality: Option<String>,
}

async fn camera_feed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    let requested = StreamConfig::from_query(
        query.size.as_deref(),
        query.framerate.as_deref(),
        query.quality.as_deref(),
        &state.camera_defaults,
    );

    let camera = Arc::clone(&state.camera);
    let stream = blocking(move || camera.stream(requested)).await??;

    let body = Body::from_stream(stream.frames().map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, private"),
        ],
        body,
    )
        .into_response())
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let active = state.camera.current();
    let camera_running = active.as_ref().is_some_and(|c| c.is_running());
    let frame_bytes = active.and_then(|c| c.current_frame()).map_or(0, |f| f.len());
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sensor_backend": state.station.sensor_backend(),
        "motion_backend": state.station.motion_backend(),
        "camera_backend": state.camera.backend_name(),
        "camera_running": camera_running,
        "camera_frame_bytes": frame_bytes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraBackend, LibcameraBackend, TestPatternBackend};
    use crate::station::tests::station;
    use hive_core::protocol::decode_part;
    use hive_core::store::RecordStore;
    use hive_core::types::{MotionStatus, Reading};

    fn camera_config() -> CameraConfig {
        CameraConfig {
            width: 32,
            height: 16,
            framerate: 60,
            warmup_ms: 0,
            stop_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn state(
        dir: &tempfile::TempDir,
        readings: Vec<Reading>,
        backend: Arc<dyn CameraBackend>,
    ) -> Arc<AppState> {
        let store = RecordStore::new(dir.path().join("records.json"));
        let config = camera_config();
        Arc::new(AppState {
            station: Arc::new(station(readings, Ok(true), store)),
            camera: Arc::new(CameraManager::new(backend, &config)),
            camera_defaults: config,
            api_limit: 3,
        })
    }

    #[tokio::test]
    async fn sensor_reuses_last_record_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(
            &dir,
            vec![Reading::ok(33.2, 56.1), Reading::failed("Invalid sensor reading")],
            Arc::new(TestPatternBackend),
        );

        let Json(rec) = dht_record(State(st.clone())).await.unwrap();
        let Json(snap) = sensor(State(st)).await.unwrap();

        assert_eq!(snap.temperature_c, Some(33.2));
        assert_eq!(snap.humidity, Some(56.1));
        assert_eq!(snap.timestamp, Some(rec.timestamp));
        assert_eq!(snap.motion_status, MotionStatus::Detected);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn records_are_capped_at_api_limit() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir, vec![Reading::ok(34.0, 60.0)], Arc::new(TestPatternBackend));

        for _ in 0..5 {
            dht_record(State(st.clone())).await.unwrap();
        }
        let Json(records) = dht_records(State(st)).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn motion_endpoint_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir, vec![Reading::ok(34.0, 60.0)], Arc::new(TestPatternBackend));

        let Json(m) = motion(State(st)).await.unwrap();
        assert_eq!(m, MotionState::known(true));
    }

    #[tokio::test]
    async fn camera_feed_streams_mjpeg_parts() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir, vec![Reading::ok(34.0, 60.0)], Arc::new(TestPatternBackend));

        let query = FeedQuery {
            size: Some("bogus".into()),
            ..Default::default()
        };
        let response = camera_feed(State(st.clone()), Query(query)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body().into_data_stream();
        let part = body.next().await.unwrap().unwrap();
        let jpeg = decode_part(&part).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        // Tamanho inválido caiu no padrão configurado
        let active = st.camera.current().unwrap();
        assert_eq!((active.config().width, active.config().height), (32, 16));

        let Json(health) = healthz(State(st.clone())).await;
        assert_eq!(health["camera_running"], true);
        assert_eq!(health["sensor_backend"], "scripted");

        st.camera.shutdown();
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn camera_unavailable_is_503_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LibcameraBackend {
            command: "/nonexistent/rpicam-vid".into(),
        });
        let st = state(&dir, vec![Reading::ok(34.0, 60.0)], backend);

        let err = camera_feed(State(st.clone()), Query(FeedQuery::default()))
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Camera unavailable"));

        let Json(health) = healthz(State(st)).await;
        assert_eq!(health["camera_running"], false);
    }

    #[test]
    fn router_builds_with_missing_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir, vec![Reading::ok(34.0, 60.0)], Arc::new(TestPatternBackend));
        let _ = create_router(st, Some(&dir.path().join("static")));
    }
}
