//! QueryApi - HTTP detection queries
//!
//! ## Responsibilities
//!
//! - `POST /api/get_detections` - time-range query against one camera's ring
//! - `POST /api/get_latest` - most recent frame for one camera
//! - 404 with a JSON body for unknown routes, 500 for any handler error
//!
//! Bodies are parsed by hand so that malformed JSON surfaces as the same
//! `{"status":"error"}` shape older deployments expect. Every response
//! carries `Access-Control-Allow-Origin: *`.

use crate::detection_ring::{CameraKind, DetectionFrame, DetectionRing};
use crate::error::{Error, Result};
use axum::{
    extract::State,
    http::Uri,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Read handles to both rings
#[derive(Clone)]
pub struct QueryState {
    pub rgb: Arc<DetectionRing>,
    pub thermal: Arc<DetectionRing>,
}

impl QueryState {
    fn ring(&self, camera: CameraKind) -> &Arc<DetectionRing> {
        match camera {
            CameraKind::Rgb => &self.rgb,
            CameraKind::Thermal => &self.thermal,
        }
    }
}

/// Build the query router
pub fn create_router(state: QueryState) -> Router {
    Router::new()
        .route("/api/get_detections", post(get_detections))
        .route("/api/get_latest", post(get_latest))
        .fallback(not_found)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DetectionsRequest {
    camera: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestRequest {
    camera: String,
}

async fn get_detections(State(state): State<QueryState>, body: String) -> impl IntoResponse {
    match handle_get_detections(&state, &body).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_latest(State(state): State<QueryState>, body: String) -> impl IntoResponse {
    match handle_get_latest(&state, &body).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": "Endpoint not found",
            "path": uri.path(),
        })),
    )
}

async fn handle_get_detections(state: &QueryState, body: &str) -> Result<Value> {
    let request: DetectionsRequest =
        serde_json::from_str(body).map_err(|e| Error::Internal(e.to_string()))?;

    let camera = CameraKind::from_api_name(&request.camera)
        .ok_or_else(|| Error::Internal(format!("Invalid camera type: {}", request.camera)))?;

    let start = request
        .start_time
        .as_deref()
        .map(parse_iso8601_ns)
        .unwrap_or(0);
    let end = request
        .end_time
        .as_deref()
        .map(parse_iso8601_ns)
        .unwrap_or(u64::MAX);

    let frames = state.ring(camera).query_range(start, end).await;
    tracing::debug!(
        camera = %request.camera,
        start,
        end,
        hits = frames.len(),
        "Detection range query"
    );

    Ok(json!({
        "status": "success",
        "detections": frames
            .iter()
            .map(|f| frame_json(f, &request.camera))
            .collect::<Vec<_>>(),
    }))
}

async fn handle_get_latest(state: &QueryState, body: &str) -> Result<Value> {
    let request: LatestRequest =
        serde_json::from_str(body).map_err(|e| Error::Internal(e.to_string()))?;

    let camera = CameraKind::from_api_name(&request.camera)
        .ok_or_else(|| Error::Internal(format!("Invalid camera type: {}", request.camera)))?;

    let detection = state
        .ring(camera)
        .latest()
        .await
        .map(|f| latest_frame_json(&f, &request.camera));

    Ok(json!({
        "status": "success",
        "detection": detection,
    }))
}

/// Full frame shape for range queries
fn frame_json(frame: &DetectionFrame, camera_name: &str) -> Value {
    json!({
        "timestamp": frame.timestamp,
        "frame_number": frame.frame_number,
        "camera": camera_name,
        "objects": frame
            .objects
            .iter()
            .map(|o| {
                json!({
                    "class_id": o.class_id,
                    "confidence": o.confidence,
                    "bbox": bbox_corners(o),
                    "bbox_color": o.color.api_name(),
                    "has_bbox": o.has_bbox,
                })
            })
            .collect::<Vec<_>>(),
    })
}

/// Reduced shape served on the latest-detection route
fn latest_frame_json(frame: &DetectionFrame, camera_name: &str) -> Value {
    json!({
        "timestamp": frame.timestamp,
        "frame_number": frame.frame_number,
        "camera": camera_name,
        "objects": frame
            .objects
            .iter()
            .map(|o| {
                json!({
                    "class_id": o.class_id,
                    "confidence": o.confidence,
                    "bbox": bbox_corners(o),
                })
            })
            .collect::<Vec<_>>(),
    })
}

/// Boxes leave the process as `[left, top, right, bottom]`
fn bbox_corners(object: &crate::detection_ring::DetectedObject) -> Value {
    json!([
        object.bbox.x,
        object.bbox.y,
        object.bbox.x + object.bbox.width,
        object.bbox.y + object.bbox.height,
    ])
}

/// Parse `YYYY-MM-DDThh:mm:ssZ` to UTC nanoseconds.
///
/// Malformed input parses to 0 with a warning, so a bad bound degrades to
/// "from the beginning" rather than an error.
pub fn parse_iso8601_ns(value: &str) -> u64 {
    match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ") {
        Ok(dt) => dt.and_utc().timestamp_nanos_opt().unwrap_or(0).max(0) as u64,
        Err(_) => {
            tracing::warn!(value = %value, "Failed to parse ISO 8601 time");
            0
        }
    }
}

/// Format UTC nanoseconds as `YYYY-MM-DDThh:mm:ssZ` (second granularity)
pub fn format_iso8601_ns(ns: u64) -> String {
    let secs = (ns / 1_000_000_000) as i64;
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_ring::{BboxColor, BoundingBox, DetectedObject};

    fn state_with_frames() -> QueryState {
        // Unbounded retention so fixed historical timestamps survive insert
        QueryState {
            rgb: Arc::new(DetectionRing::with_bounds(CameraKind::Rgb, 3600, u64::MAX)),
            thermal: Arc::new(DetectionRing::with_bounds(CameraKind::Thermal, 3600, u64::MAX)),
        }
    }

    fn frame(ts: u64, n: u32) -> DetectionFrame {
        DetectionFrame {
            timestamp: ts,
            frame_number: n,
            camera: CameraKind::Rgb,
            objects: vec![DetectedObject {
                class_id: 3,
                confidence: 0.87,
                bbox: BoundingBox {
                    x: 100,
                    y: 50,
                    width: 40,
                    height: 60,
                },
                color: BboxColor::Yellow,
                has_bbox: true,
            }],
        }
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(
            parse_iso8601_ns("2024-01-01T12:00:00Z"),
            1_704_110_400_000_000_000
        );
        assert_eq!(parse_iso8601_ns("not-a-time"), 0);
        assert_eq!(parse_iso8601_ns("2024-01-01 12:00:00"), 0);
    }

    #[test]
    fn test_iso8601_round_trip() {
        let inputs = ["2024-01-01T12:00:00Z", "1970-01-01T00:00:01Z", "2031-06-15T23:59:59Z"];
        for input in inputs {
            let ns = parse_iso8601_ns(input);
            assert_eq!(format_iso8601_ns(ns), input);
        }
    }

    #[tokio::test]
    async fn test_get_detections_range() {
        let state = state_with_frames();
        // Timestamps around 2024-01-01T12:00:00Z so range bounds are realistic
        let base = 1_704_110_400_000_000_000u64;
        for (i, offset) in [0u64, 30_000_000_000, 90_000_000_000].iter().enumerate() {
            state.rgb.insert(frame(base + offset, i as u32 + 1)).await;
        }

        let body = r#"{
            "camera": "RGB_Camera",
            "start_time": "2024-01-01T12:00:10Z",
            "end_time": "2024-01-01T12:01:00Z"
        }"#;
        let response = handle_get_detections(&state, body).await.unwrap();

        assert_eq!(response["status"], "success");
        let detections = response["detections"].as_array().unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["frame_number"], 2);
        assert_eq!(detections[0]["camera"], "RGB_Camera");

        let object = &detections[0]["objects"][0];
        assert_eq!(object["class_id"], 3);
        assert_eq!(object["bbox"], json!([100, 50, 140, 110]));
        assert_eq!(object["bbox_color"], "yellow");
        assert_eq!(object["has_bbox"], true);
    }

    #[tokio::test]
    async fn test_get_detections_open_bounds() {
        let state = state_with_frames();
        state.rgb.insert(frame(1_000, 1)).await;
        state.rgb.insert(frame(2_000, 2)).await;

        let response = handle_get_detections(&state, r#"{"camera": "RGB_Camera"}"#)
            .await
            .unwrap();
        assert_eq!(response["detections"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_latest_shapes() {
        let state = state_with_frames();

        let empty = handle_get_latest(&state, r#"{"camera": "Thermal_Camera"}"#)
            .await
            .unwrap();
        assert_eq!(empty["status"], "success");
        assert!(empty["detection"].is_null());

        state.thermal.insert(frame(5_000, 9)).await;
        let response = handle_get_latest(&state, r#"{"camera": "Thermal_Camera"}"#)
            .await
            .unwrap();
        let detection = &response["detection"];
        assert_eq!(detection["frame_number"], 9);
        assert_eq!(detection["camera"], "Thermal_Camera");

        // The latest route serves the reduced object shape
        let object = &detection["objects"][0];
        assert_eq!(object["class_id"], 3);
        assert!(object.get("bbox_color").is_none());
        assert!(object.get("has_bbox").is_none());
    }

    #[tokio::test]
    async fn test_invalid_camera_is_internal_error() {
        let state = state_with_frames();
        let result = handle_get_detections(&state, r#"{"camera": "Depth_Camera"}"#).await;
        assert!(matches!(result, Err(Error::Internal(_))));

        let result = handle_get_latest(&state, "{ not json").await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
