//! DetectionRing - per-camera detection log
//!
//! ## Responsibilities
//!
//! - Store inference results in a bounded, time-ordered ring (one per camera)
//! - Serve inclusive time-range queries and the latest frame
//! - Enforce both invariants on insert: at most [`MAX_ENTRIES`] frames, and
//!   no frame older than [`RETENTION`]
//!
//! The inference side holds a write handle, the query API a read handle.
//! All operations copy under the lock; nothing does I/O while holding it.
//! Overflow silently drops the oldest frame (logged at trace).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Hard cap on retained frames per camera
pub const MAX_ENTRIES: usize = 3600;

/// Maximum frame age in nanoseconds (120 s)
pub const RETENTION_NS: u64 = 120 * 1_000_000_000;

/// Which physical camera a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraKind {
    Rgb,
    Thermal,
}

impl CameraKind {
    /// Name used by the query API request/response bodies
    pub fn api_name(&self) -> &'static str {
        match self {
            CameraKind::Rgb => "RGB_Camera",
            CameraKind::Thermal => "Thermal_Camera",
        }
    }

    /// Parse the query API camera name
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "RGB_Camera" => Some(CameraKind::Rgb),
            "Thermal_Camera" => Some(CameraKind::Thermal),
            _ => None,
        }
    }
}

/// The closed set of detection classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    NormalCow,
    FlipCow,
    NormalCowSitting,
    HeatCow,
    LaborSignCow,
    OverTemp,
}

impl ObjectClass {
    pub fn from_class_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::NormalCow),
            1 => Some(Self::FlipCow),
            2 => Some(Self::NormalCowSitting),
            3 => Some(Self::HeatCow),
            4 => Some(Self::LaborSignCow),
            5 => Some(Self::OverTemp),
            _ => None,
        }
    }

    pub fn class_id(&self) -> i32 {
        match self {
            Self::NormalCow => 0,
            Self::FlipCow => 1,
            Self::NormalCowSitting => 2,
            Self::HeatCow => 3,
            Self::LaborSignCow => 4,
            Self::OverTemp => 5,
        }
    }

    /// Box colour used when the producer does not override it
    pub fn default_color(&self) -> BboxColor {
        match self {
            Self::NormalCow | Self::NormalCowSitting => BboxColor::Green,
            Self::HeatCow | Self::LaborSignCow => BboxColor::Yellow,
            Self::FlipCow => BboxColor::Red,
            Self::OverTemp => BboxColor::Blue,
        }
    }
}

/// Annotation colour of a bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BboxColor {
    Green,
    Yellow,
    Red,
    Blue,
    None,
}

impl BboxColor {
    /// Name emitted on the query API (`None` serializes as `"null"`)
    pub fn api_name(&self) -> &'static str {
        match self {
            BboxColor::Green => "green",
            BboxColor::Yellow => "yellow",
            BboxColor::Red => "red",
            BboxColor::Blue => "blue",
            BboxColor::None => "null",
        }
    }
}

/// Axis-aligned box in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One detected object within a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_id: i32,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub color: BboxColor,
    pub has_bbox: bool,
}

/// One inference result for one video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    /// Nanoseconds since the Unix epoch; 0 means "stamp on insert"
    pub timestamp: u64,
    /// Monotonic per camera
    pub frame_number: u32,
    pub camera: CameraKind,
    pub objects: Vec<DetectedObject>,
}

/// Bounded detection log for one camera
pub struct DetectionRing {
    camera: CameraKind,
    max_entries: usize,
    retention_ns: u64,
    frames: RwLock<VecDeque<DetectionFrame>>,
}

impl DetectionRing {
    /// Ring with the default bounds
    pub fn new(camera: CameraKind) -> Self {
        Self::with_bounds(camera, MAX_ENTRIES, RETENTION_NS)
    }

    /// Ring with explicit bounds
    pub fn with_bounds(camera: CameraKind, max_entries: usize, retention_ns: u64) -> Self {
        tracing::info!(
            camera = ?camera,
            max_entries,
            retention_sec = retention_ns / 1_000_000_000,
            "Detection ring created"
        );
        Self {
            camera,
            max_entries,
            retention_ns,
            frames: RwLock::new(VecDeque::with_capacity(max_entries.min(MAX_ENTRIES))),
        }
    }

    pub fn camera(&self) -> CameraKind {
        self.camera
    }

    /// Append a frame, stamping a zero timestamp and rewriting the camera to
    /// this ring's camera, then evict until both bounds hold again.
    pub async fn insert(&self, frame: DetectionFrame) {
        self.insert_at(frame, now_ns()).await;
    }

    async fn insert_at(&self, mut frame: DetectionFrame, now: u64) {
        if frame.timestamp == 0 {
            frame.timestamp = now;
        }
        frame.camera = self.camera;

        let mut frames = self.frames.write().await;
        frames.push_back(frame);

        if frames.len() > self.max_entries {
            frames.pop_front();
            tracing::trace!(camera = ?self.camera, "Ring at capacity, dropped oldest frame");
        }

        // Frames exactly at the retention age stay
        let cutoff = now.saturating_sub(self.retention_ns);
        while frames.front().is_some_and(|f| f.timestamp < cutoff) {
            frames.pop_front();
        }

        tracing::trace!(
            camera = ?self.camera,
            len = frames.len(),
            "Frame inserted"
        );
    }

    /// All frames with `start_ns <= timestamp <= end_ns`, in insertion order
    pub async fn query_range(&self, start_ns: u64, end_ns: u64) -> Vec<DetectionFrame> {
        let frames = self.frames.read().await;
        frames
            .iter()
            .filter(|f| f.timestamp >= start_ns && f.timestamp <= end_ns)
            .cloned()
            .collect()
    }

    /// Most recently inserted frame, if any
    pub async fn latest(&self) -> Option<DetectionFrame> {
        self.frames.read().await.back().cloned()
    }

    pub async fn len(&self) -> usize {
        self.frames.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.frames.read().await.is_empty()
    }
}

/// Current wall clock in nanoseconds since the Unix epoch
pub fn now_ns() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64, n: u32) -> DetectionFrame {
        DetectionFrame {
            timestamp: ts,
            frame_number: n,
            camera: CameraKind::Thermal, // rewritten by the ring on insert
            objects: vec![DetectedObject {
                class_id: ObjectClass::NormalCow.class_id(),
                confidence: 0.9,
                bbox: BoundingBox {
                    x: 10,
                    y: 20,
                    width: 30,
                    height: 40,
                },
                color: BboxColor::Green,
                has_bbox: true,
            }],
        }
    }

    #[tokio::test]
    async fn test_range_query_inclusive() {
        let ring = DetectionRing::new(CameraKind::Rgb);
        let now = 10_000_000_000u64;
        ring.insert_at(frame(1_000_000_000, 1), now).await;
        ring.insert_at(frame(2_000_000_000, 2), now).await;
        ring.insert_at(frame(3_000_000_000, 3), now).await;

        let hits = ring.query_range(1_500_000_000, 2_500_000_000).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].timestamp, 2_000_000_000);
        assert_eq!(hits[0].frame_number, 2);

        // Interval endpoints are inclusive
        let hits = ring.query_range(1_000_000_000, 3_000_000_000).await;
        assert_eq!(hits.len(), 3);
        assert_eq!(
            hits.iter().map(|f| f.frame_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_insert_rewrites_zero_timestamp_and_camera() {
        let ring = DetectionRing::new(CameraKind::Rgb);
        let now = 5_000_000_000u64;
        ring.insert_at(frame(0, 1), now).await;

        let latest = ring.latest().await.unwrap();
        assert_eq!(latest.timestamp, now);
        assert_eq!(latest.camera, CameraKind::Rgb);
    }

    #[tokio::test]
    async fn test_capacity_eviction_is_one_in_one_out() {
        let ring = DetectionRing::with_bounds(CameraKind::Rgb, 3, u64::MAX);
        let now = 100u64;
        for i in 1..=3 {
            ring.insert_at(frame(i, i as u32), now).await;
        }
        assert_eq!(ring.len().await, 3);

        ring.insert_at(frame(4, 4), now).await;
        assert_eq!(ring.len().await, 3);

        // Exactly the oldest was dropped
        let all = ring.query_range(0, u64::MAX).await;
        assert_eq!(
            all.iter().map(|f| f.frame_number).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_retention_boundary() {
        let retention = 100u64;
        let ring = DetectionRing::with_bounds(CameraKind::Rgb, 100, retention);
        let now = 1_000u64;

        ring.insert_at(frame(899, 1), now).await; // age 101 > retention
        ring.insert_at(frame(900, 2), now).await; // age == retention, kept
        ring.insert_at(frame(950, 3), now).await;

        let all = ring.query_range(0, u64::MAX).await;
        assert_eq!(
            all.iter().map(|f| f.frame_number).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn test_latest_none_iff_empty() {
        let ring = DetectionRing::new(CameraKind::Thermal);
        assert!(ring.latest().await.is_none());
        assert!(ring.is_empty().await);

        ring.insert(frame(0, 7)).await;
        let latest = ring.latest().await.unwrap();
        assert_eq!(latest.frame_number, 7);
        assert!(latest.timestamp > 0);
    }

    #[test]
    fn test_camera_api_names() {
        assert_eq!(CameraKind::from_api_name("RGB_Camera"), Some(CameraKind::Rgb));
        assert_eq!(
            CameraKind::from_api_name("Thermal_Camera"),
            Some(CameraKind::Thermal)
        );
        assert_eq!(CameraKind::from_api_name("Depth_Camera"), None);
        assert_eq!(CameraKind::Rgb.api_name(), "RGB_Camera");
    }

    #[test]
    fn test_class_id_round_trip() {
        for id in 0..6 {
            let class = ObjectClass::from_class_id(id).unwrap();
            assert_eq!(class.class_id(), id);
        }
        assert!(ObjectClass::from_class_id(6).is_none());
        assert_eq!(ObjectClass::FlipCow.default_color(), BboxColor::Red);
        assert_eq!(BboxColor::None.api_name(), "null");
    }
}
