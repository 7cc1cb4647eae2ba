use nalgebra::{Point2, Point3};
use std::sync::{Arc, OnceLock};

use super::detector::HandDetection;
use super::{memoize, BoundingBox, Memo};
use crate::camera::Capture;
use crate::coords::CoordinateTransformer;

/// 手の21点ランドマークのインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HandLandmarkIndex {
    Wrist = 0,
    ThumbCmc = 1,
    ThumbMcp = 2,
    ThumbIp = 3,
    ThumbTip = 4,
    IndexFingerMcp = 5,
    IndexFingerPip = 6,
    IndexFingerDip = 7,
    IndexFingerTip = 8,
    MiddleFingerMcp = 9,
    MiddleFingerPip = 10,
    MiddleFingerDip = 11,
    MiddleFingerTip = 12,
    RingFingerMcp = 13,
    RingFingerPip = 14,
    RingFingerDip = 15,
    RingFingerTip = 16,
    PinkyMcp = 17,
    PinkyPip = 18,
    PinkyDip = 19,
    PinkyTip = 20,
}

impl HandLandmarkIndex {
    pub const COUNT: usize = 21;

    pub fn from_index(index: usize) -> Option<Self> {
        use HandLandmarkIndex::*;
        const ALL: [HandLandmarkIndex; HandLandmarkIndex::COUNT] = [
            Wrist,
            ThumbCmc,
            ThumbMcp,
            ThumbIp,
            ThumbTip,
            IndexFingerMcp,
            IndexFingerPip,
            IndexFingerDip,
            IndexFingerTip,
            MiddleFingerMcp,
            MiddleFingerPip,
            MiddleFingerDip,
            MiddleFingerTip,
            RingFingerMcp,
            RingFingerPip,
            RingFingerDip,
            RingFingerTip,
            PinkyMcp,
            PinkyPip,
            PinkyDip,
            PinkyTip,
        ];
        ALL.get(index).copied()
    }
}

/// 手の骨格の接続定義
pub const HAND_CONNECTIONS: [(HandLandmarkIndex, HandLandmarkIndex); 21] = {
    use HandLandmarkIndex::*;
    [
        // 掌
        (Wrist, ThumbCmc),
        (Wrist, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (Wrist, PinkyMcp),
        // 親指
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // 人差し指
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // 中指
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // 薬指
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // 小指
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// 1つの手の検出結果
///
/// x, y は検出画像のピクセル、z は手首基準の相対奥行き（xと同じ倍率）。
pub struct HandLandmarks {
    points: [Point3<f32>; HandLandmarkIndex::COUNT],
    bbox: BoundingBox,
    capture: Arc<Capture>,
    scale: f32,
    index_tip: OnceLock<Point3<f32>>,
    thumb_tip: OnceLock<Point3<f32>>,
}

impl HandLandmarks {
    pub fn new(
        points: [Point3<f32>; HandLandmarkIndex::COUNT],
        bbox: BoundingBox,
        capture: Arc<Capture>,
        scale: f32,
    ) -> Self {
        Self {
            points,
            bbox,
            capture,
            scale,
            index_tip: OnceLock::new(),
            thumb_tip: OnceLock::new(),
        }
    }

    /// 正規化座標の検出結果を画像サイズのピクセルへ
    pub fn from_detection(
        detection: &HandDetection,
        image_size: (u32, u32),
        capture: Arc<Capture>,
        scale: f32,
    ) -> Self {
        let (cols, rows) = (image_size.0 as f32, image_size.1 as f32);
        let points = detection
            .landmarks
            .map(|p| Point3::new(p.x * cols, p.y * rows, p.z * cols));
        Self::new(points, detection.rect.scaled(cols, rows), capture, scale)
    }

    pub fn get(&self, index: HandLandmarkIndex) -> Point3<f32> {
        self.points[index as usize]
    }

    pub fn points(&self) -> &[Point3<f32>; HandLandmarkIndex::COUNT] {
        &self.points
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    fn pixel(&self, index: HandLandmarkIndex) -> (f32, f32) {
        let p = self.get(index);
        (p.x, p.y)
    }

    /// 2D投影（描画用）
    pub fn pixel_points(&self) -> [Point2<f32>; HandLandmarkIndex::COUNT] {
        self.points.map(|p| Point2::new(p.x, p.y))
    }

    /// 人差し指先のスクリーン座標（初回成功時にキャッシュ）
    pub fn index_tip_world(&self, transformer: &CoordinateTransformer) -> Option<Point3<f32>> {
        self.resolve_index_tip(transformer).map(Memo::point)
    }

    pub fn thumb_tip_world(&self, transformer: &CoordinateTransformer) -> Option<Point3<f32>> {
        self.resolve_thumb_tip(transformer).map(Memo::point)
    }

    pub fn resolve_index_tip(&self, transformer: &CoordinateTransformer) -> Option<Memo> {
        memoize(&self.index_tip, || {
            transformer.landmark_to_world(self.pixel(HandLandmarkIndex::IndexFingerTip), self.scale, &self.capture)
        })
    }

    pub fn resolve_thumb_tip(&self, transformer: &CoordinateTransformer) -> Option<Memo> {
        memoize(&self.thumb_tip, || {
            transformer.landmark_to_world(self.pixel(HandLandmarkIndex::ThumbTip), self.scale, &self.capture)
        })
    }
}

impl std::fmt::Debug for HandLandmarks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandLandmarks")
            .field("bbox", &self.bbox)
            .field("capture", &self.capture.id())
            .field("scale", &self.scale)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::DepthImage;
    use image::RgbImage;

    #[test]
    fn test_hand_landmark_index() {
        assert_eq!(HandLandmarkIndex::COUNT, 21);
        assert_eq!(HandLandmarkIndex::from_index(4), Some(HandLandmarkIndex::ThumbTip));
        assert_eq!(HandLandmarkIndex::from_index(8), Some(HandLandmarkIndex::IndexFingerTip));
        assert_eq!(HandLandmarkIndex::from_index(20), Some(HandLandmarkIndex::PinkyTip));
        assert_eq!(HandLandmarkIndex::from_index(21), None);
    }

    #[test]
    fn test_hand_connections_cover_all_landmarks() {
        let mut seen = [false; HandLandmarkIndex::COUNT];
        for (a, b) in HAND_CONNECTIONS.iter() {
            seen[*a as usize] = true;
            seen[*b as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_from_detection_scales_to_pixels() {
        let capture = Arc::new(Capture::new(1, RgbImage::new(16, 16), DepthImage::new(16, 16), DepthImage::new(8, 8)));
        let mut landmarks = [Point3::origin(); HandLandmarkIndex::COUNT];
        landmarks[HandLandmarkIndex::IndexFingerTip as usize] = Point3::new(0.5, 0.25, -0.1);
        let detection = HandDetection {
            landmarks,
            rect: BoundingBox::new(0.5, 0.5, 0.5, 0.5),
            presence: 1.0,
        };

        let hand = HandLandmarks::from_detection(&detection, (8, 4), capture, 2.0);
        let tip = hand.get(HandLandmarkIndex::IndexFingerTip);
        assert_eq!(tip.x, 4.0);
        assert_eq!(tip.y, 1.0);
        // z は幅基準
        assert!((tip.z + 0.8).abs() < 1e-6);
        assert_eq!(hand.bbox().width, 4.0);
        assert_eq!(hand.bbox().height, 2.0);
    }
}
