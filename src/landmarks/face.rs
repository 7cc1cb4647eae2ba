use nalgebra::{Point2, Point3};
use std::sync::{Arc, OnceLock};

use super::detector::FaceDetection;
use super::{memoize, BoundingBox, Memo};
use crate::camera::Capture;
use crate::coords::CoordinateTransformer;

/// 顔の5点ランドマークのインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FaceLandmarkIndex {
    LeftEyeOuter = 0,
    LeftEyeInner = 1,
    RightEyeOuter = 2,
    RightEyeInner = 3,
    Nose = 4,
}

impl FaceLandmarkIndex {
    pub const COUNT: usize = 5;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::LeftEyeOuter),
            1 => Some(Self::LeftEyeInner),
            2 => Some(Self::RightEyeOuter),
            3 => Some(Self::RightEyeInner),
            4 => Some(Self::Nose),
            _ => None,
        }
    }
}

/// 1つの顔の検出結果
///
/// 座標は検出画像（縮小後）のピクセル。検出元のCaptureを保持し、
/// 目の3D位置はこのインスタンスに対して一度だけ計算される。
pub struct FaceLandmarks {
    points: [Point2<f32>; FaceLandmarkIndex::COUNT],
    bbox: BoundingBox,
    capture: Arc<Capture>,
    /// 検出画像 → カラー画像の倍率
    scale: f32,
    left_eye: OnceLock<Point3<f32>>,
    right_eye: OnceLock<Point3<f32>>,
}

impl FaceLandmarks {
    pub fn new(
        points: [Point2<f32>; FaceLandmarkIndex::COUNT],
        bbox: BoundingBox,
        capture: Arc<Capture>,
        scale: f32,
    ) -> Self {
        Self {
            points,
            bbox,
            capture,
            scale,
            left_eye: OnceLock::new(),
            right_eye: OnceLock::new(),
        }
    }

    pub fn from_detection(detection: &FaceDetection, capture: Arc<Capture>, scale: f32) -> Self {
        Self::new(detection.points, detection.bbox, capture, scale)
    }

    pub fn get(&self, index: FaceLandmarkIndex) -> Point2<f32> {
        self.points[index as usize]
    }

    pub fn points(&self) -> &[Point2<f32>; FaceLandmarkIndex::COUNT] {
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

    /// 左目の中心（両目尻の中点、検出画像のピクセル）
    pub fn left_eye_pixel(&self) -> (f32, f32) {
        midpoint(self.get(FaceLandmarkIndex::LeftEyeOuter), self.get(FaceLandmarkIndex::LeftEyeInner))
    }

    pub fn right_eye_pixel(&self) -> (f32, f32) {
        midpoint(self.get(FaceLandmarkIndex::RightEyeOuter), self.get(FaceLandmarkIndex::RightEyeInner))
    }

    /// 左目のスクリーン座標（初回成功時にキャッシュ）
    pub fn left_eye_world(&self, transformer: &CoordinateTransformer) -> Option<Point3<f32>> {
        self.resolve_left_eye(transformer).map(Memo::point)
    }

    pub fn right_eye_world(&self, transformer: &CoordinateTransformer) -> Option<Point3<f32>> {
        self.resolve_right_eye(transformer).map(Memo::point)
    }

    /// キャッシュしたのがこの呼び出しかどうかも返す
    pub fn resolve_left_eye(&self, transformer: &CoordinateTransformer) -> Option<Memo> {
        memoize(&self.left_eye, || {
            transformer.landmark_to_world(self.left_eye_pixel(), self.scale, &self.capture)
        })
    }

    pub fn resolve_right_eye(&self, transformer: &CoordinateTransformer) -> Option<Memo> {
        memoize(&self.right_eye, || {
            transformer.landmark_to_world(self.right_eye_pixel(), self.scale, &self.capture)
        })
    }
}

impl std::fmt::Debug for FaceLandmarks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceLandmarks")
            .field("points", &self.points)
            .field("bbox", &self.bbox)
            .field("capture", &self.capture.id())
            .field("scale", &self.scale)
            .finish()
    }
}

fn midpoint(a: Point2<f32>, b: Point2<f32>) -> (f32, f32) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}
