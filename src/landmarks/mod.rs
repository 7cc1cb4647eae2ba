pub mod detector;
pub mod face;
pub mod hand;
#[cfg(feature = "desktop")]
pub mod onnx;
pub mod queued;
pub mod roi;

pub use detector::{FaceDetection, FaceDetector, HandDetection, HandLandmarkModel, HandTracker};
pub use face::{FaceLandmarkIndex, FaceLandmarks};
pub use hand::{HandLandmarkIndex, HandLandmarks, HAND_CONNECTIONS};
#[cfg(feature = "desktop")]
pub use onnx::{OnnxFaceDetector, OnnxHandLandmarker};
pub use queued::QueuedHandTracker;
pub use roi::{roi_from_points, CropRegion};

use nalgebra::Point3;
use std::sync::OnceLock;

/// 検出枠（ピクセル座標、中心 + サイズ）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    /// 回転（ラジアン）
    pub rotation: f32,
}

impl BoundingBox {
    pub fn new(center_x: f32, center_y: f32, width: f32, height: f32) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
            rotation: 0.0,
        }
    }

    /// 左上と右下から構築
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new((x0 + x1) / 2.0, (y0 + y1) / 2.0, (x1 - x0).abs(), (y1 - y0).abs())
    }

    /// 各軸を倍率で拡大縮小（中心も移動する）
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            center_x: self.center_x * sx,
            center_y: self.center_y * sy,
            width: self.width * sx,
            height: self.height * sy,
            rotation: self.rotation,
        }
    }
}

/// メモ化した座標
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Memo {
    /// この呼び出しでキャッシュした
    Computed(Point3<f32>),
    /// キャッシュ済みの値
    Cached(Point3<f32>),
}

impl Memo {
    pub fn point(self) -> Point3<f32> {
        match self {
            Memo::Computed(p) | Memo::Cached(p) => p,
        }
    }

    pub fn is_computed(self) -> bool {
        matches!(self, Memo::Computed(_))
    }
}

/// 初回成功時のみ値を保持する
///
/// 失敗（None）はキャッシュしないので、次の問い合わせで再計算される。
/// 同時に計算した場合、`Computed` を受け取るのはセルを埋めた1呼び出しだけ。
pub(crate) fn memoize<F>(cell: &OnceLock<Point3<f32>>, compute: F) -> Option<Memo>
where
    F: FnOnce() -> Option<Point3<f32>>,
{
    if let Some(p) = cell.get() {
        return Some(Memo::Cached(*p));
    }
    let p = compute()?;
    match cell.set(p) {
        Ok(()) => Some(Memo::Computed(p)),
        Err(_) => cell.get().map(|p| Memo::Cached(*p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_from_corners() {
        let bbox = BoundingBox::from_corners(10.0, 20.0, 30.0, 60.0);
        assert_eq!(bbox.center_x, 20.0);
        assert_eq!(bbox.center_y, 40.0);
        assert_eq!(bbox.width, 20.0);
        assert_eq!(bbox.height, 40.0);
    }

    #[test]
    fn test_bounding_box_scaled() {
        let bbox = BoundingBox::new(0.5, 0.25, 0.1, 0.2).scaled(640.0, 480.0);
        assert_eq!(bbox.center_x, 320.0);
        assert_eq!(bbox.center_y, 120.0);
        assert_eq!(bbox.width, 64.0);
        assert_eq!(bbox.height, 96.0);
    }

    #[test]
    fn test_memoize_keeps_first_success() {
        let cell = OnceLock::new();
        assert_eq!(memoize(&cell, || None), None);
        assert!(cell.get().is_none());

        let first = memoize(&cell, || Some(Point3::new(1.0, 2.0, 3.0)));
        let second = memoize(&cell, || Some(Point3::new(9.0, 9.0, 9.0)));
        assert_eq!(first, Some(Memo::Computed(Point3::new(1.0, 2.0, 3.0))));
        assert_eq!(second, Some(Memo::Cached(Point3::new(1.0, 2.0, 3.0))));
    }

    #[test]
    fn test_memoize_reports_computed_once_across_threads() {
        let cell = OnceLock::new();
        let shared = &cell;
        let computed = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| s.spawn(move || memoize(shared, || Some(Point3::new(i as f32, 0.0, 0.0)))))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(computed.iter().filter(|m| m.is_computed()).count(), 1);
        let stored = *cell.get().unwrap();
        assert!(computed.iter().all(|m| m.point() == stored));
    }
}
