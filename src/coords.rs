use nalgebra::{Point3, Rotation3, Vector3};
use std::sync::Arc;

use crate::calibration::DepthCalibration;
use crate::camera::{Capture, ImageSpace};
use crate::config::MountConfig;

/// カメラ座標（mm、右-下-前）→ スクリーン座標（cm、右-上-手前）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSpace {
    rotation: Rotation3<f32>,
    offset: Vector3<f32>,
}

impl ScreenSpace {
    /// mm → cm
    pub const UNIT_SCALE: f32 = 0.1;

    /// チルト角（度、X軸まわり）とカメラ位置のオフセット（cm）から構築
    pub fn from_mount(tilt_deg: f32, offset: [f32; 3]) -> Self {
        Self {
            rotation: Rotation3::from_axis_angle(&Vector3::x_axis(), tilt_deg.to_radians()),
            offset: Vector3::from(offset),
        }
    }

    pub fn from_config(mount: &MountConfig) -> Self {
        Self::from_mount(mount.tilt_deg, mount.offset)
    }

    pub fn identity() -> Self {
        Self::from_mount(0.0, [0.0; 3])
    }

    /// デプスカメラ座標の点をスクリーン座標へ
    pub fn apply(&self, camera_mm: &Vector3<f32>) -> Point3<f32> {
        let flipped = Vector3::new(-camera_mm.x, -camera_mm.y, camera_mm.z) * Self::UNIT_SCALE;
        Point3::from(self.rotation * flipped + self.offset)
    }
}

/// ピクセル + Capture → スクリーン座標
pub struct CoordinateTransformer {
    calibration: Arc<DepthCalibration>,
    screen: ScreenSpace,
}

impl CoordinateTransformer {
    pub fn new(calibration: Arc<DepthCalibration>, screen: ScreenSpace) -> Self {
        Self { calibration, screen }
    }

    pub fn screen_space(&self) -> &ScreenSpace {
        &self.screen
    }

    /// ピクセルのデプスを読んでデプスカメラ座標（mm）に逆投影
    pub fn to_camera(&self, x: i32, y: i32, space: ImageSpace, capture: &Capture) -> Option<Vector3<f32>> {
        let depth = capture.depth_at(x, y, space)?;
        self.calibration.unproject(x as f32, y as f32, depth, space)
    }

    /// ピクセル → スクリーン座標。穴・範囲外はNone
    pub fn to_world(&self, x: i32, y: i32, space: ImageSpace, capture: &Capture) -> Option<Point3<f32>> {
        self.to_camera(x, y, space, capture).map(|p| self.screen.apply(&p))
    }

    /// 検出画像上のランドマーク → スクリーン座標
    ///
    /// 縮小画像での検出位置はデプスの境界をまたぎやすいので、
    /// カラー空間の3x3近傍から最も手前の点を採用する。
    pub fn landmark_to_world(&self, pixel: (f32, f32), scale: f32, capture: &Capture) -> Option<Point3<f32>> {
        let cx = (pixel.0 * scale).round() as i32;
        let cy = (pixel.1 * scale).round() as i32;

        let mut nearest: Option<Vector3<f32>> = None;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let Some(p) = self.to_camera(cx + dx, cy + dy, ImageSpace::Color, capture) else {
                    continue;
                };
                if nearest.map_or(true, |n| p.z < n.z) {
                    nearest = Some(p);
                }
            }
        }

        nearest.map(|p| self.screen.apply(&p))
    }

    /// デプス画像の有効な全ピクセルをスクリーン座標へ
    pub fn point_cloud(&self, capture: &Capture) -> Vec<Point3<f32>> {
        let depth = capture.depth_image(ImageSpace::Depth);
        depth
            .enumerate_pixels()
            .filter_map(|(x, y, d)| {
                self.calibration
                    .unproject(x as f32, y as f32, d.0[0], ImageSpace::Depth)
                    .map(|p| self.screen.apply(&p))
            })
            .collect()
    }
}
