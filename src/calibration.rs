use anyhow::{Context, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::camera::{DepthImage, ImageSpace};
use crate::error::CaptureError;

/// ピンホールカメラの内部パラメータ（ピクセル単位）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl Intrinsics {
    /// ピクセル座標 + 奥行き → カメラ座標
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) / self.fx * z, (v - self.cy) / self.fy * z, z)
    }

    /// カメラ座標 → ピクセル座標（カメラ後方ならNone）
    pub fn project(&self, p: &Vector3<f32>) -> Option<(f32, f32)> {
        if p.z <= 0.0 {
            return None;
        }
        Some((self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy))
    }

    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= 0.0 && v >= 0.0 && u < self.width as f32 && v < self.height as f32
    }
}

/// デプスカメラとカラーカメラのキャリブレーション
///
/// 3D点はデプスカメラ座標系（mm）で扱う。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthCalibration {
    pub depth: Intrinsics,
    pub color: Intrinsics,
    /// depth → color の回転行列 (row-major 3x3)
    pub rotation: [f32; 9],
    /// depth → color の並進ベクトル (mm)
    pub translation: [f32; 3],
    /// 有効な奥行きの範囲 (mm)
    pub min_depth_mm: u16,
    pub max_depth_mm: u16,
}

impl Default for DepthCalibration {
    /// 2x2ビニングの広角デプス (512x512) + 1080pカラーの代表値
    fn default() -> Self {
        Self {
            depth: Intrinsics {
                fx: 252.4,
                fy: 252.5,
                cx: 255.6,
                cy: 256.2,
                width: 512,
                height: 512,
            },
            color: Intrinsics {
                fx: 913.7,
                fy: 913.4,
                cx: 958.5,
                cy: 548.1,
                width: 1920,
                height: 1080,
            },
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [-32.0, -2.0, 4.0],
            min_depth_mm: 250,
            max_depth_mm: 2880,
        }
    }
}

impl DepthCalibration {
    pub fn intrinsics(&self, space: ImageSpace) -> &Intrinsics {
        match space {
            ImageSpace::Color => &self.color,
            ImageSpace::Depth => &self.depth,
        }
    }

    fn rotation_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_row_slice(&self.rotation)
    }

    fn translation_vector(&self) -> Vector3<f32> {
        Vector3::new(self.translation[0], self.translation[1], self.translation[2])
    }

    /// デプスカメラ座標 → カラーカメラ座標
    pub fn depth_to_color_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation_matrix() * p + self.translation_vector()
    }

    /// カラーカメラ座標 → デプスカメラ座標
    pub fn color_to_depth_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation_matrix().transpose() * (p - self.translation_vector())
    }

    pub fn is_valid_depth(&self, depth_mm: u16) -> bool {
        depth_mm != 0 && depth_mm >= self.min_depth_mm && depth_mm <= self.max_depth_mm
    }

    /// 2Dピクセル + 奥行き → デプスカメラ座標の3D点 (mm)
    ///
    /// 穴（depth=0）、範囲外の奥行き、画像外、センサ後方の点はNone。
    pub fn unproject(&self, x: f32, y: f32, depth_mm: u16, space: ImageSpace) -> Option<Vector3<f32>> {
        if !self.is_valid_depth(depth_mm) {
            return None;
        }
        let intrinsics = self.intrinsics(space);
        if !intrinsics.contains(x, y) {
            return None;
        }
        let p = intrinsics.unproject(x, y, depth_mm as f32);
        let p = match space {
            ImageSpace::Depth => p,
            ImageSpace::Color => self.color_to_depth_point(&p),
        };
        if p.z <= 0.0 {
            return None;
        }
        Some(p)
    }

    /// デプスカメラ座標の3D点 → 指定空間のピクセル座標
    pub fn project(&self, p: &Vector3<f32>, space: ImageSpace) -> Option<(f32, f32)> {
        match space {
            ImageSpace::Depth => self.depth.project(p),
            ImageSpace::Color => self.color.project(&self.depth_to_color_point(p)),
        }
    }

    /// デプス画像をカラー画像のピクセル空間へ再投影
    ///
    /// 各デプスピクセルの投影範囲を矩形で塗り、重なりは手前（小さい奥行き）を優先する。
    pub fn align_depth_to_color(&self, depth: &DepthImage) -> std::result::Result<DepthImage, CaptureError> {
        if depth.width() != self.depth.width || depth.height() != self.depth.height {
            return Err(CaptureError::Reprojection(format!(
                "depth image is {}x{}, calibration expects {}x{}",
                depth.width(),
                depth.height(),
                self.depth.width,
                self.depth.height
            )));
        }

        let cw = self.color.width as i64;
        let ch = self.color.height as i64;
        let mut aligned = DepthImage::new(self.color.width, self.color.height);

        for (u, v, pixel) in depth.enumerate_pixels() {
            let d = pixel.0[0];
            if !self.is_valid_depth(d) {
                continue;
            }
            let z = d as f32;
            let p0 = self.depth_to_color_point(&self.depth.unproject(u as f32, v as f32, z));
            let p1 = self.depth_to_color_point(&self.depth.unproject(u as f32 + 1.0, v as f32 + 1.0, z));
            let (Some((x0, y0)), Some((x1, y1))) = (self.color.project(&p0), self.color.project(&p1)) else {
                continue;
            };

            let value = p0.z.round().clamp(1.0, u16::MAX as f32) as u16;
            let x_start = x0.min(x1).floor() as i64;
            let y_start = y0.min(y1).floor() as i64;
            let x_end = (x0.max(x1).ceil() as i64).max(x_start + 1);
            let y_end = (y0.max(y1).ceil() as i64).max(y_start + 1);

            for y in y_start.max(0)..y_end.min(ch) {
                for x in x_start.max(0)..x_end.min(cw) {
                    let target = aligned.get_pixel_mut(x as u32, y as u32);
                    if target.0[0] == 0 || value < target.0[0] {
                        target.0[0] = value;
                    }
                }
            }
        }

        Ok(aligned)
    }
}

pub fn save_calibration(path: &str, cal: &DepthCalibration) -> Result<()> {
    let json = serde_json::to_string_pretty(cal)?;
    fs::write(path, json).context("Failed to write calibration file")?;
    Ok(())
}

pub fn load_calibration(path: &str) -> Result<DepthCalibration> {
    let content = fs::read_to_string(path).context("Failed to read calibration file")?;
    let cal: DepthCalibration = serde_json::from_str(&content)?;
    Ok(cal)
}
