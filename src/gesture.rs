use nalgebra::{center, Point3};

use crate::config::GestureConfig;

/// 人差し指と親指の距離からつまみ動作を判定する
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrabDetector {
    /// つまみとみなす距離（cm）
    pub grab_distance: f32,
}

impl Default for GrabDetector {
    fn default() -> Self {
        Self { grab_distance: 2.0 }
    }
}

impl GrabDetector {
    pub fn new(grab_distance: f32) -> Self {
        Self { grab_distance }
    }

    pub fn from_config(config: &GestureConfig) -> Self {
        Self::new(config.grab_distance)
    }

    /// つまんでいれば2点の中点
    pub fn grab_position(&self, index: &Point3<f32>, thumb: &Point3<f32>) -> Option<Point3<f32>> {
        if nalgebra::distance(index, thumb) < self.grab_distance {
            Some(center(index, thumb))
        } else {
            None
        }
    }
}
