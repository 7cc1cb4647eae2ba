use image::{imageops, RgbImage};
use nalgebra::Point3;

use super::BoundingBox;

/// クロップ領域（正規化座標 0.0〜1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRegion {
    pub fn full() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.width >= 1.0 && self.height >= 1.0
    }

    /// 検出枠から正方形のクロップ領域を計算
    ///
    /// - 枠を `expand` 倍に拡張（中心を保持）
    /// - 長辺に合わせて正方形にする
    /// - 画像境界にクリップ
    pub fn around(bbox: &BoundingBox, image_w: u32, image_h: u32, expand: f32) -> Self {
        let fw = image_w as f32;
        let fh = image_h as f32;
        let side = bbox.width.max(bbox.height) * expand;

        let x = (bbox.center_x - side / 2.0).max(0.0);
        let y = (bbox.center_y - side / 2.0).max(0.0);
        let w = side.min(fw - x).max(1.0);
        let h = side.min(fh - y).max(1.0);

        Self {
            x: x / fw,
            y: y / fh,
            width: w / fw,
            height: h / fh,
        }
    }

    /// 画像から領域を切り出す
    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        if self.is_full() {
            return image.clone();
        }
        let (fw, fh) = (image.width() as f32, image.height() as f32);
        let x = (self.x * fw) as u32;
        let y = (self.y * fh) as u32;
        let w = ((self.width * fw) as u32).max(1);
        let h = ((self.height * fh) as u32).max(1);
        imageops::crop_imm(image, x, y, w, h).to_image()
    }

    /// クロップ画像内の正規化座標 → 画像全体の正規化座標
    ///
    /// z は幅基準なのでクロップ幅で縮める。
    pub fn remap(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::new(self.x + p.x * self.width, self.y + p.y * self.height, p.z * self.width)
    }
}

/// 点群を囲む検出枠（ピクセル座標）。点が2個未満ならNone
pub fn roi_from_points<'a, I>(points: I) -> Option<BoundingBox>
where
    I: IntoIterator<Item = &'a Point3<f32>>,
{
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    let mut count = 0u32;

    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
        count += 1;
    }

    if count < 2 {
        return None;
    }

    Some(BoundingBox::from_corners(min_x, min_y, max_x, max_y))
}
