//! 視点位置に応じたオフアクシス投影
//!
//! 物理スクリーンを3つの角で定義し、目の位置から見た非対称な視錐台を作る。
//! スクリーン上の3D物体が頭を動かしても同じ場所に留まって見える。

use nalgebra::{Matrix4, Point3, Translation3, Vector3};

use crate::config::ScreenConfig;

/// 目とスクリーン面の距離の下限（ワールド単位）
///
/// 目がスクリーン面上や裏側にある場合でも行列が有限になるようにする。
pub const MIN_EYE_DISTANCE: f32 = 1e-3;

/// near面上の視錐台の範囲
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumExtents {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
    /// 目からスクリーン面までの距離（クランプ後）
    pub distance: f32,
}

impl FrustumExtents {
    /// OpenGL の glFrustum 相当
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let (l, r, b, t, n, f) = (self.left, self.right, self.bottom, self.top, self.near, self.far);
        #[rustfmt::skip]
        let m = Matrix4::new(
            2.0 * n / (r - l), 0.0, (r + l) / (r - l), 0.0,
            0.0, 2.0 * n / (t - b), (t + b) / (t - b), 0.0,
            0.0, 0.0, -(f + n) / (f - n), -2.0 * f * n / (f - n),
            0.0, 0.0, -1.0, 0.0,
        );
        m
    }
}

/// 物理スクリーン
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    /// 左下
    pa: Point3<f32>,
    /// 右下
    pb: Point3<f32>,
    /// 左上
    pc: Point3<f32>,
    vr: Vector3<f32>,
    vu: Vector3<f32>,
    vn: Vector3<f32>,
    near: f32,
    far: f32,
}

/// 下辺と左辺の直交判定の許容誤差（cos）
const MAX_CORNER_SKEW: f32 = 1e-4;

impl Screen {
    /// 3つの角から構築。長方形にならない（一直線上、または直交しない）場合はNone
    pub fn from_corners(
        bottom_left: Point3<f32>,
        bottom_right: Point3<f32>,
        top_left: Point3<f32>,
        near: f32,
        far: f32,
    ) -> Option<Self> {
        let vr = (bottom_right - bottom_left).try_normalize(f32::EPSILON)?;
        let vu = (top_left - bottom_left).try_normalize(f32::EPSILON)?;
        if vr.dot(&vu).abs() > MAX_CORNER_SKEW {
            return None;
        }
        let vn = vr.cross(&vu).try_normalize(f32::EPSILON)?;
        Some(Self {
            pa: bottom_left,
            pb: bottom_right,
            pc: top_left,
            vr,
            vu,
            vn,
            near,
            far,
        })
    }

    /// XY平面上で `origin` を中心とする幅 x 高さのスクリーン
    pub fn centered(origin: Point3<f32>, width: f32, height: f32, near: f32, far: f32) -> Option<Self> {
        let (hw, hh) = (width / 2.0, height / 2.0);
        Self::from_corners(
            origin + Vector3::new(-hw, -hh, 0.0),
            origin + Vector3::new(hw, -hh, 0.0),
            origin + Vector3::new(-hw, hh, 0.0),
            near,
            far,
        )
    }

    pub fn from_config(config: &ScreenConfig) -> Option<Self> {
        Self::from_corners(
            Point3::from(config.bottom_left),
            Point3::from(config.bottom_right),
            Point3::from(config.top_left),
            config.near,
            config.far,
        )
    }

    pub fn center(&self) -> Point3<f32> {
        self.pa + ((self.pb - self.pa) + (self.pc - self.pa)) / 2.0
    }

    pub fn width(&self) -> f32 {
        (self.pb - self.pa).norm()
    }

    pub fn height(&self) -> f32 {
        (self.pc - self.pa).norm()
    }

    pub fn normal(&self) -> &Vector3<f32> {
        &self.vn
    }

    /// 目から見た視錐台の範囲
    pub fn extents(&self, eye: &Point3<f32>) -> FrustumExtents {
        let va = self.pa - eye;
        let vb = self.pb - eye;
        let vc = self.pc - eye;

        let distance = (-self.vn.dot(&va)).max(MIN_EYE_DISTANCE);
        let s = self.near / distance;

        FrustumExtents {
            left: self.vr.dot(&va) * s,
            right: self.vr.dot(&vb) * s,
            bottom: self.vu.dot(&va) * s,
            top: self.vu.dot(&vc) * s,
            near: self.near,
            far: self.far,
            distance,
        }
    }

    /// P = frustum · Mᵀ · T(-eye)
    pub fn projection_for(&self, eye: &Point3<f32>) -> Matrix4<f32> {
        let frustum = self.extents(eye).to_matrix();

        // スクリーンの基底へ回転
        let mut basis = Matrix4::identity();
        for i in 0..3 {
            basis[(0, i)] = self.vr[i];
            basis[(1, i)] = self.vu[i];
            basis[(2, i)] = self.vn[i];
        }

        let translation = Translation3::from(-eye.coords).to_homogeneous();
        frustum * basis * translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Perspective3, Vector4};

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn reference_screen() -> Screen {
        Screen::from_corners(
            Point3::new(-35.0, 0.0, 0.0),
            Point3::new(35.0, 0.0, 0.0),
            Point3::new(-35.0, 52.0, 0.0),
            1.0,
            1000.0,
        )
        .unwrap()
    }

    fn project(m: &Matrix4<f32>, p: &Point3<f32>) -> Vector4<f32> {
        m * p.to_homogeneous()
    }

    #[test]
    fn test_on_axis_matches_symmetric_perspective() {
        let screen = reference_screen();
        let eye = Point3::new(0.0, 26.0, 50.0);
        let off_axis = screen.projection_for(&eye);

        let fovy = 2.0 * (26.0f32 / 50.0).atan();
        let perspective = Perspective3::new(70.0 / 52.0, fovy, 1.0, 1000.0);
        let expected = perspective.as_matrix() * Translation3::from(-eye.coords).to_homogeneous();

        for (a, b) in off_axis.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}\n{}\n{}", a, b, off_axis, expected);
        }
    }

    #[test]
    fn test_screen_center_maps_to_clip_origin() {
        let screen = reference_screen();
        let m = screen.projection_for(&Point3::new(0.0, 26.0, 50.0));
        let clip = project(&m, &screen.center());
        assert!(clip.w > 0.0);
        assert!(approx_eq(clip.x / clip.w, 0.0));
        assert!(approx_eq(clip.y / clip.w, 0.0));
    }

    #[test]
    fn test_screen_corners_map_to_ndc_corners() {
        let screen = reference_screen();
        let m = screen.projection_for(&Point3::new(12.0, 40.0, 35.0));
        let bl = project(&m, &Point3::new(-35.0, 0.0, 0.0));
        let tr = project(&m, &Point3::new(35.0, 52.0, 0.0));
        assert!(approx_eq(bl.x / bl.w, -1.0));
        assert!(approx_eq(bl.y / bl.w, -1.0));
        assert!(approx_eq(tr.x / tr.w, 1.0));
        assert!(approx_eq(tr.y / tr.w, 1.0));
    }

    #[test]
    fn test_closer_eye_widens_extents_proportionally() {
        let screen = reference_screen();
        let far = screen.extents(&Point3::new(5.0, 20.0, 50.0));
        let near = screen.extents(&Point3::new(5.0, 20.0, 25.0));

        assert!(near.left < far.left);
        assert!(near.right > far.right);
        assert!(near.bottom < far.bottom);
        assert!(near.top > far.top);

        assert!(approx_eq(near.left, far.left * 2.0));
        assert!(approx_eq(near.right, far.right * 2.0));
        assert!(approx_eq(near.bottom, far.bottom * 2.0));
        assert!(approx_eq(near.top, far.top * 2.0));
    }

    #[test]
    fn test_eye_on_plane_is_clamped() {
        let screen = reference_screen();
        for eye in [Point3::new(0.0, 26.0, 0.0), Point3::new(0.0, 26.0, -10.0)] {
            let extents = screen.extents(&eye);
            assert_eq!(extents.distance, MIN_EYE_DISTANCE);
            assert!(screen.projection_for(&eye).iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_centered_screen() {
        let screen = Screen::centered(Point3::new(0.0, 26.0, 0.0), 70.0, 52.0, 1.0, 1000.0).unwrap();
        assert_eq!(screen, reference_screen());
        assert!(approx_eq(screen.width(), 70.0));
        assert!(approx_eq(screen.height(), 52.0));
        assert_eq!(screen.normal(), &Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_degenerate_corners() {
        let p = Point3::new(1.0, 1.0, 0.0);
        assert!(Screen::from_corners(p, p, Point3::new(1.0, 2.0, 0.0), 1.0, 100.0).is_none());
    }

    #[test]
    fn test_skewed_corners_are_rejected() {
        let screen = Screen::from_corners(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(5.0, 10.0, 0.0),
            1.0,
            100.0,
        );
        assert!(screen.is_none());
    }

    #[test]
    fn test_tilted_rectangle_is_accepted() {
        // X軸まわりに45度傾いた長方形
        let screen = Screen::from_corners(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(0.0, 10.0, 10.0),
            1.0,
            100.0,
        )
        .unwrap();
        assert!(screen.vr.dot(&screen.vu).abs() < 1e-6);
        assert!((screen.normal().norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_config_defaults() {
        let screen = Screen::from_config(&ScreenConfig::default()).unwrap();
        assert_eq!(screen, reference_screen());
    }
}
