use image::{ImageBuffer, Luma, RgbImage};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::calibration::DepthCalibration;
use crate::error::CaptureError;

/// 16bit デプス画像（mm、0 = 欠損）
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// 画素座標の空間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSpace {
    /// カラー画像のピクセル空間（デプスはカラーへ再投影済み）
    Color,
    /// デプスセンサ本来のピクセル空間
    Depth,
}

/// デバイスから読み出した未加工のフレーム
pub struct RawFrame {
    pub color: RgbImage,
    pub depth: DepthImage,
    /// ネイティブバッファのハンドル。Captureと共に一度だけ解放される
    pub native: Option<Box<dyn Any + Send + Sync>>,
}

impl RawFrame {
    pub fn new(color: RgbImage, depth: DepthImage) -> Self {
        Self { color, depth, native: None }
    }
}

/// 同期されたカラー/デプスを1フレームずつ返すデバイス
pub trait DepthDevice: Send {
    /// タイムアウトまでブロックしてフレームを読む
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError>;
}

/// 同期されたカラー + デプスのペア（構築後は不変）
///
/// 複数のランドマークが同じCaptureを参照するため `Arc<Capture>` で共有する。
pub struct Capture {
    id: u64,
    captured_at: Instant,
    color: RgbImage,
    /// カラー空間へ再投影したデプス
    color_depth: DepthImage,
    /// デプス空間のデプス
    depth: DepthImage,
    _native: Option<Box<dyn Any + Send + Sync>>,
}

impl Capture {
    pub fn new(id: u64, color: RgbImage, color_depth: DepthImage, depth: DepthImage) -> Self {
        Self {
            id,
            captured_at: Instant::now(),
            color,
            color_depth,
            depth,
            _native: None,
        }
    }

    fn with_native(mut self, native: Option<Box<dyn Any + Send + Sync>>) -> Self {
        self._native = native;
        self
    }

    /// キャプチャの識別子（取得順に単調増加）
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn color_image(&self) -> &RgbImage {
        &self.color
    }

    pub fn depth_image(&self, space: ImageSpace) -> &DepthImage {
        match space {
            ImageSpace::Color => &self.color_depth,
            ImageSpace::Depth => &self.depth,
        }
    }

    /// 指定空間の (width, height)
    pub fn dimensions(&self, space: ImageSpace) -> (u32, u32) {
        self.depth_image(space).dimensions()
    }

    /// 画素のデプス値。画像外ならNone
    pub fn depth_at(&self, x: i32, y: i32, space: ImageSpace) -> Option<u16> {
        let image = self.depth_image(space);
        if x < 0 || y < 0 || x as u32 >= image.width() || y as u32 >= image.height() {
            return None;
        }
        Some(image.get_pixel(x as u32, y as u32).0[0])
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("id", &self.id)
            .field("color", &self.color.dimensions())
            .field("depth", &self.depth.dimensions())
            .finish()
    }
}

/// デバイスからCaptureを生成する
pub struct CaptureSource<D> {
    device: D,
    calibration: Arc<DepthCalibration>,
    timeout: Duration,
    next_id: u64,
}

impl<D: DepthDevice> CaptureSource<D> {
    pub fn new(device: D, calibration: Arc<DepthCalibration>, timeout: Duration) -> Self {
        Self {
            device,
            calibration,
            timeout,
            next_id: 1,
        }
    }

    pub fn calibration(&self) -> &Arc<DepthCalibration> {
        &self.calibration
    }

    /// 1フレーム取得してカラー空間のデプスを合成する
    ///
    /// 失敗時は部分的なCaptureを返さない。呼び出し側で再試行すること。
    pub fn acquire(&mut self) -> Result<Arc<Capture>, CaptureError> {
        let raw = self.device.read_frame(self.timeout)?;

        let (cw, ch) = raw.color.dimensions();
        if cw != self.calibration.color.width || ch != self.calibration.color.height {
            return Err(CaptureError::Reprojection(format!(
                "color image is {}x{}, calibration expects {}x{}",
                cw, ch, self.calibration.color.width, self.calibration.color.height
            )));
        }
        let color_depth = self.calibration.align_depth_to_color(&raw.depth)?;

        let id = self.next_id;
        self.next_id += 1;
        let capture = Capture::new(id, raw.color, color_depth, raw.depth).with_native(raw.native);
        Ok(Arc::new(capture))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calibration::Intrinsics;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn test_calibration() -> DepthCalibration {
        DepthCalibration {
            depth: Intrinsics { fx: 8.0, fy: 8.0, cx: 4.0, cy: 4.0, width: 8, height: 8 },
            color: Intrinsics { fx: 16.0, fy: 16.0, cx: 8.0, cy: 8.0, width: 16, height: 16 },
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0, 0.0, 0.0],
            min_depth_mm: 100,
            max_depth_mm: 5000,
        }
    }

    /// 平面のシーンを返すテスト用デバイス
    pub(crate) struct ScriptedDevice {
        pub results: VecDeque<Result<u16, CaptureError>>,
        pub drops: Option<Arc<AtomicUsize>>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DepthDevice for ScriptedDevice {
        fn read_frame(&mut self, _timeout: Duration) -> Result<RawFrame, CaptureError> {
            let depth = self.results.pop_front().unwrap_or(Err(CaptureError::Timeout))?;
            let mut frame = RawFrame::new(
                RgbImage::new(16, 16),
                DepthImage::from_pixel(8, 8, Luma([depth])),
            );
            if let Some(ref drops) = self.drops {
                frame.native = Some(Box::new(DropCounter(drops.clone())));
            }
            Ok(frame)
        }
    }

    #[test]
    fn test_acquire_aligns_depth() {
        let device = ScriptedDevice { results: VecDeque::from([Ok(1000)]), drops: None };
        let mut source = CaptureSource::new(device, Arc::new(test_calibration()), Duration::from_millis(10));
        let capture = source.acquire().unwrap();
        assert_eq!(capture.id(), 1);
        assert_eq!(capture.dimensions(ImageSpace::Color), (16, 16));
        assert_eq!(capture.dimensions(ImageSpace::Depth), (8, 8));
        assert_eq!(capture.depth_at(5, 5, ImageSpace::Color), Some(1000));
        assert_eq!(capture.depth_at(16, 0, ImageSpace::Color), None);
        assert_eq!(capture.depth_at(-1, 0, ImageSpace::Depth), None);
    }

    #[test]
    fn test_acquire_propagates_failures() {
        let device = ScriptedDevice {
            results: VecDeque::from([Err(CaptureError::Timeout), Err(CaptureError::ReadFailed), Ok(800)]),
            drops: None,
        };
        let mut source = CaptureSource::new(device, Arc::new(test_calibration()), Duration::from_millis(10));
        assert_eq!(source.acquire().unwrap_err(), CaptureError::Timeout);
        assert_eq!(source.acquire().unwrap_err(), CaptureError::ReadFailed);
        // 失敗はIDを消費しない
        assert_eq!(source.acquire().unwrap().id(), 1);
    }

    #[test]
    fn test_native_buffers_released_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let device = ScriptedDevice { results: VecDeque::from([Ok(1000)]), drops: Some(drops.clone()) };
        let mut source = CaptureSource::new(device, Arc::new(test_calibration()), Duration::from_millis(10));

        let capture = source.acquire().unwrap();
        let shared = capture.clone();
        drop(capture);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(shared);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_color_size_mismatch_is_reprojection_error() {
        struct WrongSize;
        impl DepthDevice for WrongSize {
            fn read_frame(&mut self, _timeout: Duration) -> Result<RawFrame, CaptureError> {
                Ok(RawFrame::new(RgbImage::new(4, 4), DepthImage::new(8, 8)))
            }
        }
        let mut source = CaptureSource::new(WrongSize, Arc::new(test_calibration()), Duration::from_millis(10));
        assert!(matches!(source.acquire(), Err(CaptureError::Reprojection(_))));
    }
}
