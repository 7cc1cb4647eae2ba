use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use image::RgbImage;
use std::time::{Duration, Instant};

use crate::camera::{DepthDevice, DepthImage, RawFrame};
use crate::config::DeviceConfig;
use crate::error::{CaptureError, StartupError};

/// OpenCV の OpenNI2 バックエンドを使用したデプスカメラ
///
/// レジストレーションは無効にし、デプスはセンサ本来の空間のまま受け取る。
/// カラー空間への再投影は `CaptureSource` がキャリブレーションを使って行う。
pub struct OpenNiCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenNiCamera {
    pub fn open(config: &DeviceConfig) -> Result<Self, StartupError> {
        let mut capture = VideoCapture::new(config.index, videoio::CAP_OPENNI2)
            .map_err(|e| StartupError::OpenFailed(e.to_string()))?;

        if !capture.is_opened().map_err(|e| StartupError::OpenFailed(e.to_string()))? {
            return Err(StartupError::NoDevice);
        }

        let configure = |capture: &mut VideoCapture| -> opencv::Result<()> {
            capture.set(videoio::CAP_PROP_OPENNI_REGISTRATION, 0.0)?;
            capture.set(videoio::CAP_PROP_FPS, config.fps as f64)?;
            capture.set(videoio::CAP_PROP_READ_TIMEOUT_MSEC, config.capture_timeout_ms as f64)?;
            Ok(())
        };
        configure(&mut capture).map_err(|e| StartupError::StartFailed(e.to_string()))?;

        let width = capture
            .get(videoio::CAP_OPENNI_IMAGE_GENERATOR + videoio::CAP_PROP_FRAME_WIDTH)
            .map_err(|e| StartupError::StartFailed(e.to_string()))? as u32;
        let height = capture
            .get(videoio::CAP_OPENNI_IMAGE_GENERATOR + videoio::CAP_PROP_FRAME_HEIGHT)
            .map_err(|e| StartupError::StartFailed(e.to_string()))? as u32;
        tracing::info!(width, height, fps = config.fps, "Opened OpenNI depth camera {}", config.index);

        Ok(Self { capture, width, height })
    }

    /// カラー画像の解像度
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn retrieve(&mut self, flag: i32) -> Result<Mat, CaptureError> {
        let mut mat = Mat::default();
        let ok = self
            .capture
            .retrieve(&mut mat, flag)
            .map_err(|_| CaptureError::ReadFailed)?;
        if !ok || mat.empty() {
            return Err(CaptureError::ReadFailed);
        }
        Ok(mat)
    }
}

impl DepthDevice for OpenNiCamera {
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, CaptureError> {
        let start = Instant::now();
        let grabbed = self.capture.grab().map_err(|_| CaptureError::ReadFailed)?;
        if !grabbed {
            return Err(if start.elapsed() >= timeout {
                CaptureError::Timeout
            } else {
                CaptureError::ReadFailed
            });
        }

        let depth = self.retrieve(videoio::CAP_OPENNI_DEPTH_MAP)?;
        let bgr = self.retrieve(videoio::CAP_OPENNI_BGR_IMAGE)?;

        Ok(RawFrame::new(rgb_from_bgr(&bgr)?, depth_from_mat(&depth)?))
    }
}

/// CV_16UC1 Mat → DepthImage
fn depth_from_mat(mat: &Mat) -> Result<DepthImage, CaptureError> {
    let data = mat.data_typed::<u16>().map_err(|_| CaptureError::ReadFailed)?;
    DepthImage::from_raw(mat.cols() as u32, mat.rows() as u32, data.to_vec()).ok_or(CaptureError::ReadFailed)
}

/// BGR Mat → RgbImage
fn rgb_from_bgr(mat: &Mat) -> Result<RgbImage, CaptureError> {
    let bytes = mat.data_bytes().map_err(|_| CaptureError::ReadFailed)?;
    let mut rgb = Vec::with_capacity(bytes.len());
    for px in bytes.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    RgbImage::from_raw(mat.cols() as u32, mat.rows() as u32, rgb).ok_or(CaptureError::ReadFailed)
}
