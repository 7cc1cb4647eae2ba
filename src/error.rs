//! エラー型
//!
//! キャプチャ・トラッキングの失敗はループ内でリトライされ、描画側には伝播しない。
//! 起動時のエラーのみ致命的。

use std::path::PathBuf;

use thiserror::Error;

/// 1フレーム取得時のエラー（すべてリトライ可能）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Timed out waiting for a capture")]
    Timeout,

    #[error("Failed to read a capture")]
    ReadFailed,

    #[error("Failed to align depth image to color camera: {0}")]
    Reprojection(String),
}

impl CaptureError {
    /// キャプチャループで再試行すべきか
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::Timeout | CaptureError::ReadFailed | CaptureError::Reprojection(_) => true,
        }
    }
}

/// 検出サイクルのエラー。前回のTrackingFrameがそのまま有効となる。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Face detector failed: {0}")]
    Detector(String),

    #[error("Hand tracker failed: {0}")]
    HandTracker(String),

    #[error("Hand tracker worker disconnected")]
    WorkerDisconnected,
}

/// 起動時のエラー（セッション中に回復不能）
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No depth cameras were detected")]
    NoDevice,

    #[error("Cannot open depth camera: {0}")]
    OpenFailed(String),

    #[error("Cannot start the depth camera streams: {0}")]
    StartFailed(String),

    #[error("Model file not found: {0}")]
    MissingModel(PathBuf),

    #[error("Invalid calibration: {0}")]
    Calibration(String),
}
