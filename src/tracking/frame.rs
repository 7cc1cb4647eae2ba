use std::sync::Arc;

use crate::camera::Capture;
use crate::landmarks::{FaceLandmarks, HandLandmarks};

/// 公開される検出結果一式（差し替えのみで、変更はしない）
#[derive(Debug, Clone, Default)]
pub struct TrackingFrame {
    pub face: Option<Arc<FaceLandmarks>>,
    pub hand: Option<Arc<HandLandmarks>>,
    /// このフレームを作ったCapture
    pub capture: Option<Arc<Capture>>,
    pub sequence: u64,
}

impl TrackingFrame {
    pub fn empty() -> Self {
        Self::default()
    }
}
