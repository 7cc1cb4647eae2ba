//! キャプチャスレッドとトラッキングスレッドの管理
//!
//! キャプチャスレッドは最新のCaptureを、トラッキングスレッドは最新のTrackingFrameを
//! それぞれ単一スロットへ後勝ちで公開する。描画側はクエリメソッドで読むだけ。

use nalgebra::Point3;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::camera::{Capture, CaptureSource, DepthDevice};
use crate::config::Config;
use crate::coords::CoordinateTransformer;
use crate::error::StartupError;
use crate::landmarks::{FaceDetector, HandTracker};
use crate::sample_log::{now_millis, SampleLog};
use crate::tracking::{CycleState, LatestSlot, TrackingFrame, TrackingPipeline};

/// スレッドのタイミングとフィルタの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerOptions {
    /// キャプチャ失敗後の再試行間隔
    pub retry_delay: Duration,
    /// 新しいCaptureが無い時の待機
    pub idle_sleep: Duration,
    /// 人差し指と親指の最大距離（cm）
    pub max_finger_span: f32,
    /// サンプルログの系列ごとの上限
    pub max_samples: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1),
            idle_sleep: Duration::from_millis(1),
            max_finger_span: 18.0,
            max_samples: 100_000,
        }
    }
}

impl TrackerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_delay: config.device.retry_delay(),
            idle_sleep: config.tracking.idle_sleep(),
            max_finger_span: config.tracking.max_finger_span,
            max_samples: config.log.max_samples,
        }
    }
}

/// スレッド間で共有する状態
pub struct SharedState {
    pub latest_capture: LatestSlot<Capture>,
    pub current_frame: LatestSlot<TrackingFrame>,
    cycle_state: Mutex<CycleState>,
    shutdown_requested: AtomicBool,
    transformer: CoordinateTransformer,
    max_finger_span: f32,
    sample_log: Mutex<SampleLog>,
}

impl SharedState {
    pub fn new(transformer: CoordinateTransformer, max_finger_span: f32, sample_log: SampleLog) -> Arc<Self> {
        Arc::new(Self {
            latest_capture: LatestSlot::new(),
            current_frame: LatestSlot::new(),
            cycle_state: Mutex::new(CycleState::Idle),
            shutdown_requested: AtomicBool::new(false),
            transformer,
            max_finger_span,
            sample_log: Mutex::new(sample_log),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Captureが1つ以上公開されたか
    pub fn is_ready(&self) -> bool {
        !self.latest_capture.is_empty()
    }

    pub fn frame(&self) -> Option<Arc<TrackingFrame>> {
        self.current_frame.latest()
    }

    pub fn cycle_state(&self) -> CycleState {
        *self.cycle_state.lock()
    }

    fn set_cycle_state(&self, state: CycleState) {
        *self.cycle_state.lock() = state;
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    /// 左目のスクリーン座標（cm）
    pub fn left_eye_pos(&self) -> Option<Point3<f32>> {
        let face = self.frame()?.face.clone()?;
        let memo = face.resolve_left_eye(&self.transformer)?;
        if memo.is_computed() {
            self.sample_log.lock().record_left_eye(now_millis(), &memo.point());
        }
        Some(memo.point())
    }

    pub fn right_eye_pos(&self) -> Option<Point3<f32>> {
        let face = self.frame()?.face.clone()?;
        let memo = face.resolve_right_eye(&self.transformer)?;
        if memo.is_computed() {
            self.sample_log.lock().record_right_eye(now_millis(), &memo.point());
        }
        Some(memo.point())
    }

    /// 人差し指先と親指先のスクリーン座標
    ///
    /// 2点が `max_finger_span` 以上離れている場合は誤検出として捨てる。
    pub fn hand_landmarks(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let hand = self.frame()?.hand.clone()?;
        let index = hand.resolve_index_tip(&self.transformer)?;
        let thumb = hand.resolve_thumb_tip(&self.transformer)?.point();
        if nalgebra::distance(&index.point(), &thumb) >= self.max_finger_span {
            return None;
        }

        // 人差し指をキャッシュした呼び出しだけが記録する
        if index.is_computed() {
            self.sample_log.lock().record_hand(now_millis(), &index.point(), &thumb);
        }
        Some((index.point(), thumb))
    }

    /// 最新のCaptureのデプスを全点スクリーン座標へ
    pub fn point_cloud(&self) -> Vec<Point3<f32>> {
        match self.latest_capture.latest() {
            Some(capture) => self.transformer.point_cloud(&capture),
            None => Vec::new(),
        }
    }

    pub fn sample_log(&self) -> SampleLog {
        self.sample_log.lock().clone()
    }
}

/// 停止要求までCaptureを取得して公開し続ける
///
/// 失敗したら `retry_delay` 待って再試行する。失敗は公開しない。
pub fn run_capture_loop<D: DepthDevice>(source: &mut CaptureSource<D>, shared: &SharedState, retry_delay: Duration) {
    while !shared.is_shutdown_requested() {
        match source.acquire() {
            Ok(capture) => {
                shared.latest_capture.publish(capture);
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!("Capture failed, retrying: {}", e);
                thread::sleep(retry_delay);
            }
            Err(e) => {
                tracing::error!("Capture failed: {}", e);
                break;
            }
        }
    }
    tracing::debug!("Capture loop stopped");
}

/// 新しいCaptureがあれば1サイクル実行する
///
/// 前回処理したものと同じCaptureならNone。
pub fn tracking_step<F, H>(
    pipeline: &mut TrackingPipeline<F, H>,
    shared: &SharedState,
    last_processed: &mut Option<u64>,
) -> Option<CycleState>
where
    F: FaceDetector,
    H: HandTracker,
{
    let capture = shared.latest_capture.latest()?;
    if *last_processed == Some(capture.id()) {
        return None;
    }
    *last_processed = Some(capture.id());

    shared.set_cycle_state(CycleState::Capturing);
    let image = Arc::new(pipeline.prepare(&capture));

    shared.set_cycle_state(CycleState::Detecting);
    let previous = shared.current_frame.latest();
    let state = match pipeline.process(image, &capture, previous.as_deref()) {
        Ok(outcome) => {
            if let CycleState::FaceMissing { .. } = outcome.state {
                tracing::trace!(capture = capture.id(), "Face not detected, keeping previous face");
            }
            if outcome.state.publishes_frame() {
                shared.current_frame.publish(Arc::new(outcome.frame));
            }
            tracing::trace!(
                capture = capture.id(),
                latency_ms = capture.captured_at().elapsed().as_secs_f64() * 1000.0,
                "Tracking cycle finished: {:?}",
                outcome.state
            );
            outcome.state
        }
        Err(e) => {
            tracing::warn!(capture = capture.id(), "Tracking cycle failed: {}", e);
            CycleState::Error
        }
    };

    shared.set_cycle_state(state);
    Some(state)
}

/// 停止要求までトラッキングを繰り返す
pub fn run_tracking_loop<F, H>(pipeline: &mut TrackingPipeline<F, H>, shared: &SharedState, idle_sleep: Duration)
where
    F: FaceDetector,
    H: HandTracker,
{
    let mut last_processed = None;
    while !shared.is_shutdown_requested() {
        if tracking_step(pipeline, shared, &mut last_processed).is_none() {
            shared.set_cycle_state(CycleState::Idle);
            thread::sleep(idle_sleep);
        }
    }
    tracing::debug!("Tracking loop stopped");
}

/// ヘッドトラッキングの入り口
///
/// キャプチャスレッドとトラッキングスレッドを所有し、Drop時に停止して待つ。
pub struct HeadTracker {
    shared: Arc<SharedState>,
    capture_handle: Option<JoinHandle<()>>,
    tracking_handle: Option<JoinHandle<()>>,
}

impl HeadTracker {
    pub fn start<D, F, H>(
        mut source: CaptureSource<D>,
        mut pipeline: TrackingPipeline<F, H>,
        transformer: CoordinateTransformer,
        options: TrackerOptions,
    ) -> Result<Self, StartupError>
    where
        D: DepthDevice + 'static,
        F: FaceDetector + 'static,
        H: HandTracker + 'static,
    {
        let shared = SharedState::new(
            transformer,
            options.max_finger_span,
            SampleLog::with_limit(options.max_samples),
        );

        let capture_shared = shared.clone();
        let capture_handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || run_capture_loop(&mut source, &capture_shared, options.retry_delay))
            .map_err(|e| StartupError::StartFailed(e.to_string()))?;

        let tracking_shared = shared.clone();
        let tracking_handle = thread::Builder::new()
            .name("tracking".into())
            .spawn(move || run_tracking_loop(&mut pipeline, &tracking_shared, options.idle_sleep));

        let tracking_handle = match tracking_handle {
            Ok(handle) => handle,
            Err(e) => {
                shared.request_shutdown();
                let _ = capture_handle.join();
                return Err(StartupError::StartFailed(e.to_string()));
            }
        };

        tracing::info!("Head tracker started");
        Ok(Self {
            shared,
            capture_handle: Some(capture_handle),
            tracking_handle: Some(tracking_handle),
        })
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn left_eye_pos(&self) -> Option<Point3<f32>> {
        self.shared.left_eye_pos()
    }

    pub fn right_eye_pos(&self) -> Option<Point3<f32>> {
        self.shared.right_eye_pos()
    }

    pub fn hand_landmarks(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        self.shared.hand_landmarks()
    }

    pub fn point_cloud(&self) -> Vec<Point3<f32>> {
        self.shared.point_cloud()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    pub fn sample_log(&self) -> SampleLog {
        self.shared.sample_log()
    }

    /// 両スレッドに停止を要求して終了を待つ
    ///
    /// 実行中の取得や検出は中断せず、次の反復に入らないだけ。
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        for handle in [self.capture_handle.take(), self.tracking_handle.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::error!("Tracker thread panicked");
            }
        }
    }
}

impl Drop for HeadTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
