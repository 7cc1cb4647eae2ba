use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::{center, Point3};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parallax_tracker::calibration::{load_calibration, DepthCalibration};
use parallax_tracker::camera::{CaptureSource, OpenNiCamera};
use parallax_tracker::config::Config;
use parallax_tracker::coords::{CoordinateTransformer, ScreenSpace};
use parallax_tracker::display::Screen;
use parallax_tracker::error::StartupError;
use parallax_tracker::gesture::GrabDetector;
use parallax_tracker::landmarks::{OnnxFaceDetector, OnnxHandLandmarker, QueuedHandTracker};
use parallax_tracker::render::MinifbRenderer;
use parallax_tracker::system::{HeadTracker, TrackerOptions};
use parallax_tracker::tracking::TrackingPipeline;

/// 視点追従型のパララックス表示用ヘッドトラッカー
#[derive(Parser, Debug)]
#[command(name = "parallax-tracker", version, about, long_about = None)]
struct Args {
    /// 設定ファイル
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// デバッグウィンドウを表示（設定より優先）
    #[arg(long)]
    view: bool,

    /// 指定秒数で終了
    #[arg(long)]
    duration: Option<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(&args.config)?;
    parallax_tracker::init_tracing(&config.log.filter);
    tracing::info!("Parallax Tracker ({})", env!("GIT_VERSION"));
    if !args.config.exists() {
        tracing::warn!("{} not found; using default configuration", args.config.display());
    }

    let calibration = match config.device.calibration_path {
        Some(ref path) => load_calibration(path)
            .map_err(|e| StartupError::Calibration(format!("{}: {:#}", path, e)))?,
        None => DepthCalibration::default(),
    };
    let calibration = Arc::new(calibration);

    let screen = Screen::from_config(&config.screen).context("Screen corners must span a rectangle")?;
    tracing::info!(
        width = screen.width(),
        height = screen.height(),
        "Screen center: {:?}",
        screen.center()
    );

    let camera = OpenNiCamera::open(&config.device)?;
    let source = CaptureSource::new(camera, calibration.clone(), config.device.capture_timeout());

    let face_detector = OnnxFaceDetector::new(&config.tracking.face_model, config.tracking.face_score_threshold)?;
    let hand_model = OnnxHandLandmarker::new(&config.tracking.hand_model, config.tracking.hand_presence_threshold)?;
    let pipeline = TrackingPipeline::new(
        face_detector,
        QueuedHandTracker::spawn(hand_model),
        config.tracking.downscale,
    );

    let transformer = CoordinateTransformer::new(calibration.clone(), ScreenSpace::from_config(&config.mount));
    let mut tracker = HeadTracker::start(source, pipeline, transformer, TrackerOptions::from_config(&config))?;

    let mut renderer = if args.view || config.debug.view {
        let (w, h) = (calibration.color.width / 2, calibration.color.height / 2);
        Some(MinifbRenderer::new("Parallax Tracker Debug", w as usize, h as usize)?)
    } else {
        None
    };

    let grab = GrabDetector::from_config(&config.gesture);
    let frame_duration = Duration::from_secs_f64(1.0 / config.device.fps.max(1) as f64);
    let deadline = args.duration.map(|s| Instant::now() + Duration::from_secs_f64(s));

    let mut frame_count = 0u32;
    let mut fps_timer = Instant::now();

    loop {
        let loop_start = Instant::now();
        if deadline.is_some_and(|d| loop_start >= d) {
            break;
        }

        let eye = match (tracker.left_eye_pos(), tracker.right_eye_pos()) {
            (Some(l), Some(r)) => Some(center(&l, &r)),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        };
        if let Some(eye) = eye {
            let projection = screen.projection_for(&eye);
            tracing::trace!("eye {:?}\n{}", eye, projection);
        }

        if let Some((index, thumb)) = tracker.hand_landmarks() {
            if let Some(p) = grab.grab_position(&index, &thumb) {
                tracing::debug!("Grab at ({:.1}, {:.1}, {:.1})", p.x, p.y, p.z);
            }
        }

        if let Some(ref mut r) = renderer {
            if !r.is_open() {
                break;
            }
            let shared = tracker.shared_state();
            if let Some(capture) = shared.latest_capture.latest() {
                r.draw_frame(capture.color_image());
            }
            if let Some(frame) = shared.frame() {
                r.draw_tracking(&frame, calibration.color.width);
            }
            r.update()?;
        }

        frame_count += 1;
        if fps_timer.elapsed() >= Duration::from_secs(1) {
            let eye = eye.unwrap_or_else(Point3::origin);
            tracing::info!(
                fps = frame_count,
                state = ?tracker.shared_state().cycle_state(),
                "eye: ({:.1}, {:.1}, {:.1})",
                eye.x,
                eye.y,
                eye.z
            );
            frame_count = 0;
            fps_timer = Instant::now();
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    tracker.shutdown();

    if let Some(ref path) = config.log.sample_log_path {
        tracker.sample_log().save(path)?;
    }

    Ok(())
}
