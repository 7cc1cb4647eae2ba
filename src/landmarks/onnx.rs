use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use nalgebra::{Point2, Point3};
use ndarray::{Array4, ArrayViewD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::detector::{FaceDetection, FaceDetector, HandDetection, HandLandmarkModel};
use super::face::FaceLandmarkIndex;
use super::hand::HandLandmarkIndex;
use super::roi::{roi_from_points, CropRegion};
use super::BoundingBox;
use crate::error::{StartupError, TrackingError};

/// 顔検出モデルの入力サイズ
const FACE_INPUT_SIZE: u32 = 640;
/// 手ランドマークモデルの入力サイズ
const HAND_INPUT_SIZE: u32 = 224;
/// 前フレームの手の枠をどれだけ広げてクロップするか
const HAND_ROI_EXPAND: f32 = 2.0;

fn load_session(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        return Err(StartupError::MissingModel(path.to_path_buf()).into());
    }
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load {} ONNX model", what))?;
    tracing::info!("Loaded {} model: {}", what, path.display());
    Ok(session)
}

fn inference_error(e: ort::Error) -> TrackingError {
    TrackingError::Detector(e.to_string())
}

/// SCRFD（NMS込みでエクスポートしたもの）による顔検出器
///
/// 入力: [1, 3, 640, 640]、(p - 127.5) / 128 で正規化
/// 出力: `scores` [N]、`boxes` [N, 4] (x1, y1, x2, y2)、`kps` [N, 10]、いずれも入力ピクセル座標
pub struct OnnxFaceDetector {
    session: Session,
    score_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, score_threshold: f32) -> Result<Self> {
        let session = load_session(model_path.as_ref(), "face detection")?;
        Ok(Self {
            session,
            score_threshold,
        })
    }

    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(image, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle);
        let s = FACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - 127.5) / 128.0;
            }
        }
        tensor
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, TrackingError> {
        let input = Tensor::from_array(Self::preprocess(image)).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs!["input.1" => input])
            .map_err(inference_error)?;

        let scores: ArrayViewD<f32> = outputs["scores"].try_extract_array().map_err(inference_error)?;
        let boxes: ArrayViewD<f32> = outputs["boxes"].try_extract_array().map_err(inference_error)?;
        let kps: ArrayViewD<f32> = outputs["kps"].try_extract_array().map_err(inference_error)?;

        let sx = image.width() as f32 / FACE_INPUT_SIZE as f32;
        let sy = image.height() as f32 / FACE_INPUT_SIZE as f32;

        let mut faces = Vec::new();
        for i in 0..scores.len() {
            let score = scores[[i]];
            if score < self.score_threshold {
                continue;
            }
            let bbox = BoundingBox::from_corners(
                boxes[[i, 0]] * sx,
                boxes[[i, 1]] * sy,
                boxes[[i, 2]] * sx,
                boxes[[i, 3]] * sy,
            );
            let kp = |k: usize| Point2::new(kps[[i, k * 2]] * sx, kps[[i, k * 2 + 1]] * sy);

            // SCRFDは目の中心しか出さないので両目尻に同じ点を入れる
            let mut points = [Point2::origin(); FaceLandmarkIndex::COUNT];
            points[FaceLandmarkIndex::LeftEyeOuter as usize] = kp(0);
            points[FaceLandmarkIndex::LeftEyeInner as usize] = kp(0);
            points[FaceLandmarkIndex::RightEyeOuter as usize] = kp(1);
            points[FaceLandmarkIndex::RightEyeInner as usize] = kp(1);
            points[FaceLandmarkIndex::Nose as usize] = kp(2);

            faces.push(FaceDetection { bbox, points, score });
        }

        faces.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(faces)
    }
}

/// MediaPipe の手ランドマークモデル
///
/// 入力: [1, 224, 224, 3]、0.0〜1.0
/// 出力: `Identity` [1, 63]（入力ピクセル座標の x, y, z）、`Identity_1` [1, 1]（手の存在確率）
///
/// 前フレームで手が見つかっていればその周辺だけをクロップして推定する。
pub struct OnnxHandLandmarker {
    session: Session,
    presence_threshold: f32,
    /// 前フレームの手の枠（ピクセル座標）
    previous: Option<BoundingBox>,
}

impl OnnxHandLandmarker {
    pub fn new<P: AsRef<Path>>(model_path: P, presence_threshold: f32) -> Result<Self> {
        let session = load_session(model_path.as_ref(), "hand landmark")?;
        Ok(Self {
            session,
            presence_threshold,
            previous: None,
        })
    }

    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(image, HAND_INPUT_SIZE, HAND_INPUT_SIZE, FilterType::Triangle);
        let s = HAND_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, s, s, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }
}

impl HandLandmarkModel for OnnxHandLandmarker {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandDetection>, TrackingError> {
        let (w, h) = image.dimensions();
        let region = match self.previous {
            Some(ref bbox) => CropRegion::around(bbox, w, h, HAND_ROI_EXPAND),
            None => CropRegion::full(),
        };
        let cropped = region.crop(image);

        let input = Tensor::from_array(Self::preprocess(&cropped)).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs!["input_1" => input])
            .map_err(inference_error)?;

        let presence: ArrayViewD<f32> = outputs["Identity_1"].try_extract_array().map_err(inference_error)?;
        let presence = presence.iter().next().copied().unwrap_or(0.0);
        if presence < self.presence_threshold {
            self.previous = None;
            return Ok(Vec::new());
        }

        let raw: ArrayViewD<f32> = outputs["Identity"].try_extract_array().map_err(inference_error)?;
        let raw: Vec<f32> = raw.iter().copied().collect();
        if raw.len() < HandLandmarkIndex::COUNT * 3 {
            return Err(TrackingError::HandTracker(format!(
                "expected {} landmark values, got {}",
                HandLandmarkIndex::COUNT * 3,
                raw.len()
            )));
        }

        let size = HAND_INPUT_SIZE as f32;
        let mut landmarks = [Point3::origin(); HandLandmarkIndex::COUNT];
        for (i, lm) in landmarks.iter_mut().enumerate() {
            let local = Point3::new(raw[i * 3] / size, raw[i * 3 + 1] / size, raw[i * 3 + 2] / size);
            *lm = region.remap(&local);
        }

        let Some(rect) = roi_from_points(landmarks.iter()) else {
            self.previous = None;
            return Ok(Vec::new());
        };
        self.previous = Some(rect.scaled(w as f32, h as f32));

        Ok(vec![HandDetection {
            landmarks,
            rect,
            presence,
        }])
    }
}
