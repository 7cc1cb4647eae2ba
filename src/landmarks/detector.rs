use image::RgbImage;
use nalgebra::{Point2, Point3};
use std::sync::Arc;

use super::face::FaceLandmarkIndex;
use super::hand::HandLandmarkIndex;
use super::BoundingBox;
use crate::error::TrackingError;

/// 顔検出器の出力（入力画像のピクセル座標）
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub points: [Point2<f32>; FaceLandmarkIndex::COUNT],
    pub score: f32,
}

/// 手のランドマーク検出の出力（正規化座標 0.0〜1.0）
#[derive(Debug, Clone, PartialEq)]
pub struct HandDetection {
    /// x, y は画像サイズで正規化、z は幅で正規化した相対奥行き
    pub landmarks: [Point3<f32>; HandLandmarkIndex::COUNT],
    pub rect: BoundingBox,
    pub presence: f32,
}

/// 同期的な顔検出器
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, TrackingError>;
}

/// 同期的な手ランドマーク推定器
pub trait HandLandmarkModel: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandDetection>, TrackingError>;
}

/// キュー型の非同期ハンドトラッカー
///
/// `submit` で画像を渡し、`wait_until_idle` で処理完了を待ってから `poll` で結果を取り出す。
/// 手が見つからなかった画像は出力キューに何も積まない。
pub trait HandTracker: Send {
    fn submit(&mut self, image: Arc<RgbImage>) -> Result<(), TrackingError>;

    fn wait_until_idle(&mut self) -> Result<(), TrackingError>;

    /// 前回のpoll以降で最新の出力。キューが空ならNone
    fn poll(&mut self) -> Option<Vec<HandDetection>>;
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, TrackingError> {
        (**self).detect(image)
    }
}

impl<T: HandTracker + ?Sized> HandTracker for Box<T> {
    fn submit(&mut self, image: Arc<RgbImage>) -> Result<(), TrackingError> {
        (**self).submit(image)
    }

    fn wait_until_idle(&mut self) -> Result<(), TrackingError> {
        (**self).wait_until_idle()
    }

    fn poll(&mut self) -> Option<Vec<HandDetection>> {
        (**self).poll()
    }
}

impl<T: HandLandmarkModel + ?Sized> HandLandmarkModel for Box<T> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandDetection>, TrackingError> {
        (**self).detect(image)
    }
}
