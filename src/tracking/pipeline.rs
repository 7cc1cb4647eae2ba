use image::{imageops::FilterType, RgbImage};
use std::sync::Arc;

use super::frame::TrackingFrame;
use super::state::CycleState;
use crate::camera::Capture;
use crate::error::TrackingError;
use crate::landmarks::{FaceDetector, FaceLandmarks, HandLandmarks, HandTracker};

/// 1サイクルの結果
#[derive(Debug, Clone)]
pub struct TrackingOutcome {
    pub frame: TrackingFrame,
    pub state: CycleState,
}

/// 顔検出と手の検出を1枚のカラー画像に対して実行する
pub struct TrackingPipeline<F, H> {
    face_detector: F,
    hand_tracker: H,
    downscale: u32,
    sequence: u64,
}

impl<F: FaceDetector, H: HandTracker> TrackingPipeline<F, H> {
    pub fn new(face_detector: F, hand_tracker: H, downscale: u32) -> Self {
        Self {
            face_detector,
            hand_tracker,
            downscale: downscale.max(1),
            sequence: 0,
        }
    }

    /// 検出用にカラー画像を縮小
    pub fn prepare(&self, capture: &Capture) -> RgbImage {
        let color = capture.color_image();
        if self.downscale == 1 {
            return color.clone();
        }
        let w = (color.width() / self.downscale).max(1);
        let h = (color.height() / self.downscale).max(1);
        image::imageops::resize(color, w, h, FilterType::Triangle)
    }

    /// 縮小画像から新しいフレームを作る
    ///
    /// 顔が見つからなければ前回のフレームの顔（同じインスタンス）を引き継ぐ。
    /// 検出器が失敗した場合はErrを返し、呼び出し側は前回のフレームを保持する。
    pub fn process(
        &mut self,
        image: Arc<RgbImage>,
        capture: &Arc<Capture>,
        previous: Option<&TrackingFrame>,
    ) -> Result<TrackingOutcome, TrackingError> {
        let scale = capture.color_image().width() as f32 / image.width().max(1) as f32;
        let image_size = image.dimensions();

        self.hand_tracker.submit(image.clone())?;
        let faces = self.face_detector.detect(&image);
        // 顔検出が失敗しても今回の手の出力はここで取り出し、次のCaptureに持ち越さない
        let idle = self.hand_tracker.wait_until_idle();
        let hands = self.hand_tracker.poll();
        let faces = faces?;
        idle?;

        let hand = hands
            .and_then(|hands| hands.into_iter().next())
            .map(|detection| Arc::new(HandLandmarks::from_detection(&detection, image_size, capture.clone(), scale)));

        let (face, state) = match faces.first() {
            Some(detection) => (
                Some(Arc::new(FaceLandmarks::from_detection(detection, capture.clone(), scale))),
                CycleState::Success { hand: hand.is_some() },
            ),
            None => (
                previous.and_then(|frame| frame.face.clone()),
                CycleState::FaceMissing { hand: hand.is_some() },
            ),
        };

        self.sequence += 1;
        Ok(TrackingOutcome {
            frame: TrackingFrame {
                face,
                hand,
                capture: Some(capture.clone()),
                sequence: self.sequence,
            },
            state,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::camera::DepthImage;
    use crate::landmarks::{BoundingBox, FaceDetection, FaceLandmarkIndex, HandDetection, HandLandmarkIndex};
    use nalgebra::{Point2, Point3};
    use std::collections::VecDeque;

    /// 予定された結果を順に返す顔検出器
    pub(crate) struct ScriptedFaces(pub VecDeque<Result<Vec<FaceDetection>, TrackingError>>);

    impl FaceDetector for ScriptedFaces {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<FaceDetection>, TrackingError> {
            self.0.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    /// submitごとに予定された出力をキューへ積むハンドトラッカー
    #[derive(Default)]
    pub(crate) struct ScriptedHands {
        pub script: VecDeque<Option<Vec<HandDetection>>>,
        queue: VecDeque<Vec<HandDetection>>,
        pub submitted: usize,
    }

    impl ScriptedHands {
        pub(crate) fn new(script: Vec<Option<Vec<HandDetection>>>) -> Self {
            Self {
                script: script.into(),
                ..Default::default()
            }
        }
    }

    impl HandTracker for ScriptedHands {
        fn submit(&mut self, _image: Arc<RgbImage>) -> Result<(), TrackingError> {
            self.submitted += 1;
            if let Some(Some(hands)) = self.script.pop_front() {
                self.queue.push_back(hands);
            }
            Ok(())
        }

        fn wait_until_idle(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }

        fn poll(&mut self) -> Option<Vec<HandDetection>> {
            let latest = self.queue.pop_back();
            self.queue.clear();
            latest
        }
    }

    pub(crate) fn face_at(x: f32, y: f32) -> FaceDetection {
        let mut points = [Point2::new(x, y); FaceLandmarkIndex::COUNT];
        points[FaceLandmarkIndex::Nose as usize] = Point2::new(x, y + 1.0);
        FaceDetection {
            bbox: BoundingBox::new(x, y, 4.0, 4.0),
            points,
            score: 0.9,
        }
    }

    pub(crate) fn hand_at(x: f32, y: f32) -> HandDetection {
        HandDetection {
            landmarks: [Point3::new(x, y, 0.0); HandLandmarkIndex::COUNT],
            rect: BoundingBox::new(x, y, 0.1, 0.1),
            presence: 1.0,
        }
    }

    fn capture(id: u64) -> Arc<Capture> {
        Arc::new(Capture::new(id, RgbImage::new(16, 16), DepthImage::new(16, 16), DepthImage::new(8, 8)))
    }

    #[test]
    fn test_prepare_halves_resolution() {
        let pipeline = TrackingPipeline::new(ScriptedFaces(VecDeque::new()), ScriptedHands::default(), 2);
        let image = pipeline.prepare(&capture(1));
        assert_eq!(image.dimensions(), (8, 8));
    }

    #[test]
    fn test_success_references_capture() {
        let mut pipeline = TrackingPipeline::new(
            ScriptedFaces(VecDeque::from([Ok(vec![face_at(3.0, 4.0)])])),
            ScriptedHands::new(vec![Some(vec![hand_at(0.5, 0.5)])]),
            2,
        );
        let capture = capture(7);
        let image = Arc::new(pipeline.prepare(&capture));
        let outcome = pipeline.process(image, &capture, None).unwrap();

        assert_eq!(outcome.state, CycleState::Success { hand: true });
        let face = outcome.frame.face.as_ref().unwrap();
        assert_eq!(face.capture().id(), 7);
        assert_eq!(face.scale(), 2.0);
        let hand = outcome.frame.hand.as_ref().unwrap();
        let tip = hand.get(HandLandmarkIndex::IndexFingerTip);
        assert_eq!((tip.x, tip.y), (4.0, 4.0));
        assert_eq!(outcome.frame.sequence, 1);
    }

    #[test]
    fn test_face_missing_keeps_previous_face() {
        let mut pipeline = TrackingPipeline::new(
            ScriptedFaces(VecDeque::from([Ok(vec![face_at(3.0, 4.0)]), Ok(Vec::new())])),
            ScriptedHands::new(vec![None, Some(vec![hand_at(0.25, 0.25)])]),
            2,
        );
        let first_capture = capture(1);
        let first = pipeline
            .process(Arc::new(pipeline.prepare(&first_capture)), &first_capture, None)
            .unwrap();
        assert_eq!(first.state, CycleState::Success { hand: false });
        assert!(first.frame.hand.is_none());

        let second_capture = capture(2);
        let second = pipeline
            .process(Arc::new(pipeline.prepare(&second_capture)), &second_capture, Some(&first.frame))
            .unwrap();
        assert_eq!(second.state, CycleState::FaceMissing { hand: true });
        assert!(Arc::ptr_eq(
            second.frame.face.as_ref().unwrap(),
            first.frame.face.as_ref().unwrap()
        ));
        assert_eq!(second.frame.face.as_ref().unwrap().capture().id(), 1);
        // 手は今回のCaptureで検出されている
        assert_eq!(second.frame.hand.as_ref().unwrap().capture().id(), 2);
    }

    #[test]
    fn test_face_missing_before_first_success_has_no_face() {
        let mut pipeline = TrackingPipeline::new(ScriptedFaces(VecDeque::new()), ScriptedHands::default(), 2);
        let capture = capture(1);
        let outcome = pipeline
            .process(Arc::new(pipeline.prepare(&capture)), &capture, Some(&TrackingFrame::empty()))
            .unwrap();
        assert_eq!(outcome.state, CycleState::FaceMissing { hand: false });
        assert!(outcome.frame.face.is_none());
    }

    #[test]
    fn test_detector_error_is_propagated() {
        let mut pipeline = TrackingPipeline::new(
            ScriptedFaces(VecDeque::from([Err(TrackingError::Detector("cnn".into()))])),
            ScriptedHands::new(vec![Some(vec![hand_at(0.5, 0.5)])]),
            2,
        );
        let capture = capture(1);
        let result = pipeline.process(Arc::new(pipeline.prepare(&capture)), &capture, None);
        assert!(matches!(result, Err(TrackingError::Detector(_))));
        assert_eq!(pipeline.hand_tracker.submitted, 1);
    }

    #[test]
    fn test_hand_from_failed_cycle_is_not_carried_over() {
        let mut pipeline = TrackingPipeline::new(
            ScriptedFaces(VecDeque::from([Err(TrackingError::Detector("cnn".into())), Ok(vec![face_at(3.0, 4.0)])])),
            ScriptedHands::new(vec![Some(vec![hand_at(0.5, 0.5)]), None]),
            2,
        );
        let first_capture = capture(1);
        let failed = pipeline.process(Arc::new(pipeline.prepare(&first_capture)), &first_capture, None);
        assert!(failed.is_err());

        let second_capture = capture(2);
        let outcome = pipeline
            .process(Arc::new(pipeline.prepare(&second_capture)), &second_capture, None)
            .unwrap();
        assert_eq!(outcome.state, CycleState::Success { hand: false });
        assert!(outcome.frame.hand.is_none());
    }

    #[test]
    fn test_hand_from_failed_cycle_is_not_carried_over_with_worker() {
        use crate::landmarks::{HandLandmarkModel, QueuedHandTracker};

        /// 赤いピクセルがあれば手を1つ返す
        struct RedHandModel;

        impl HandLandmarkModel for RedHandModel {
            fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandDetection>, TrackingError> {
                if image.pixels().any(|p| p.0[0] > 0) {
                    Ok(vec![hand_at(0.5, 0.5)])
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let mut pipeline = TrackingPipeline::new(
            ScriptedFaces(VecDeque::from([Err(TrackingError::Detector("cnn".into())), Ok(vec![face_at(3.0, 4.0)])])),
            QueuedHandTracker::spawn(RedHandModel),
            1,
        );

        let with_hand = Arc::new(Capture::new(
            1,
            RgbImage::from_pixel(16, 16, image::Rgb([255, 0, 0])),
            DepthImage::new(16, 16),
            DepthImage::new(8, 8),
        ));
        let failed = pipeline.process(Arc::new(pipeline.prepare(&with_hand)), &with_hand, None);
        assert!(matches!(failed, Err(TrackingError::Detector(_))));

        let without_hand = capture(2);
        let outcome = pipeline
            .process(Arc::new(pipeline.prepare(&without_hand)), &without_hand, None)
            .unwrap();
        assert_eq!(outcome.state, CycleState::Success { hand: false });
        assert!(outcome.frame.hand.is_none());
    }

    #[test]
    fn test_scripted_hands_poll_returns_latest() {
        let mut hands = ScriptedHands::new(vec![Some(vec![hand_at(0.1, 0.1)]), Some(vec![hand_at(0.9, 0.9)])]);
        let image = Arc::new(RgbImage::new(1, 1));
        hands.submit(image.clone()).unwrap();
        hands.submit(image).unwrap();
        let latest = hands.poll().unwrap();
        assert_eq!(latest[0].landmarks[0].x, 0.9);
        assert!(hands.poll().is_none());
    }
}
