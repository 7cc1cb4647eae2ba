use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::detector::{HandDetection, HandLandmarkModel, HandTracker};
use crate::error::TrackingError;

/// 同期的な `HandLandmarkModel` をワーカースレッドで動かすハンドトラッカー
pub struct QueuedHandTracker {
    jobs: Option<Sender<Arc<RgbImage>>>,
    results: Receiver<Result<Vec<HandDetection>, TrackingError>>,
    pending: usize,
    outputs: VecDeque<Vec<HandDetection>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedHandTracker {
    pub fn spawn<M>(model: M) -> Self
    where
        M: HandLandmarkModel + 'static,
    {
        let (job_tx, job_rx) = unbounded::<Arc<RgbImage>>();
        let (result_tx, result_rx) = unbounded();

        let worker = thread::Builder::new()
            .name("hand-tracker".into())
            .spawn(move || run_worker(model, job_rx, result_tx));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn hand tracker worker: {}", e);
                None
            }
        };

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            pending: 0,
            outputs: VecDeque::new(),
            worker,
        }
    }
}

fn run_worker<M: HandLandmarkModel>(
    mut model: M,
    jobs: Receiver<Arc<RgbImage>>,
    results: Sender<Result<Vec<HandDetection>, TrackingError>>,
) {
    for image in jobs {
        let result = model.detect(&image);
        if let Err(ref e) = result {
            tracing::debug!("Hand landmark model failed: {}", e);
        }
        if results.send(result).is_err() {
            break;
        }
    }
    tracing::debug!("Hand tracker worker stopped");
}

impl HandTracker for QueuedHandTracker {
    fn submit(&mut self, image: Arc<RgbImage>) -> Result<(), TrackingError> {
        let jobs = self.jobs.as_ref().ok_or(TrackingError::WorkerDisconnected)?;
        jobs.send(image).map_err(|_| TrackingError::WorkerDisconnected)?;
        self.pending += 1;
        Ok(())
    }

    fn wait_until_idle(&mut self) -> Result<(), TrackingError> {
        let mut first_error = None;
        while self.pending > 0 {
            let result = self.results.recv().map_err(|_| TrackingError::WorkerDisconnected);
            self.pending -= 1;
            match result? {
                Ok(hands) if hands.is_empty() => {}
                Ok(hands) => self.outputs.push_back(hands),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn poll(&mut self) -> Option<Vec<HandDetection>> {
        let latest = self.outputs.pop_back();
        self.outputs.clear();
        latest
    }
}

impl Drop for QueuedHandTracker {
    fn drop(&mut self) {
        // 送信側を閉じるとワーカーのループが終わる
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
