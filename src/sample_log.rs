use anyhow::{Context, Result};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// 1点のサンプル（time は UNIX時刻のミリ秒）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Sample {
    pub fn new(time: u64, p: &Point3<f32>) -> Self {
        Self {
            time,
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandSample {
    pub index: Sample,
    pub thumb: Sample,
}

/// 目と手の位置の追記専用ログ（オフライン解析用）
///
/// 各ランドマークの3D位置が初めて計算された時に1件追加される。
/// 上限を設定した場合、各系列が上限に達した後のサンプルは捨てる。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleLog {
    pub left_eye: Vec<Sample>,
    pub right_eye: Vec<Sample>,
    pub hand: Vec<HandSample>,
    #[serde(skip)]
    max_per_series: Option<usize>,
}

fn push_limited<T>(series: &mut Vec<T>, limit: Option<usize>, sample: T) {
    if limit.is_some_and(|max| series.len() >= max) {
        tracing::trace!("Sample log series is full, dropping sample");
        return;
    }
    series.push(sample);
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 系列ごとの件数上限付き
    pub fn with_limit(max_per_series: usize) -> Self {
        Self {
            max_per_series: Some(max_per_series),
            ..Self::default()
        }
    }

    pub fn record_left_eye(&mut self, time: u64, p: &Point3<f32>) {
        push_limited(&mut self.left_eye, self.max_per_series, Sample::new(time, p));
    }

    pub fn record_right_eye(&mut self, time: u64, p: &Point3<f32>) {
        push_limited(&mut self.right_eye, self.max_per_series, Sample::new(time, p));
    }

    pub fn record_hand(&mut self, time: u64, index: &Point3<f32>, thumb: &Point3<f32>) {
        let sample = HandSample {
            index: Sample::new(time, index),
            thumb: Sample::new(time, thumb),
        };
        push_limited(&mut self.hand, self.max_per_series, sample);
    }

    pub fn len(&self) -> usize {
        self.left_eye.len() + self.right_eye.len() + self.hand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize sample log")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write sample log: {}", path.display()))?;
        tracing::info!(samples = self.len(), "Saved sample log to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let mut log = SampleLog::new();
        log.record_left_eye(1000, &Point3::new(1.0, 2.0, 3.0));
        log.record_hand(1001, &Point3::new(0.0, 1.0, 2.0), &Point3::new(0.5, 1.5, 2.5));

        let value: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(value["leftEye"][0]["time"], 1000);
        assert_eq!(value["leftEye"][0]["z"], 3.0);
        assert_eq!(value["rightEye"].as_array().unwrap().len(), 0);
        assert_eq!(value["hand"][0]["index"]["y"], 1.0);
        assert_eq!(value["hand"][0]["thumb"]["x"], 0.5);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join("parallax_tracker_sample_log_test.json");
        let mut log = SampleLog::new();
        log.record_right_eye(5, &Point3::new(-1.0, 0.0, 60.0));
        log.save(&path).unwrap();

        let loaded: SampleLog = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, log);
        assert_eq!(loaded.len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_limit_drops_samples_per_series() {
        let mut log = SampleLog::with_limit(2);
        for t in 0..5 {
            log.record_left_eye(t, &Point3::origin());
        }
        log.record_right_eye(9, &Point3::origin());
        assert_eq!(log.left_eye.len(), 2);
        assert_eq!(log.left_eye[1].time, 1);
        assert_eq!(log.right_eye.len(), 1);
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 以降
        assert!(now_millis() > 1_577_836_800_000);
    }
}
