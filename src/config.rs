use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub gesture: GestureConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// デバイスインデックス
    #[serde(default)]
    pub index: i32,
    /// フレームレート
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// 1フレーム取得のタイムアウト（ミリ秒）
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// 取得失敗時の再試行間隔（ミリ秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// キャリブレーションJSON（未指定ならデフォルト値）
    #[serde(default)]
    pub calibration_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScreenConfig {
    /// 画面左下の角（cm、スクリーン座標系）
    #[serde(default = "default_bottom_left")]
    pub bottom_left: [f32; 3],
    /// 画面右下の角
    #[serde(default = "default_bottom_right")]
    pub bottom_right: [f32; 3],
    /// 画面左上の角
    #[serde(default = "default_top_left")]
    pub top_left: [f32; 3],
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MountConfig {
    /// カメラ原点からスクリーン原点へのオフセット（cm）
    #[serde(default = "default_camera_offset")]
    pub offset: [f32; 3],
    /// カメラのチルト角（度、X軸まわり）
    #[serde(default)]
    pub tilt_deg: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// 検出用画像の縮小率（2 = 半分の解像度）
    #[serde(default = "default_downscale")]
    pub downscale: u32,
    /// 人差し指と親指の最大距離（cm）。これを超えるペアは誤検出として捨てる
    #[serde(default = "default_max_finger_span")]
    pub max_finger_span: f32,
    /// 新フレームが無い時の待機（ミリ秒）
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    #[serde(default = "default_face_model")]
    pub face_model: String,
    #[serde(default = "default_hand_model")]
    pub hand_model: String,
    #[serde(default = "default_face_score_threshold")]
    pub face_score_threshold: f32,
    #[serde(default = "default_hand_presence_threshold")]
    pub hand_presence_threshold: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GestureConfig {
    /// つまみ判定の距離（cm）
    #[serde(default = "default_grab_distance")]
    pub grab_distance: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// tracing の EnvFilter 文字列
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// サンプルログの保存先（未指定なら保存しない）
    #[serde(default)]
    pub sample_log_path: Option<String>,
    /// サンプルログの系列ごとの上限
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// デバッグウィンドウを表示する
    #[serde(default)]
    pub view: bool,
}

fn default_fps() -> u32 { 30 }
fn default_capture_timeout_ms() -> u64 { 100 }
fn default_retry_delay_ms() -> u64 { 1 }
fn default_bottom_left() -> [f32; 3] { [-35.0, 0.0, 0.0] }
fn default_bottom_right() -> [f32; 3] { [35.0, 0.0, 0.0] }
fn default_top_left() -> [f32; 3] { [-35.0, 52.0, 0.0] }
fn default_near() -> f32 { 1.0 }
fn default_far() -> f32 { 1000.0 }
fn default_camera_offset() -> [f32; 3] { [0.0, 56.0, 0.0] }
fn default_downscale() -> u32 { 2 }
fn default_max_finger_span() -> f32 { 18.0 }
fn default_idle_sleep_ms() -> u64 { 1 }
fn default_face_model() -> String { "models/face_detection.onnx".to_string() }
fn default_hand_model() -> String { "models/hand_landmark.onnx".to_string() }
fn default_face_score_threshold() -> f32 { 0.5 }
fn default_hand_presence_threshold() -> f32 { 0.5 }
fn default_grab_distance() -> f32 { 2.0 }
fn default_log_filter() -> String { "info".to_string() }
fn default_max_samples() -> usize { 100_000 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: 0,
            fps: default_fps(),
            capture_timeout_ms: default_capture_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            calibration_path: None,
        }
    }
}

impl DeviceConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            bottom_left: default_bottom_left(),
            bottom_right: default_bottom_right(),
            top_left: default_top_left(),
            near: default_near(),
            far: default_far(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            offset: default_camera_offset(),
            tilt_deg: 0.0,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            downscale: default_downscale(),
            max_finger_span: default_max_finger_span(),
            idle_sleep_ms: default_idle_sleep_ms(),
            face_model: default_face_model(),
            hand_model: default_hand_model(),
            face_score_threshold: default_face_score_threshold(),
            hand_presence_threshold: default_hand_presence_threshold(),
        }
    }
}

impl TrackingConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            grab_distance: default_grab_distance(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            sample_log_path: None,
            max_samples: default_max_samples(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        Ok(config)
    }

    /// ファイルが無ければデフォルト設定。読めない・壊れている場合はエラー
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.device.fps, 30);
        assert_eq!(config.screen.bottom_left, [-35.0, 0.0, 0.0]);
        assert_eq!(config.screen.top_left, [-35.0, 52.0, 0.0]);
        assert_eq!(config.tracking.downscale, 2);
        assert_eq!(config.tracking.max_finger_span, 18.0);
        assert_eq!(config.gesture.grab_distance, 2.0);
        assert!(!config.debug.view);
        assert_eq!(config.log.max_samples, 100_000);
    }

    #[test]
    fn test_partial_section() {
        let config = Config::parse(
            r#"
            [mount]
            offset = [1.0, 2.0, 3.0]
            tilt_deg = -12.5

            [device]
            capture_timeout_ms = 17
            "#,
        )
        .unwrap();
        assert_eq!(config.mount.offset, [1.0, 2.0, 3.0]);
        assert_eq!(config.mount.tilt_deg, -12.5);
        assert_eq!(config.device.capture_timeout(), Duration::from_millis(17));
        assert_eq!(config.device.retry_delay_ms, 1);
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::parse("[screen]\nnear = \"one\"").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("does/not/exist.toml").unwrap();
        assert_eq!(config.device.fps, 30);
    }

    #[test]
    fn test_load_or_default_rejects_broken_file() {
        let path = std::env::temp_dir().join(format!("parallax_broken_config_{}.toml", std::process::id()));
        fs::write(&path, "[screen\nnear = 1.0").unwrap();
        let result = Config::load_or_default(&path);
        fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_reads_existing_file() {
        let path = std::env::temp_dir().join(format!("parallax_config_{}.toml", std::process::id()));
        fs::write(&path, "[device]\nfps = 15\n").unwrap();
        let result = Config::load_or_default(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(result.unwrap().device.fps, 15);
    }
}
