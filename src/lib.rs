pub mod calibration;
pub mod camera;
pub mod config;
pub mod coords;
pub mod display;
pub mod error;
pub mod gesture;
pub mod landmarks;
#[cfg(feature = "desktop")]
pub mod render;
pub mod sample_log;
pub mod system;
pub mod tracking;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ログ出力を初期化。`RUST_LOG` が設定されていればそちらを優先する
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
