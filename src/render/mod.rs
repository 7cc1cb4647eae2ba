pub mod window;

pub use minifb::Key;
pub use window::MinifbRenderer;

/// 顔ランドマークの色 (RGB)
pub const FACE_COLOR: u32 = 0xFF0000; // 赤

/// 目の中心の色 (RGB)
pub const EYE_COLOR: u32 = 0xFF7C37; // 橙

/// 手の骨格線の色 (RGB)
pub const HAND_COLOR: u32 = 0x00FF00; // 緑
