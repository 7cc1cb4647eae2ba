/// 1回の検出サイクルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Capturing,
    Detecting,
    /// 顔を検出した
    Success { hand: bool },
    /// 顔が見つからず、前回の顔を引き継いだ
    FaceMissing { hand: bool },
    /// 検出器の失敗。前回のフレームがそのまま有効
    Error,
}

impl CycleState {
    /// 新しいフレームを公開すべきか
    pub fn publishes_frame(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::FaceMissing { .. })
    }
}
