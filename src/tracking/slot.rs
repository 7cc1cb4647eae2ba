use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 最新値を1つだけ保持するスロット（後勝ち）
///
/// ロックはポインタの差し替えとcloneの間だけ保持する。
/// 中身は不変なので読み手は古い値を最後まで安全に使える。
pub struct LatestSlot<T> {
    value: RwLock<Option<Arc<T>>>,
    version: AtomicU64,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// 値を差し替え、前の値を返す
    pub fn publish(&self, value: Arc<T>) -> Option<Arc<T>> {
        let previous = self.value.write().replace(value);
        self.version.fetch_add(1, Ordering::Release);
        previous
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.value.read().clone()
    }

    /// publish された回数
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.value.read().is_none()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
