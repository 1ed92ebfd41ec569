//! どこで: チェーン時計 / 何を: 壁時計+符号付きオフセット / なぜ: evm_increaseTime/evm_setTimeを次ブロックへ効かせるため

#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
static TEST_NOW_MS: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    offset_ms: i64,
}

impl Clock {
    pub fn new(offset_ms: i64) -> Self {
        Self { offset_ms }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// snapshot復元専用。
    pub fn set_offset_ms(&mut self, offset_ms: i64) {
        self.offset_ms = offset_ms;
    }

    pub fn now_ms(&self) -> u64 {
        let wall = wall_now_ms() as i64;
        wall.saturating_add(self.offset_ms).max(0) as u64
    }

    pub fn now_sec(&self) -> u64 {
        self.now_ms() / 1_000
    }

    /// 戻り値は調整後のオフセット合計(秒)。
    pub fn increase_time(&mut self, seconds: u64) -> i64 {
        let add_ms = i64::try_from(seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
        self.offset_ms = self.offset_ms.saturating_add(add_ms);
        self.offset_ms / 1_000
    }

    /// 指定時刻(ms)が「今」になるようオフセットを張り替える。
    pub fn set_time(&mut self, timestamp_ms: u64) -> i64 {
        let wall = wall_now_ms() as i64;
        let target = i64::try_from(timestamp_ms).unwrap_or(i64::MAX);
        self.offset_ms = target.saturating_sub(wall);
        self.offset_ms / 1_000
    }
}

fn wall_now_ms() -> u64 {
    #[cfg(test)]
    {
        let injected = TEST_NOW_MS.load(Ordering::Relaxed);
        if injected != 0 {
            return injected;
        }
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    u64::try_from(millis.min(u128::from(u64::MAX))).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) fn set_test_now_ms(value: u64) {
    TEST_NOW_MS.store(value, Ordering::Relaxed);
}
