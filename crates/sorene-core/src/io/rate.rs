//! 吞吐量统计

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// 累计字节数，并给出自上次采样以来的增量
#[derive(Debug, Default)]
pub struct RateCounter {
    value: AtomicU64,
    last: AtomicU64,
}

impl RateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increase(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// 累计总量
    pub fn total(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// 自上次调用以来的增量
    pub fn rate(&self) -> u64 {
        let now = self.value.load(Ordering::Relaxed);
        let last = self.last.swap(now, Ordering::Relaxed);
        now.saturating_sub(last)
    }
}

struct Window {
    values: Vec<u64>,
    sum: u64,
    pos: usize,
}

/// 滑动窗口平均速率
///
/// 每次 [`rate`](AverageRateCounter::rate) 视为一次采样，返回最近 `window` 次采样的平均值。
pub struct AverageRateCounter {
    counter: RateCounter,
    window: Mutex<Window>,
}

impl AverageRateCounter {
    pub fn new(window: usize) -> Self {
        Self {
            counter: RateCounter::new(),
            window: Mutex::new(Window {
                values: vec![0; window.max(1)],
                sum: 0,
                pos: 0,
            }),
        }
    }

    pub fn increase(&self, delta: u64) {
        self.counter.increase(delta);
    }

    pub fn total(&self) -> u64 {
        self.counter.total()
    }

    pub fn rate(&self) -> u64 {
        let rate = self.counter.rate();
        let mut guard = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let w = &mut *guard;
        let pos = w.pos;
        w.sum = w.sum + rate - w.values[pos];
        w.values[pos] = rate;
        w.pos = (pos + 1) % w.values.len();
        w.sum / w.values.len() as u64
    }
}

/// 人类可读的大小，如 `1.5KB`
///
/// 在达到单位的 2 倍时才切换到下一个单位。
pub fn format_size(size: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = size;
    let mut unit = 0;
    while unit < UNITS.len() - 1 && value >= 2.0 * 1024.0 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", text, UNITS[unit])
}
