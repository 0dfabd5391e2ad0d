//! 进度快照
//!
//! 通过 `watch` 通道整体替换发布，读取方只会看到完整的快照。

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// 进度快照
///
/// `max == 0` 表示总量未知（不确定进度）。`label == None` 表示正在收尾。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub label: Option<String>,
    pub now: u64,
    pub max: u64,
}

impl Progress {
    pub fn is_indeterminate(&self) -> bool {
        self.max == 0
    }

    /// 千分比，不确定进度时返回 `None`
    pub fn permille(&self) -> Option<u32> {
        if self.max == 0 {
            return None;
        }
        let value = u128::from(self.now.min(self.max)) * 1000 / u128::from(self.max);
        u32::try_from(value).ok()
    }
}

/// 目录任务写、计时器读的进度发布器
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<Progress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::default());
        Self { tx }
    }

    /// 设置总量，`now` 归零
    pub fn start(&self, max: u64) {
        self.tx.send_modify(|p| {
            p.now = 0;
            p.max = max;
        });
    }

    /// 当前处理的条目
    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.tx.send_modify(|p| p.label = Some(label));
    }

    /// 增加已完成字节数；总量已知时不超过总量
    pub fn advance(&self, delta: u64) {
        self.tx.send_modify(|p| {
            p.now = p.now.saturating_add(delta);
            if p.max > 0 {
                p.now = p.now.min(p.max);
            }
        });
    }

    /// 清除标签，表示进入收尾阶段
    pub fn finish(&self) {
        self.tx.send_modify(|p| p.label = None);
    }

    pub fn snapshot(&self) -> Progress {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indeterminate() {
        let p = Progress::default();
        assert!(p.is_indeterminate());
        assert_eq!(p.permille(), None);
    }

    #[test]
    fn test_tracker_flow() {
        let tracker = ProgressTracker::new();
        let rx = tracker.subscribe();
        tracker.start(200);
        tracker.set_label("a.txt");
        tracker.advance(50);
        assert_eq!(
            *rx.borrow(),
            Progress {
                label: Some("a.txt".into()),
                now: 50,
                max: 200
            }
        );
        assert_eq!(tracker.snapshot().permille(), Some(250));

        tracker.advance(500);
        assert_eq!(tracker.snapshot().now, 200);

        tracker.finish();
        assert_eq!(tracker.snapshot().label, None);
    }

    #[test]
    fn test_now_is_monotonic() {
        let tracker = ProgressTracker::new();
        tracker.start(10);
        let mut last = 0;
        for _ in 0..20 {
            tracker.advance(1);
            let now = tracker.snapshot().now;
            assert!(now >= last);
            last = now;
        }
    }
}
