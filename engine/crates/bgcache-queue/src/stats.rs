use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// 默认保留的采样个数
pub const DEFAULT_HISTORY_LEN: usize = 100;

/// 滚动窗口耗时统计
///
/// 只保留最近 `capacity` 个采样，min/max/avg 都基于窗口内的数据计算，
/// 供统计面板轮询显示，调参（线程数、每帧预算）时参考。
#[derive(Clone, Debug)]
pub struct TimingStats {
    history: VecDeque<Duration>,
    capacity: usize,
    /// 历史上一共记录过多少次（不受窗口限制）
    total_samples: u64,
}

/// 某一时刻的耗时统计快照
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingSummary {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    /// 窗口内的采样数
    pub samples: usize,
}

impl Default for TimingStats {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_LEN)
    }
}

impl TimingStats {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            total_samples: 0,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.total_samples += 1;
    }

    #[inline]
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn summary(&self) -> TimingSummary {
        if self.history.is_empty() {
            return TimingSummary::default();
        }

        let min = self.history.iter().min().copied().unwrap_or_default();
        let max = self.history.iter().max().copied().unwrap_or_default();
        let total: Duration = self.history.iter().sum();

        TimingSummary {
            min,
            max,
            avg: total / self.history.len() as u32,
            samples: self.history.len(),
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {:.3}ms / max {:.3}ms / avg {:.3}ms ({} samples)",
            self.min.as_secs_f64() * 1000.0,
            self.max.as_secs_f64() * 1000.0,
            self.avg.as_secs_f64() * 1000.0,
            self.samples
        )
    }
}

/// 队列深度：当前值和历史最大值
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub current: usize,
    pub max: usize,
}

impl QueueDepth {
    #[inline]
    pub fn observe(&mut self, current: usize) {
        self.current = current;
        self.max = self.max.max(current);
    }
}

impl fmt::Display for QueueDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (max {})", self.current, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let stats = TimingStats::default();
        assert_eq!(stats.summary(), TimingSummary::default());
    }

    #[test]
    fn test_min_max_avg() {
        let mut stats = TimingStats::default();
        stats.record(Duration::from_millis(2));
        stats.record(Duration::from_millis(4));
        stats.record(Duration::from_millis(6));

        let summary = stats.summary();
        assert_eq!(summary.min, Duration::from_millis(2));
        assert_eq!(summary.max, Duration::from_millis(6));
        assert_eq!(summary.avg, Duration::from_millis(4));
        assert_eq!(summary.samples, 3);
    }

    #[test]
    fn test_history_is_capped() {
        let mut stats = TimingStats::with_capacity(100);
        for ms in 0..150 {
            stats.record(Duration::from_millis(ms));
        }
        let summary = stats.summary();
        assert_eq!(summary.samples, 100);
        // 最早的 50 个采样已经被挤出窗口
        assert_eq!(summary.min, Duration::from_millis(50));
        assert_eq!(stats.total_samples(), 150);
    }

    #[test]
    fn test_queue_depth_tracks_max() {
        let mut depth = QueueDepth::default();
        depth.observe(3);
        depth.observe(7);
        depth.observe(1);
        assert_eq!(depth, QueueDepth { current: 1, max: 7 });
    }
}
