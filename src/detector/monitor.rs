//! Checks that chunks are processed as fast as the capture produces them.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    Healthy,
    /// One window below the tolerated rate
    Lagging,
    /// Too many consecutive lagging windows, commands are likely being missed
    Backlogged,
}

pub struct PerformanceMonitor {
    window: Duration,
    expected_rate: f64,
    min_ratio: f64,
    shortfall_windows: u32,
    window_start: Option<Instant>,
    chunks: u64,
    shortfalls: u32,
}

impl PerformanceMonitor {
    pub fn new(window: Duration, expected_rate: f64, min_ratio: f64, shortfall_windows: u32) -> Self {
        Self {
            window,
            expected_rate,
            min_ratio,
            shortfall_windows: shortfall_windows.max(1),
            window_start: None,
            chunks: 0,
            shortfalls: 0,
        }
    }

    /// Count one processed chunk. Returns a status each time a window closes.
    pub fn record_chunk(&mut self, now: Instant) -> Option<PerformanceStatus> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };
        self.chunks += 1;

        let elapsed = now.duration_since(start);
        if elapsed < self.window {
            return None;
        }

        let rate = self.chunks as f64 / elapsed.as_secs_f64();
        self.window_start = Some(now);
        self.chunks = 0;

        if rate >= self.expected_rate * self.min_ratio {
            if self.shortfalls > 0 {
                log::info!("Detector caught up, {:.1} chunks/s", rate);
            }
            self.shortfalls = 0;
            log::debug!("Detector rate {:.1}/{:.1} chunks/s", rate, self.expected_rate);
            return Some(PerformanceStatus::Healthy);
        }

        self.shortfalls += 1;
        if self.shortfalls >= self.shortfall_windows {
            log::error!(
                "Detector backlogged for {} windows: {:.1} chunks/s, expected {:.1}",
                self.shortfalls,
                rate,
                self.expected_rate
            );
            Some(PerformanceStatus::Backlogged)
        } else {
            log::warn!(
                "Detector lagging: {:.1} chunks/s, expected {:.1}",
                rate,
                self.expected_rate
            );
            Some(PerformanceStatus::Lagging)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `count` chunks spaced `step_ms` apart after an initial call at `t0`.
    fn feed(
        monitor: &mut PerformanceMonitor,
        t0: Instant,
        offset_ms: u64,
        step_ms: u64,
        count: u64,
    ) -> Vec<PerformanceStatus> {
        (1..=count)
            .filter_map(|i| {
                monitor.record_chunk(t0 + Duration::from_millis(offset_ms + i * step_ms))
            })
            .collect()
    }

    #[test]
    fn full_rate_is_healthy() {
        let mut monitor = PerformanceMonitor::new(Duration::from_secs(1), 10.0, 0.95, 3);
        let t0 = Instant::now();
        assert_eq!(monitor.record_chunk(t0), None);
        assert_eq!(feed(&mut monitor, t0, 0, 100, 10), vec![PerformanceStatus::Healthy]);
    }

    #[test]
    fn sustained_shortfall_escalates() {
        let mut monitor = PerformanceMonitor::new(Duration::from_secs(1), 10.0, 0.95, 3);
        let t0 = Instant::now();
        monitor.record_chunk(t0);
        let statuses = feed(&mut monitor, t0, 0, 200, 15);
        assert_eq!(
            statuses,
            vec![
                PerformanceStatus::Lagging,
                PerformanceStatus::Lagging,
                PerformanceStatus::Backlogged,
            ]
        );

        // Recovery resets the streak
        let statuses = feed(&mut monitor, t0, 3000, 100, 10);
        assert_eq!(statuses, vec![PerformanceStatus::Healthy]);
    }
}
