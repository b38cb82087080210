use chrono::Utc;
use std::collections::VecDeque;

use super::types::ServiceMetrics;

const LATENCY_WINDOW: usize = 100;

/// Incremental aggregate behind [`ServiceMetrics`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsTracker {
    metrics: ServiceMetrics,
    up_count: u64,
    latency_samples: u64,
    window: VecDeque<u64>,
}

impl MetricsTracker {
    pub(crate) fn record(&mut self, up: bool, response_time_ms: Option<u64>) {
        let m = &mut self.metrics;
        m.request_count += 1;
        if up {
            self.up_count += 1;
        } else {
            m.error_count += 1;
        }

        if let (true, Some(rt)) = (up, response_time_ms) {
            self.latency_samples += 1;
            let n = self.latency_samples as f64;
            let stats = &mut m.response_time;
            stats.avg_ms += (rt as f64 - stats.avg_ms) / n;
            stats.min_ms = if self.latency_samples == 1 {
                rt
            } else {
                stats.min_ms.min(rt)
            };
            stats.max_ms = stats.max_ms.max(rt);

            if self.window.len() == LATENCY_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(rt);
            stats.p95_ms = percentile(&self.window, 0.95);
        }

        m.error_rate = m.error_count as f64 / m.request_count as f64;
        m.uptime_percent = self.up_count as f64 / m.request_count as f64 * 100.0;
        m.last_check = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> ServiceMetrics {
        self.metrics.clone()
    }
}

/// Nearest-rank percentile.
fn percentile(samples: &VecDeque<u64>, q: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
