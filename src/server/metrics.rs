//! Counters, gauges, and histograms keyed by Prometheus-style label strings (C5).

use dashmap::DashMap;
use std::time::Instant;

/// Fixed histogram bucket upper edges (seconds); the last bucket is conceptually `+inf`.
pub const BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Default)]
struct HistogramState {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new() -> Self {
        Self { bucket_counts: vec![0; BUCKETS.len() + 1], sum: 0.0, count: 0 }
    }

    fn observe(&mut self, value: f64) {
        for (i, edge) in BUCKETS.iter().enumerate() {
            if value <= *edge {
                self.bucket_counts[i] += 1;
            }
        }
        *self.bucket_counts.last_mut().unwrap() += 1; // +inf bucket
        self.sum += value;
        self.count += 1;
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let target = (p / 100.0 * self.count as f64).ceil() as u64;
        for (i, count) in self.bucket_counts.iter().enumerate() {
            if *count >= target {
                return Some(*BUCKETS.get(i).unwrap_or(&f64::INFINITY));
            }
        }
        Some(f64::INFINITY)
    }
}

/// Sorts label pairs so `name{a=1,b=2}` is canonical regardless of insertion order.
fn metric_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted = labels.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    let joined = sorted.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect::<Vec<_>>().join(",");
    format!("{name}{{{joined}}}")
}

#[derive(Default)]
pub struct Metrics {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, f64>,
    histograms: DashMap<String, parking_lot::Mutex<HistogramState>>,
    start: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self { counters: DashMap::new(), gauges: DashMap::new(), histograms: DashMap::new(), start: Some(Instant::now()) }
    }

    pub fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        *self.counters.entry(metric_key(name, labels)).or_insert(0) += 1;
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges.insert(metric_key(name, labels), value);
    }

    pub fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = metric_key(name, labels);
        let entry = self.histograms.entry(key).or_insert_with(|| parking_lot::Mutex::new(HistogramState::new()));
        entry.lock().observe(value);
    }

    pub fn get_percentile(&self, name: &str, labels: &[(&str, &str)], p: f64) -> Option<f64> {
        let key = metric_key(name, labels);
        self.histograms.get(&key).and_then(|h| h.lock().percentile(p))
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters.get(&metric_key(name, labels)).map(|v| *v).unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0)
    }
}

/// RAII guard recording a request duration on drop, standing in for the reference
/// system's `async with` scoped timer (there's no equivalent block construct here).
pub struct RequestTimer<'a> {
    metrics: &'a Metrics,
    method: String,
    start: Instant,
    outcome: &'static str,
}

impl<'a> RequestTimer<'a> {
    pub fn start(metrics: &'a Metrics, method: impl Into<String>) -> Self {
        Self { metrics, method: method.into(), start: Instant::now(), outcome: "success" }
    }

    pub fn mark_failed(&mut self) {
        self.outcome = "error";
    }
}

impl Drop for RequestTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = [("method", self.method.as_str()), ("outcome", self.outcome)];
        self.metrics.observe_histogram("mcp_request_duration_seconds", &labels, duration);
        self.metrics.incr_counter("mcp_requests_total", &labels);
    }
}

/// Same RAII pattern scoped to one tool invocation; records `mcp_tool_calls_total`.
pub struct ToolTimer<'a> {
    metrics: &'a Metrics,
    tool: String,
    start: Instant,
    outcome: &'static str,
}

impl<'a> ToolTimer<'a> {
    pub fn start(metrics: &'a Metrics, tool: impl Into<String>) -> Self {
        Self { metrics, tool: tool.into(), start: Instant::now(), outcome: "success" }
    }

    pub fn mark_failed(&mut self) {
        self.outcome = "error";
    }
}

impl Drop for ToolTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metrics.incr_counter("mcp_tool_calls_total", &[("tool", self.tool.as_str())]);
        self.metrics
            .observe_histogram("mcp_tool_duration_seconds", &[("tool", self.tool.as_str()), ("outcome", self.outcome)], duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments_per_label_set() {
        let m = Metrics::new();
        m.incr_counter("mcp_tool_calls_total", &[("tool", "echo")]);
        m.incr_counter("mcp_tool_calls_total", &[("tool", "echo")]);
        m.incr_counter("mcp_tool_calls_total", &[("tool", "other")]);
        assert_eq!(m.counter_value("mcp_tool_calls_total", &[("tool", "echo")]), 2);
        assert_eq!(m.counter_value("mcp_tool_calls_total", &[("tool", "other")]), 1);
    }

    #[test]
    fn label_order_is_canonicalized() {
        assert_eq!(
            metric_key("x", &[("b", "2"), ("a", "1")]),
            metric_key("x", &[("a", "1"), ("b", "2")])
        );
    }

    #[test]
    fn histogram_percentile_is_monotonic() {
        let m = Metrics::new();
        for v in [0.001, 0.01, 0.1, 1.0, 5.0] {
            m.observe_histogram("latency", &[], v);
        }
        let p50 = m.get_percentile("latency", &[], 50.0).unwrap();
        let p99 = m.get_percentile("latency", &[], 99.0).unwrap();
        assert!(p50 <= p99);
    }

    #[test]
    fn tool_timer_records_on_drop() {
        let m = Metrics::new();
        {
            let _timer = ToolTimer::start(&m, "echo");
        }
        assert_eq!(m.counter_value("mcp_tool_calls_total", &[("tool", "echo")]), 1);
    }
}
