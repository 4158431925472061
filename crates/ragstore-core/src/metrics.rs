//! Operation metrics.
//!
//! [`MetricsCollector`] is the hook for a monitoring system. [`NoopMetrics`]
//! is the default; [`SimpleMetrics`] keeps per-operation counters in memory.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Receives measurements from store operations.
pub trait MetricsCollector: Send + Sync {
    /// Duration and outcome of one operation.
    fn record_operation(&self, operation: &str, duration: Duration, success: bool);

    /// Number of documents an operation touched.
    fn record_document_count(&self, operation: &str, count: usize);

    /// Number of results a search returned.
    fn record_search_results(&self, count: usize);

    /// An error occurrence, classified by `kind`.
    fn record_error(&self, operation: &str, kind: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_operation(&self, _operation: &str, _duration: Duration, _success: bool) {}
    fn record_document_count(&self, _operation: &str, _count: usize) {}
    fn record_search_results(&self, _count: usize) {}
    fn record_error(&self, _operation: &str, _kind: &str) {}
}

/// Counters for one operation name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub count: u64,
    pub total_duration: Duration,
    pub success_count: u64,
    pub error_count: u64,
    /// Sum of document or result counts reported for this name
    pub items: u64,
}

impl OperationStats {
    /// Mean duration, zero when nothing was recorded.
    pub fn average_duration(&self) -> Duration {
        u32::try_from(self.count)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.total_duration / n)
    }
}

/// In-memory collector for development and tests.
#[derive(Debug, Default)]
pub struct SimpleMetrics {
    operations: RwLock<HashMap<String, OperationStats>>,
}

impl SimpleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> HashMap<String, OperationStats> {
        self.operations.read().clone()
    }

    /// Counters for a single operation name.
    pub fn get(&self, operation: &str) -> Option<OperationStats> {
        self.operations.read().get(operation).copied()
    }

    fn update(&self, operation: &str, f: impl FnOnce(&mut OperationStats)) {
        let mut ops = self.operations.write();
        f(ops.entry(operation.to_string()).or_default());
    }
}

impl MetricsCollector for SimpleMetrics {
    fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        self.update(operation, |s| {
            s.count += 1;
            s.total_duration += duration;
            if success {
                s.success_count += 1;
            } else {
                s.error_count += 1;
            }
        });
    }

    fn record_document_count(&self, operation: &str, count: usize) {
        self.update(&format!("{operation}_docs"), |s| {
            s.count += 1;
            s.success_count += 1;
            s.items += count as u64;
        });
    }

    fn record_search_results(&self, count: usize) {
        self.update("search_results", |s| {
            s.count += 1;
            s.success_count += 1;
            s.items += count as u64;
        });
    }

    fn record_error(&self, operation: &str, kind: &str) {
        self.update(&format!("{operation}_error_{kind}"), |s| {
            s.count += 1;
            s.error_count += 1;
        });
    }
}

/// Times one operation and reports it to a collector.
pub struct OperationTimer<'a> {
    collector: &'a dyn MetricsCollector,
    operation: &'static str,
    started: Instant,
}

impl<'a> OperationTimer<'a> {
    pub fn start(collector: &'a dyn MetricsCollector, operation: &'static str) -> Self {
        Self {
            collector,
            operation,
            started: Instant::now(),
        }
    }

    pub fn success(self) {
        self.collector
            .record_operation(self.operation, self.started.elapsed(), true);
    }

    pub fn failure(self, kind: &str) {
        self.collector
            .record_operation(self.operation, self.started.elapsed(), false);
        self.collector.record_error(self.operation, kind);
    }

    /// Report `result` and pass it through.
    pub fn finish<T, E>(self, result: Result<T, E>, kind: &str) -> Result<T, E> {
        match &result {
            Ok(_) => self.success(),
            Err(_) => self.failure(kind),
        }
        result
    }
}
