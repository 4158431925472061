//! Progress reporting for long-running writes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of an operation's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    /// Current stage, e.g. "inserting"
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Progress {
    /// Completion in percent, 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.current as f64 / self.total as f64 * 100.0
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Linear estimate from the rate so far. Zero when no estimate is possible.
    pub fn estimated_remaining(&self) -> Duration {
        if self.current == 0 || self.total == 0 || self.current >= self.total {
            return Duration::ZERO;
        }
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Duration::ZERO;
        }
        let rate = self.current as f64 / elapsed;
        Duration::from_secs_f64((self.total - self.current) as f64 / rate)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Receives every progress update. Must not block.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Thread-safe progress state for one operation.
///
/// Every mutation reports the new snapshot to the callback, if any.
pub struct ProgressTracker {
    progress: Mutex<Progress>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Start tracking. The initial state is reported immediately.
    pub fn new(stage: impl Into<String>, total: u64, callback: Option<ProgressCallback>) -> Self {
        let now = Utc::now();
        let tracker = Self {
            progress: Mutex::new(Progress {
                stage: stage.into(),
                current: 0,
                total,
                message: String::new(),
                started_at: now,
                last_updated: now,
            }),
            callback,
        };
        tracker.report(|_| {});
        tracker
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.report(|p| p.current = p.current.saturating_add(delta));
    }

    pub fn set_total(&self, total: u64) {
        self.report(|p| p.total = total);
    }

    pub fn set_stage(&self, stage: impl Into<String>) {
        let stage = stage.into();
        self.report(|p| p.stage = stage);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.report(|p| p.message = message);
    }

    /// Mark everything done.
    pub fn complete(&self) {
        self.report(|p| p.current = p.total);
    }

    pub fn snapshot(&self) -> Progress {
        self.progress.lock().clone()
    }

    fn report(&self, update: impl FnOnce(&mut Progress)) {
        let snapshot = {
            let mut p = self.progress.lock();
            update(&mut p);
            p.last_updated = Utc::now();
            p.clone()
        };
        if let Some(cb) = &self.callback {
            cb(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(current: u64, total: u64) -> Progress {
        let now = Utc::now();
        Progress {
            stage: "inserting".to_string(),
            current,
            total,
            message: String::new(),
            started_at: now,
            last_updated: now,
        }
    }

    #[test]
    fn test_percent_and_completion() {
        assert_eq!(progress(0, 0).percent(), 0.0);
        assert_eq!(progress(25, 100).percent(), 25.0);
        assert!(!progress(0, 0).is_complete());
        assert!(!progress(5, 10).is_complete());
        assert!(progress(10, 10).is_complete());
    }

    #[test]
    fn test_estimated_remaining() {
        assert_eq!(progress(0, 10).estimated_remaining(), Duration::ZERO);
        assert_eq!(progress(10, 10).estimated_remaining(), Duration::ZERO);

        let mut p = progress(5, 10);
        p.started_at = Utc::now() - chrono::Duration::seconds(10);
        let eta = p.estimated_remaining();
        assert!(eta >= Duration::from_secs(9) && eta <= Duration::from_secs(11));
    }

    #[test]
    fn test_tracker_reports_every_update() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb: ProgressCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: &Progress| seen.lock().push((p.stage.clone(), p.current, p.total)))
        };

        let tracker = ProgressTracker::new("inserting", 10, Some(cb));
        tracker.add(4);
        tracker.increment();
        tracker.set_stage("indexing");
        tracker.complete();

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], ("inserting".to_string(), 0, 10));
        assert_eq!(seen[2], ("inserting".to_string(), 5, 10));
        assert_eq!(seen[4], ("indexing".to_string(), 10, 10));
        assert!(tracker.snapshot().is_complete());
    }

    #[test]
    fn test_tracker_without_callback() {
        let tracker = ProgressTracker::new("embedding", 0, None);
        tracker.set_total(3);
        tracker.set_message("batch 1");
        tracker.add(3);
        let p = tracker.snapshot();
        assert_eq!(p.message, "batch 1");
        assert!(p.is_complete());
    }
}
