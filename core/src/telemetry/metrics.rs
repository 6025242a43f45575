use serde::Serialize;
use std::sync::Mutex;

/// Counters for one survey run.
pub struct SurveyMetrics {
    inner: Mutex<SurveyCounts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SurveyCounts {
    pub captured: usize,
    pub failed: usize,
    pub start_retries: usize,
    pub failed_downloads: usize,
    pub degraded_fixes: usize,
}

impl SurveyMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SurveyCounts::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SurveyCounts)) {
        if let Ok(mut counts) = self.inner.lock() {
            apply(&mut counts);
        }
    }

    pub fn record_captured(&self) {
        self.update(|c| c.captured += 1);
    }

    pub fn record_failed(&self) {
        self.update(|c| c.failed += 1);
    }

    pub fn record_start_retry(&self) {
        self.update(|c| c.start_retries += 1);
    }

    pub fn record_failed_download(&self) {
        self.update(|c| c.failed_downloads += 1);
    }

    pub fn record_degraded_fix(&self) {
        self.update(|c| c.degraded_fixes += 1);
    }

    pub fn snapshot(&self) -> SurveyCounts {
        self.inner.lock().map(|c| *c).unwrap_or_default()
    }
}

impl Default for SurveyMetrics {
    fn default() -> Self {
        Self::new()
    }
}
