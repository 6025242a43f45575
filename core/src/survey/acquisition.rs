use crate::cancel::CancelToken;
use crate::error::{AcquisitionError, ApresError};
use crate::gps::GpsFix;
use crate::radar::{ApresClient, BurstResult, Transport};
use crate::telemetry::{PointLog, PointRecord, SurveyMetrics};
use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Limits and output options of one point acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionPolicy {
    /// Wall-clock budget for getting a burst started.
    pub retry_budget: Duration,
    pub retry_backoff: Duration,
    pub poll_interval: Duration,
    pub download: bool,
    /// Directory on the radar where bursts are written.
    pub device_dir: String,
    pub archive_dir: PathBuf,
    pub filename_prefix: String,
    pub user_data: Option<String>,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            retry_budget: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            download: true,
            device_dir: "Survey".into(),
            archive_dir: PathBuf::from("DownloadedFiles"),
            filename_prefix: "SARRTK".into(),
            user_data: None,
        }
    }
}

/// The finalized position of a point about to be captured.
#[derive(Debug, Clone)]
pub struct PointContext {
    pub sequence: u32,
    pub fix: GpsFix,
    pub displacement_cm: f64,
}

#[derive(Debug, Clone)]
pub struct CapturedPoint {
    pub sequence: u32,
    pub filename: String,
    pub start_attempts: u32,
    pub result: BurstResult,
    /// Local copy of the burst, when downloading is enabled and succeeded.
    pub archived: Option<PathBuf>,
}

/// Captures one survey point: bounded start retries, results wait, point
/// record and optional download.
pub struct RobustAcquisition {
    policy: AcquisitionPolicy,
    point_log: PointLog,
    metrics: Arc<SurveyMetrics>,
}

impl RobustAcquisition {
    pub fn new(policy: AcquisitionPolicy, point_log: PointLog, metrics: Arc<SurveyMetrics>) -> Self {
        Self {
            policy,
            point_log,
            metrics,
        }
    }

    pub fn policy(&self) -> &AcquisitionPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &SurveyMetrics {
        &self.metrics
    }

    /// `<seq>_<prefix>_<YYYYmmdd_HHMMSS>.dat`
    pub fn burst_filename(&self, sequence: u32, at: NaiveDateTime) -> String {
        format!(
            "{}_{}_{}.dat",
            sequence,
            self.policy.filename_prefix,
            at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn acquire<T: Transport>(
        &self,
        client: &mut ApresClient<T>,
        point: &PointContext,
        cancel: &CancelToken,
    ) -> Result<CapturedPoint, AcquisitionError> {
        let outcome = self.capture(client, point, cancel);
        match &outcome {
            Ok(_) => self.metrics.record_captured(),
            Err(err) => {
                self.metrics.record_failed();
                error!("CRITICAL: point {} not captured: {}", point.sequence, err);
            }
        }
        outcome
    }

    fn capture<T: Transport>(
        &self,
        client: &mut ApresClient<T>,
        point: &PointContext,
        cancel: &CancelToken,
    ) -> Result<CapturedPoint, AcquisitionError> {
        let filename = self.burst_filename(point.sequence, Local::now().naive_local());
        info!("point {}: burst file {}", point.sequence, filename);

        let start_attempts = self.start_with_retry(client, &filename, cancel)?;
        let started = Instant::now();
        let result = client
            .await_results_cancellable(self.policy.poll_interval, cancel)
            .map_err(AcquisitionError::Results)?;
        info!(
            "point {}: burst finished in {:.1}s",
            point.sequence,
            started.elapsed().as_secs_f64()
        );

        let record = PointRecord {
            sequence: point.sequence,
            filename: filename.clone(),
            time_of_day: point.fix.time_of_day.clone(),
            latitude: point.fix.latitude,
            longitude: point.fix.longitude,
            altitude_m: point.fix.altitude_m,
            displacement_cm: point.displacement_cm,
            quality_code: point.fix.quality.code(),
        };
        if let Err(err) = self.point_log.record(&record) {
            error!("point {}: failed to persist point record: {}", point.sequence, err);
        }

        let archived = if self.policy.download {
            self.archive(client, &filename)
        } else {
            None
        };

        Ok(CapturedPoint {
            sequence: point.sequence,
            filename,
            start_attempts,
            result,
            archived,
        })
    }

    /// Retries busy and connection failures until the budget runs out.
    fn start_with_retry<T: Transport>(
        &self,
        client: &mut ApresClient<T>,
        filename: &str,
        cancel: &CancelToken,
    ) -> Result<u32, AcquisitionError> {
        let budget = self.policy.retry_budget;
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(AcquisitionError::Start(ApresError::Cancelled));
            }
            attempts += 1;
            info!("burst start attempt {}", attempts);
            match client.start_burst(Some(filename), self.policy.user_data.as_deref()) {
                Ok(()) => return Ok(attempts),
                Err(err) if err.is_retryable() => {
                    if started.elapsed() >= budget {
                        return Err(AcquisitionError::StartTimeout {
                            budget,
                            attempts,
                            last: err,
                        });
                    }
                    self.metrics.record_start_retry();
                    warn!("burst start attempt {} failed, trying again: {}", attempts, err);
                    thread::sleep(self.policy.retry_backoff);
                }
                Err(err) => return Err(AcquisitionError::Start(err)),
            }
        }
    }

    fn archive<T: Transport>(&self, client: &mut ApresClient<T>, filename: &str) -> Option<PathBuf> {
        let device_path = format!("{}/{}", self.policy.device_dir.trim_end_matches('/'), filename);
        let downloaded = fs::create_dir_all(&self.policy.archive_dir)
            .map_err(ApresError::from)
            .and_then(|_| client.download_file(&device_path, Some(self.policy.archive_dir.as_path())));
        match downloaded {
            Ok(path) => Some(path),
            Err(err) => {
                self.metrics.record_failed_download();
                warn!("download of {} failed: {}", device_path, err);
                None
            }
        }
    }
}
