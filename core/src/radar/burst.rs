use crate::cancel::CancelToken;
use crate::error::{ApresError, ApresResult, TransportError};
use crate::radar::client::{parse_json, ApresClient};
use crate::radar::config::{RadarConfig, MAX_USER_DATA_LEN};
use crate::radar::transport::{HttpResponse, Transport};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Status code acknowledging that a burst started.
pub const BURST_STARTED_STATUS: u16 = 303;

/// Seconds allowed per chirp when sizing the results timeout.
const SECONDS_PER_CHIRP: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BurstKind {
    Trial,
    Full,
}

/// Kind-specific part of a [`BurstResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BurstDetail {
    Trial {
        average_count: u32,
        /// Count buckets per attenuator setting.
        histogram: Vec<Vec<u64>>,
        /// Chirp samples per attenuator setting, in volts.
        chirp: Vec<Vec<f64>>,
    },
    Full {
        filename: String,
    },
}

/// Results of a finished trial or full burst.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstResult {
    pub attenuator_count: u8,
    pub start_frequency_hz: f64,
    pub stop_frequency_hz: f64,
    pub period_seconds: f64,
    pub detail: BurstDetail,
}

impl BurstResult {
    pub fn kind(&self) -> BurstKind {
        match self.detail {
            BurstDetail::Trial { .. } => BurstKind::Trial,
            BurstDetail::Full { .. } => BurstKind::Full,
        }
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.stop_frequency_hz - self.start_frequency_hz
    }

    pub fn filename(&self) -> Option<&str> {
        match &self.detail {
            BurstDetail::Full { filename } => Some(filename),
            BurstDetail::Trial { .. } => None,
        }
    }

    fn from_response(response: &HttpResponse) -> ApresResult<Self> {
        let raw: RawResults = parse_json(response, "radar/results")?;
        let detail = match raw.kind.as_str() {
            "trial" => BurstDetail::Trial {
                average_count: raw
                    .average_count
                    .ok_or_else(|| missing("nAverages"))?,
                histogram: raw.histogram.ok_or_else(|| missing("histogram"))?,
                chirp: raw
                    .chirp
                    .ok_or_else(|| missing("chirp"))?
                    .into_iter()
                    .map(|samples| samples.into_iter().map(chirp_volts).collect())
                    .collect(),
            },
            "burst" => BurstDetail::Full {
                filename: raw.filename.ok_or_else(|| missing("filename"))?,
            },
            other => {
                return Err(ApresError::MalformedResponse(format!(
                    "invalid results type '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            attenuator_count: raw.attenuator_count,
            start_frequency_hz: raw.start_frequency,
            stop_frequency_hz: raw.stop_frequency,
            period_seconds: raw.period,
            detail,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawResults {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "nAttenuators")]
    attenuator_count: u8,
    #[serde(rename = "startFrequency")]
    start_frequency: f64,
    #[serde(rename = "stopFrequency")]
    stop_frequency: f64,
    period: f64,
    #[serde(rename = "nAverages")]
    average_count: Option<u32>,
    histogram: Option<Vec<Vec<u64>>>,
    chirp: Option<Vec<Vec<f64>>>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsStatus {
    status: String,
}

fn missing(key: &str) -> ApresError {
    ApresError::MalformedResponse(format!("no key '{}' in results", key))
}

// 16-bit ADC counts over a 2.5 V range.
fn chirp_volts(counts: f64) -> f64 {
    counts / 65536.0 * 2.5
}

/// Upper bound on how long a burst with `config` may take to produce results.
pub fn results_timeout(config: &RadarConfig, base: Duration) -> Duration {
    let chirps = u64::from(config.active_channel_pairs())
        * (u64::from(config.sub_burst_count) + u64::from(config.average_count))
        * u64::from(config.attenuator_count);
    Duration::from_secs(chirps * SECONDS_PER_CHIRP) + base
}

/// While starting a burst an unreachable radar is treated as busy mid-operation.
fn busy_when_unreachable(err: ApresError) -> ApresError {
    match err {
        ApresError::Transport(TransportError::Connect(message))
        | ApresError::Transport(TransportError::Other(message)) => {
            ApresError::RadarBusy(format!("radar unreachable: {}", message))
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct BurstRefusal {
    #[serde(rename = "errorCode")]
    code: Option<u16>,
    #[serde(rename = "errorMessage")]
    message: Option<String>,
}

impl<T: Transport> ApresClient<T> {
    /// Starts a full burst saved on the radar under `filename`.
    pub fn start_burst(&mut self, filename: Option<&str>, user_data: Option<&str>) -> ApresResult<()> {
        let mut form = Vec::new();
        if let Some(filename) = filename {
            form.push(("filename".to_string(), filename.to_string()));
        }
        if let Some(user_data) = user_data {
            let length = user_data.chars().count();
            if length > MAX_USER_DATA_LEN {
                return Err(ApresError::InvalidUserData(length));
            }
            form.push(("userData".to_string(), user_data.to_string()));
        }
        self.start("radar/burst", form, BurstKind::Full)
    }

    /// Starts a trial burst whose results are returned inline.
    pub fn start_trial_burst(&mut self) -> ApresResult<()> {
        self.start("radar/trial-burst", Vec::new(), BurstKind::Trial)
    }

    fn start(
        &mut self,
        route: &str,
        form: Vec<(String, String)>,
        kind: BurstKind,
    ) -> ApresResult<()> {
        if self.outstanding.is_some() {
            return Err(ApresError::BurstOutstanding);
        }
        self.sync_config().map_err(busy_when_unreachable)?;
        let response = self.post_raw(route, form).map_err(busy_when_unreachable)?;
        if response.status == BURST_STARTED_STATUS {
            info!("{:?} burst started", kind);
            self.outstanding = Some(kind);
            return Ok(());
        }

        let refusal: Option<BurstRefusal> = serde_json::from_slice(&response.body).ok();
        debug!("{} refused with status {}: {:?}", route, response.status, refusal);
        match refusal {
            Some(BurstRefusal {
                code: Some(401),
                message,
            }) => Err(ApresError::Unauthorized(message.unwrap_or_default())),
            Some(BurstRefusal {
                message: Some(message),
                ..
            }) => Err(ApresError::RadarBusy(message)),
            _ => Err(ApresError::BurstRejected {
                status: response.status,
            }),
        }
    }

    /// Kind of the burst started by this client and not yet awaited.
    pub fn outstanding_burst(&self) -> Option<BurstKind> {
        self.outstanding
    }

    /// Polls `radar/results` until the burst finishes.
    ///
    /// The timeout is derived from the last known configuration. Holding
    /// `&mut self` for the whole wait keeps a second poller off this client.
    pub fn await_results(&mut self, poll_interval: Duration) -> ApresResult<BurstResult> {
        self.await_results_cancellable(poll_interval, &CancelToken::new())
    }

    pub fn await_results_cancellable(
        &mut self,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> ApresResult<BurstResult> {
        let outcome = self.poll_results(poll_interval, cancel);
        self.outstanding = None;
        outcome
    }

    fn poll_results(
        &mut self,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> ApresResult<BurstResult> {
        let config = match self.config.clone() {
            Some(config) => config,
            None => self.sync_config()?,
        };
        let timeout = results_timeout(&config, self.settings.base_results_timeout);
        info!("waiting for results (timeout {:?})", timeout);

        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(ApresError::Cancelled);
            }
            match self.get("radar/results", &[]) {
                Ok(response) => {
                    let status: ResultsStatus = parse_json(&response, "radar/results")?;
                    match status.status.as_str() {
                        "finished" => {
                            let result = BurstResult::from_response(&response)?;
                            info!(
                                "{:?} burst finished after {:.1}s",
                                result.kind(),
                                started.elapsed().as_secs_f64()
                            );
                            return Ok(result);
                        }
                        "idle" => return Err(ApresError::NoAcquisitionInProgress),
                        other => debug!("results status '{}'", other),
                    }
                }
                Err(ApresError::RadarBusy(message)) => debug!("results: radar busy ({})", message),
                Err(err @ ApresError::Transport(_)) => warn!("results poll failed: {}", err),
                Err(err) => return Err(err),
            }
            if started.elapsed() >= timeout {
                return Err(ApresError::ResultsTimeout(timeout));
            }
            thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::config::AntennaMask;
    use crate::testing::{BurstReply, FakeRadar};

    fn config(tx: u8, rx: u8, sub: u32, avg: u32, atts: u8) -> RadarConfig {
        RadarConfig {
            attenuator_count: atts,
            sub_burst_count: sub,
            average_count: avg,
            rf_attenuation_db: vec![25.0; atts as usize],
            af_gain_db: vec![-14.0; atts as usize],
            tx_antenna: AntennaMask::from_bits(tx),
            rx_antenna: AntennaMask::from_bits(rx),
            user_data: String::new(),
        }
    }

    #[test]
    fn timeout_scales_with_acquisition_length() {
        let cfg = config(0b11, 0b1, 5, 0, 1);
        assert_eq!(
            results_timeout(&cfg, Duration::from_secs(30)),
            Duration::from_secs(50)
        );
        let cfg = config(0b11, 0b101, 5, 2, 3);
        assert_eq!(
            results_timeout(&cfg, Duration::from_secs(30)),
            Duration::from_secs(4 * 7 * 3 * 2 + 30)
        );
    }

    #[test]
    fn burst_start_is_acknowledged_by_redirect() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started]);
        let mut client = FakeRadar::client(&radar);
        client.start_burst(Some("1_SARRTK.dat"), Some("line A")).unwrap();
        assert_eq!(client.outstanding_burst(), Some(BurstKind::Full));
        let form = radar.last_form("radar/burst").unwrap();
        assert!(form.contains(&("filename".into(), "1_SARRTK.dat".into())));
        assert!(form.contains(&("userData".into(), "line A".into())));
    }

    #[test]
    fn refusal_with_message_is_busy() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Busy("burst in progress".into())]);
        let mut client = FakeRadar::client(&radar);
        assert!(matches!(
            client.start_burst(None, None),
            Err(ApresError::RadarBusy(ref m)) if m == "burst in progress"
        ));
        assert_eq!(client.outstanding_burst(), None);
    }

    #[test]
    fn refusal_without_message_is_rejected() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Rejected(403)]);
        let mut client = FakeRadar::client(&radar);
        assert!(matches!(
            client.start_burst(None, None),
            Err(ApresError::BurstRejected { status: 403 })
        ));
    }

    #[test]
    fn connection_failure_reads_as_busy() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::ConnectionRefused]);
        let mut client = FakeRadar::client(&radar);
        let err = client.start_burst(None, None).unwrap_err();
        assert!(matches!(err, ApresError::RadarBusy(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn unreachable_radar_during_pre_start_sync_reads_as_busy() {
        let radar = FakeRadar::new();
        radar.fail_next(
            "radar/config",
            TransportError::Connect("connect timed out".into()),
        );
        let mut client = FakeRadar::client(&radar);
        let err = client.start_burst(None, None).unwrap_err();
        assert!(matches!(err, ApresError::RadarBusy(_)));
        assert_eq!(radar.count("radar/burst"), 0);
        client.start_burst(None, None).unwrap();
    }

    #[test]
    fn bad_key_on_burst_is_auth_error() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Unauthorized]);
        let mut client = FakeRadar::client(&radar);
        assert!(matches!(
            client.start_burst(None, None),
            Err(ApresError::Unauthorized(_))
        ));
    }

    #[test]
    fn second_start_while_outstanding_is_refused() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started, BurstReply::Started]);
        let mut client = FakeRadar::client(&radar);
        client.start_burst(None, None).unwrap();
        assert!(matches!(
            client.start_trial_burst(),
            Err(ApresError::BurstOutstanding)
        ));
    }

    #[test]
    fn full_burst_results_are_polled_until_finished() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started]);
        radar.script_results(vec![
            FakeRadar::busy_results(),
            FakeRadar::busy_results(),
            FakeRadar::full_results("7_SARRTK.dat"),
        ]);
        let mut client = FakeRadar::client(&radar);
        client.start_burst(Some("7_SARRTK.dat"), None).unwrap();
        let result = client.await_results(Duration::ZERO).unwrap();
        assert_eq!(result.kind(), BurstKind::Full);
        assert_eq!(result.filename(), Some("7_SARRTK.dat"));
        assert_eq!(result.bandwidth_hz(), 200e6);
        assert_eq!(radar.count("radar/results"), 3);
        assert_eq!(client.outstanding_burst(), None);
    }

    #[test]
    fn trial_results_carry_scaled_chirps() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started]);
        radar.script_results(vec![FakeRadar::json(
            r#"{"status":"finished","type":"trial","nAttenuators":1,"startFrequency":2e8,
               "stopFrequency":4e8,"period":1.0,"nAverages":4,
               "histogram":[[0,3,9]],"chirp":[[0,32768,65536]]}"#,
        )]);
        let mut client = FakeRadar::client(&radar);
        client.start_trial_burst().unwrap();
        let result = client.await_results(Duration::ZERO).unwrap();
        match result.detail {
            BurstDetail::Trial {
                average_count,
                histogram,
                chirp,
            } => {
                assert_eq!(average_count, 4);
                assert_eq!(histogram, vec![vec![0, 3, 9]]);
                assert_eq!(chirp, vec![vec![0.0, 1.25, 2.5]]);
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn idle_radar_means_nothing_started() {
        let radar = FakeRadar::new();
        radar.script_results(vec![FakeRadar::json(r#"{"status":"idle"}"#)]);
        let mut client = FakeRadar::client(&radar);
        assert!(matches!(
            client.await_results(Duration::ZERO),
            Err(ApresError::NoAcquisitionInProgress)
        ));
    }

    #[test]
    fn results_timeout_is_an_error() {
        let radar = FakeRadar::new();
        // One sub-burst on one channel pair: 2 s of chirps, no base allowance.
        radar.set_sub_bursts(0);
        radar.script_results(vec![FakeRadar::busy_results()]);
        let mut client = FakeRadar::client(&radar).with_settings(crate::radar::ClientSettings {
            base_results_timeout: Duration::ZERO,
        });
        assert!(matches!(
            client.await_results(Duration::ZERO),
            Err(ApresError::ResultsTimeout(d)) if d == Duration::ZERO
        ));
    }

    #[test]
    fn results_wait_honours_cancellation() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started]);
        let mut client = FakeRadar::client(&radar);
        client.start_burst(None, None).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            client.await_results_cancellable(Duration::ZERO, &cancel),
            Err(ApresError::Cancelled)
        ));
        assert_eq!(client.outstanding_burst(), None);
    }

    #[test]
    fn transport_hiccups_during_polling_are_tolerated() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Started]);
        radar.script_results(vec![
            FakeRadar::unreachable(),
            FakeRadar::full_results("2_SARRTK.dat"),
        ]);
        let mut client = FakeRadar::client(&radar);
        client.start_burst(None, None).unwrap();
        let result = client.await_results(Duration::ZERO).unwrap();
        assert_eq!(result.filename(), Some("2_SARRTK.dat"));
    }

    #[test]
    fn unknown_results_type_is_malformed() {
        let radar = FakeRadar::new();
        radar.script_results(vec![FakeRadar::json(
            r#"{"status":"finished","type":"mystery","nAttenuators":1,"startFrequency":2e8,
               "stopFrequency":4e8,"period":1.0}"#,
        )]);
        let mut client = FakeRadar::client(&radar);
        assert!(matches!(
            client.await_results(Duration::ZERO),
            Err(ApresError::MalformedResponse(_))
        ));
    }
}
