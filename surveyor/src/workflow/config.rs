use anyhow::Context;
use aprescore::prelude::{
    AcquisitionPolicy, AntennaMask, AttenuatorSetting, ConfigUpdate, ControllerSettings,
    TriggerBand,
};
use aprescore::radar::DEFAULT_ROOT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A survey run as described by the YAML workflow file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub radar: RadarSection,
    pub gps: GpsSection,
    pub trigger: TriggerSection,
    pub acquisition: AcquisitionSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarSection {
    pub root: String,
    pub api_key: Option<String>,
    pub attenuators: u8,
    pub sub_bursts: u32,
    pub averages: Option<u32>,
    pub rf_attenuation: Vec<f64>,
    pub af_gain: Vec<f64>,
    pub tx_antenna: Vec<u8>,
    pub rx_antenna: Vec<u8>,
    pub user_data: Option<String>,
}

impl Default for RadarSection {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            api_key: None,
            attenuators: 1,
            sub_bursts: 5,
            averages: None,
            rf_attenuation: vec![25.0],
            af_gain: vec![-14.0],
            tx_antenna: vec![1, 1, 0, 0, 0, 0, 0, 0],
            rx_antenna: vec![1, 0, 1, 0, 0, 0, 0, 0],
            user_data: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsSection {
    /// `host:port` of the receiver's NMEA output.
    pub address: String,
}

impl Default for GpsSection {
    fn default() -> Self {
        Self {
            address: "192.168.2.5:5017".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    pub step_cm: f64,
    /// Fraction of the step allowed short of the target.
    pub lower_tolerance: f64,
    /// Fraction of the step allowed past the target.
    pub upper_tolerance: f64,
    pub settle_cycles: u32,
    pub require_rtk: bool,
    pub first_shot: bool,
    pub guidance_interval_ms: u64,
    pub degraded_pause_ms: u64,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            step_cm: 150.0,
            lower_tolerance: 0.01,
            upper_tolerance: 0.07,
            settle_cycles: 2,
            require_rtk: true,
            first_shot: true,
            guidance_interval_ms: 500,
            degraded_pause_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    pub retry_budget_secs: u64,
    pub retry_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub download: bool,
    pub device_dir: String,
    pub archive_dir: PathBuf,
    pub filename_prefix: String,
    pub burst_user_data: Option<String>,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            retry_budget_secs: 30,
            retry_backoff_ms: 1000,
            poll_interval_ms: 2000,
            download: false,
            device_dir: "Survey".into(),
            archive_dir: PathBuf::from("DownloadedFiles"),
            filename_prefix: "SARRTK".into(),
            burst_user_data: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub point_log: Option<PathBuf>,
}

impl SurveyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading survey config {}", path_ref.display()))?;
        let config: SurveyConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing survey config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Radar settings pushed to the device before surveying.
    pub fn config_update(&self) -> anyhow::Result<ConfigUpdate> {
        let radar = &self.radar;
        let tx = AntennaMask::from_flags(&radar.tx_antenna).context("radar.tx_antenna")?;
        let rx = AntennaMask::from_flags(&radar.rx_antenna).context("radar.rx_antenna")?;
        Ok(ConfigUpdate {
            attenuator_count: Some(radar.attenuators),
            sub_burst_count: Some(radar.sub_bursts),
            average_count: radar.averages,
            rf_attenuation: Some(AttenuatorSetting::Sequence(
                radar.rf_attenuation.iter().copied().map(Some).collect(),
            )),
            af_gain: Some(AttenuatorSetting::Sequence(
                radar.af_gain.iter().copied().map(Some).collect(),
            )),
            tx_antenna: Some(tx),
            rx_antenna: Some(rx),
            user_data: radar.user_data.clone(),
        })
    }

    pub fn controller_settings(&self) -> anyhow::Result<ControllerSettings> {
        let trigger = &self.trigger;
        let band = TriggerBand::from_tolerances(
            trigger.step_cm,
            trigger.lower_tolerance,
            trigger.upper_tolerance,
        )
        .context("trigger tolerances")?;
        Ok(ControllerSettings {
            band,
            settle_cycles: trigger.settle_cycles,
            require_rtk: trigger.require_rtk,
            first_shot: trigger.first_shot,
            guidance_interval: Duration::from_millis(trigger.guidance_interval_ms),
            degraded_pause: Duration::from_millis(trigger.degraded_pause_ms),
        })
    }

    pub fn acquisition_policy(&self) -> AcquisitionPolicy {
        let acquisition = &self.acquisition;
        AcquisitionPolicy {
            retry_budget: Duration::from_secs(acquisition.retry_budget_secs),
            retry_backoff: Duration::from_millis(acquisition.retry_backoff_ms),
            poll_interval: Duration::from_millis(acquisition.poll_interval_ms),
            download: acquisition.download,
            device_dir: acquisition.device_dir.clone(),
            archive_dir: acquisition.archive_dir.clone(),
            filename_prefix: acquisition.filename_prefix.clone(),
            user_data: acquisition.burst_user_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_follow_field_setup() {
        let cfg = SurveyConfig::default();
        let settings = cfg.controller_settings().unwrap();
        assert!((settings.band.min_cm - 148.5).abs() < 1e-9);
        assert!((settings.band.max_cm - 160.5).abs() < 1e-9);
        assert_eq!(cfg.acquisition_policy().retry_budget, Duration::from_secs(30));
        let update = cfg.config_update().unwrap();
        assert_eq!(update.tx_antenna.unwrap().count(), 2);
        assert_eq!(update.rx_antenna.unwrap().count(), 2);
    }

    #[test]
    fn config_load_reads_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"radar:\n  root: 10.0.0.7\n  api_key: abc\n  attenuators: 2\n  rf_attenuation: [10, 20]\n  af_gain: [-4, -4]\n\
              trigger:\n  step_cm: 200\n\
              acquisition:\n  download: true\n  archive_dir: DownloadedFiles/RTK200\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = SurveyConfig::load(&path).unwrap();
        assert_eq!(cfg.radar.root, "10.0.0.7");
        assert_eq!(cfg.radar.attenuators, 2);
        assert_eq!(cfg.radar.sub_bursts, 5);
        assert_eq!(cfg.trigger.step_cm, 200.0);
        assert!(cfg.trigger.require_rtk);
        assert!(cfg.acquisition_policy().download);
        assert_eq!(cfg.gps.address, "192.168.2.5:5017");
    }

    #[test]
    fn bad_antenna_flags_are_reported() {
        let mut cfg = SurveyConfig::default();
        cfg.radar.tx_antenna = vec![0; 8];
        let err = cfg.config_update().unwrap_err();
        assert!(format!("{:#}", err).contains("radar.tx_antenna"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = SurveyConfig::load("/nonexistent/survey.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/survey.yaml"));
    }
}
