use crate::workflow::config::SurveyConfig;
use anyhow::Context;
use aprescore::prelude::{
    ApresClient, BurstResult, CancelToken, DirectoryListing, FixReader, HousekeepingStatus,
    HttpTransport, Notifier, PointLog, PositionController, RadarConfig, RobustAcquisition,
    SurveyCounts, SurveyMetrics, Transport,
};
use aprescore::radar::DEFAULT_PAGE_SIZE;
use log::info;
use std::io::Read;
use std::sync::Arc;

/// Drives one radar according to a [`SurveyConfig`].
pub struct Runner<T: Transport = HttpTransport> {
    config: SurveyConfig,
    client: ApresClient<T>,
}

impl Runner {
    pub fn connect(config: SurveyConfig) -> anyhow::Result<Self> {
        let client = ApresClient::connect(&config.radar.root)
            .with_context(|| format!("creating client for {}", config.radar.root))?;
        Self::with_client(config, client)
    }
}

impl<T: Transport> Runner<T> {
    pub fn with_client(config: SurveyConfig, mut client: ApresClient<T>) -> anyhow::Result<Self> {
        let key = config
            .radar
            .api_key
            .as_deref()
            .context("radar.api_key is required (set it in the workflow or pass --key)")?;
        client.configure(key).context("assigning API key")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    pub fn apply_radar_config(&mut self) -> anyhow::Result<RadarConfig> {
        let update = self.config.config_update()?;
        let applied = self
            .client
            .update_config(&update)
            .context("pushing radar configuration")?;
        info!(
            "radar configured: {} attenuator(s), {} sub-burst(s), {} channel pair(s)",
            applied.attenuator_count,
            applied.sub_burst_count,
            applied.active_channel_pairs()
        );
        Ok(applied)
    }

    pub fn status(&mut self) -> anyhow::Result<HousekeepingStatus> {
        self.client
            .housekeeping_status()
            .context("reading housekeeping status")
    }

    /// Configures the radar and runs one trial burst.
    pub fn trial(&mut self) -> anyhow::Result<BurstResult> {
        self.apply_radar_config()?;
        self.client
            .start_trial_burst()
            .context("starting trial burst")?;
        let poll = self.config.acquisition_policy().poll_interval;
        self.client
            .await_results(poll)
            .context("waiting for trial burst results")
    }

    pub fn list(&mut self, path: &str) -> anyhow::Result<DirectoryListing> {
        self.client
            .list_directory(path, 0, DEFAULT_PAGE_SIZE)
            .with_context(|| format!("listing {}", path))
    }

    /// Configures the radar, then surveys until the fix stream ends or `cancel` trips.
    pub fn survey<R: Read>(
        mut self,
        mut reader: FixReader<R>,
        notifier: Arc<dyn Notifier>,
        cancel: &CancelToken,
    ) -> anyhow::Result<SurveyCounts> {
        self.apply_radar_config()?;
        let settings = self.config.controller_settings()?;
        let point_log = match &self.config.logging.point_log {
            Some(path) => PointLog::with_file(path)
                .with_context(|| format!("opening point log {}", path.display()))?,
            None => PointLog::new(),
        };
        let acquisition = RobustAcquisition::new(
            self.config.acquisition_policy(),
            point_log,
            Arc::new(SurveyMetrics::new()),
        );
        let mut controller = PositionController::new(self.client, acquisition, notifier, settings);
        controller
            .run(&mut reader, cancel)
            .context("reading gps stream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aprescore::testing::{FakeRadar, RecordingNotifier};
    use aprescore::prelude::SurveyEvent;
    use std::fs;
    use std::io::Cursor;

    fn config() -> SurveyConfig {
        let mut config = SurveyConfig::default();
        config.radar.api_key = Some(FakeRadar::KEY.to_string());
        config
    }

    fn runner(radar: &FakeRadar, config: SurveyConfig) -> Runner<FakeRadar> {
        let client = ApresClient::with_transport("radar.test", radar.clone());
        Runner::with_client(config, client).unwrap()
    }

    #[test]
    fn missing_key_is_rejected() {
        let radar = FakeRadar::new();
        let client = ApresClient::with_transport("radar.test", radar);
        let err = Runner::with_client(SurveyConfig::default(), client).err().unwrap();
        assert!(err.to_string().contains("radar.api_key"));
    }

    #[test]
    fn survey_replays_recorded_stream() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("points.log");
        let mut config = config();
        config.logging.point_log = Some(log_path.clone());
        let radar = FakeRadar::new();
        let notifier = Arc::new(RecordingNotifier::default());

        // Reference shot, then two fixes about 156 cm further north.
        let stream = "$GPGGA,100000.00,0000.00000,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n\
                      $GPGGA,100001.00,0000.00084,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n\
                      $GPGGA,100002.00,0000.00084,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n";
        let reader = FixReader::replay(Cursor::new(stream.as_bytes().to_vec()));
        let counts = runner(&radar, config)
            .survey(reader, notifier.clone(), &CancelToken::new())
            .unwrap();

        assert_eq!(counts.captured, 2);
        assert_eq!(radar.count("radar/burst"), 2);
        let rx = radar.last_form("radar/config").unwrap();
        assert!(rx
            .iter()
            .any(|(name, value)| name == "rxAntenna" && value == "1,0,1,0,0,0,0,0"));
        let events = notifier.events();
        assert!(events.contains(&SurveyEvent::Stop));
        let log = fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.matches("#PointName$").count(), 2);
    }

    #[test]
    fn trial_returns_results() {
        let radar = FakeRadar::new();
        let mut runner = runner(&radar, config());
        let result = runner.trial().unwrap();
        assert_eq!(radar.count("radar/trial-burst"), 1);
        assert_eq!(result.attenuator_count, 1);
    }

    #[test]
    fn status_reads_housekeeping() {
        let radar = FakeRadar::new();
        let status = runner(&radar, config()).status().unwrap();
        assert!((status.battery_voltage - 12.4).abs() < 1e-9);
        assert!(status.time_gps.is_none());
    }
}
