use crate::cancel::CancelToken;
use crate::error::{AcquisitionError, ApresError};
use crate::gps::{FixReader, GpsFix};
use crate::math::Geodesy;
use crate::radar::{ApresClient, HttpTransport, Transport};
use crate::survey::acquisition::{CapturedPoint, PointContext, RobustAcquisition};
use crate::survey::notifier::{Notifier, SurveyEvent};
use crate::survey::trigger::{AcquisitionState, TriggerBand, TriggerMachine};
use crate::telemetry::SurveyCounts;
use log::{debug, info, warn};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub band: TriggerBand,
    /// Consecutive in-band fixes needed before a point fires.
    pub settle_cycles: u32,
    /// Only trust displacement from RTK fixed/float solutions.
    pub require_rtk: bool,
    /// Capture a point at the reference position on the first fix.
    pub first_shot: bool,
    pub guidance_interval: Duration,
    pub degraded_pause: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            band: TriggerBand {
                step_cm: 150.0,
                min_cm: 148.5,
                max_cm: 160.5,
            },
            settle_cycles: 2,
            require_rtk: true,
            first_shot: true,
            guidance_interval: Duration::from_millis(500),
            degraded_pause: Duration::from_secs(2),
        }
    }
}

/// What one GPS fix led to.
#[derive(Debug)]
pub enum CycleOutcome {
    ReferenceSet,
    /// Fix rejected as untrustworthy; nothing changed.
    Degraded,
    Tracking {
        state: AcquisitionState,
        displacement_cm: f64,
    },
    Captured(CapturedPoint),
    Failed(AcquisitionError),
}

/// Turns a stream of fixes into distance-triggered radar bursts.
pub struct PositionController<T: Transport = HttpTransport> {
    client: ApresClient<T>,
    acquisition: RobustAcquisition,
    notifier: Arc<dyn Notifier>,
    settings: ControllerSettings,
    machine: TriggerMachine,
    reference: Option<(f64, f64)>,
    next_sequence: u32,
    last_guidance: Option<Instant>,
}

impl<T: Transport> PositionController<T> {
    pub fn new(
        client: ApresClient<T>,
        acquisition: RobustAcquisition,
        notifier: Arc<dyn Notifier>,
        settings: ControllerSettings,
    ) -> Self {
        let machine = TriggerMachine::new(settings.band, settings.settle_cycles);
        Self {
            client,
            acquisition,
            notifier,
            settings,
            machine,
            reference: None,
            next_sequence: 1,
            last_guidance: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.machine.state()
    }

    pub fn reference(&self) -> Option<(f64, f64)> {
        self.reference
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn client_mut(&mut self) -> &mut ApresClient<T> {
        &mut self.client
    }

    pub fn process_fix(&mut self, fix: &GpsFix, cancel: &CancelToken) -> CycleOutcome {
        if self.settings.require_rtk && !fix.quality.is_rtk() {
            self.acquisition.metrics().record_degraded_fix();
            warn!("rtk is not available (fix quality {:?})", fix.quality);
            self.notifier.announce(&SurveyEvent::RtkUnavailable);
            return CycleOutcome::Degraded;
        }

        let position = (fix.latitude, fix.longitude);
        let Some(reference) = self.reference else {
            self.reference = Some(position);
            self.notifier.announce(&SurveyEvent::ReferenceSet {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
            if self.settings.first_shot {
                let outcome = self.capture(fix, 0.0, cancel);
                if matches!(outcome, CycleOutcome::Failed(_)) {
                    // The start point is retaken from the next trusted fix.
                    self.reference = None;
                }
                return outcome;
            }
            return CycleOutcome::ReferenceSet;
        };

        let displacement_cm = Geodesy::displacement_cm(reference, position);
        self.guide(displacement_cm);

        let outcome = self.machine.step(displacement_cm);
        debug!(
            "displacement {} cm, {:?} -> {:?}",
            displacement_cm, outcome.previous, outcome.state
        );
        if outcome.changed() {
            let band = self.settings.band;
            match outcome.state {
                AcquisitionState::MovingBackward => self.notifier.announce(&SurveyEvent::GoBack {
                    from_cm: (displacement_cm - band.max_cm).round(),
                    to_cm: (displacement_cm - band.min_cm).round(),
                }),
                AcquisitionState::MovingForward => {
                    self.notifier.announce(&SurveyEvent::GoForward {
                        from_cm: (band.min_cm - displacement_cm).round(),
                        to_cm: (band.max_cm - displacement_cm).round(),
                    })
                }
                AcquisitionState::WellPositioned => {}
            }
        }
        if outcome.fired {
            self.notifier.announce(&SurveyEvent::Stop);
            return self.capture(fix, displacement_cm, cancel);
        }

        CycleOutcome::Tracking {
            state: outcome.state,
            displacement_cm,
        }
    }

    /// Remaining distance, at most once per guidance interval.
    fn guide(&mut self, displacement_cm: f64) {
        if self.machine.state() == AcquisitionState::WellPositioned {
            return;
        }
        let due = self
            .last_guidance
            .map(|at| at.elapsed() >= self.settings.guidance_interval)
            .unwrap_or(true);
        if due {
            self.notifier.announce(&SurveyEvent::Remaining {
                cm: self.settings.band.remaining_cm(displacement_cm),
            });
            self.last_guidance = Some(Instant::now());
        }
    }

    fn capture(&mut self, fix: &GpsFix, displacement_cm: f64, cancel: &CancelToken) -> CycleOutcome {
        let point = PointContext {
            sequence: self.next_sequence,
            fix: fix.clone(),
            displacement_cm,
        };
        let outcome = match self.acquisition.acquire(&mut self.client, &point, cancel) {
            Ok(captured) => {
                self.reference = Some((fix.latitude, fix.longitude));
                self.next_sequence += 1;
                self.notifier.announce(&SurveyEvent::PointCaptured {
                    sequence: captured.sequence,
                    filename: captured.filename.clone(),
                });
                CycleOutcome::Captured(captured)
            }
            Err(err) => {
                // Reference is kept so the same point is attempted again.
                self.notifier.announce(&SurveyEvent::AcquisitionFailed {
                    sequence: point.sequence,
                    reason: err.to_string(),
                });
                CycleOutcome::Failed(err)
            }
        };
        self.machine.rearm();
        self.last_guidance = None;
        outcome
    }

    /// Processes fixes until the stream ends or `cancel` is tripped.
    pub fn run<R: Read>(
        &mut self,
        reader: &mut FixReader<R>,
        cancel: &CancelToken,
    ) -> io::Result<SurveyCounts> {
        let band = self.settings.band;
        info!(
            "survey started: step {} cm, band {}..{} cm",
            band.step_cm, band.min_cm, band.max_cm
        );
        while !cancel.is_cancelled() {
            let Some(fix) = reader.next_fix()? else {
                info!("gps stream ended");
                break;
            };
            match self.process_fix(&fix, cancel) {
                CycleOutcome::Degraded => thread::sleep(self.settings.degraded_pause),
                CycleOutcome::Failed(AcquisitionError::Start(ApresError::Cancelled))
                | CycleOutcome::Failed(AcquisitionError::Results(ApresError::Cancelled)) => break,
                _ => {}
            }
        }
        let counts = self.acquisition.metrics().snapshot();
        info!(
            "survey stopped: {} captured, {} failed, {} start retries",
            counts.captured, counts.failed, counts.start_retries
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::FixQuality;
    use crate::math::geodesy::EARTH_RADIUS_M;
    use crate::survey::acquisition::AcquisitionPolicy;
    use crate::telemetry::{PointLog, SurveyMetrics};
    use crate::testing::{BurstReply, FakeRadar, RecordingNotifier};
    use std::io::Cursor;

    /// Fix `cm` centimetres north of the equator on the prime meridian.
    fn fix_at(cm: f64, quality: FixQuality) -> GpsFix {
        GpsFix {
            time_of_day: "10:00:00.00".into(),
            latitude: (cm / 100.0 / EARTH_RADIUS_M).to_degrees(),
            longitude: 0.0,
            altitude_m: 50.0,
            geoid_separation_m: 0.0,
            quality,
        }
    }

    fn rtk(cm: f64) -> GpsFix {
        fix_at(cm, FixQuality::RtkFixed)
    }

    fn controller(
        radar: &FakeRadar,
        settings: ControllerSettings,
    ) -> (PositionController<FakeRadar>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let policy = AcquisitionPolicy {
            retry_backoff: Duration::ZERO,
            poll_interval: Duration::ZERO,
            download: false,
            ..Default::default()
        };
        let acquisition =
            RobustAcquisition::new(policy, PointLog::new(), Arc::new(SurveyMetrics::new()));
        let controller = PositionController::new(
            FakeRadar::client(radar),
            acquisition,
            notifier.clone(),
            settings,
        );
        (controller, notifier)
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            first_shot: false,
            degraded_pause: Duration::ZERO,
            guidance_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn first_fix_becomes_reference() {
        let radar = FakeRadar::new();
        let (mut controller, _) = controller(&radar, settings());
        let cancel = CancelToken::new();
        assert!(matches!(
            controller.process_fix(&rtk(0.0), &cancel),
            CycleOutcome::ReferenceSet
        ));
        assert!(controller.reference().is_some());
        for _ in 0..5 {
            match controller.process_fix(&rtk(0.0), &cancel) {
                CycleOutcome::Tracking {
                    state,
                    displacement_cm,
                } => {
                    assert_eq!(state, AcquisitionState::MovingForward);
                    assert_eq!(displacement_cm, 0.0);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(radar.count("radar/burst"), 0);
    }

    #[test]
    fn first_shot_captures_at_reference() {
        let radar = FakeRadar::new();
        let (mut controller, _) = controller(
            &radar,
            ControllerSettings {
                first_shot: true,
                ..settings()
            },
        );
        match controller.process_fix(&rtk(0.0), &CancelToken::new()) {
            CycleOutcome::Captured(point) => assert_eq!(point.sequence, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(controller.next_sequence(), 2);
    }

    #[test]
    fn failed_first_shot_is_retaken_at_the_next_fix() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Unauthorized]);
        let (mut controller, _) = controller(
            &radar,
            ControllerSettings {
                first_shot: true,
                ..settings()
            },
        );
        let cancel = CancelToken::new();
        assert!(matches!(
            controller.process_fix(&rtk(0.0), &cancel),
            CycleOutcome::Failed(_)
        ));
        assert!(controller.reference().is_none());
        assert_eq!(controller.next_sequence(), 1);

        match controller.process_fix(&rtk(3.0), &cancel) {
            CycleOutcome::Captured(point) => {
                assert_eq!(point.sequence, 1);
                assert_eq!(point.result.filename(), Some(point.filename.as_str()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(controller.reference().is_some());
        assert_eq!(controller.next_sequence(), 2);
    }

    #[test]
    fn walking_one_step_captures_and_moves_reference() {
        let radar = FakeRadar::new();
        let (mut controller, notifier) = controller(&radar, settings());
        let cancel = CancelToken::new();
        controller.process_fix(&rtk(0.0), &cancel);
        controller.process_fix(&rtk(50.0), &cancel);
        controller.process_fix(&rtk(150.0), &cancel);
        let captured = match controller.process_fix(&rtk(155.0), &cancel) {
            CycleOutcome::Captured(point) => point,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(captured.sequence, 1);
        assert_eq!(controller.state(), AcquisitionState::MovingForward);
        let reference = controller.reference().unwrap();
        assert!((reference.0 - rtk(155.0).latitude).abs() < 1e-12);
        assert!(notifier.events().contains(&SurveyEvent::Stop));

        // Overshoot the next point.
        match controller.process_fix(&rtk(155.0 + 170.0), &cancel) {
            CycleOutcome::Tracking { state, .. } => {
                assert_eq!(state, AcquisitionState::MovingBackward)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(notifier
            .events()
            .iter()
            .any(|e| matches!(e, SurveyEvent::GoBack { .. })));
    }

    #[test]
    fn non_rtk_fix_is_degraded_without_state_change() {
        let radar = FakeRadar::new();
        let (mut controller, notifier) = controller(&radar, settings());
        let cancel = CancelToken::new();
        assert!(matches!(
            controller.process_fix(&fix_at(0.0, FixQuality::GpsFix), &cancel),
            CycleOutcome::Degraded
        ));
        assert!(controller.reference().is_none());
        assert_eq!(notifier.events(), vec![SurveyEvent::RtkUnavailable]);
    }

    #[test]
    fn non_rtk_fix_is_accepted_when_not_required() {
        let radar = FakeRadar::new();
        let (mut controller, _) = controller(
            &radar,
            ControllerSettings {
                require_rtk: false,
                ..settings()
            },
        );
        assert!(matches!(
            controller.process_fix(&fix_at(0.0, FixQuality::Dgps), &CancelToken::new()),
            CycleOutcome::ReferenceSet
        ));
    }

    #[test]
    fn failed_point_keeps_reference_and_sequence() {
        let radar = FakeRadar::new();
        radar.script_bursts(vec![BurstReply::Unauthorized]);
        let (mut controller, notifier) = controller(&radar, settings());
        let cancel = CancelToken::new();
        controller.process_fix(&rtk(0.0), &cancel);
        let reference = controller.reference();
        controller.process_fix(&rtk(152.0), &cancel);
        assert!(matches!(
            controller.process_fix(&rtk(153.0), &cancel),
            CycleOutcome::Failed(AcquisitionError::Start(ApresError::Unauthorized(_)))
        ));
        assert_eq!(controller.reference(), reference);
        assert_eq!(controller.next_sequence(), 1);
        assert_eq!(controller.state(), AcquisitionState::MovingForward);
        assert!(notifier
            .events()
            .iter()
            .any(|e| matches!(e, SurveyEvent::AcquisitionFailed { sequence: 1, .. })));

        // Still in the band: the point is attempted again.
        controller.process_fix(&rtk(153.0), &cancel);
        assert!(matches!(
            controller.process_fix(&rtk(153.0), &cancel),
            CycleOutcome::Captured(_)
        ));
    }

    #[test]
    fn guidance_is_throttled() {
        let radar = FakeRadar::new();
        let (mut controller, notifier) = controller(
            &radar,
            ControllerSettings {
                guidance_interval: Duration::from_secs(3600),
                ..settings()
            },
        );
        let cancel = CancelToken::new();
        controller.process_fix(&rtk(0.0), &cancel);
        for cm in [10.0, 20.0, 30.0] {
            controller.process_fix(&rtk(cm), &cancel);
        }
        let guidance: Vec<_> = notifier
            .events()
            .into_iter()
            .filter(|e| matches!(e, SurveyEvent::Remaining { .. }))
            .collect();
        assert_eq!(guidance, vec![SurveyEvent::Remaining { cm: 140.0 }]);
    }

    #[test]
    fn run_replays_nmea_until_end_of_stream() {
        let radar = FakeRadar::new();
        let (mut controller, _) = controller(&radar, settings());
        // 0.00084 arc minutes of latitude is about 156 cm.
        let stream = "$GPGGA,100000.00,0000.00000,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n\
                      $GPGGA,100001.00,0000.00084,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n\
                      $GPGGA,100002.00,0000.00084,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n";
        let mut reader = FixReader::replay(Cursor::new(stream.as_bytes().to_vec()));
        let counts = controller.run(&mut reader, &CancelToken::new()).unwrap();
        assert_eq!(counts.captured, 1);
        assert_eq!(radar.count("radar/burst"), 1);
    }

    #[test]
    fn run_stops_when_cancelled() {
        let radar = FakeRadar::new();
        let (mut controller, _) = controller(&radar, settings());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut reader = FixReader::replay(Cursor::new(b"$GPGGA,100000.00,0000.00000,N,00000.00000,E,4,12,0.8,50.0,M,0.0,M,,\r\n".to_vec()));
        let counts = controller.run(&mut reader, &cancel).unwrap();
        assert_eq!(counts.captured, 0);
        assert!(controller.reference().is_none());
    }
}
