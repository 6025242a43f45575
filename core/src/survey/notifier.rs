use log::{error, info, warn};
use std::fmt;

/// Operator-facing survey events.
#[derive(Debug, Clone, PartialEq)]
pub enum SurveyEvent {
    /// Periodic distance to the next point; negative when past it.
    Remaining { cm: f64 },
    GoBack { from_cm: f64, to_cm: f64 },
    GoForward { from_cm: f64, to_cm: f64 },
    Stop,
    RtkUnavailable,
    ReferenceSet { latitude: f64, longitude: f64 },
    PointCaptured { sequence: u32, filename: String },
    AcquisitionFailed { sequence: u32, reason: String },
}

impl fmt::Display for SurveyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurveyEvent::Remaining { cm } if *cm >= 0.0 => write!(f, "go forward --> {} [cm]", cm),
            SurveyEvent::Remaining { cm } => write!(f, "go backward --> {} [cm]", -cm),
            SurveyEvent::GoBack { from_cm, to_cm } => {
                write!(f, "stop, go back {} to {} centimeters", from_cm, to_cm)
            }
            SurveyEvent::GoForward { from_cm, to_cm } => {
                write!(f, "stop, go forward {} to {} centimeters", from_cm, to_cm)
            }
            SurveyEvent::Stop => write!(f, "wait, stop"),
            SurveyEvent::RtkUnavailable => write!(f, "RTK is not available"),
            SurveyEvent::ReferenceSet {
                latitude,
                longitude,
            } => write!(f, "reference point set at {:.8}, {:.8}", latitude, longitude),
            SurveyEvent::PointCaptured { sequence, filename } => {
                write!(f, "point {} captured ({})", sequence, filename)
            }
            SurveyEvent::AcquisitionFailed { sequence, reason } => {
                write!(f, "point {} failed: {}", sequence, reason)
            }
        }
    }
}

/// Receives operator feedback from the controller.
pub trait Notifier: Send + Sync {
    fn announce(&self, event: &SurveyEvent);
}

/// Routes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn announce(&self, event: &SurveyEvent) {
        match event {
            SurveyEvent::RtkUnavailable => warn!("{}", event),
            SurveyEvent::AcquisitionFailed { .. } => error!("{}", event),
            _ => info!("{}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guidance_reads_direction_from_sign() {
        assert_eq!(
            SurveyEvent::Remaining { cm: 12.0 }.to_string(),
            "go forward --> 12 [cm]"
        );
        assert_eq!(
            SurveyEvent::Remaining { cm: -3.0 }.to_string(),
            "go backward --> 3 [cm]"
        );
    }

    #[test]
    fn go_back_reports_range() {
        let event = SurveyEvent::GoBack {
            from_cm: 4.0,
            to_cm: 16.0,
        };
        assert_eq!(event.to_string(), "stop, go back 4 to 16 centimeters");
    }
}
