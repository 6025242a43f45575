use crate::error::{ApresError, ApresResult};
use serde::Serialize;

/// Position of the antenna relative to the next survey point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    MovingForward,
    MovingBackward,
    WellPositioned,
}

/// Hysteresis band around the step distance, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TriggerBand {
    pub step_cm: f64,
    pub min_cm: f64,
    pub max_cm: f64,
}

impl TriggerBand {
    pub fn new(step_cm: f64, min_cm: f64, max_cm: f64) -> ApresResult<Self> {
        if min_cm.is_nan() || max_cm.is_nan() || min_cm >= max_cm || min_cm < 0.0 {
            return Err(ApresError::InvalidTriggerBand { min_cm, max_cm });
        }
        Ok(Self {
            step_cm,
            min_cm,
            max_cm,
        })
    }

    /// Band of `step × (1 − lower)` to `step × (1 + upper)`.
    pub fn from_tolerances(step_cm: f64, lower: f64, upper: f64) -> ApresResult<Self> {
        Self::new(step_cm, step_cm * (1.0 - lower), step_cm * (1.0 + upper))
    }

    /// Strictly inside the band.
    pub fn contains(&self, displacement_cm: f64) -> bool {
        self.min_cm < displacement_cm && displacement_cm < self.max_cm
    }

    /// Distance still to cover; negative once the step is overshot.
    pub fn remaining_cm(&self, displacement_cm: f64) -> f64 {
        (self.step_cm - displacement_cm).round()
    }
}

/// Result of feeding one displacement to the [`TriggerMachine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub previous: AcquisitionState,
    pub state: AcquisitionState,
    /// Set exactly when the machine entered `WellPositioned` on this step.
    pub fired: bool,
}

impl StepOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.state
    }
}

/// Three-state distance trigger.
///
/// A point fires only after the displacement has stayed inside the band for
/// `settle_cycles` consecutive fixes. After a fire the machine stays
/// `WellPositioned` until [`TriggerMachine::rearm`] is called.
#[derive(Debug, Clone)]
pub struct TriggerMachine {
    band: TriggerBand,
    settle_cycles: u32,
    state: AcquisitionState,
    in_band: u32,
}

impl TriggerMachine {
    pub fn new(band: TriggerBand, settle_cycles: u32) -> Self {
        Self {
            band,
            settle_cycles: settle_cycles.max(1),
            state: AcquisitionState::MovingForward,
            in_band: 0,
        }
    }

    pub fn band(&self) -> &TriggerBand {
        &self.band
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn step(&mut self, displacement_cm: f64) -> StepOutcome {
        let previous = self.state;
        let band = self.band;

        self.state = match self.state {
            AcquisitionState::MovingForward if displacement_cm > band.max_cm => {
                AcquisitionState::MovingBackward
            }
            AcquisitionState::MovingBackward if displacement_cm < band.min_cm => {
                AcquisitionState::MovingForward
            }
            AcquisitionState::WellPositioned if !band.contains(displacement_cm) => {
                if displacement_cm >= band.max_cm {
                    AcquisitionState::MovingBackward
                } else {
                    AcquisitionState::MovingForward
                }
            }
            unchanged => unchanged,
        };

        if band.contains(displacement_cm) {
            self.in_band = self.in_band.saturating_add(1);
        } else {
            self.in_band = 0;
        }

        let mut fired = false;
        if self.state != AcquisitionState::WellPositioned && self.in_band >= self.settle_cycles {
            self.state = AcquisitionState::WellPositioned;
            self.in_band = 0;
            fired = true;
        }

        StepOutcome {
            previous,
            state: self.state,
            fired,
        }
    }

    /// Back to `MovingForward` for the next step.
    pub fn rearm(&mut self) {
        self.state = AcquisitionState::MovingForward;
        self.in_band = 0;
    }
}
