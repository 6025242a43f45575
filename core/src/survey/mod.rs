//! Distance-triggered acquisition: the trigger state machine, the retrying
//! burst wrapper and the controller that drives both from GPS fixes.

pub mod acquisition;
pub mod controller;
pub mod notifier;
pub mod trigger;

pub use acquisition::{AcquisitionPolicy, CapturedPoint, PointContext, RobustAcquisition};
pub use controller::{ControllerSettings, CycleOutcome, PositionController};
pub use notifier::{LogNotifier, Notifier, SurveyEvent};
pub use trigger::{AcquisitionState, StepOutcome, TriggerBand, TriggerMachine};
