pub use crate::cancel::CancelToken;
pub use crate::error::{AcquisitionError, ApresError, ApresResult, ErrorClass, TransportError};
pub use crate::gps::{parse_gga, FixQuality, FixReader, GpsFix, NmeaError};
pub use crate::math::Geodesy;
pub use crate::radar::{
    AntennaMask, ApresClient, AttenuatorSetting, BurstKind, BurstResult, ClientSettings,
    ConfigUpdate, DirectoryListing, HousekeepingStatus, HttpTransport, RadarConfig, Transport,
};
pub use crate::survey::{
    AcquisitionPolicy, AcquisitionState, ControllerSettings, CycleOutcome, LogNotifier, Notifier,
    PositionController, RobustAcquisition, SurveyEvent, TriggerBand,
};
pub use crate::telemetry::{PointLog, PointRecord, SurveyCounts, SurveyMetrics};
