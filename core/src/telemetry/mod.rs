pub mod log;
pub mod metrics;

pub use log::{PointLog, PointRecord, POINT_TARGET};
pub use metrics::{SurveyCounts, SurveyMetrics};
