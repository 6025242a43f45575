//! Remote control of an ApRES radar and GPS distance-triggered surveys.
//!
//! The radar is driven over its HTTP API through [`radar::ApresClient`];
//! [`survey::PositionController`] consumes GGA fixes and fires a burst each
//! time the antenna has advanced one step from the last survey point.

pub mod cancel;
pub mod error;
pub mod gps;
pub mod math;
pub mod prelude;
pub mod radar;
pub mod survey;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use prelude::{ApresClient, ApresError, ApresResult, GpsFix, PositionController};
