pub mod nmea;
pub mod reader;

pub use nmea::{parse_gga, FixQuality, GpsFix, NmeaError};
pub use reader::FixReader;
