use nmea0183::{GPSQuality, ParseResult, Parser};
use serde::Serialize;

/// GGA fix quality indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixQuality {
    NoFix,
    GpsFix,
    Dgps,
    /// PPS and the non-satellite modes (dead reckoning, manual, simulated).
    Reserved,
    RtkFixed,
    RtkFloat,
}

impl FixQuality {
    pub fn code(self) -> u8 {
        match self {
            FixQuality::NoFix => 0,
            FixQuality::GpsFix => 1,
            FixQuality::Dgps => 2,
            FixQuality::Reserved => 3,
            FixQuality::RtkFixed => 4,
            FixQuality::RtkFloat => 5,
        }
    }

    /// Centimetre-class solutions: RTK fixed or float.
    pub fn is_rtk(self) -> bool {
        matches!(self, FixQuality::RtkFixed | FixQuality::RtkFloat)
    }
}

impl From<&GPSQuality> for FixQuality {
    fn from(quality: &GPSQuality) -> Self {
        match quality {
            GPSQuality::NoFix => FixQuality::NoFix,
            GPSQuality::GPS => FixQuality::GpsFix,
            GPSQuality::DGPS => FixQuality::Dgps,
            GPSQuality::RTK => FixQuality::RtkFixed,
            GPSQuality::FRTK => FixQuality::RtkFloat,
            _ => FixQuality::Reserved,
        }
    }
}

/// One position fix decoded from a GGA sentence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    /// UTC time of day as `HH:MM:SS.ss`.
    pub time_of_day: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub geoid_separation_m: f64,
    pub quality: FixQuality,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NmeaError {
    #[error("not a GGA sentence")]
    NotGga,
    #[error("GGA sentence carries no position")]
    NoPosition,
    #[error("incomplete sentence")]
    Incomplete,
    #[error("nmea parser: {0}")]
    Parser(&'static str),
}

/// Parses a `$xxGGA` sentence into a [`GpsFix`].
///
/// Any GNSS talker id is accepted. The checksum is verified when the
/// sentence carries one; receivers that omit it get one computed here.
pub fn parse_gga(sentence: &str) -> Result<GpsFix, NmeaError> {
    let sentence = sentence.trim();
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    if !body
        .split(',')
        .next()
        .is_some_and(|address| address.len() == 5 && address.ends_with("GGA"))
    {
        return Err(NmeaError::NotGga);
    }
    let framed = if body.contains('*') {
        format!("${}\r\n", body)
    } else {
        let checksum = body.bytes().fold(0u8, |acc, byte| acc ^ byte);
        format!("${}*{:02X}\r\n", body, checksum)
    };

    let mut parser = Parser::new();
    let mut parsed = None;
    for byte in framed.bytes() {
        if let Some(result) = parser.parse_from_byte(byte) {
            parsed = Some(result);
        }
    }
    match parsed {
        Some(Ok(ParseResult::GGA(Some(gga)))) => Ok(to_fix(&gga)),
        Some(Ok(ParseResult::GGA(None))) => Err(NmeaError::NoPosition),
        Some(Ok(_)) => Err(NmeaError::NotGga),
        Some(Err(message)) => Err(NmeaError::Parser(message)),
        None => Err(NmeaError::Incomplete),
    }
}

fn to_fix(gga: &nmea0183::GGA) -> GpsFix {
    GpsFix {
        time_of_day: format!(
            "{:02}:{:02}:{:05.2}",
            gga.time.hours, gga.time.minutes, gga.time.seconds
        ),
        latitude: gga.latitude.as_f64(),
        longitude: gga.longitude.as_f64(),
        altitude_m: gga.altitude.meters as f64,
        geoid_separation_m: gga.geoidal_separation.map(f64::from).unwrap_or(0.0),
        quality: FixQuality::from(&gga.gps_quality),
    }
}
