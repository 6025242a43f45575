use crate::gps::nmea::{parse_gga, GpsFix, NmeaError};
use log::{debug, warn};
use std::io::{self, BufRead, BufReader, Read};

/// Pulls GGA fixes out of an already-open NMEA byte stream.
///
/// Only the most recent fix matters to the controller, so on a live stream
/// the newest GGA among the sentences already buffered wins. A replay reader
/// yields every fix in order.
pub struct FixReader<R: Read> {
    inner: BufReader<R>,
    line: Vec<u8>,
    latest_only: bool,
}

impl<R: Read> FixReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: BufReader::new(source),
            line: Vec::new(),
            latest_only: true,
        }
    }

    pub fn replay(source: R) -> Self {
        Self {
            latest_only: false,
            ..Self::new(source)
        }
    }

    /// Blocks until a GGA fix is available. Returns `Ok(None)` at end of stream.
    pub fn next_fix(&mut self) -> io::Result<Option<GpsFix>> {
        let mut latest = None;
        loop {
            if latest.is_some() && (!self.latest_only || !self.has_buffered_line()) {
                return Ok(latest);
            }
            self.line.clear();
            if self.inner.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(latest);
            }
            let Ok(line) = std::str::from_utf8(&self.line) else {
                warn!("skipping non-text NMEA line ({} bytes)", self.line.len());
                continue;
            };
            match parse_gga(line) {
                Ok(fix) => latest = Some(fix),
                Err(NmeaError::NotGga) => {}
                Err(err) => warn!("gps parser failed on '{}': {}", line.trim(), err),
            }
        }
    }

    fn has_buffered_line(&self) -> bool {
        let pending = self.inner.buffer().contains(&b'\n');
        if pending {
            debug!("newer NMEA data already buffered, skipping ahead");
        }
        pending
    }
}
