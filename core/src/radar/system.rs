use crate::error::{ApresError, ApresResult};
use crate::radar::client::{parse_json, ApresClient};
use crate::radar::transport::{FileUpload, Transport};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG_NAME: &str = "config.ini";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Acknowledgement of a reset request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetMessage {
    pub message: String,
    pub time: NaiveDateTime,
}

/// Battery, clock and position report of the radar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HousekeepingStatus {
    /// Zero when the monitor is not fitted.
    pub battery_voltage: f64,
    pub time_gps: Option<NaiveDateTime>,
    pub time_vab: Option<NaiveDateTime>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct RawReset {
    message: String,
    time: String,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "batteryVoltage")]
    battery_voltage: f64,
    #[serde(rename = "timeGPS")]
    time_gps: String,
    #[serde(rename = "timeVAB")]
    time_vab: String,
    latitude: f64,
    longitude: f64,
}

fn parse_timestamp(field: &str, value: &str) -> ApresResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|e| ApresError::MalformedResponse(format!("{} '{}': {}", field, value, e)))
}

fn parse_optional_timestamp(field: &str, value: &str) -> ApresResult<Option<NaiveDateTime>> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_timestamp(field, value).map(Some)
}

impl<T: Transport> ApresClient<T> {
    /// Asks the radar to reboot. The radar acknowledges before restarting.
    pub fn reset(&mut self) -> ApresResult<ResetMessage> {
        let response = self.post("system/reset", Vec::new())?;
        if response.status != 202 {
            return Err(ApresError::UnexpectedStatus {
                route: "system/reset".into(),
                status: response.status,
            });
        }
        let raw: RawReset = parse_json(&response, "system/reset")?;
        let message = ResetMessage {
            time: parse_timestamp("time", &raw.time)?,
            message: raw.message,
        };
        // Anything cached predates the reboot.
        self.config = None;
        self.outstanding = None;
        warn!("radar reset requested: {}", message.message);
        Ok(message)
    }

    pub fn housekeeping_status(&mut self) -> ApresResult<HousekeepingStatus> {
        let response = self.get("system/housekeeping/status", &[])?;
        if response.status != 200 {
            return Err(ApresError::UnexpectedStatus {
                route: "system/housekeeping/status".into(),
                status: response.status,
            });
        }
        debug!("housekeeping status: {}", response.text());
        let raw: RawStatus = parse_json(&response, "system/housekeeping/status")?;
        Ok(HousekeepingStatus {
            battery_voltage: raw.battery_voltage,
            time_gps: parse_optional_timestamp("timeGPS", &raw.time_gps)?,
            time_vab: parse_optional_timestamp("timeVAB", &raw.time_vab)?,
            latitude: raw.latitude,
            longitude: raw.longitude,
        })
    }

    /// Saves the radar's `config.ini`; a directory destination gets `config.ini` inside it.
    pub fn download_system_config(
        &mut self,
        destination: Option<&Path>,
        overwrite: bool,
    ) -> ApresResult<PathBuf> {
        let target = match destination {
            Some(dir) if dir.is_dir() => dir.join(SYSTEM_CONFIG_NAME),
            Some(file) => file.to_path_buf(),
            None => PathBuf::from(SYSTEM_CONFIG_NAME),
        };
        if target.exists() && !overwrite {
            return Err(ApresError::DestinationExists(target));
        }
        let response = self.get("system/housekeeping/config", &[])?;
        if response.status != 200 {
            return Err(ApresError::UnexpectedStatus {
                route: "system/housekeeping/config".into(),
                status: response.status,
            });
        }
        fs::write(&target, &response.body)?;
        info!("system config saved to {}", target.display());
        Ok(target)
    }

    /// Replaces the radar's `config.ini`. Takes effect after the next reset.
    pub fn upload_system_config(&mut self, source: &Path) -> ApresResult<()> {
        let source = if source.is_dir() {
            source.join(SYSTEM_CONFIG_NAME)
        } else {
            source.to_path_buf()
        };
        if !source.is_file() {
            return Err(ApresError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", source.display()),
            )));
        }
        let content = fs::read(&source)?;
        let upload = FileUpload {
            field: "file".into(),
            filename: SYSTEM_CONFIG_NAME.into(),
            content,
        };
        let response = self.post_file("system/housekeeping/config", upload)?;
        match response.status {
            201 => {
                info!("uploaded {} as system config", source.display());
                Ok(())
            }
            400 => Err(ApresError::NoFileUploaded),
            status => Err(ApresError::UnexpectedStatus {
                route: "system/housekeeping/config".into(),
                status,
            }),
        }
    }
}
