use log::info;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log target of the per-point survey record.
pub const POINT_TARGET: &str = "survey::points";

/// The durable record of one captured survey point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRecord {
    pub sequence: u32,
    pub filename: String,
    pub time_of_day: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub displacement_cm: f64,
    pub quality_code: u8,
}

impl PointRecord {
    pub fn name_line(&self) -> String {
        format!("#PointName${}", self.filename)
    }

    pub fn info_line(&self) -> String {
        format!(
            "#PointInfo${},{},{},{},{},{},{}",
            self.sequence,
            self.time_of_day,
            self.latitude,
            self.longitude,
            self.altitude_m,
            self.displacement_cm,
            self.quality_code
        )
    }
}

/// Writes point records to the `survey::points` log target and, optionally,
/// appends them to a file.
pub struct PointLog {
    file: Option<(PathBuf, Mutex<File>)>,
}

impl PointLog {
    pub fn new() -> Self {
        Self { file: None }
    }

    pub fn with_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn record(&self, record: &PointRecord) -> io::Result<()> {
        let name = record.name_line();
        let info = record.info_line();
        info!(target: POINT_TARGET, "{}", name);
        info!(target: POINT_TARGET, "{}", info);

        if let Some((_, file)) = &self.file {
            let mut file = file
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "point log lock poisoned"))?;
            writeln!(file, "{}", name)?;
            writeln!(file, "{}", info)?;
            file.flush()?;
        }
        Ok(())
    }
}

impl Default for PointLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> PointRecord {
        PointRecord {
            sequence: 4,
            filename: "4_SARRTK_20240105_101230.dat".into(),
            time_of_day: "10:12:30.20".into(),
            latitude: -75.5,
            longitude: -26.25,
            altitude_m: 102.31,
            displacement_cm: 151.0,
            quality_code: 4,
        }
    }

    #[test]
    fn info_line_lists_point_fields_in_order() {
        assert_eq!(
            record().info_line(),
            "#PointInfo$4,10:12:30.20,-75.5,-26.25,102.31,151,4"
        );
        assert_eq!(record().name_line(), "#PointName$4_SARRTK_20240105_101230.dat");
    }

    #[test]
    fn records_are_appended_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("points.log");
        let log = PointLog::with_file(&path).unwrap();
        log.record(&record()).unwrap();
        log.record(&record()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.starts_with("#PointName$4_SARRTK"));
    }
}
