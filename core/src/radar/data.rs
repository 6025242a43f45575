use crate::error::{ApresError, ApresResult};
use crate::radar::client::{parse_json, validate_response, ApresClient};
use crate::radar::transport::Transport;
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_PAGE_SIZE: u32 = 16;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A file or directory on the radar's SD card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: NaiveDateTime,
}

/// One page of a directory on the radar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    /// Objects in the whole directory, not only this page.
    pub total_objects: u32,
    pub index: u32,
    pub page_size: u32,
    pub listed_count: u32,
    pub files: Vec<FileEntry>,
    pub directories: Vec<FileEntry>,
}

impl DirectoryListing {
    /// Zero-based page this listing starts on.
    pub fn page(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        self.index / self.page_size
    }

    pub fn pages(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_objects.div_ceil(self.page_size)
    }
}

#[derive(Debug, Deserialize)]
struct RawListing {
    path: String,
    files: Vec<RawEntry>,
    length: u32,
    index: u32,
    list: u32,
    #[serde(rename = "fileCount")]
    file_count: u32,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    path: String,
    size: f64,
    timestamp: String,
    dir: bool,
}

impl TryFrom<RawListing> for DirectoryListing {
    type Error = ApresError;

    fn try_from(raw: RawListing) -> ApresResult<Self> {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        for entry in raw.files {
            let modified_at = NaiveDateTime::parse_from_str(&entry.timestamp, TIMESTAMP_FORMAT)
                .map_err(|e| {
                    ApresError::MalformedResponse(format!(
                        "timestamp '{}' of {}: {}",
                        entry.timestamp, entry.path, e
                    ))
                })?;
            let parsed = FileEntry {
                name: entry.name,
                path: entry.path,
                size_bytes: entry.size.max(0.0) as u64,
                modified_at,
            };
            if entry.dir {
                directories.push(parsed);
            } else {
                files.push(parsed);
            }
        }
        Ok(Self {
            path: raw.path,
            total_objects: raw.length,
            index: raw.index,
            page_size: raw.list,
            listed_count: raw.file_count,
            files,
            directories,
        })
    }
}

/// Local target of a download: a directory keeps the device file name.
fn resolve_destination(device_path: &str, destination: Option<&Path>) -> PathBuf {
    let basename = device_path
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(device_path);
    match destination {
        Some(dir) if dir.is_dir() => dir.join(basename),
        Some(file) => file.to_path_buf(),
        None => PathBuf::from(basename),
    }
}

/// Writes `body` beside `target` and moves it into place only once complete.
fn write_new(target: &Path, body: &[u8]) -> ApresResult<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(body)?;
    staged.as_file().sync_all()?;
    match staged.persist_noclobber(target) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            Err(ApresError::DestinationExists(target.to_path_buf()))
        }
        Err(err) => Err(err.error.into()),
    }
}

impl<T: Transport> ApresClient<T> {
    pub fn list_directory(
        &mut self,
        path: &str,
        start_index: u32,
        page_size: u32,
    ) -> ApresResult<DirectoryListing> {
        let query = [
            ("path".to_string(), path.to_string()),
            ("index".to_string(), start_index.to_string()),
            ("list".to_string(), page_size.to_string()),
        ];
        let response = self.get_raw("data", &query)?;
        match response.status {
            200 => {}
            404 => return Err(ApresError::PathNotFound(path.to_string())),
            403 => return Err(ApresError::NotADirectory(path.to_string())),
            status => {
                return Err(ApresError::DeviceError(format!(
                    "listing {} returned status {}",
                    path, status
                )))
            }
        }
        validate_response(&response)?;
        let raw: RawListing = parse_json(&response, "data")?;
        let listing = DirectoryListing::try_from(raw)?;
        debug!(
            "listed {}: {} files, {} directories of {}",
            listing.path,
            listing.files.len(),
            listing.directories.len(),
            listing.total_objects
        );
        Ok(listing)
    }

    /// Downloads `device_path` and returns where it was written.
    ///
    /// An existing destination is never overwritten.
    pub fn download_file(
        &mut self,
        device_path: &str,
        destination: Option<&Path>,
    ) -> ApresResult<PathBuf> {
        let target = resolve_destination(device_path, destination);
        if target.exists() {
            return Err(ApresError::DestinationExists(target));
        }

        let query = [("path".to_string(), device_path.to_string())];
        let response = self.get_raw("data/download", &query)?;
        match response.status {
            200 => {}
            404 => return Err(ApresError::PathNotFound(device_path.to_string())),
            status => {
                return Err(ApresError::UnexpectedStatus {
                    route: "data/download".into(),
                    status,
                })
            }
        }
        validate_response(&response)?;

        write_new(&target, &response.body)?;
        info!(
            "downloaded {} ({} bytes) to {}",
            device_path,
            response.body.len(),
            target.display()
        );
        Ok(target)
    }
}
