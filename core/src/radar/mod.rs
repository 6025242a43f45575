//! HTTP protocol client for the ApRES radar.

pub mod burst;
pub mod client;
pub mod config;
pub mod data;
pub mod system;
pub mod transport;

pub use burst::{results_timeout, BurstDetail, BurstKind, BurstResult};
pub use client::{normalize_root, ApresClient, ClientSettings, DEFAULT_ROOT};
pub use config::{
    AntennaMask, AttenuatorFamily, AttenuatorSetting, ConfigUpdate, RadarConfig, MAX_ATTENUATORS,
    MAX_USER_DATA_LEN,
};
pub use data::{DirectoryListing, FileEntry, DEFAULT_PAGE_SIZE};
pub use system::{HousekeepingStatus, ResetMessage};
pub use transport::{FileUpload, HttpResponse, HttpTransport, Transport, DEFAULT_REQUEST_TIMEOUT};
