use std::path::PathBuf;
use std::time::Duration;

/// Broad failure classes used to decide whether an error may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    Protocol,
    DeviceBusy,
    Transport,
    Timeout,
    Validation,
    NotFound,
    Io,
    Cancelled,
}

/// Failure raised by the HTTP transport before any response was received.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// Error type for every radar client operation.
#[derive(thiserror::Error, Debug)]
pub enum ApresError {
    #[error("invalid API key: the key must be a non-empty string")]
    InvalidCredential,
    #[error("radar rejected the API key: {0}")]
    Unauthorized(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("unexpected status {status} from {route}")]
    UnexpectedStatus { route: String, status: u16 },
    #[error("route not found: {0}")]
    NotFound(String),
    #[error("internal radar error: {0}")]
    DeviceError(String),
    #[error("radar busy: {0}")]
    RadarBusy(String),
    #[error("burst rejected with status {status}")]
    BurstRejected { status: u16 },
    #[error("a burst is already outstanding on this client")]
    BurstOutstanding,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no results after {0:?}")]
    ResultsTimeout(Duration),
    #[error("no acquisition in progress")]
    NoAcquisitionInProgress,
    #[error("operation cancelled")]
    Cancelled,
    #[error("reported {count} attenuators but {rf} rfAttn and {af} afGain values")]
    AttenuatorCountMismatch { count: u8, rf: usize, af: usize },
    #[error("invalid attenuator count {0} (expected 1..=4)")]
    InvalidAttenuatorCount(u8),
    #[error("invalid antenna mask: {0}")]
    InvalidAntennaMask(String),
    #[error("a single {family} value needs exactly one attenuator, effective count is {count}")]
    AmbiguousAttenuatorAssignment { family: &'static str, count: u8 },
    #[error("{family} sequence has {actual} entries, expected {expected}")]
    AttenuatorSequenceLength {
        family: &'static str,
        expected: u8,
        actual: usize,
    },
    #[error("invalid attenuator key '{0}'")]
    InvalidAttenuatorKey(String),
    #[error("user data exceeds 32 characters ({0})")]
    InvalidUserData(usize),
    #[error("radar rejected configuration: {0}")]
    ConfigRejected(String),
    #[error("configuration field {0} was not applied by the radar")]
    ConfigNotApplied(String),
    #[error("path not found on radar: {0}")]
    PathNotFound(String),
    #[error("not a directory on radar: {0}")]
    NotADirectory(String),
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("radar did not receive an uploaded file")]
    NoFileUploaded,
    #[error("invalid trigger band: min {min_cm} cm must be below max {max_cm} cm")]
    InvalidTriggerBand { min_cm: f64, max_cm: f64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ApresError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApresError::InvalidCredential | ApresError::Unauthorized(_) => ErrorClass::Auth,
            ApresError::MalformedResponse(_)
            | ApresError::UnexpectedStatus { .. }
            | ApresError::DeviceError(_)
            | ApresError::BurstRejected { .. }
            | ApresError::NoAcquisitionInProgress
            | ApresError::ConfigRejected(_)
            | ApresError::ConfigNotApplied(_)
            | ApresError::NoFileUploaded => ErrorClass::Protocol,
            ApresError::RadarBusy(_) => ErrorClass::DeviceBusy,
            ApresError::Transport(TransportError::Timeout(_)) | ApresError::ResultsTimeout(_) => {
                ErrorClass::Timeout
            }
            ApresError::Transport(_) => ErrorClass::Transport,
            ApresError::BurstOutstanding
            | ApresError::AttenuatorCountMismatch { .. }
            | ApresError::InvalidAttenuatorCount(_)
            | ApresError::InvalidAntennaMask(_)
            | ApresError::AmbiguousAttenuatorAssignment { .. }
            | ApresError::AttenuatorSequenceLength { .. }
            | ApresError::InvalidAttenuatorKey(_)
            | ApresError::InvalidUserData(_)
            | ApresError::InvalidTriggerBand { .. } => ErrorClass::Validation,
            ApresError::NotFound(_) | ApresError::PathNotFound(_) | ApresError::NotADirectory(_) => {
                ErrorClass::NotFound
            }
            ApresError::DestinationExists(_) | ApresError::Io(_) => ErrorClass::Io,
            ApresError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Only a busy device or a refused/reset connection may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::DeviceBusy | ErrorClass::Transport)
    }
}

pub type ApresResult<T> = Result<T, ApresError>;

/// Failure of one survey point acquisition.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("burst not started within {budget:?} ({attempts} attempts), last error: {last}")]
    StartTimeout {
        budget: Duration,
        attempts: u32,
        last: ApresError,
    },
    #[error("burst start failed: {0}")]
    Start(ApresError),
    #[error("burst results unavailable: {0}")]
    Results(ApresError),
}
