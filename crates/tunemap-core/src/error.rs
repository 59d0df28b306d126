use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid base url: {0}")]
    BaseUrl(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio engine unavailable: {0}")]
    Unavailable(String),
    #[error("audio engine rejected `{command}`: {reason}")]
    Rejected { command: String, reason: String },
    #[error("queue index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("audio engine timed out on `{0}`")]
    Timeout(String),
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("no location fix available yet")]
    NoFix,
    #[error("location permission denied")]
    PermissionDenied,
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("geocoder returned {0}")]
    Status(u16),
}

/// Why a track load or skip could not be applied.  Any of these tears the
/// session down; none of them leaves a half-applied queue behind.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no tracks nearby")]
    NoTracks,
    #[error("engine queue out of sync (expected {expected}, engine has {len})")]
    Desync { expected: usize, len: usize },
}
