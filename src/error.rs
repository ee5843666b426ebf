use x11rb::errors::{ConnectError, ConnectionError, ReplyError};

/// Everything a reconfiguration pass or config load can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot connect to X display: {0}")]
    Connect(#[from] ConnectError),

    #[error("X11 transport error: {0}")]
    Transport(#[from] ConnectionError),

    #[error("X11 request failed: {0}")]
    Request(#[from] ReplyError),

    #[error("request rejected by the server: {0}")]
    Rejected(String),

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("no CRTC available for output {0}")]
    NoCrtcAvailable(String),

    #[error("output {0} has no usable mode")]
    NoModeAvailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no candidate for primary output")]
    NoPrimaryCandidate,

    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
