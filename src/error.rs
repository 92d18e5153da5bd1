use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
    #[error("Invalid geometry: xn and zn must be positive (xn={xn}, zn={zn})")]
    InvalidGeometry { xn: i64, zn: i64 },
    #[error("Device error: {0}")]
    Device(String),
    #[error("Device write failed on {target}: {reason}")]
    DeviceWriteFailed { target: String, reason: String },
    #[error("Streaming failed: {0}")]
    StreamingFailed(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection timeout")]
    Timeout,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid axis: {0}")]
    InvalidAxis(String),
    #[error("Invalid distance '{0}': the distance must be a number")]
    InvalidDistance(String),
    #[error("Motion failed: {0}")]
    MotionFailed(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        ScanError::Io {
            source,
            context: context.into(),
        }
    }

    /// Whether this error leaves the stage in an untrusted physical state
    pub fn is_hardware_fault(&self) -> bool {
        matches!(
            self,
            ScanError::Device(_)
                | ScanError::DeviceWriteFailed { .. }
                | ScanError::StreamingFailed(_)
                | ScanError::Protocol(_)
                | ScanError::Timeout
                | ScanError::MotionFailed(_)
        )
    }
}

impl From<std::io::Error> for ScanError {
    fn from(source: std::io::Error) -> Self {
        ScanError::io(source, "unspecified")
    }
}
