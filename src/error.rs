use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolarMaxError>;

/// Failures of the SolarMax client.
///
/// `Unreachable` and `ConnectFailed` come out of `connect()`/`reconnect()` and
/// are surfaced to the caller. `Io`, `ChecksumMismatch` and `MalformedPayload`
/// belong to a single query; `InverterClient::query` folds them into `None`.
#[derive(Error, Debug)]
pub enum SolarMaxError {
    #[error("inverter not reachable: {host}")]
    Unreachable { host: String },

    #[error("could not connect to host: {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("crc error in received data, got: {received}, expected: {expected}")]
    ChecksumMismatch { expected: String, received: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The cancel flag was raised while waiting on the device
    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl SolarMaxError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedPayload(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Per-query failures: the next poll may well succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ChecksumMismatch { .. } | Self::MalformedPayload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SolarMaxError::malformed("x").is_transient());
        assert!(SolarMaxError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_transient());
        assert!(!SolarMaxError::Unreachable {
            host: "10.0.0.1".into()
        }
        .is_transient());
        assert!(!SolarMaxError::Cancelled.is_transient());
    }

    #[test]
    fn test_display() {
        let err = SolarMaxError::ChecksumMismatch {
            expected: "04A9".into(),
            received: "04AA".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("04A9"));
        assert!(msg.contains("04AA"));

        let err = SolarMaxError::ConnectFailed {
            host: "inverter".into(),
            port: 12345,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.to_string().contains("inverter:12345"));
    }
}
