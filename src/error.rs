//! ClusterCtl Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ClusterCtl operations
pub type Result<T> = std::result::Result<T, Error>;

/// ClusterCtl error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Daemon channel errors
    #[error("Unable to communicate with the management daemon: {0}")]
    Communication(String),

    #[error("Malformed response from the management daemon: {0}")]
    MalformedResponse(String),

    // Certificate errors
    #[error("Invalid certificate material: {}", .0.join("; "))]
    Certificate(Vec<String>),

    #[error("Certificate and/or key already exists, use --force to overwrite")]
    CertificateExists,

    // Token store errors
    #[error("Unable to parse data in {path:?}: {reason}")]
    TokenStoreParse { path: PathBuf, reason: String },

    #[error("Unable to edit data in {path:?}: {source}")]
    TokenStoreEdit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error is a call-level failure of the daemon channel
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Communication(_) | Error::MalformedResponse(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::Communication(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_classification() {
        assert!(Error::Communication("refused".into()).is_communication());
        assert!(Error::MalformedResponse("missing data".into()).is_communication());
        assert!(!Error::CertificateExists.is_communication());
    }

    #[test]
    fn test_certificate_error_lists_problems() {
        let e = Error::Certificate(vec!["no certificate".into(), "no key".into()]);
        assert_eq!(e.to_string(), "Invalid certificate material: no certificate; no key");
    }
}
