//! MogileFS Error Definitions
//!
//! This module defines all error types for the MogileFS client.
//! Errors are categorized into configuration errors, tracker connection and
//! protocol errors, tracker-reported errors, storage HTTP errors and local
//! misuse of file handles.

use thiserror::Error;

/// Result type alias for MogileFS operations
pub type Result<T> = std::result::Result<T, MogileFSError>;

/// Tracker error code returned when a zero-byte file is closed
pub const EMPTY_FILE: &str = "empty_file";

/// Base error type for all MogileFS errors
#[derive(Error, Debug)]
pub enum MogileFSError {
    /// Malformed tracker address, port or timeout
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No tracker could be reached
    #[error("Couldn't connect to any mogilefs backends: {trackers}")]
    NoTrackers {
        /// Comma-separated list of the configured trackers
        trackers: String,
    },

    /// Sending a request on a freshly opened socket failed
    #[error("Couldn't send command: [{command}]. reason: {source}")]
    Send {
        /// The request line that could not be sent
        command: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The socket accepted fewer bytes than the request holds
    #[error("send() didn't return expected length ({sent}, not {expected})")]
    LengthMismatch {
        /// Bytes the socket accepted
        sent: usize,
        /// Length of the encoded request
        expected: usize,
    },

    /// The tracker did not answer within the configured timeout
    #[error("Tracker socket never became readable ({tracker}) when sending command: [{command}]")]
    ReadTimeout {
        /// Tracker that stayed silent
        tracker: String,
        /// Command that was waiting for an answer
        command: String,
    },

    /// The tracker closed the connection without answering
    #[error("Tracker {tracker} closed the connection during command: [{command}]")]
    ConnectionClosed {
        /// Tracker that hung up
        tracker: String,
        /// Command that was waiting for an answer
        command: String,
    },

    /// Response line is neither `OK` nor `ERR`
    #[error("Invalid response from server: [{0}]")]
    InvalidResponse(String),

    /// Well-formed `ERR <code> <message>` response
    #[error("Tracker error ({code}): {message}")]
    Tracker {
        /// Machine-readable error code, e.g. `unknown_key`
        code: String,
        /// Decoded human-readable message
        message: String,
    },

    /// Storage node answered with a non-success status
    #[error("HTTP error {status} from {url}")]
    Http {
        /// HTTP status code
        status: u16,
        /// URL of the failed request
        url: String,
    },

    /// No storage destination accepted the open request
    #[error("Couldn't connect to any storage nodes")]
    NoStorageNode,

    /// File handle has already been closed
    #[error("I/O operation on closed file")]
    FileClosed,

    /// Mutation attempted through a read-only handle or client
    #[error("Operation not permitted on read-only {0}")]
    ReadOnly(&'static str),

    /// Operation deliberately unsupported by this handle type
    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),

    /// Invalid argument was provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage URL is not a MogileFS fid path
    #[error("Invalid path '{0}'. Maybe the file isn't MogileFS FID")]
    InvalidPath(String),

    /// Storage HTTP transport error
    #[error("HTTP transport error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MogileFSError {
    /// Returns the tracker error code for tracker-reported errors
    pub fn code(&self) -> Option<&str> {
        match self {
            MogileFSError::Tracker { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Checks whether this is a tracker error carrying the given code
    pub fn is_tracker_code(&self, expected: &str) -> bool {
        self.code() == Some(expected)
    }

    /// Returns the HTTP status for storage node errors
    pub fn http_status(&self) -> Option<u16> {
        match self {
            MogileFSError::Http { status, .. } => Some(*status),
            MogileFSError::HttpClient(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_code_is_inspectable() {
        let err = MogileFSError::Tracker {
            code: "domain_exists".to_string(),
            message: "Domain already exists".to_string(),
        };
        assert_eq!(err.code(), Some("domain_exists"));
        assert!(err.is_tracker_code("domain_exists"));
        assert!(!err.is_tracker_code(EMPTY_FILE));
        assert_eq!(
            err.to_string(),
            "Tracker error (domain_exists): Domain already exists"
        );
    }

    #[test]
    fn non_tracker_errors_have_no_code() {
        assert_eq!(MogileFSError::FileClosed.code(), None);
        let err = MogileFSError::Http {
            status: 403,
            url: "http://s/dev1/0/000/000/0000000001.fid".to_string(),
        };
        assert_eq!(err.http_status(), Some(403));
    }
}
