//! Error types for the mirror redirector

use std::fmt;
use thiserror::Error;

/// Result type alias for redirector operations
pub type Result<T> = std::result::Result<T, RedirectorError>;

/// Stage of a topology reload that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStage {
    /// Reading or parsing the configuration source
    Config,
    /// Building the mirror registry and region overrides
    Topology,
    /// Decoding the remap source into a table
    RemapParse,
}

impl ReloadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadStage::Config => "config",
            ReloadStage::Topology => "topology",
            ReloadStage::RemapParse => "remap_parse",
        }
    }
}

impl fmt::Display for ReloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types that can occur while routing or reloading
#[derive(Error, Debug, Clone)]
pub enum RedirectorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Client location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("No available mirrors in region '{0}'")]
    RegionUnavailable(String),

    #[error("No available mirror")]
    NoAvailableMirror,

    #[error("Remap parse error: {0}")]
    RemapParse(String),

    #[error("Unsupported remap format: {0}")]
    UnsupportedFormat(String),

    #[error("Reload failed at {stage} stage: {message}")]
    Reload { stage: ReloadStage, message: String },

    #[error("Invalid or missing authentication token")]
    Unauthorized,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for RedirectorError {
    fn from(err: std::io::Error) -> Self {
        RedirectorError::IoError(err.to_string())
    }
}

impl From<http::Error> for RedirectorError {
    fn from(err: http::Error) -> Self {
        RedirectorError::HttpError(err.to_string())
    }
}

impl RedirectorError {
    /// Wrap an error as a reload failure at the given stage
    ///
    /// Errors that already carry a stage keep it.
    pub fn at_stage(self, stage: ReloadStage) -> Self {
        match self {
            RedirectorError::Reload { .. } => self,
            other => RedirectorError::Reload {
                stage,
                message: other.to_string(),
            },
        }
    }

    /// Stage of a failed reload, if this is a reload error
    pub fn reload_stage(&self) -> Option<ReloadStage> {
        match self {
            RedirectorError::Reload { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Determine if a request hitting this error should retry with nearest-mirror selection
    ///
    /// Only region-level failures fall back. Running out of mirrors globally
    /// is fatal for the request.
    pub fn falls_back_to_nearest(&self) -> bool {
        matches!(self, RedirectorError::RegionUnavailable(_))
    }

    /// Convert error to HTTP status code
    pub fn to_http_status(&self) -> u16 {
        match self {
            RedirectorError::Unauthorized => 401,
            RedirectorError::UnsupportedFormat(_) => 500,
            RedirectorError::NoAvailableMirror => 500,
            RedirectorError::RegionUnavailable(_) => 500,
            RedirectorError::LocationUnavailable(_) => 500,
            RedirectorError::ConfigError(_) => 500,
            RedirectorError::RemapParse(_) => 500,
            RedirectorError::Reload { .. } => 500,
            RedirectorError::IoError(_) => 500,
            RedirectorError::HttpError(_) => 500,
            RedirectorError::InternalError(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stage_wraps_once() {
        let err = RedirectorError::RemapParse("row 3 has 1 columns".to_string())
            .at_stage(ReloadStage::RemapParse);
        assert_eq!(err.reload_stage(), Some(ReloadStage::RemapParse));

        // A second wrap keeps the original stage
        let err = err.at_stage(ReloadStage::Config);
        assert_eq!(err.reload_stage(), Some(ReloadStage::RemapParse));
        assert!(err.to_string().contains("remap_parse"));
    }

    #[test]
    fn test_fallback_policy() {
        assert!(RedirectorError::RegionUnavailable("eu".to_string()).falls_back_to_nearest());
        assert!(!RedirectorError::NoAvailableMirror.falls_back_to_nearest());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RedirectorError::Unauthorized.to_http_status(), 401);
        assert_eq!(RedirectorError::NoAvailableMirror.to_http_status(), 500);
    }
}
