use thiserror::Error;

use crate::decode::{LinkLayer, RawFrame};

/// Filter value that bypasses filter compilation and accepts every frame.
pub const MATCH_ALL: &str = "all";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Insufficient privileges to capture on '{0}'. Try: sudo setcap cap_net_raw,cap_net_admin=eip ./packet-streamer")]
    InsufficientPrivileges(String),

    #[error("Failed to open capture device '{device}': {reason}")]
    Open { device: String, reason: String },

    #[error("Failed to open capture file '{path}': {reason}")]
    OpenFile { path: String, reason: String },

    #[error("Invalid capture filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Device error: {0}")]
    DeviceError(String),
}

impl CaptureError {
    pub fn is_filter_error(&self) -> bool {
        matches!(self, CaptureError::Filter { .. })
    }
}

/// How a session should restrict the frames it receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    MatchAll,
    Expression(String),
}

impl FilterSpec {
    pub fn parse(filter: &str) -> Self {
        let filter = filter.trim();
        if filter == MATCH_ALL {
            FilterSpec::MatchAll
        } else {
            FilterSpec::Expression(filter.to_string())
        }
    }
}

impl std::fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterSpec::MatchAll => write!(f, "{}", MATCH_ALL),
            FilterSpec::Expression(expr) => write!(f, "{}", expr),
        }
    }
}

/// Result of one read attempt on a frame source.
#[derive(Debug)]
pub enum NextFrame {
    Frame(RawFrame),
    /// The read timeout expired without traffic.
    Idle,
    /// The source is closed or has no more frames.
    Exhausted,
}

/// A live or recorded stream of frames owned by exactly one capture session.
///
/// Dropping the source releases the underlying handle.
pub trait FrameSource: Send {
    fn link_layer(&self) -> LinkLayer;

    /// Compiles `expression` against the source's link type and installs it.
    fn apply_filter(&mut self, expression: &str) -> Result<(), CaptureError>;

    /// Blocks for at most the source's read timeout.
    fn next_frame(&mut self) -> NextFrame;
}

/// Opens a fresh [`FrameSource`] for a device name (or file path).
pub trait SourceOpener: Send + Sync + 'static {
    type Source: FrameSource + 'static;

    fn open(&self, device: &str) -> Result<Self::Source, CaptureError>;
}
