// Library exports for packet-streamer
pub mod capture;
pub mod config;
pub mod decode;
pub mod sink;
pub mod ui;
pub mod utils;

#[cfg(test)]
mod testing;

pub use capture::{CaptureController, CaptureError, SessionReport, SessionState};
pub use config::settings;
pub use decode::{FrameDecoder, PacketSummary};
pub use sink::{ChannelSink, EventSink};
pub use ui::app;
pub use utils::formatting;

// Error types
pub use anyhow::{Error, Result};
