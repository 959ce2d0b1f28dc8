pub mod decoder;
pub mod link;
pub mod summary;

pub use decoder::{DecodeError, DecodeFault, DecoderOptions, FrameDecoder};
pub use link::LinkLayer;
pub use summary::{PacketSummary, RawFrame};
