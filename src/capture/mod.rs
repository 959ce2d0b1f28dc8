pub mod controller;
pub mod devices;
pub mod pcap_source;
pub mod session;
pub mod source;

pub use controller::{CaptureController, SessionHandle};
pub use devices::{list_interfaces, pick_default, InterfaceAddress, InterfaceInfo, ANY_DEVICE};
pub use pcap_source::{check_filter, FileOpener, LiveOpener, PcapSource};
pub use session::{
    run_session, CaptureSession, SessionReport, SessionState, SessionStats, TerminationReason,
};
pub use source::{CaptureError, FilterSpec, FrameSource, NextFrame, SourceOpener, MATCH_ALL};
