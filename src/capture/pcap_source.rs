use log::{debug, info, warn};
use pcap::{Active, Capture, Linktype, Offline};

use super::source::{CaptureError, FilterSpec, FrameSource, NextFrame, SourceOpener};
use crate::config::CaptureConfig;
use crate::decode::{LinkLayer, RawFrame};

enum Handle {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// libpcap-backed frame source, either a live device or a capture file.
pub struct PcapSource {
    handle: Handle,
    name: String,
    link: LinkLayer,
    frames_read: u64,
    bytes_read: u64,
}

impl PcapSource {
    pub fn open_live(device: &str, settings: &CaptureConfig) -> Result<Self, CaptureError> {
        let snaplen = i32::try_from(settings.snapshot_len).unwrap_or(i32::MAX);
        let timeout = i32::try_from(settings.read_timeout_ms).unwrap_or(i32::MAX);

        let capture = Capture::from_device(device)
            .and_then(|cap| {
                cap.promisc(settings.promiscuous)
                    .snaplen(snaplen)
                    .timeout(timeout)
                    .open()
            })
            .map_err(|e| open_error(device, e))?;

        let link = LinkLayer::from_dlt(capture.get_datalink().0);
        info!(
            "Opened capture on {} (link {}, snaplen {}, timeout {}ms, promiscuous {})",
            device, link, snaplen, timeout, settings.promiscuous
        );

        Ok(PcapSource {
            handle: Handle::Live(capture),
            name: device.to_string(),
            link,
            frames_read: 0,
            bytes_read: 0,
        })
    }

    pub fn open_file(path: &str) -> Result<Self, CaptureError> {
        let capture = Capture::from_file(path).map_err(|e| CaptureError::OpenFile {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let link = LinkLayer::from_dlt(capture.get_datalink().0);
        info!("Opened capture file {} (link {})", path, link);

        Ok(PcapSource {
            handle: Handle::Offline(capture),
            name: path.to_string(),
            link,
            frames_read: 0,
            bytes_read: 0,
        })
    }
}

impl FrameSource for PcapSource {
    fn link_layer(&self) -> LinkLayer {
        self.link
    }

    fn apply_filter(&mut self, expression: &str) -> Result<(), CaptureError> {
        let result = match &mut self.handle {
            Handle::Live(cap) => cap.filter(expression, true),
            Handle::Offline(cap) => cap.filter(expression, true),
        };
        result.map_err(|e| CaptureError::Filter {
            filter: expression.to_string(),
            reason: e.to_string(),
        })?;

        info!("Installed capture filter '{}' on {}", expression, self.name);
        Ok(())
    }

    fn next_frame(&mut self) -> NextFrame {
        let result = match &mut self.handle {
            Handle::Live(cap) => cap.next_packet().map(to_raw_frame),
            Handle::Offline(cap) => cap.next_packet().map(to_raw_frame),
        };

        match result {
            Ok(frame) => {
                self.frames_read += 1;
                self.bytes_read += frame.data.len() as u64;
                NextFrame::Frame(frame)
            }
            Err(pcap::Error::TimeoutExpired) => NextFrame::Idle,
            Err(pcap::Error::NoMorePackets) => NextFrame::Exhausted,
            Err(e) => {
                warn!("Packet capture error on {}: {}", self.name, e);
                NextFrame::Exhausted
            }
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        debug!(
            "Released capture handle on {} after {} frames ({} bytes)",
            self.name, self.frames_read, self.bytes_read
        );
    }
}

fn to_raw_frame(packet: pcap::Packet<'_>) -> RawFrame {
    RawFrame::from_timeval(
        packet.header.ts.tv_sec as i64,
        packet.header.ts.tv_usec as i64,
        packet.data.to_vec(),
    )
}

fn open_error(device: &str, err: pcap::Error) -> CaptureError {
    let reason = err.to_string();
    let lowered = reason.to_lowercase();
    if lowered.contains("permission") || lowered.contains("not permitted") {
        CaptureError::InsufficientPrivileges(device.to_string())
    } else {
        CaptureError::Open {
            device: device.to_string(),
            reason,
        }
    }
}

/// Compiles a filter against a dead handle of the given link type without
/// touching any device. The match-everything sentinel always passes.
pub fn check_filter(filter: &str, link: LinkLayer) -> Result<(), CaptureError> {
    let expression = match FilterSpec::parse(filter) {
        FilterSpec::MatchAll => return Ok(()),
        FilterSpec::Expression(expression) => expression,
    };

    let dead = Capture::dead(Linktype(link.dlt()))
        .map_err(|e| CaptureError::DeviceError(format!("Failed to create compile handle: {}", e)))?;
    dead.compile(&expression, true)
        .map(|_| ())
        .map_err(|e| CaptureError::Filter {
            filter: expression,
            reason: e.to_string(),
        })
}

/// Opens live devices with the configured snapshot length, timeout and mode.
#[derive(Debug, Clone)]
pub struct LiveOpener {
    settings: CaptureConfig,
}

impl LiveOpener {
    pub fn new(settings: CaptureConfig) -> Self {
        Self { settings }
    }
}

impl SourceOpener for LiveOpener {
    type Source = PcapSource;

    fn open(&self, device: &str) -> Result<PcapSource, CaptureError> {
        PcapSource::open_live(device, &self.settings)
    }
}

/// Replays capture files; the "device" is a file path.
#[derive(Debug, Clone, Default)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    type Source = PcapSource;

    fn open(&self, path: &str) -> Result<PcapSource, CaptureError> {
        PcapSource::open_file(path)
    }
}
