use std::fmt;

/// Link-layer framing of the frames a capture handle delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Linux cooked capture, used by the `any` pseudo-device.
    LinuxSll,
    LinuxSll2,
    /// BSD loopback: 4-byte address family in host byte order.
    Null,
    /// No link header, the frame starts at the IP header.
    RawIp,
    Unsupported(i32),
}

impl LinkLayer {
    /// Maps a libpcap DLT/LINKTYPE value.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => LinkLayer::Ethernet,
            113 => LinkLayer::LinuxSll,
            276 => LinkLayer::LinuxSll2,
            0 | 108 => LinkLayer::Null,
            12 | 14 | 101 | 228 | 229 => LinkLayer::RawIp,
            other => LinkLayer::Unsupported(other),
        }
    }

    pub fn dlt(&self) -> i32 {
        match self {
            LinkLayer::Ethernet => 1,
            LinkLayer::LinuxSll => 113,
            LinkLayer::LinuxSll2 => 276,
            LinkLayer::Null => 0,
            LinkLayer::RawIp => 101,
            LinkLayer::Unsupported(dlt) => *dlt,
        }
    }
}

impl fmt::Display for LinkLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkLayer::Ethernet => write!(f, "Ethernet"),
            LinkLayer::LinuxSll => write!(f, "Linux cooked"),
            LinkLayer::LinuxSll2 => write!(f, "Linux cooked v2"),
            LinkLayer::Null => write!(f, "Loopback"),
            LinkLayer::RawIp => write!(f, "Raw IP"),
            LinkLayer::Unsupported(dlt) => write!(f, "DLT {}", dlt),
        }
    }
}
