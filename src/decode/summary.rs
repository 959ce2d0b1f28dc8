use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::utils::formatting::hex_dump;

/// One frame exactly as the capture source handed it over.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(captured_at: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self { captured_at, data }
    }

    /// Builds the capture timestamp from the `timeval` pair libpcap stores
    /// in every packet header.
    pub fn from_timeval(secs: i64, micros: i64, data: Vec<u8>) -> Self {
        let nanos = u32::try_from(micros.clamp(0, 999_999) * 1_000).unwrap_or(0);
        let captured_at = DateTime::from_timestamp(secs, nanos).unwrap_or_default();
        Self { captured_at, data }
    }
}

/// Protocol-aware summary of one captured frame.
///
/// Fields are only reachable through accessors: a summary is fully formed
/// by the decoder and never changes after that.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketSummary {
    id: Uuid,
    captured_at: DateTime<Utc>,
    source_address: String,
    dest_address: String,
    source_mac: String,
    dest_mac: String,
    source_port: u16,
    dest_port: u16,
    sequence_number: u32,
    protocol_label: String,
    length_bytes: usize,
    info: String,
    descriptive_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    layer_dump: String,
    raw_bytes: Vec<u8>,
}

impl PacketSummary {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    pub fn dest_address(&self) -> &str {
        &self.dest_address
    }

    pub fn source_mac(&self) -> &str {
        &self.source_mac
    }

    pub fn dest_mac(&self) -> &str {
        &self.dest_mac
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn protocol_label(&self) -> &str {
        &self.protocol_label
    }

    pub fn length_bytes(&self) -> usize {
        self.length_bytes
    }

    /// TCP flag classification (`SYN`, `SYN+ACK`, `ACK`, `TCP`), empty otherwise.
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn descriptive_text(&self) -> &str {
        &self.descriptive_text
    }

    /// Per-layer rendering plus hex dump, empty unless enabled in the decoder options.
    pub fn layer_dump(&self) -> &str {
        &self.layer_dump
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }
}

/// Mutable staging area the decoder fills layer by layer. Never leaves the crate.
#[derive(Debug)]
pub(crate) struct SummaryBuilder {
    pub captured_at: DateTime<Utc>,
    pub source_address: String,
    pub dest_address: String,
    pub source_mac: String,
    pub dest_mac: String,
    pub source_port: u16,
    pub dest_port: u16,
    pub has_ports: bool,
    pub sequence_number: u32,
    pub protocol_label: String,
    pub info: String,
    pub layers: Vec<String>,
}

impl SummaryBuilder {
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            source_address: String::new(),
            dest_address: String::new(),
            source_mac: String::new(),
            dest_mac: String::new(),
            source_port: 0,
            dest_port: 0,
            has_ports: false,
            sequence_number: 0,
            protocol_label: String::new(),
            info: String::new(),
            layers: Vec::new(),
        }
    }

    /// Seals the record. `raw_bytes` is the frame the fields were read from.
    pub fn finish(self, raw_bytes: Vec<u8>, with_dump: bool) -> PacketSummary {
        let descriptive_text = self.describe(raw_bytes.len());
        let layer_dump = if with_dump {
            let mut dump = self.layers.join("\n");
            if !dump.is_empty() {
                dump.push('\n');
            }
            dump.push_str(&hex_dump(&raw_bytes));
            dump
        } else {
            String::new()
        };

        PacketSummary {
            id: Uuid::new_v4(),
            captured_at: self.captured_at,
            length_bytes: raw_bytes.len(),
            source_address: self.source_address,
            dest_address: self.dest_address,
            source_mac: self.source_mac,
            dest_mac: self.dest_mac,
            source_port: self.source_port,
            dest_port: self.dest_port,
            sequence_number: self.sequence_number,
            protocol_label: self.protocol_label,
            info: self.info,
            descriptive_text,
            layer_dump,
            raw_bytes,
        }
    }

    fn describe(&self, length: usize) -> String {
        let src = self.endpoint(&self.source_address, &self.source_mac, self.source_port);
        let dst = self.endpoint(&self.dest_address, &self.dest_mac, self.dest_port);
        let protocol = if self.protocol_label.is_empty() {
            "-"
        } else {
            self.protocol_label.as_str()
        };
        let line = format!("{} -> {} [{}] ({} bytes)", src, dst, protocol, length);

        if self.info.is_empty() {
            line
        } else {
            format!("{} {}", self.info, line)
        }
    }

    fn endpoint(&self, address: &str, mac: &str, port: u16) -> String {
        if address.is_empty() {
            return if mac.is_empty() { "?".to_string() } else { mac.to_string() };
        }
        match (self.has_ports, address.contains(':')) {
            (true, true) => format!("[{}]:{}", address, port),
            (true, false) => format!("{}:{}", address, port),
            (false, _) => address.to_string(),
        }
    }
}
