//! Frame builders and in-memory capture doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags};
use pnet::packet::udp::MutableUdpPacket;
use pnet::util::MacAddr;

use crate::capture::{CaptureError, FrameSource, NextFrame, SourceOpener};
use crate::decode::{LinkLayer, PacketSummary, RawFrame};
use crate::sink::{EventSink, SinkClosed};

fn ethernet_ipv4(protocol: pnet::packet::ip::IpNextHeaderProtocol, transport: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 14 + 20 + transport.len()];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_source(MacAddr::new(0x02, 0, 0, 0, 0, 0x01));
        eth.set_destination(MacAddr::new(0x02, 0, 0, 0, 0, 0x02));
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    {
        let mut ip = MutableIpv4Packet::new(&mut buf[14..]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + transport.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(protocol);
        ip.set_source(Ipv4Addr::new(10, 0, 0, 1));
        ip.set_destination(Ipv4Addr::new(10, 0, 0, 2));
        ip.set_payload(transport);
    }
    buf
}

/// Ethernet/IPv4/TCP ACK from 10.0.0.1:40000 to 10.0.0.2:80 with the given sequence number.
pub fn tcp_frame(sequence: u32) -> Vec<u8> {
    let mut tcp = vec![0u8; 20];
    {
        let mut packet = MutableTcpPacket::new(&mut tcp).unwrap();
        packet.set_source(40000);
        packet.set_destination(80);
        packet.set_sequence(sequence);
        packet.set_data_offset(5);
        packet.set_flags(TcpFlags::ACK);
    }
    ethernet_ipv4(IpNextHeaderProtocols::Tcp, &tcp)
}

/// Ethernet/IPv4/UDP datagram from 10.0.0.1:5353 to 10.0.0.2:53.
pub fn udp_frame() -> Vec<u8> {
    let mut udp = vec![0u8; 12];
    {
        let mut packet = MutableUdpPacket::new(&mut udp).unwrap();
        packet.set_source(5353);
        packet.set_destination(53);
        packet.set_length(12);
    }
    ethernet_ipv4(IpNextHeaderProtocols::Udp, &udp)
}

/// Ethernet header announcing IPv4 followed by only 10 bytes of it.
pub fn runt_ipv4_frame() -> Vec<u8> {
    let mut frame = tcp_frame(0);
    frame.truncate(24);
    frame
}

/// Writes a classic little-endian pcap file with an Ethernet link type.
pub fn write_pcap(path: &Path, frames: &[(u32, u32, Vec<u8>)]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    for (secs, micros, data) in frames {
        out.extend_from_slice(&secs.to_le_bytes());
        out.extend_from_slice(&micros.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    std::fs::write(path, out).unwrap();
}

pub enum Step {
    Frame(Vec<u8>),
    End,
    /// Runs before the next step is read, e.g. to flip session state mid-stream.
    Call(Box<dyn FnOnce() + Send>),
}

/// Frame source that replays a script and idles once the script runs out.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    tick: Duration,
    reject_filters: bool,
    pub filters: Arc<Mutex<Vec<String>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            tick: Duration::from_millis(5),
            reject_filters: false,
            filters: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn rejecting_filters(mut self) -> Self {
        self.reject_filters = true;
        self
    }

    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl FrameSource for ScriptedSource {
    fn link_layer(&self) -> LinkLayer {
        LinkLayer::Ethernet
    }

    fn apply_filter(&mut self, expression: &str) -> Result<(), CaptureError> {
        if self.reject_filters {
            return Err(CaptureError::Filter {
                filter: expression.to_string(),
                reason: "syntax error".to_string(),
            });
        }
        self.filters.lock().unwrap().push(expression.to_string());
        Ok(())
    }

    fn next_frame(&mut self) -> NextFrame {
        loop {
            match self.steps.pop_front() {
                Some(Step::Call(f)) => f(),
                Some(Step::Frame(data)) => return NextFrame::Frame(RawFrame::new(Utc::now(), data)),
                Some(Step::End) => return NextFrame::Exhausted,
                None => {
                    std::thread::sleep(self.tick);
                    return NextFrame::Idle;
                }
            }
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Hands out one scripted source per registered device name.
#[derive(Default)]
pub struct ScriptedOpener {
    scripts: Mutex<HashMap<String, ScriptedSource>>,
}

impl ScriptedOpener {
    pub fn add(&self, device: &str, source: ScriptedSource) -> Arc<AtomicBool> {
        let released = source.released_flag();
        self.scripts.lock().unwrap().insert(device.to_string(), source);
        released
    }
}

impl SourceOpener for ScriptedOpener {
    type Source = ScriptedSource;

    fn open(&self, device: &str) -> Result<ScriptedSource, CaptureError> {
        self.scripts
            .lock()
            .unwrap()
            .remove(device)
            .ok_or_else(|| CaptureError::Open {
                device: device.to_string(),
                reason: "No such device exists".to_string(),
            })
    }
}

/// Collects summaries in memory; optionally hangs up after `limit` events.
#[derive(Clone, Default)]
pub struct VecSink {
    pub events: Arc<Mutex<Vec<PacketSummary>>>,
    limit: Option<usize>,
}

impl VecSink {
    pub fn closing_after(limit: usize) -> Self {
        Self {
            events: Arc::default(),
            limit: Some(limit),
        }
    }

    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.sequence_number())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, summary: PacketSummary) -> Result<(), SinkClosed> {
        let mut events = self.events.lock().unwrap();
        if self.limit.is_some_and(|limit| events.len() >= limit) {
            return Err(SinkClosed);
        }
        events.push(summary);
        Ok(())
    }
}
