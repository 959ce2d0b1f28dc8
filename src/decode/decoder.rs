use log::trace;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::link::LinkLayer;
use super::summary::{PacketSummary, RawFrame, SummaryBuilder};

const ETHERNET_HEADER: usize = 14;
const VLAN_TAG: usize = 4;
const SLL_HEADER: usize = 16;
const SLL2_HEADER: usize = 20;
const NULL_HEADER: usize = 4;
const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const ICMP_MIN_HEADER: usize = 4;

/// What went wrong while interpreting one layer of a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeFault {
    #[error("truncated {layer} header: {available} of {required} bytes")]
    Truncated {
        layer: &'static str,
        required: usize,
        available: usize,
    },

    #[error("malformed {layer} header: {reason}")]
    Malformed { layer: &'static str, reason: String },
}

impl DecodeFault {
    fn truncated(layer: &'static str, required: usize, available: usize) -> Self {
        DecodeFault::Truncated {
            layer,
            required,
            available,
        }
    }

    fn malformed(layer: &'static str, reason: impl Into<String>) -> Self {
        DecodeFault::Malformed {
            layer,
            reason: reason.into(),
        }
    }

    pub fn layer(&self) -> &'static str {
        match self {
            DecodeFault::Truncated { layer, .. } | DecodeFault::Malformed { layer, .. } => layer,
        }
    }
}

/// A frame that could only be partly decoded.
///
/// Carries the summary as it stood when the fault was hit; every field not
/// reached keeps its default. Callers log the fault and keep the record.
#[derive(Error, Debug)]
#[error("{fault}")]
pub struct DecodeError {
    pub fault: DecodeFault,
    partial: PacketSummary,
}

impl DecodeError {
    pub fn partial(&self) -> &PacketSummary {
        &self.partial
    }

    pub fn into_partial(self) -> PacketSummary {
        self.partial
    }
}

/// Optional field groups the decoder fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Source and destination MAC addresses.
    pub link_addresses: bool,
    /// TCP sequence number and flag classification.
    pub tcp_details: bool,
    /// Multi-line per-layer rendering followed by a hex dump.
    pub layer_dump: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            link_addresses: true,
            tcp_details: true,
            layer_dump: false,
        }
    }
}

/// Turns raw frames into [`PacketSummary`] records.
///
/// Stateless apart from the link type of the handle the frames come from,
/// so one decoder serves a whole capture session.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    link: LinkLayer,
    options: DecoderOptions,
}

impl FrameDecoder {
    pub fn new(link: LinkLayer, options: DecoderOptions) -> Self {
        Self { link, options }
    }

    pub fn link_layer(&self) -> LinkLayer {
        self.link
    }

    pub fn decode(&self, frame: RawFrame) -> Result<PacketSummary, DecodeError> {
        let RawFrame { captured_at, data } = frame;
        let mut summary = SummaryBuilder::new(captured_at);
        let outcome = self.decode_link(&data, &mut summary);

        match outcome {
            Ok(()) => Ok(summary.finish(data, self.options.layer_dump)),
            Err(fault) => {
                trace!("decode stopped at {} layer", fault.layer());
                Err(DecodeError {
                    fault,
                    partial: summary.finish(data, self.options.layer_dump),
                })
            }
        }
    }

    fn note(&self, summary: &mut SummaryBuilder, line: impl FnOnce() -> String) {
        if self.options.layer_dump {
            summary.layers.push(line());
        }
    }

    fn decode_link(&self, data: &[u8], summary: &mut SummaryBuilder) -> Result<(), DecodeFault> {
        match self.link {
            LinkLayer::Ethernet => {
                let eth = EthernetPacket::new(data)
                    .ok_or_else(|| DecodeFault::truncated("Ethernet", ETHERNET_HEADER, data.len()))?;
                if self.options.link_addresses {
                    summary.source_mac = eth.get_source().to_string();
                    summary.dest_mac = eth.get_destination().to_string();
                }
                self.note(summary, || {
                    format!(
                        "Ethernet {} -> {} type {}",
                        eth.get_source(),
                        eth.get_destination(),
                        eth.get_ethertype()
                    )
                });
                let (ethertype, offset) =
                    self.skip_vlan_tags(eth.get_ethertype(), data, ETHERNET_HEADER, summary)?;
                self.decode_network(ethertype, &data[offset..], summary)
            }
            LinkLayer::LinuxSll => {
                if data.len() < SLL_HEADER {
                    return Err(DecodeFault::truncated("Linux cooked", SLL_HEADER, data.len()));
                }
                let address_len = usize::from(u16::from_be_bytes([data[4], data[5]]));
                if self.options.link_addresses && address_len == 6 {
                    summary.source_mac = format_mac(&data[6..12]);
                }
                let protocol = EtherType::new(u16::from_be_bytes([data[14], data[15]]));
                self.note(summary, || format!("Linux cooked type {}", protocol));
                self.decode_network(protocol, &data[SLL_HEADER..], summary)
            }
            LinkLayer::LinuxSll2 => {
                if data.len() < SLL2_HEADER {
                    return Err(DecodeFault::truncated("Linux cooked v2", SLL2_HEADER, data.len()));
                }
                if self.options.link_addresses && data[11] == 6 {
                    summary.source_mac = format_mac(&data[12..18]);
                }
                let protocol = EtherType::new(u16::from_be_bytes([data[0], data[1]]));
                self.note(summary, || format!("Linux cooked v2 type {}", protocol));
                self.decode_network(protocol, &data[SLL2_HEADER..], summary)
            }
            LinkLayer::Null => {
                if data.len() < NULL_HEADER {
                    return Err(DecodeFault::truncated("Loopback", NULL_HEADER, data.len()));
                }
                // family is in the byte order of the host that wrote the capture
                let mut family = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                if family > 0xffff {
                    family = family.swap_bytes();
                }
                let protocol = match family {
                    2 => EtherTypes::Ipv4,
                    10 | 24 | 28 | 30 => EtherTypes::Ipv6,
                    other => {
                        self.note(summary, || format!("Loopback family {}", other));
                        return Ok(());
                    }
                };
                self.note(summary, || format!("Loopback family {}", family));
                self.decode_network(protocol, &data[NULL_HEADER..], summary)
            }
            LinkLayer::RawIp => match data.first().map(|b| b >> 4) {
                Some(4) => self.decode_ipv4(data, summary),
                Some(6) => self.decode_ipv6(data, summary),
                Some(version) => Err(DecodeFault::malformed(
                    "IP",
                    format!("unknown IP version {}", version),
                )),
                None => Err(DecodeFault::truncated("IP", 1, 0)),
            },
            LinkLayer::Unsupported(dlt) => {
                self.note(summary, || format!("Unsupported link type {}", dlt));
                Ok(())
            }
        }
    }

    fn skip_vlan_tags(
        &self,
        mut ethertype: EtherType,
        data: &[u8],
        mut offset: usize,
        summary: &mut SummaryBuilder,
    ) -> Result<(EtherType, usize), DecodeFault> {
        // 802.1Q, 802.1ad and the legacy QinQ tag
        while matches!(ethertype.0, 0x8100 | 0x88a8 | 0x9100) {
            let vlan = VlanPacket::new(&data[offset..])
                .ok_or_else(|| DecodeFault::truncated("802.1Q", VLAN_TAG, data.len() - offset))?;
            self.note(summary, || {
                format!(
                    "802.1Q vlan {} type {}",
                    vlan.get_vlan_identifier(),
                    vlan.get_ethertype()
                )
            });
            ethertype = vlan.get_ethertype();
            offset += VLAN_TAG;
        }
        Ok((ethertype, offset))
    }

    fn decode_network(
        &self,
        ethertype: EtherType,
        data: &[u8],
        summary: &mut SummaryBuilder,
    ) -> Result<(), DecodeFault> {
        match ethertype {
            EtherTypes::Ipv4 => self.decode_ipv4(data, summary),
            EtherTypes::Ipv6 => self.decode_ipv6(data, summary),
            _ => Ok(()),
        }
    }

    fn decode_ipv4(&self, data: &[u8], summary: &mut SummaryBuilder) -> Result<(), DecodeFault> {
        let ip = Ipv4Packet::new(data)
            .ok_or_else(|| DecodeFault::truncated("IPv4", IPV4_MIN_HEADER, data.len()))?;
        summary.source_address = ip.get_source().to_string();
        summary.dest_address = ip.get_destination().to_string();

        if ip.get_version() != 4 {
            return Err(DecodeFault::malformed(
                "IPv4",
                format!("version field is {}", ip.get_version()),
            ));
        }
        let header_len = usize::from(ip.get_header_length()) * 4;
        if header_len < IPV4_MIN_HEADER || header_len > data.len() {
            return Err(DecodeFault::malformed(
                "IPv4",
                format!("header length {} with {} bytes available", header_len, data.len()),
            ));
        }
        // total length 0 shows up with segmentation offload
        let end = match usize::from(ip.get_total_length()) {
            total if total >= header_len => total.min(data.len()),
            _ => data.len(),
        };
        let protocol = ip.get_next_level_protocol();
        self.note(summary, || {
            format!(
                "IPv4 {} -> {} ttl {} proto {}",
                ip.get_source(),
                ip.get_destination(),
                ip.get_ttl(),
                protocol
            )
        });

        if ip.get_fragment_offset() != 0 {
            self.note(summary, || format!("IPv4 fragment at offset {}", ip.get_fragment_offset() * 8));
            return Ok(());
        }
        self.decode_transport(protocol, &data[header_len..end], summary)
    }

    fn decode_ipv6(&self, data: &[u8], summary: &mut SummaryBuilder) -> Result<(), DecodeFault> {
        let ip = Ipv6Packet::new(data)
            .ok_or_else(|| DecodeFault::truncated("IPv6", IPV6_HEADER, data.len()))?;
        summary.source_address = ip.get_source().to_string();
        summary.dest_address = ip.get_destination().to_string();

        // payload length 0 is a jumbogram or offload artefact
        let end = match usize::from(ip.get_payload_length()) {
            0 => data.len(),
            len => (IPV6_HEADER + len).min(data.len()),
        };
        let window = &data[..end];
        self.note(summary, || {
            format!(
                "IPv6 {} -> {} hop limit {}",
                ip.get_source(),
                ip.get_destination(),
                ip.get_hop_limit()
            )
        });

        let mut next = ip.get_next_header();
        let mut offset = IPV6_HEADER;
        loop {
            match next {
                IpNextHeaderProtocols::Hopopt
                | IpNextHeaderProtocols::Ipv6Route
                | IpNextHeaderProtocols::Ipv6Opts => {
                    let ext = window.get(offset..offset + 2).ok_or_else(|| {
                        DecodeFault::truncated("IPv6 extension", 2, end.saturating_sub(offset))
                    })?;
                    next = IpNextHeaderProtocol::new(ext[0]);
                    offset += (usize::from(ext[1]) + 1) * 8;
                    if offset > end {
                        return Err(DecodeFault::malformed(
                            "IPv6 extension",
                            format!("header runs to byte {} of {}", offset, end),
                        ));
                    }
                }
                IpNextHeaderProtocols::Ipv6Frag => {
                    let ext = window.get(offset..offset + 8).ok_or_else(|| {
                        DecodeFault::truncated("IPv6 fragment", 8, end.saturating_sub(offset))
                    })?;
                    next = IpNextHeaderProtocol::new(ext[0]);
                    offset += 8;
                    let fragment_offset = u16::from_be_bytes([ext[2], ext[3]]) >> 3;
                    if fragment_offset != 0 {
                        self.note(summary, || {
                            format!("IPv6 fragment at offset {}", usize::from(fragment_offset) * 8)
                        });
                        return Ok(());
                    }
                }
                _ => break,
            }
        }
        self.decode_transport(next, &window[offset..], summary)
    }

    fn decode_transport(
        &self,
        protocol: IpNextHeaderProtocol,
        data: &[u8],
        summary: &mut SummaryBuilder,
    ) -> Result<(), DecodeFault> {
        if protocol == IpNextHeaderProtocols::Tcp {
            let tcp = TcpPacket::new(data)
                .ok_or_else(|| DecodeFault::truncated("TCP", TCP_MIN_HEADER, data.len()))?;
            summary.source_port = tcp.get_source();
            summary.dest_port = tcp.get_destination();
            summary.has_ports = true;

            let header_len = usize::from(tcp.get_data_offset()) * 4;
            if header_len < TCP_MIN_HEADER || header_len > data.len() {
                return Err(DecodeFault::malformed(
                    "TCP",
                    format!("data offset {} with {} bytes available", header_len, data.len()),
                ));
            }
            if self.options.tcp_details {
                let flags = tcp.get_flags();
                summary.sequence_number = tcp.get_sequence();
                summary.info = classify_tcp(flags & TcpFlags::SYN != 0, flags & TcpFlags::ACK != 0)
                    .to_string();
            }
            self.note(summary, || {
                format!(
                    "TCP {} -> {} seq {} ack {} flags {:#04x} window {}",
                    tcp.get_source(),
                    tcp.get_destination(),
                    tcp.get_sequence(),
                    tcp.get_acknowledgement(),
                    tcp.get_flags(),
                    tcp.get_window()
                )
            });
        }

        summary.protocol_label = match protocol {
            IpNextHeaderProtocols::Tcp => "TCP".to_string(),
            IpNextHeaderProtocols::Udp => {
                let udp = UdpPacket::new(data)
                    .ok_or_else(|| DecodeFault::truncated("UDP", UDP_HEADER, data.len()))?;
                summary.source_port = udp.get_source();
                summary.dest_port = udp.get_destination();
                summary.has_ports = true;
                self.note(summary, || {
                    format!(
                        "UDP {} -> {} length {}",
                        udp.get_source(),
                        udp.get_destination(),
                        udp.get_length()
                    )
                });
                "UDP".to_string()
            }
            IpNextHeaderProtocols::Icmp => {
                let icmp = IcmpPacket::new(data)
                    .ok_or_else(|| DecodeFault::truncated("ICMP", ICMP_MIN_HEADER, data.len()))?;
                self.note(summary, || {
                    format!(
                        "ICMP type {} code {}",
                        icmp.get_icmp_type().0,
                        icmp.get_icmp_code().0
                    )
                });
                "ICMP".to_string()
            }
            IpNextHeaderProtocols::Icmpv6 => {
                let icmp = Icmpv6Packet::new(data)
                    .ok_or_else(|| DecodeFault::truncated("ICMPv6", ICMP_MIN_HEADER, data.len()))?;
                self.note(summary, || {
                    format!(
                        "ICMPv6 type {} code {}",
                        icmp.get_icmpv6_type().0,
                        icmp.get_icmpv6_code().0
                    )
                });
                "ICMP".to_string()
            }
            other => {
                self.note(summary, || format!("{} payload, {} bytes", other, data.len()));
                transport_name(other)
            }
        };
        Ok(())
    }
}

fn classify_tcp(syn: bool, ack: bool) -> &'static str {
    match (syn, ack) {
        (true, true) => "SYN+ACK",
        (true, false) => "SYN",
        (false, true) => "ACK",
        (false, false) => "TCP",
    }
}

/// Generic label for transports without a dedicated one, e.g. `GRE`, `IGMP`.
fn transport_name(protocol: IpNextHeaderProtocol) -> String {
    let name = protocol.to_string();
    if name.is_empty() || name.eq_ignore_ascii_case("unknown") {
        format!("IP-{}", protocol.0)
    } else {
        name.to_uppercase()
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::ipv6::MutableIpv6Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::util::MacAddr;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ethernet(ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; ETHERNET_HEADER + payload.len()];
        {
            let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
            eth.set_source(MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01));
            eth.set_destination(MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x02));
            eth.set_ethertype(ethertype);
            eth.set_payload(payload);
        }
        buf
    }

    fn ipv4(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; IPV4_MIN_HEADER + payload.len()];
        {
            let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length((IPV4_MIN_HEADER + payload.len()) as u16);
            ip.set_ttl(64);
            ip.set_next_level_protocol(protocol);
            ip.set_source(Ipv4Addr::new(192, 168, 1, 10));
            ip.set_destination(Ipv4Addr::new(93, 184, 216, 34));
            ip.set_payload(payload);
        }
        buf
    }

    fn ipv6(next_header: IpNextHeaderProtocol, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; IPV6_HEADER + payload.len()];
        {
            let mut ip = MutableIpv6Packet::new(&mut buf).unwrap();
            ip.set_version(6);
            ip.set_payload_length(payload.len() as u16);
            ip.set_next_header(next_header);
            ip.set_hop_limit(64);
            ip.set_source(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
            ip.set_destination(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2));
            ip.set_payload(payload);
        }
        buf
    }

    fn tcp(syn: bool, ack: bool, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; TCP_MIN_HEADER + payload.len()];
        {
            let mut flags = 0;
            if syn {
                flags |= TcpFlags::SYN;
            }
            if ack {
                flags |= TcpFlags::ACK;
            }
            let mut tcp = MutableTcpPacket::new(&mut buf).unwrap();
            tcp.set_source(51000);
            tcp.set_destination(443);
            tcp.set_sequence(0xdead_beef);
            tcp.set_data_offset(5);
            tcp.set_flags(flags);
            tcp.set_window(64240);
            tcp.set_payload(payload);
        }
        buf
    }

    fn udp(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; UDP_HEADER + payload.len()];
        {
            let mut udp = MutableUdpPacket::new(&mut buf).unwrap();
            udp.set_source(5353);
            udp.set_destination(53);
            udp.set_length((UDP_HEADER + payload.len()) as u16);
            udp.set_payload(payload);
        }
        buf
    }

    fn frame(data: Vec<u8>) -> RawFrame {
        RawFrame::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), data)
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(LinkLayer::Ethernet, DecoderOptions::default())
    }

    fn tcp_over_ethernet(syn: bool, ack: bool) -> Vec<u8> {
        ethernet(
            EtherTypes::Ipv4,
            &ipv4(IpNextHeaderProtocols::Tcp, &tcp(syn, ack, b"hello world")),
        )
    }

    #[test]
    fn test_decode_ethernet_ipv4_tcp() {
        let data = tcp_over_ethernet(true, true);
        let expected_len = data.len();
        let summary = decoder().decode(frame(data)).unwrap();

        assert_eq!(expected_len, 14 + 20 + 20 + 11);
        assert_eq!(summary.source_address(), "192.168.1.10");
        assert_eq!(summary.dest_address(), "93.184.216.34");
        assert_eq!(summary.source_mac(), "02:00:00:00:00:01");
        assert_eq!(summary.dest_mac(), "02:00:00:00:00:02");
        assert_eq!(summary.source_port(), 51000);
        assert_eq!(summary.dest_port(), 443);
        assert_eq!(summary.sequence_number(), 0xdead_beef);
        assert_eq!(summary.protocol_label(), "TCP");
        assert_eq!(summary.info(), "SYN+ACK");
        assert_eq!(summary.length_bytes(), expected_len);
        assert_eq!(summary.raw_bytes().len(), expected_len);
        assert_eq!(
            summary.descriptive_text(),
            "SYN+ACK 192.168.1.10:51000 -> 93.184.216.34:443 [TCP] (65 bytes)"
        );
    }

    #[test]
    fn test_capture_timestamp_is_kept() {
        let summary = decoder().decode(frame(tcp_over_ethernet(false, true))).unwrap();
        assert_eq!(summary.captured_at().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_tcp_flag_classification() {
        let cases = [
            (true, false, "SYN"),
            (true, true, "SYN+ACK"),
            (false, true, "ACK"),
            (false, false, "TCP"),
        ];
        for (syn, ack, expected) in cases {
            let summary = decoder().decode(frame(tcp_over_ethernet(syn, ack))).unwrap();
            assert_eq!(summary.info(), expected);
        }
    }

    #[test]
    fn test_decode_udp() {
        let data = ethernet(EtherTypes::Ipv4, &ipv4(IpNextHeaderProtocols::Udp, &udp(b"query")));
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.protocol_label(), "UDP");
        assert_eq!(summary.source_port(), 5353);
        assert_eq!(summary.dest_port(), 53);
        assert_eq!(summary.sequence_number(), 0);
        assert_eq!(summary.info(), "");
    }

    #[test]
    fn test_decode_icmp_has_no_ports() {
        let echo = [8u8, 0, 0, 0, 0, 1, 0, 1];
        let data = ethernet(EtherTypes::Ipv4, &ipv4(IpNextHeaderProtocols::Icmp, &echo));
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.protocol_label(), "ICMP");
        assert_eq!(summary.source_port(), 0);
        assert_eq!(summary.dest_port(), 0);
        assert_eq!(
            summary.descriptive_text(),
            "192.168.1.10 -> 93.184.216.34 [ICMP] (42 bytes)"
        );
    }

    #[test]
    fn test_unknown_transport_gets_generic_label() {
        let data = ethernet(
            EtherTypes::Ipv4,
            &ipv4(IpNextHeaderProtocols::Gre, &[0u8; 8]),
        );
        let summary = decoder().decode(frame(data)).unwrap();
        assert!(!summary.protocol_label().is_empty());
        assert_ne!(summary.protocol_label(), "TCP");
        assert_ne!(summary.protocol_label(), "UDP");
        assert_eq!(summary.source_port(), 0);
    }

    #[test]
    fn test_non_ip_frame_has_no_transport_fields() {
        let arp = [0u8; 28];
        let data = ethernet(EtherTypes::Arp, &arp);
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.source_port(), 0);
        assert_eq!(summary.dest_port(), 0);
        assert_eq!(summary.sequence_number(), 0);
        assert_eq!(summary.protocol_label(), "");
        assert_eq!(summary.source_address(), "");
        assert_eq!(summary.source_mac(), "02:00:00:00:00:01");
        assert_eq!(
            summary.descriptive_text(),
            "02:00:00:00:00:01 -> 02:00:00:00:00:02 [-] (42 bytes)"
        );
    }

    #[test]
    fn test_truncated_tcp_keeps_earlier_layers() {
        let mut ip = ipv4(IpNextHeaderProtocols::Tcp, &tcp(true, false, &[]));
        ip.truncate(IPV4_MIN_HEADER + 8);
        let data = ethernet(EtherTypes::Ipv4, &ip);
        let len = data.len();

        let err = decoder().decode(frame(data)).unwrap_err();
        assert_eq!(err.fault.layer(), "TCP");
        assert!(matches!(err.fault, DecodeFault::Truncated { required: 20, available: 8, .. }));

        let partial = err.into_partial();
        assert_eq!(partial.source_address(), "192.168.1.10");
        assert_eq!(partial.source_mac(), "02:00:00:00:00:01");
        assert_eq!(partial.source_port(), 0);
        assert_eq!(partial.protocol_label(), "");
        assert_eq!(partial.length_bytes(), len);
    }

    #[test]
    fn test_malformed_ipv4_header_length() {
        let mut ip = ipv4(IpNextHeaderProtocols::Udp, &udp(&[]));
        ip[0] = 0x4f; // 60-byte header claimed, 28 bytes present
        let data = ethernet(EtherTypes::Ipv4, &ip);

        let err = decoder().decode(frame(data)).unwrap_err();
        assert!(matches!(err.fault, DecodeFault::Malformed { layer: "IPv4", .. }));
        assert_eq!(err.partial().dest_address(), "93.184.216.34");
        assert_eq!(err.partial().protocol_label(), "");
    }

    #[test]
    fn test_runt_frame_yields_empty_partial() {
        let err = decoder().decode(frame(vec![0xff; 6])).unwrap_err();
        assert_eq!(err.fault.layer(), "Ethernet");
        let partial = err.into_partial();
        assert_eq!(partial.length_bytes(), 6);
        assert_eq!(partial.source_mac(), "");
        assert_eq!(partial.raw_bytes(), &[0xff; 6]);
    }

    #[test]
    fn test_optional_field_groups() {
        let options = DecoderOptions {
            link_addresses: false,
            tcp_details: false,
            layer_dump: false,
        };
        let decoder = FrameDecoder::new(LinkLayer::Ethernet, options);
        let summary = decoder.decode(frame(tcp_over_ethernet(true, false))).unwrap();
        assert_eq!(summary.source_mac(), "");
        assert_eq!(summary.sequence_number(), 0);
        assert_eq!(summary.info(), "");
        assert_eq!(summary.source_port(), 51000);
        assert_eq!(summary.protocol_label(), "TCP");
    }

    #[test]
    fn test_layer_dump() {
        let options = DecoderOptions {
            layer_dump: true,
            ..DecoderOptions::default()
        };
        let decoder = FrameDecoder::new(LinkLayer::Ethernet, options);
        let summary = decoder.decode(frame(tcp_over_ethernet(true, false))).unwrap();
        let dump = summary.layer_dump();
        assert!(dump.starts_with("Ethernet 02:00:00:00:00:01 -> 02:00:00:00:00:02"));
        assert!(dump.contains("\nIPv4 192.168.1.10 -> 93.184.216.34 ttl 64"));
        assert!(dump.contains("\nTCP 51000 -> 443 seq 3735928559"));
        assert!(dump.contains("\n0000  "));
    }

    #[test]
    fn test_raw_ip_link() {
        let data = ipv4(IpNextHeaderProtocols::Udp, &udp(b"x"));
        let decoder = FrameDecoder::new(LinkLayer::RawIp, DecoderOptions::default());
        let summary = decoder.decode(frame(data)).unwrap();
        assert_eq!(summary.protocol_label(), "UDP");
        assert_eq!(summary.source_mac(), "");
        assert_eq!(summary.source_address(), "192.168.1.10");
    }

    #[test]
    fn test_linux_cooked_link() {
        let mut data = vec![0u8; SLL_HEADER];
        data[4..6].copy_from_slice(&6u16.to_be_bytes());
        data[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x09]);
        data[14..16].copy_from_slice(&0x0800u16.to_be_bytes());
        data.extend(ipv4(IpNextHeaderProtocols::Tcp, &tcp(false, true, &[])));

        let decoder = FrameDecoder::new(LinkLayer::LinuxSll, DecoderOptions::default());
        let summary = decoder.decode(frame(data)).unwrap();
        assert_eq!(summary.source_mac(), "02:00:00:00:00:09");
        assert_eq!(summary.dest_mac(), "");
        assert_eq!(summary.protocol_label(), "TCP");
        assert_eq!(summary.info(), "ACK");
    }

    #[test]
    fn test_vlan_tagged_frame() {
        let inner = ipv4(IpNextHeaderProtocols::Udp, &udp(&[]));
        let mut tagged = vec![0x00, 0x64, 0x08, 0x00];
        tagged.extend(inner);
        let data = ethernet(EtherType::new(0x8100), &tagged);
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.protocol_label(), "UDP");
        assert_eq!(summary.dest_port(), 53);
    }

    #[test]
    fn test_ipv6_with_extension_header() {
        let mut payload = vec![17u8, 0, 0, 0, 0, 0, 0, 0];
        payload.extend(udp(b"v6"));
        let data = ethernet(EtherTypes::Ipv6, &ipv6(IpNextHeaderProtocols::Hopopt, &payload));
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.source_address(), "fe80::1");
        assert_eq!(summary.protocol_label(), "UDP");
        assert_eq!(
            summary.descriptive_text(),
            "[fe80::1]:5353 -> [fe80::2]:53 [UDP] (72 bytes)"
        );
    }

    #[test]
    fn test_trailing_fragment_has_no_transport() {
        let mut ip = ipv4(IpNextHeaderProtocols::Tcp, &[0u8; 16]);
        ip[6] = 0x00;
        ip[7] = 0xb9; // fragment offset 185 * 8
        let data = ethernet(EtherTypes::Ipv4, &ip);
        let summary = decoder().decode(frame(data)).unwrap();
        assert_eq!(summary.source_address(), "192.168.1.10");
        assert_eq!(summary.protocol_label(), "");
        assert_eq!(summary.source_port(), 0);
    }

    #[test]
    fn test_ids_unique_across_decodes() {
        let decoder = decoder();
        let ids: HashSet<_> = (0..1000)
            .map(|_| decoder.decode(frame(tcp_over_ethernet(false, true))).unwrap().id())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&[0xaa, 0x0b, 0, 1, 2, 0xff]), "aa:0b:00:01:02:ff");
    }
}
