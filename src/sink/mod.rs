//! Consumers of the per-frame event stream.
//!
//! A capture session hands every summary to an [`EventSink`] in capture
//! order. The sink owns the summary from then on.

use std::io::Write;

use log::error;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::decode::PacketSummary;

/// Name of the event carrying one captured frame.
pub const PACKET_EVENT: &str = "packet";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event consumer disconnected")]
pub struct SinkClosed;

pub trait EventSink: Send {
    fn emit(&mut self, summary: PacketSummary) -> Result<(), SinkClosed>;
}

/// Envelope written for every frame: `{"event":"packet","payload":{...}}`.
#[derive(Debug, Serialize)]
pub struct PacketEvent<'a> {
    pub event: &'static str,
    pub payload: &'a PacketSummary,
}

impl<'a> PacketEvent<'a> {
    pub fn new(payload: &'a PacketSummary) -> Self {
        Self {
            event: PACKET_EVENT,
            payload,
        }
    }
}

/// Forwards summaries over a bounded tokio channel.
///
/// `emit` blocks while the channel is full, so it must be called from a
/// blocking thread, never from inside the async runtime.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PacketSummary>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<PacketSummary>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PacketSummary>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, summary: PacketSummary) -> Result<(), SinkClosed> {
        self.tx.blocking_send(summary).map_err(|_| SinkClosed)
    }
}

/// Writes one JSON [`PacketEvent`] per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, summary: &PacketSummary) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, &PacketEvent::new(summary))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, summary: PacketSummary) -> Result<(), SinkClosed> {
        self.write_event(&summary).map_err(|e| {
            error!("Failed to write packet event: {}", e);
            SinkClosed
        })
    }
}
