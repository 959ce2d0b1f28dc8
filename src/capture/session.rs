use std::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::source::{CaptureError, FilterSpec, FrameSource, NextFrame, SourceOpener};
use crate::decode::{DecoderOptions, FrameDecoder};
use crate::sink::EventSink;

/// Control state of one session, published by its handle and read by its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    /// The handle stays open; frames are read and discarded.
    Paused,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Running => write!(f, "running"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum TerminationReason {
    Stopped,
    StreamEnded,
    ConsumerGone,
    OpenFailed(String),
    FilterFailed(String),
    /// The session task panicked or was cancelled by the runtime.
    Aborted(String),
}

impl TerminationReason {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TerminationReason::OpenFailed(_)
                | TerminationReason::FilterFailed(_)
                | TerminationReason::Aborted(_)
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Stopped => write!(f, "stopped"),
            TerminationReason::StreamEnded => write!(f, "stream ended"),
            TerminationReason::ConsumerGone => write!(f, "consumer disconnected"),
            TerminationReason::OpenFailed(reason) => write!(f, "open failed: {}", reason),
            TerminationReason::FilterFailed(reason) => write!(f, "filter failed: {}", reason),
            TerminationReason::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub frames_read: u64,
    pub frames_delivered: u64,
    pub frames_discarded: u64,
    pub decode_failures: u64,
    pub bytes_delivered: u64,
}

/// Outcome of one capture run, produced after the handle has been released.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: Uuid,
    pub device: String,
    pub reason: TerminationReason,
    pub stats: SessionStats,
}

impl SessionReport {
    pub fn failed(session: Uuid, device: &str, reason: TerminationReason) -> Self {
        Self {
            session,
            device: device.to_string(),
            reason,
            stats: SessionStats::default(),
        }
    }
}

/// One capture run over one exclusively owned frame source.
///
/// The receive loop is the only reader of the source and drops it on every
/// exit path before [`CaptureSession::run`] returns.
pub struct CaptureSession<S: FrameSource> {
    id: Uuid,
    device: String,
    source: S,
    decoder: FrameDecoder,
    stats: SessionStats,
}

impl<S: FrameSource> CaptureSession<S> {
    /// Installs the filter on a freshly opened source.
    ///
    /// The match-everything sentinel never reaches the filter compiler. On a
    /// compile failure the source is dropped here, before any frame is read.
    pub fn start(
        id: Uuid,
        device: &str,
        mut source: S,
        filter: &str,
        options: DecoderOptions,
    ) -> Result<Self, CaptureError> {
        match FilterSpec::parse(filter) {
            FilterSpec::MatchAll => debug!("Session {}: no capture filter on {}", id, device),
            FilterSpec::Expression(expression) => source.apply_filter(&expression)?,
        }

        let decoder = FrameDecoder::new(source.link_layer(), options);
        info!(
            "Session {} started on {} (link {}, filter '{}')",
            id,
            device,
            decoder.link_layer(),
            filter.trim()
        );

        Ok(Self {
            id,
            device: device.to_string(),
            source,
            decoder,
            stats: SessionStats::default(),
        })
    }

    /// Runs the receive loop until stopped, the stream ends or the sink hangs up.
    ///
    /// Control is checked before every read and again after it, so a stop
    /// observed while blocked in a read prevents that frame from being
    /// delivered. A closed control channel counts as a stop.
    pub fn run<K: EventSink + ?Sized>(
        mut self,
        mut control: watch::Receiver<SessionState>,
        sink: &mut K,
    ) -> SessionReport {
        let mut state = *control.borrow_and_update();

        let reason = loop {
            state = self.observe(&mut control, state);
            if state == SessionState::Stopped {
                break TerminationReason::Stopped;
            }

            let frame = match self.source.next_frame() {
                NextFrame::Frame(frame) => frame,
                NextFrame::Idle => continue,
                NextFrame::Exhausted => break TerminationReason::StreamEnded,
            };
            self.stats.frames_read += 1;

            state = self.observe(&mut control, state);
            match state {
                SessionState::Stopped => break TerminationReason::Stopped,
                SessionState::Paused => {
                    self.stats.frames_discarded += 1;
                    continue;
                }
                SessionState::Running => {}
            }

            let summary = match self.decoder.decode(frame) {
                Ok(summary) => summary,
                Err(err) => {
                    self.stats.decode_failures += 1;
                    warn!(
                        "Session {}: frame {} only partly decoded: {}",
                        self.id, self.stats.frames_read, err
                    );
                    err.into_partial()
                }
            };

            let length = summary.length_bytes() as u64;
            if sink.emit(summary).is_err() {
                break TerminationReason::ConsumerGone;
            }
            self.stats.frames_delivered += 1;
            self.stats.bytes_delivered += length;
        };

        let CaptureSession {
            id,
            device,
            source,
            stats,
            ..
        } = self;
        drop(source);

        info!(
            "Session {} on {} ended ({}): {} delivered, {} discarded, {} partly decoded",
            id, device, reason, stats.frames_delivered, stats.frames_discarded, stats.decode_failures
        );
        SessionReport {
            session: id,
            device,
            reason,
            stats,
        }
    }

    fn observe(
        &self,
        control: &mut watch::Receiver<SessionState>,
        current: SessionState,
    ) -> SessionState {
        match control.has_changed() {
            Ok(false) => current,
            Ok(true) => {
                let next = *control.borrow_and_update();
                if next != current {
                    info!("Session {} on {} is now {}", self.id, self.device, next);
                }
                next
            }
            Err(_) => SessionState::Stopped,
        }
    }
}

/// Opens `device`, installs `filter` and runs the receive loop to completion.
///
/// Open and filter failures end the session before any frame is read and
/// come back as distinct termination reasons.
pub fn run_session<O: SourceOpener, K: EventSink + ?Sized>(
    id: Uuid,
    opener: &O,
    device: &str,
    filter: &str,
    options: DecoderOptions,
    control: watch::Receiver<SessionState>,
    sink: &mut K,
) -> SessionReport {
    let source = match opener.open(device) {
        Ok(source) => source,
        Err(e) => {
            error!("Session {}: {}", id, e);
            return SessionReport::failed(id, device, TerminationReason::OpenFailed(e.to_string()));
        }
    };

    match CaptureSession::start(id, device, source, filter, options) {
        Ok(session) => session.run(control, sink),
        Err(e) => {
            error!("Session {}: {}", id, e);
            let reason = if e.is_filter_error() {
                TerminationReason::FilterFailed(e.to_string())
            } else {
                TerminationReason::OpenFailed(e.to_string())
            };
            SessionReport::failed(id, device, reason)
        }
    }
}
