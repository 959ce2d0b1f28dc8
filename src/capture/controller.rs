use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::session::{run_session, SessionReport, SessionState, TerminationReason};
use super::source::{SourceOpener, MATCH_ALL};
use crate::decode::DecoderOptions;
use crate::sink::EventSink;

/// Control side of one running capture session.
///
/// Every session gets its own control channel, so a signal sent through one
/// handle never reaches another session. Dropping the handle stops the
/// session.
pub struct SessionHandle {
    id: Uuid,
    device: String,
    control: watch::Sender<SessionState>,
    task: JoinHandle<()>,
    report: oneshot::Receiver<SessionReport>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        if self.is_finished() {
            SessionState::Stopped
        } else {
            *self.control.borrow()
        }
    }

    /// True once the receive loop has returned and released its handle.
    pub fn is_finished(&self) -> bool {
        self.control.is_closed()
    }

    pub fn pause(&self) -> bool {
        self.transition(SessionState::Running, SessionState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(SessionState::Paused, SessionState::Running)
    }

    pub fn stop(&self) {
        self.control.send_replace(SessionState::Stopped);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        if self.is_finished() {
            return false;
        }
        self.control.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Completes when the receive loop has exited.
    pub async fn finished(&self) {
        self.control.closed().await
    }

    /// Waits for the session task without signalling it.
    pub async fn join(mut self) -> SessionReport {
        if let Err(e) = (&mut self.task).await {
            warn!("Session {} on {} did not finish cleanly: {}", self.id, self.device, e);
            return SessionReport::failed(
                self.id,
                &self.device,
                TerminationReason::Aborted(e.to_string()),
            );
        }
        self.into_report()
    }

    /// Report of a session whose task has completed.
    fn into_report(mut self) -> SessionReport {
        match self.report.try_recv() {
            Ok(report) => report,
            Err(_) => SessionReport::failed(
                self.id,
                &self.device,
                TerminationReason::Aborted("session task exited without a report".to_string()),
            ),
        }
    }
}

/// Starts, pauses and stops capture sessions on behalf of one consumer.
///
/// At most one session is active. Starting a new capture stops the active
/// one first; stopped sessions are kept until [`CaptureController::reap`] or
/// [`CaptureController::shutdown`] collects their reports.
pub struct CaptureController<O, K>
where
    O: SourceOpener,
    K: EventSink + Clone + 'static,
{
    opener: Arc<O>,
    sink: K,
    filter: String,
    options: DecoderOptions,
    active: Option<SessionHandle>,
    retired: Vec<SessionHandle>,
}

impl<O, K> CaptureController<O, K>
where
    O: SourceOpener,
    K: EventSink + Clone + 'static,
{
    pub fn new(opener: O, sink: K) -> Self {
        Self {
            opener: Arc::new(opener),
            sink,
            filter: MATCH_ALL.to_string(),
            options: DecoderOptions::default(),
            active: None,
            retired: Vec::new(),
        }
    }

    /// Default filter used by [`CaptureController::start_capture`].
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_decoder_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Launches a session on `device` with the default filter and returns at once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_capture(&mut self, device: &str) -> Uuid {
        let filter = self.filter.clone();
        self.start_capture_with_filter(device, &filter)
    }

    pub fn start_capture_with_filter(&mut self, device: &str, filter: &str) -> Uuid {
        if let Some(previous) = self.active.take() {
            info!(
                "Stopping session {} on {} before starting a new capture",
                previous.id, previous.device
            );
            previous.stop();
            self.retired.push(previous);
        }

        let id = Uuid::new_v4();
        let (control, rx) = watch::channel(SessionState::Running);
        let opener = Arc::clone(&self.opener);
        let mut sink = self.sink.clone();
        let device_name = device.to_string();
        let filter = filter.to_string();
        let options = self.options;

        let (report_tx, report) = oneshot::channel();

        debug!("Spawning session {} on {}", id, device);
        let task = tokio::task::spawn_blocking(move || {
            let outcome = run_session(
                id,
                opener.as_ref(),
                &device_name,
                &filter,
                options,
                rx,
                &mut sink,
            );
            // the handle may already be gone
            let _ = report_tx.send(outcome);
        });

        self.active = Some(SessionHandle {
            id,
            device: device.to_string(),
            control,
            task,
            report,
        });
        id
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    pub fn state(&self) -> Option<SessionState> {
        self.active.as_ref().map(SessionHandle::state)
    }

    pub fn pause(&self) -> bool {
        self.active.as_ref().is_some_and(SessionHandle::pause)
    }

    pub fn resume(&self) -> bool {
        self.active.as_ref().is_some_and(SessionHandle::resume)
    }

    /// Stops the active session; the handle is kept for its report.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.stop();
                self.retired.push(handle);
                true
            }
            None => false,
        }
    }

    /// Collects reports of sessions whose tasks have completed, including an
    /// active session that ended on its own. Never blocks.
    pub fn reap(&mut self) -> Vec<SessionReport> {
        if self.active.as_ref().is_some_and(|h| h.task.is_finished()) {
            self.retired.extend(self.active.take());
        }

        let (done, pending): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(|handle| handle.task.is_finished());
        self.retired = pending;

        done.into_iter().map(SessionHandle::into_report).collect()
    }

    /// Stops every session and waits until each has released its handle.
    ///
    /// A session blocked handing a summary to a full channel only sees the
    /// stop once the consumer drains or drops its receiver, so consumers
    /// close their receiver before calling this.
    pub async fn shutdown(&mut self) -> Vec<SessionReport> {
        let mut handles: Vec<SessionHandle> = self.retired.drain(..).collect();
        handles.extend(self.active.take());

        for handle in &handles {
            handle.stop();
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(handle.join().await);
        }
        if !reports.is_empty() {
            info!("Shut down {} capture session(s)", reports.len());
        }
        reports
    }
}
