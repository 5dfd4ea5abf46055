//! Channel-backed trace source.
//!
//! The callback-style trace API is adapted into a single-consumer iteration:
//! whoever receives events from the OS pushes them into a bounded
//! `crossbeam` channel, and the pipeline thread pulls them one at a time
//! inside `process_events`. A full channel blocks the producer, so a slow
//! sink throttles the producer instead of growing a queue.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use super::recorded::RecordedEvent;
use super::source::{
    Flow, ProviderSelection, RawEvent, SessionControl, SessionName, SourceError, StopHandle, TraceSource,
};

/// Producer half of a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelFeeder {
    tx: Sender<RecordedEvent>,
}

impl ChannelFeeder {
    /// Blocks while the channel is full. Returns `false` once the source is gone.
    pub fn send(&self, event: RecordedEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Idle,
    Enabled(SessionName, ProviderSelection),
    Stopped,
}

/// Shared between the source, its stop handles and test probes.
#[derive(Debug)]
struct ChannelControl {
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    stop_requested: AtomicBool,
    session: Mutex<SessionState>,
    session_stops: AtomicUsize,
}

impl SessionControl for ChannelControl {
    fn stop_processing(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // Capacity 1: a token already queued is as good as a new one.
        if let Err(TrySendError::Disconnected(())) = self.stop_tx.try_send(()) {
            log::trace!("stop token dropped: source already gone");
        }
    }

    fn stop_session(&self) -> Result<(), SourceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| SourceError::Other("session state poisoned".into()))?;
        if matches!(*session, SessionState::Enabled(..)) {
            self.session_stops.fetch_add(1, Ordering::SeqCst);
        }
        *session = SessionState::Stopped;
        Ok(())
    }
}

/// Observes a [`ChannelSource`] from outside, e.g. from a test.
#[derive(Clone)]
pub struct SessionProbe {
    control: Arc<ChannelControl>,
}

impl SessionProbe {
    pub fn is_enabled(&self) -> bool {
        self.control
            .session
            .lock()
            .map(|s| matches!(*s, SessionState::Enabled(..)))
            .unwrap_or(false)
    }

    pub fn is_stopped(&self) -> bool {
        self.control
            .session
            .lock()
            .map(|s| matches!(*s, SessionState::Stopped))
            .unwrap_or(false)
    }

    pub fn session_name(&self) -> Option<SessionName> {
        match &*self.control.session.lock().ok()? {
            SessionState::Enabled(name, _) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<ProviderSelection> {
        match &*self.control.session.lock().ok()? {
            SessionState::Enabled(_, provider) => Some(provider.clone()),
            _ => None,
        }
    }

    /// How many times an enabled session was actually torn down (0 or 1).
    pub fn session_stops(&self) -> usize {
        self.control.session_stops.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.control.stop_requested.load(Ordering::SeqCst)
    }
}

pub struct ChannelSource {
    events: Receiver<RecordedEvent>,
    control: Arc<ChannelControl>,
    enable_failure: Option<String>,
}

impl ChannelSource {
    /// Creates a source whose channel holds at most `capacity` pending events.
    pub fn bounded(capacity: usize) -> (ChannelFeeder, ChannelSource) {
        let (tx, events) = channel::bounded(capacity);
        let (stop_tx, stop_rx) = channel::bounded(1);
        let control = Arc::new(ChannelControl {
            stop_tx,
            stop_rx,
            stop_requested: AtomicBool::new(false),
            session: Mutex::new(SessionState::Idle),
            session_stops: AtomicUsize::new(0),
        });
        (ChannelFeeder { tx }, ChannelSource { events, control, enable_failure: None })
    }

    /// Makes `enable_session` fail, as a missing provider would.
    pub fn fail_enable(mut self, reason: &str) -> Self {
        self.enable_failure = Some(reason.to_owned());
        self
    }

    pub fn probe(&self) -> SessionProbe {
        SessionProbe { control: Arc::clone(&self.control) }
    }
}

impl TraceSource for ChannelSource {
    fn enable_session(&mut self, name: &SessionName, provider: &ProviderSelection) -> Result<(), SourceError> {
        if let Some(reason) = &self.enable_failure {
            let provider = match provider {
                ProviderSelection::Kernel { .. } => "kernel".to_owned(),
                ProviderSelection::User { provider, .. } => provider.clone(),
            };
            return Err(SourceError::EnableFailed { provider, reason: reason.clone() });
        }
        let mut session = self
            .control
            .session
            .lock()
            .map_err(|_| SourceError::Other("session state poisoned".into()))?;
        if let SessionState::Enabled(existing, _) = &*session {
            return Err(SourceError::SessionExists(existing.to_string()));
        }
        *session = SessionState::Enabled(name.clone(), provider.clone());
        Ok(())
    }

    fn stop_handle(&self) -> StopHandle {
        self.control.clone()
    }

    fn process_events(&mut self, callback: &mut dyn FnMut(&RawEvent<'_>) -> Flow) -> Result<(), SourceError> {
        if !self.probe().is_enabled() {
            return Err(SourceError::NotEnabled);
        }
        loop {
            if self.control.stop_requested.load(Ordering::SeqCst) {
                return Ok(());
            }
            channel::select! {
                recv(self.control.stop_rx) -> _ => return Ok(()),
                recv(self.events) -> msg => match msg {
                    Ok(event) => {
                        // A stop may have raced with this receive.
                        if self.control.stop_requested.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        if callback(&event.as_raw()).is_break() {
                            return Ok(());
                        }
                    }
                    // Every feeder dropped: nothing more will arrive.
                    Err(_) => return Ok(()),
                },
            }
        }
    }
}
