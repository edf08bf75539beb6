use crate::events::{Envelope, Event, SessionToken};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Callback side of one `start_listening` call.
///
/// The non-terminal notifications borrow the handle; the terminal ones
/// consume it, so a capture can end at most once.
#[derive(Debug)]
pub struct CaptureHandle {
    token: SessionToken,
    tx: UnboundedSender<Envelope>,
}

impl CaptureHandle {
    pub fn new(token: SessionToken, tx: UnboundedSender<Envelope>) -> Self {
        Self { token, tx }
    }

    fn emit(&self, event: Event) {
        if self.tx.send(Envelope::new(self.token, event)).is_err() {
            tracing::debug!("Orchestrator is gone; dropping capture event");
        }
    }

    pub fn listening(&self) {
        self.emit(Event::Listening);
    }

    pub fn speech_start(&self) {
        self.emit(Event::SpeechStarted);
    }

    pub fn speech_end(self, transcript: impl Into<String>) {
        self.emit(Event::SpeechEnded(transcript.into()));
    }

    pub fn speech_error(self, message: impl Into<String>) {
        self.emit(Event::SpeechFailed(message.into()));
    }
}

/// Completion side of one `speak` call. Completing consumes it.
#[derive(Debug)]
pub struct SynthesisHandle {
    token: SessionToken,
    tx: UnboundedSender<Envelope>,
}

impl SynthesisHandle {
    pub fn new(token: SessionToken, tx: UnboundedSender<Envelope>) -> Self {
        Self { token, tx }
    }

    pub fn complete(self) {
        if self
            .tx
            .send(Envelope::new(self.token, Event::SynthesisDone))
            .is_err()
        {
            tracing::debug!("Orchestrator is gone; dropping synthesis completion");
        }
    }
}

/// Speech capture and synthesis, as seen by the orchestrator.
///
/// Implementations hold at most one capture and one synthesis handle at a
/// time. Starting a capture while one is armed replaces it without firing
/// the old handle. After [`SpeechIo::destroy`] no handle may fire again.
#[async_trait]
pub trait SpeechIo: Send + Sync {
    /// Whether capture is possible at all in this environment.
    fn is_supported(&self) -> bool;

    /// Asks for access to the capture device. Must be awaited before first use.
    async fn request_permission(&self) -> bool;

    fn start_listening(&self, capture: CaptureHandle);

    fn stop_listening(&self);

    /// Plays `text`; `done` is completed exactly once when playback ends,
    /// including for empty text.
    fn speak(&self, text: &str, done: SynthesisHandle);

    fn stop_speaking(&self);

    /// Releases every device handle. Safe to call repeatedly.
    fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn capture_handle_tags_events_with_its_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = SessionToken::new(7);
        let capture = CaptureHandle::new(token, tx);

        capture.listening();
        capture.speech_start();
        capture.speech_end("I like Rust");

        let events: Vec<Envelope> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.token == token));
        assert_eq!(events[2].event, Event::SpeechEnded("I like Rust".to_string()));
    }

    #[test]
    fn handles_tolerate_a_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        SynthesisHandle::new(SessionToken::new(1), tx.clone()).complete();
        CaptureHandle::new(SessionToken::new(1), tx).speech_error("mic unplugged");
    }
}
