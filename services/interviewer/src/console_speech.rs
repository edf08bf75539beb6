//! Terminal stand-in for a microphone and a speaker.
//!
//! Each armed capture is answered by the next line typed on the input; an
//! empty line or a closed input ends the capture with an error. Synthesis is
//! simulated: the text is shown by the transcript view and playback takes a
//! configurable time per word.

use async_trait::async_trait;
use interview_core::speech::{CaptureHandle, SpeechIo, SynthesisHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Shared {
    capture: Mutex<Option<CaptureHandle>>,
    armed: Notify,
    destroyed: AtomicBool,
}

pub struct ConsoleSpeech {
    shared: Arc<Shared>,
    playback: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
    ms_per_word: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConsoleSpeech {
    /// Reads answers from `input`. Must be called inside a tokio runtime.
    pub fn new<R>(input: R, ms_per_word: Duration) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_answers(input, shared.clone()));
        Self {
            shared,
            playback: Mutex::new(None),
            reader,
            ms_per_word,
        }
    }

    pub fn stdin(ms_per_word: Duration) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), ms_per_word)
    }

    fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }
}

async fn read_answers<R>(input: R, shared: Arc<Shared>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        shared.armed.notified().await;
        if shared.destroyed.load(Ordering::SeqCst) {
            break;
        }
        let line = lines.next_line().await;

        // The capture may have been stopped while the line was being typed.
        let Some(capture) = lock(&shared.capture).take() else {
            tracing::debug!("Discarding input typed while not listening");
            continue;
        };
        match line {
            Ok(Some(text)) if !text.trim().is_empty() => {
                capture.speech_start();
                capture.speech_end(text);
            }
            Ok(Some(_)) => capture.speech_error("No speech detected. Please try again."),
            Ok(None) => {
                tracing::warn!("Input closed; no more answers can be captured");
                capture.speech_error("Input closed");
                break;
            }
            Err(e) => {
                capture.speech_error(format!("Failed to read input: {e}"));
                break;
            }
        }
    }
}

/// Simulated playback length, saturating instead of overflowing.
fn playback_time(per_word: Duration, text: &str) -> Duration {
    let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
    per_word.checked_mul(words).unwrap_or(Duration::MAX)
}

#[async_trait]
impl SpeechIo for ConsoleSpeech {
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_permission(&self) -> bool {
        !self.is_destroyed()
    }

    fn start_listening(&self, capture: CaptureHandle) {
        if self.is_destroyed() {
            return;
        }
        capture.listening();
        *lock(&self.shared.capture) = Some(capture);
        self.shared.armed.notify_one();
    }

    fn stop_listening(&self) {
        lock(&self.shared.capture).take();
    }

    fn speak(&self, text: &str, done: SynthesisHandle) {
        if self.is_destroyed() {
            return;
        }
        let duration = playback_time(self.ms_per_word, text);
        tracing::debug!("Speaking for {:?}", duration);

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            done.complete();
        });
        if let Some(previous) = lock(&self.playback).replace(task) {
            previous.abort();
        }
    }

    fn stop_speaking(&self) {
        if let Some(task) = lock(&self.playback).take() {
            task.abort();
        }
    }

    fn destroy(&self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        self.stop_listening();
        self.stop_speaking();
        self.reader.abort();
    }
}
