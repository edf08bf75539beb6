use crate::types::{CandidateInfo, Feedback, InterviewContext, Speaker, Turn};
use tokio::sync::watch;

/// Coarse lifecycle of an interview. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Phase {
    #[default]
    PreInterview,
    Active,
    Closing,
    Completed,
}

/// What the interview is doing right now.
///
/// A single value instead of independent booleans, so speaking, listening
/// and processing can never be observed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    Idle,
    Speaking,
    Listening,
    Processing,
}

/// Ephemeral presentation state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiFlags {
    pub activity: Activity,
    pub show_transcript: bool,
    pub error: Option<String>,
}

impl Default for UiFlags {
    fn default() -> Self {
        Self {
            activity: Activity::Idle,
            show_transcript: true,
            error: None,
        }
    }
}

impl UiFlags {
    pub fn is_speaking(&self) -> bool {
        self.activity == Activity::Speaking
    }

    pub fn is_listening(&self) -> bool {
        self.activity == Activity::Listening
    }

    pub fn is_processing(&self) -> bool {
        self.activity == Activity::Processing
    }
}

/// One interview attempt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub phase: Phase,
    pub candidate: Option<CandidateInfo>,
    pub transcript: Vec<Turn>,
    pub context: Option<InterviewContext>,
    pub ui: UiFlags,
    pub feedback: Option<Feedback>,
    /// Bumped by every mutation that changed something.
    pub revision: u64,
}

impl Session {
    /// True when turns alternate strictly, starting with the interviewer.
    pub fn alternates(&self) -> bool {
        let mut expected = Speaker::Interviewer;
        for turn in &self.transcript {
            if turn.speaker != expected {
                return false;
            }
            expected = expected.other();
        }
        true
    }

    pub fn last_speaker(&self) -> Option<Speaker> {
        self.transcript.last().map(|turn| turn.speaker)
    }
}

/// The authoritative, single-writer session state.
///
/// Mutations are synchronous and cannot fail; a mutation that would break a
/// session invariant is logged and dropped. Readers obtain a [`StoreReader`]
/// and always see the latest completed mutation.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<Session>,
}

/// Read-only view of a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreReader {
    rx: watch::Receiver<Session>,
}

impl StoreReader {
    pub fn snapshot(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Waits for the next mutation. Fails once the store is gone.
    pub async fn changed(&mut self) -> Result<Session, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self { tx }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    fn mutate(&self, f: impl FnOnce(&mut Session) -> bool) {
        self.tx.send_if_modified(|session| {
            let changed = f(session);
            if changed {
                session.revision += 1;
            }
            changed
        });
    }

    pub fn set_phase(&self, phase: Phase) {
        self.mutate(|session| {
            if phase <= session.phase {
                if phase < session.phase {
                    tracing::warn!(
                        "Refusing to move phase backwards from {:?} to {:?}",
                        session.phase,
                        phase
                    );
                }
                return false;
            }
            tracing::info!("Phase {:?} -> {:?}", session.phase, phase);
            session.phase = phase;
            true
        });
    }

    pub fn set_candidate_info(&self, info: CandidateInfo) {
        self.mutate(|session| {
            if session.candidate.is_some() {
                tracing::warn!("Candidate info is already set; ignoring {:?}", info);
                return false;
            }
            session.candidate = Some(info);
            true
        });
    }

    pub fn set_context(&self, context: InterviewContext) {
        self.mutate(|session| {
            session.context = Some(context);
            true
        });
    }

    pub fn append_turn(&self, turn: Turn) {
        self.mutate(|session| {
            session.transcript.push(turn);
            true
        });
    }

    /// Replaces the trailing candidate turn with a new answer.
    ///
    /// Used when a retry supersedes an answer whose remote call failed.
    /// Falls back to appending if the transcript does not end with a candidate turn.
    pub fn revise_unconfirmed_answer(&self, text: String) {
        self.mutate(|session| {
            match session.transcript.last_mut() {
                Some(turn) if turn.speaker == Speaker::Candidate => turn.text = text,
                _ => session.transcript.push(Turn::candidate(text)),
            }
            true
        });
    }

    fn set_activity(&self, activity: Activity, on: bool) {
        self.mutate(|session| {
            let next = if on {
                activity
            } else if session.ui.activity == activity {
                Activity::Idle
            } else {
                return false;
            };
            if session.ui.activity == next {
                return false;
            }
            session.ui.activity = next;
            true
        });
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.set_activity(Activity::Speaking, speaking);
    }

    pub fn set_listening(&self, listening: bool) {
        self.set_activity(Activity::Listening, listening);
    }

    pub fn set_processing(&self, processing: bool) {
        self.set_activity(Activity::Processing, processing);
    }

    pub fn toggle_transcript(&self) {
        self.mutate(|session| {
            session.ui.show_transcript = !session.ui.show_transcript;
            true
        });
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|session| {
            if session.ui.error.as_deref() == Some(message.as_str()) {
                return false;
            }
            session.ui.error = Some(message);
            true
        });
    }

    pub fn clear_error(&self) {
        self.mutate(|session| session.ui.error.take().is_some());
    }

    pub fn set_feedback(&self, feedback: Feedback) {
        self.mutate(|session| {
            if session.feedback.is_some() {
                tracing::warn!("Feedback is already recorded; ignoring a second value");
                return false;
            }
            session.feedback = Some(feedback);
            true
        });
    }
}
