use crate::error::InterviewError;
use crate::events::{Envelope, Event, SessionToken};
use crate::persistence::SessionSummary;
use crate::session_state::{Phase, SessionStore};
use crate::types::{CandidateInfo, Feedback, InterviewContext, Speaker, Turn, UserIdentity};
use chrono::Utc;
use std::time::Duration;

/// Side effects the machine asks the runtime to perform.
///
/// The machine never touches speech devices, the network or timers itself;
/// it only mutates the session store and returns these.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartInterview(CandidateInfo),
    Speak(String),
    StartListening,
    /// Stop any capture or synthesis in flight.
    StopSpeech,
    RequestNextQuestion {
        answer: String,
        context: InterviewContext,
    },
    RequestFeedback(InterviewContext),
    ScheduleRetry(Duration),
    Persist(SessionSummary),
    /// Release the speech devices for good.
    ReleaseSpeech,
}

/// What to do once the interviewer finishes speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSpeech {
    Listen,
    Finalize,
}

/// Which remote call a pending retry will repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTarget {
    /// Re-arm listening so the candidate can answer again.
    Answer,
    Feedback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    Initializing(CandidateInfo),
    Speaking(AfterSpeech),
    Listening,
    Processing,
    Backoff(RetryTarget),
    Finalizing,
    Persisting,
    Done,
    /// Gave up after too many consecutive remote failures.
    Failed,
    TornDown,
}

impl State {
    /// True while the conversation is still expecting events.
    pub fn is_running(&self) -> bool {
        !matches!(
            self,
            State::Idle | State::Done | State::Failed | State::TornDown
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(2000),
            max_consecutive_failures: Some(5),
        }
    }
}

/// The turn-taking state machine.
///
/// It is the only writer of its [`SessionStore`]. Every input goes through
/// [`TurnMachine::handle`], which checks the event's session token before
/// doing anything.
#[derive(Debug)]
pub struct TurnMachine {
    store: SessionStore,
    state: State,
    token: SessionToken,
    issued_tokens: u64,
    policy: RetryPolicy,
    user: Option<UserIdentity>,
    consecutive_failures: u32,
    // The trailing candidate turn has not been accepted by the interviewer yet.
    answer_unconfirmed: bool,
    persisted: Option<Result<String, String>>,
}

impl TurnMachine {
    pub fn new(store: SessionStore, policy: RetryPolicy, user: Option<UserIdentity>) -> Self {
        Self {
            store,
            state: State::Idle,
            token: SessionToken::new(0),
            issued_tokens: 0,
            policy,
            user,
            consecutive_failures: 0,
            answer_unconfirmed: false,
            persisted: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Result of the persistence call, once it has happened.
    pub fn persisted(&self) -> Option<&Result<String, String>> {
        self.persisted.as_ref()
    }

    /// Idle -> Initializing. Issues a fresh token for the new session.
    pub fn begin(&mut self, candidate: CandidateInfo) -> Result<Vec<Command>, InterviewError> {
        if self.state != State::Idle {
            return Err(InterviewError::AlreadyStarted);
        }
        if candidate.name.trim().is_empty() {
            return Err(self.reject_start(InterviewError::InvalidCandidate(
                "name must not be empty".to_string(),
            )));
        }
        if candidate.role.trim().is_empty() {
            return Err(self.reject_start(InterviewError::InvalidCandidate(
                "role must not be empty".to_string(),
            )));
        }

        self.issued_tokens += 1;
        self.token = SessionToken::new(self.issued_tokens);
        self.store.clear_error();
        tracing::info!(
            "Starting interview {} for {} ({})",
            self.token.value(),
            candidate.name,
            candidate.role
        );
        self.state = State::Initializing(candidate.clone());
        Ok(vec![Command::StartInterview(candidate)])
    }

    /// Records a start-up failure for the user. The machine stays idle.
    pub fn reject_start(&mut self, err: InterviewError) -> InterviewError {
        tracing::warn!("Interview cannot start: {}", err);
        if self.state == State::Idle {
            self.store.report_error(err.to_string());
        }
        err
    }

    pub fn handle(&mut self, envelope: Envelope) -> Vec<Command> {
        if self.state == State::TornDown {
            tracing::debug!("Session torn down; dropping {:?}", envelope.event);
            return vec![];
        }
        if envelope.event == Event::TeardownRequested {
            return self.teardown();
        }
        if envelope.token != self.token {
            tracing::debug!(
                "Dropping {:?} from stale session {}",
                envelope.event,
                envelope.token.value()
            );
            return vec![];
        }

        let state = std::mem::replace(&mut self.state, State::Idle);
        match (state, envelope.event) {
            (State::Initializing(candidate), Event::InterviewStarted(opening)) => {
                self.store.set_candidate_info(candidate);
                self.store.set_context(opening.context);
                self.store.append_turn(Turn::interviewer(opening.greeting.clone()));
                self.store.set_phase(Phase::Active);
                self.speak(opening.greeting, AfterSpeech::Listen)
            }
            (State::Initializing(_), Event::StartFailed(message)) => {
                tracing::warn!("Interviewer failed to start: {}", message);
                self.store.report_error(format!(
                    "Failed to initialize interview: {message}. Please try again."
                ));
                self.state = State::Idle;
                vec![]
            }

            (State::Speaking(AfterSpeech::Listen), Event::SynthesisDone) => self.listen(),
            (State::Speaking(AfterSpeech::Finalize), Event::SynthesisDone) => {
                self.store.set_speaking(false);
                self.request_feedback()
            }

            (State::Listening, Event::Listening) => {
                self.store.set_listening(true);
                self.state = State::Listening;
                vec![]
            }
            (State::Listening, Event::SpeechStarted) => {
                tracing::debug!("Candidate started speaking");
                self.state = State::Listening;
                vec![]
            }
            (State::Listening, Event::SpeechEnded(transcript)) => self.on_answer(transcript),
            (State::Listening, Event::SpeechFailed(message)) => {
                tracing::warn!("Speech capture failed: {}", message);
                self.store.report_error(message);
                self.listen()
            }

            (State::Processing, Event::RemoteResponded(next)) => {
                self.consecutive_failures = 0;
                self.answer_unconfirmed = false;
                self.store.clear_error();
                if let Some(context) = next.updated_context {
                    self.store.set_context(context);
                }
                self.store.append_turn(Turn::interviewer(next.response.clone()));
                if next.should_continue {
                    self.speak(next.response, AfterSpeech::Listen)
                } else {
                    tracing::info!("Interviewer closed the conversation");
                    self.store.set_phase(Phase::Closing);
                    self.speak(next.response, AfterSpeech::Finalize)
                }
            }
            (State::Processing, Event::RemoteFailed(message)) => {
                self.store.set_processing(false);
                self.on_remote_failure(
                    RetryTarget::Answer,
                    format!("{message}. Please try speaking again."),
                )
            }
            (State::Backoff(RetryTarget::Answer), Event::RetryElapsed) => {
                tracing::info!("Retrying: listening for the answer again");
                self.listen()
            }

            (State::Finalizing, Event::FeedbackReady(feedback)) => {
                self.consecutive_failures = 0;
                self.store.clear_error();
                self.store.set_feedback(feedback.clone());
                self.persist(feedback)
            }
            (State::Finalizing, Event::FeedbackFailed(message)) => self.on_remote_failure(
                RetryTarget::Feedback,
                format!("Failed to generate feedback: {message}"),
            ),
            (State::Backoff(RetryTarget::Feedback), Event::RetryElapsed) => {
                tracing::info!("Retrying feedback generation");
                self.request_feedback()
            }

            (State::Persisting, Event::Persisted(outcome)) => {
                match &outcome {
                    Ok(id) => tracing::info!("Interview saved with id {}", id),
                    Err(e) => tracing::error!("Failed to save interview: {}", e),
                }
                self.persisted = Some(outcome);
                self.complete()
            }

            (state, event) => {
                tracing::debug!("Ignoring {:?} while {:?}", event, state);
                self.state = state;
                vec![]
            }
        }
    }

    fn speak(&mut self, text: String, then: AfterSpeech) -> Vec<Command> {
        self.store.set_speaking(true);
        self.state = State::Speaking(then);
        vec![Command::Speak(text)]
    }

    fn listen(&mut self) -> Vec<Command> {
        self.store.set_listening(true);
        self.state = State::Listening;
        vec![Command::StartListening]
    }

    fn on_answer(&mut self, transcript: String) -> Vec<Command> {
        let answer = transcript.trim().to_string();
        if answer.is_empty() {
            tracing::debug!("Empty transcript; listening again");
            self.store.report_error("No speech detected. Please try again.");
            return self.listen();
        }
        let Some(context) = self.store.snapshot().context else {
            // Unreachable once the interview has started.
            self.store
                .report_error("Interview context lost. Please restart the interview.");
            self.state = State::Failed;
            return vec![Command::StopSpeech, Command::ReleaseSpeech];
        };

        tracing::info!("Candidate said: \"{}\"", answer);
        if self.answer_unconfirmed && self.store.snapshot().last_speaker() == Some(Speaker::Candidate)
        {
            self.store.revise_unconfirmed_answer(answer.clone());
        } else {
            self.store.append_turn(Turn::candidate(answer.clone()));
        }
        self.answer_unconfirmed = true;
        self.store.set_processing(true);
        self.state = State::Processing;
        vec![Command::RequestNextQuestion { answer, context }]
    }

    fn on_remote_failure(&mut self, target: RetryTarget, message: String) -> Vec<Command> {
        self.consecutive_failures += 1;
        if let Some(max) = self.policy.max_consecutive_failures {
            if self.consecutive_failures >= max {
                tracing::error!(
                    "Giving up after {} consecutive interviewer failures: {}",
                    self.consecutive_failures,
                    message
                );
                self.store.report_error(format!(
                    "The interviewer is unavailable ({message}). Please restart the interview."
                ));
                self.state = State::Failed;
                return vec![Command::StopSpeech, Command::ReleaseSpeech];
            }
        }

        tracing::warn!(
            "Interviewer call failed (attempt {}): {}",
            self.consecutive_failures,
            message
        );
        self.store.report_error(message);
        self.state = State::Backoff(target);
        vec![Command::ScheduleRetry(self.policy.backoff)]
    }

    fn request_feedback(&mut self) -> Vec<Command> {
        self.state = State::Finalizing;
        match self.store.snapshot().context {
            Some(context) => vec![Command::RequestFeedback(context)],
            None => {
                self.store
                    .report_error("Interview context lost. Feedback cannot be generated.");
                self.state = State::Failed;
                vec![Command::ReleaseSpeech]
            }
        }
    }

    fn persist(&mut self, feedback: Feedback) -> Vec<Command> {
        let Some(user) = &self.user else {
            tracing::info!("No signed-in user; interview will not be saved");
            return self.complete();
        };

        let session = self.store.snapshot();
        let (candidate_name, role) = session
            .candidate
            .map(|c| (c.name, c.role))
            .unwrap_or_default();
        let summary = SessionSummary {
            user_id: user.owner_key().to_string(),
            candidate_name,
            role,
            conversation_log: session.transcript,
            feedback,
            completed_at: Utc::now(),
        };
        self.state = State::Persisting;
        vec![Command::Persist(summary)]
    }

    fn complete(&mut self) -> Vec<Command> {
        self.store.set_listening(false);
        self.store.set_phase(Phase::Completed);
        self.state = State::Done;
        vec![Command::ReleaseSpeech]
    }

    fn teardown(&mut self) -> Vec<Command> {
        tracing::info!("Tearing down interview {}", self.token.value());
        self.state = State::TornDown;
        vec![Command::StopSpeech, Command::ReleaseSpeech]
    }
}
