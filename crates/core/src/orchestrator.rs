use crate::error::InterviewError;
use crate::events::{Envelope, Event};
use crate::interviewer::InterviewerClient;
use crate::machine::{Command, RetryPolicy, State, TurnMachine};
use crate::persistence::SessionSink;
use crate::session_state::{Session, SessionStore, StoreReader};
use crate::speech::{CaptureHandle, SpeechIo, SynthesisHandle};
use crate::types::{CandidateInfo, UserIdentity};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Timing and retry settings for an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Delay before listening again after a failed remote call.
    pub retry_backoff: Duration,
    /// Upper bound on every interviewer call.
    pub remote_timeout: Duration,
    /// Upper bound on the persistence call.
    pub persist_timeout: Duration,
    /// `None` retries failed remote calls forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(2000),
            remote_timeout: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(10),
            max_consecutive_failures: Some(5),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session: Session,
    /// Id of the stored record, if the session was saved.
    pub saved_id: Option<String>,
    /// Why saving failed, if it did. Logged only; never shown as a session error.
    pub persist_error: Option<String>,
    pub torn_down: bool,
}

/// Requests teardown of a running [`Orchestrator`] from anywhere.
#[derive(Debug, Clone)]
pub struct TeardownHandle {
    notify: Arc<Notify>,
}

impl TeardownHandle {
    pub fn teardown(&self) {
        self.notify.notify_one();
    }
}

/// Runs one interview.
///
/// Events from the speech adapter, remote calls and timers arrive on a
/// single channel and are handled one at a time; side effects run as tokio
/// tasks that report back through the same channel.
pub struct Orchestrator {
    machine: TurnMachine,
    reader: StoreReader,
    speech: Arc<dyn SpeechIo>,
    interviewer: Arc<dyn InterviewerClient>,
    sink: Arc<dyn SessionSink>,
    config: OrchestratorConfig,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    teardown: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        speech: Arc<dyn SpeechIo>,
        interviewer: Arc<dyn InterviewerClient>,
        sink: Arc<dyn SessionSink>,
        user: Option<UserIdentity>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = SessionStore::new();
        let reader = store.reader();
        let policy = RetryPolicy {
            backoff: config.retry_backoff,
            max_consecutive_failures: config.max_consecutive_failures,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            machine: TurnMachine::new(store, policy, user),
            reader,
            speech,
            interviewer,
            sink,
            config,
            events_tx,
            events_rx,
            teardown: Arc::new(Notify::new()),
        }
    }

    /// A read-only view of the session for rendering.
    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    pub fn session(&self) -> Session {
        self.reader.snapshot()
    }

    pub fn state(&self) -> &State {
        self.machine.state()
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        TeardownHandle {
            notify: self.teardown.clone(),
        }
    }

    /// Checks capture capability and permission, then asks the interviewer
    /// for its opening line. On error the session stays idle.
    pub async fn start(&mut self, candidate: CandidateInfo) -> Result<(), InterviewError> {
        if self.machine.state() != &State::Idle {
            return Err(InterviewError::AlreadyStarted);
        }
        if !self.speech.is_supported() {
            return Err(self.machine.reject_start(InterviewError::Unsupported));
        }
        if !self.speech.request_permission().await {
            return Err(self.machine.reject_start(InterviewError::PermissionDenied));
        }
        let commands = self.machine.begin(candidate)?;
        self.execute(commands);
        Ok(())
    }

    /// Waits for the next event and applies it. Returns whether the
    /// interview is still running.
    pub async fn step(&mut self) -> bool {
        if let Some(envelope) = self.events_rx.recv().await {
            self.dispatch(envelope);
        }
        self.machine.state().is_running()
    }

    /// Drives the interview until it completes, fails or is torn down.
    pub async fn run(mut self) -> SessionOutcome {
        let teardown = self.teardown.clone();
        while self.machine.state().is_running() {
            tokio::select! {
                biased;
                _ = teardown.notified() => self.teardown(),
                Some(envelope) = self.events_rx.recv() => self.dispatch(envelope),
            }
        }
        self.outcome()
    }

    /// Stops speech, abandons in-flight calls and freezes the session.
    pub fn teardown(&mut self) {
        let token = self.machine.token();
        self.dispatch(Envelope::new(token, Event::TeardownRequested));
    }

    pub fn outcome(&self) -> SessionOutcome {
        let (saved_id, persist_error) = match self.machine.persisted() {
            Some(Ok(id)) => (Some(id.clone()), None),
            Some(Err(e)) => (None, Some(e.clone())),
            None => (None, None),
        };
        SessionOutcome {
            session: self.reader.snapshot(),
            saved_id,
            persist_error,
            torn_down: self.machine.state() == &State::TornDown,
        }
    }

    /// UI action: hide the current error message.
    pub fn dismiss_error(&self) {
        if self.machine.state() != &State::TornDown {
            self.machine.store().clear_error();
        }
    }

    /// UI action: show or hide the transcript panel.
    pub fn toggle_transcript(&self) {
        if self.machine.state() != &State::TornDown {
            self.machine.store().toggle_transcript();
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let commands = self.machine.handle(envelope);
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            tracing::debug!("Executing {:?}", command);
            match command {
                Command::StartInterview(candidate) => {
                    let client = self.interviewer.clone();
                    self.spawn_remote(
                        async move { client.start_interview(&candidate).await },
                        Event::InterviewStarted,
                        Event::StartFailed,
                    );
                }
                Command::Speak(text) => {
                    let done = SynthesisHandle::new(self.machine.token(), self.events_tx.clone());
                    self.speech.speak(&text, done);
                }
                Command::StartListening => {
                    let capture = CaptureHandle::new(self.machine.token(), self.events_tx.clone());
                    self.speech.start_listening(capture);
                }
                Command::StopSpeech => {
                    self.speech.stop_listening();
                    self.speech.stop_speaking();
                }
                Command::RequestNextQuestion { answer, context } => {
                    let client = self.interviewer.clone();
                    self.spawn_remote(
                        async move { client.generate_next_question(&answer, &context).await },
                        Event::RemoteResponded,
                        Event::RemoteFailed,
                    );
                }
                Command::RequestFeedback(context) => {
                    let client = self.interviewer.clone();
                    self.spawn_remote(
                        async move { client.generate_feedback(&context).await },
                        Event::FeedbackReady,
                        Event::FeedbackFailed,
                    );
                }
                Command::ScheduleRetry(delay) => {
                    let tx = self.events_tx.clone();
                    let token = self.machine.token();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Envelope::new(token, Event::RetryElapsed));
                    });
                }
                Command::Persist(summary) => {
                    let sink = self.sink.clone();
                    let tx = self.events_tx.clone();
                    let token = self.machine.token();
                    let limit = self.config.persist_timeout;
                    tokio::spawn(async move {
                        let outcome = match tokio::time::timeout(limit, sink.save(&summary)).await {
                            Ok(Ok(id)) => Ok(id),
                            Ok(Err(e)) => Err(format!("{e:#}")),
                            Err(_) => Err(format!("save timed out after {limit:?}")),
                        };
                        let _ = tx.send(Envelope::new(token, Event::Persisted(outcome)));
                    });
                }
                Command::ReleaseSpeech => self.speech.destroy(),
            }
        }
    }

    // Runs a remote call off the event loop under the configured timeout.
    // The result comes back tagged with the token of the session that issued
    // it, so a completion after teardown is dropped by the machine.
    fn spawn_remote<T, F>(&self, call: F, on_ok: fn(T) -> Event, on_err: fn(String) -> Event)
    where
        T: Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let token = self.machine.token();
        let limit = self.config.remote_timeout;
        tokio::spawn(async move {
            let event = match tokio::time::timeout(limit, call).await {
                Ok(Ok(value)) => on_ok(value),
                Ok(Err(e)) => on_err(format!("{e:#}")),
                Err(_) => on_err(format!("The interviewer did not respond within {limit:?}")),
            };
            if tx.send(Envelope::new(token, event)).is_err() {
                tracing::debug!("Orchestrator dropped before a remote call finished");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionToken;
    use crate::interviewer::MockInterviewerClient;
    use crate::persistence::{MockSessionSink, SessionSummary};
    use crate::scripted_interviewer::ScriptedInterviewer;
    use crate::session_state::Phase;
    use crate::types::{Feedback, InterviewContext, NextQuestion, OpeningLine};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Speech adapter double. In auto mode it finishes playback immediately
    /// and answers each capture from a script.
    #[derive(Default)]
    struct FakeSpeech {
        supported: bool,
        permitted: bool,
        auto: bool,
        answers: Mutex<VecDeque<String>>,
        capture: Mutex<Option<CaptureHandle>>,
        synthesis: Mutex<Option<SynthesisHandle>>,
        spoken: Mutex<Vec<String>>,
        destroyed: Mutex<u32>,
    }

    impl FakeSpeech {
        fn manual() -> Self {
            Self {
                supported: true,
                permitted: true,
                ..Default::default()
            }
        }

        fn scripted(answers: &[&str]) -> Self {
            Self {
                supported: true,
                permitted: true,
                auto: true,
                answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
                ..Default::default()
            }
        }

        fn finish_speaking(&self) {
            let done = self.synthesis.lock().unwrap().take().expect("nothing is being spoken");
            done.complete();
        }

        fn answer(&self, text: &str) {
            let capture = self.capture.lock().unwrap().take().expect("not listening");
            capture.speech_start();
            capture.speech_end(text);
        }

        fn is_listening(&self) -> bool {
            self.capture.lock().unwrap().is_some()
        }
    }

    #[async_trait]
    impl SpeechIo for FakeSpeech {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn request_permission(&self) -> bool {
            self.permitted
        }

        fn start_listening(&self, capture: CaptureHandle) {
            assert!(
                self.synthesis.lock().unwrap().is_none(),
                "listening while speaking"
            );
            capture.listening();
            if self.auto {
                match self.answers.lock().unwrap().pop_front() {
                    Some(answer) => capture.speech_end(answer),
                    None => capture.speech_error("script exhausted"),
                }
            } else {
                *self.capture.lock().unwrap() = Some(capture);
            }
        }

        fn stop_listening(&self) {
            self.capture.lock().unwrap().take();
        }

        fn speak(&self, text: &str, done: SynthesisHandle) {
            assert!(
                self.capture.lock().unwrap().is_none(),
                "speaking while listening"
            );
            self.spoken.lock().unwrap().push(text.to_string());
            if self.auto {
                done.complete();
            } else {
                *self.synthesis.lock().unwrap() = Some(done);
            }
        }

        fn stop_speaking(&self) {
            self.synthesis.lock().unwrap().take();
        }

        fn destroy(&self) {
            self.stop_listening();
            self.stop_speaking();
            *self.destroyed.lock().unwrap() += 1;
        }
    }

    /// Interviewer whose next-question replies are released by the test.
    struct GatedInterviewer {
        gates: Mutex<VecDeque<oneshot::Receiver<Result<NextQuestion, String>>>>,
    }

    impl GatedInterviewer {
        fn new() -> (Self, Vec<oneshot::Sender<Result<NextQuestion, String>>>) {
            let mut senders = vec![];
            let mut gates = VecDeque::new();
            for _ in 0..4 {
                let (tx, rx) = oneshot::channel();
                senders.push(tx);
                gates.push_back(rx);
            }
            (
                Self {
                    gates: Mutex::new(gates),
                },
                senders,
            )
        }
    }

    #[async_trait]
    impl InterviewerClient for GatedInterviewer {
        async fn start_interview(&self, candidate: &CandidateInfo) -> Result<OpeningLine> {
            Ok(OpeningLine {
                greeting: format!("Hello {}", candidate.name),
                context: InterviewContext::default(),
            })
        }

        async fn generate_next_question(
            &self,
            _answer: &str,
            _context: &InterviewContext,
        ) -> Result<NextQuestion> {
            let gate = self.gates.lock().unwrap().pop_front().expect("no gate left");
            match gate.await {
                Ok(Ok(next)) => Ok(next),
                Ok(Err(message)) => Err(anyhow::anyhow!(message)),
                Err(_) => Err(anyhow::anyhow!("gate dropped")),
            }
        }

        async fn generate_feedback(&self, _context: &InterviewContext) -> Result<Feedback> {
            Ok(feedback())
        }
    }

    fn feedback() -> Feedback {
        Feedback {
            overall_score: 88.0,
            strengths: vec!["Structured answers".to_string()],
            improvements: vec![],
            detailed_feedback: "Well done.".to_string(),
        }
    }

    fn user() -> UserIdentity {
        UserIdentity {
            id: String::new(),
            email: "ada@example.com".to_string(),
            is_admin: false,
        }
    }

    fn candidate() -> CandidateInfo {
        CandidateInfo::new("Ada", "Backend Engineer", false)
    }

    fn ok_sink() -> MockSessionSink {
        let mut sink = MockSessionSink::new();
        sink.expect_save().returning(|_| Ok("rec-1".to_string()));
        sink
    }

    fn orchestrator(
        speech: Arc<FakeSpeech>,
        interviewer: Arc<dyn InterviewerClient>,
        sink: MockSessionSink,
        user: Option<UserIdentity>,
    ) -> Orchestrator {
        Orchestrator::new(
            speech,
            interviewer,
            Arc::new(sink),
            user,
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn full_scripted_interview_completes_and_is_saved() {
        let speech = Arc::new(FakeSpeech::scripted(&[
            "I'm Ada and I build databases.",
            "Curiosity about storage engines.",
            "A query planner rewrite.",
        ]));
        let interviewer = ScriptedInterviewer::new(vec![
            "Why this role?".to_string(),
            "Proudest project?".to_string(),
        ]);

        let mut sink = MockSessionSink::new();
        sink.expect_save()
            .withf(|summary: &SessionSummary| {
                summary.user_id == "ada@example.com"
                    && summary.conversation_log.len() == 7
                    && summary.candidate_name == "Ada"
            })
            .times(1)
            .returning(|_| Ok("rec-42".to_string()));

        let mut orch = orchestrator(speech.clone(), Arc::new(interviewer), sink, Some(user()));
        orch.start(candidate()).await.unwrap();
        let outcome = orch.run().await;

        assert_eq!(outcome.session.phase, Phase::Completed);
        assert!(outcome.session.alternates());
        assert_eq!(outcome.session.transcript.len(), 7);
        assert!(outcome.session.feedback.is_some());
        assert_eq!(outcome.saved_id.as_deref(), Some("rec-42"));
        assert!(!outcome.torn_down);
        assert_eq!(speech.spoken.lock().unwrap().len(), 4);
        assert_eq!(*speech.destroyed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unsupported_environment_blocks_start() {
        let speech = Arc::new(FakeSpeech {
            supported: false,
            ..FakeSpeech::manual()
        });
        let mut interviewer = MockInterviewerClient::new();
        interviewer.expect_start_interview().never();

        let mut orch = orchestrator(speech, Arc::new(interviewer), ok_sink(), None);
        let err = orch.start(candidate()).await.unwrap_err();
        assert_eq!(err, InterviewError::Unsupported);
        assert_eq!(orch.state(), &State::Idle);
        assert_eq!(orch.session().phase, Phase::PreInterview);
        assert!(orch.session().ui.error.is_some());
    }

    #[tokio::test]
    async fn denied_permission_blocks_start() {
        let speech = Arc::new(FakeSpeech {
            permitted: false,
            ..FakeSpeech::manual()
        });
        let mut interviewer = MockInterviewerClient::new();
        interviewer.expect_start_interview().never();

        let mut orch = orchestrator(speech, Arc::new(interviewer), ok_sink(), None);
        assert_eq!(
            orch.start(candidate()).await.unwrap_err(),
            InterviewError::PermissionDenied
        );
        assert_eq!(orch.state(), &State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_leaves_the_session_idle() {
        let mut interviewer = MockInterviewerClient::new();
        interviewer.expect_start_interview().returning(|_| {
            Err(anyhow::anyhow!("service unavailable"))
        });
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = orchestrator(speech, Arc::new(interviewer), ok_sink(), None);

        orch.start(candidate()).await.unwrap();
        assert!(!orch.step().await);
        assert_eq!(orch.state(), &State::Idle);
        assert!(
            orch.session()
                .ui
                .error
                .unwrap()
                .contains("service unavailable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_remote_call_retries_without_duplicating_the_answer() {
        let (interviewer, mut gates) = GatedInterviewer::new();
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = orchestrator(speech.clone(), Arc::new(interviewer), ok_sink(), None);

        orch.start(candidate()).await.unwrap();
        orch.step().await; // greeting arrives
        speech.finish_speaking();
        orch.step().await; // synthesis done
        orch.step().await; // capture armed
        assert!(orch.session().ui.is_listening());

        let before_call = orch.session().transcript.len();
        speech.answer("I design APIs.");
        orch.step().await; // speech started
        orch.step().await; // speech ended
        assert!(orch.session().ui.is_processing());

        gates.remove(0).send(Err("upstream 503".to_string())).unwrap();
        orch.step().await;
        assert_eq!(orch.state(), &State::Backoff(crate::machine::RetryTarget::Answer));
        assert_eq!(orch.session().transcript.len(), before_call + 1);
        assert!(orch.session().ui.error.unwrap().contains("upstream 503"));
        assert!(!speech.is_listening());

        // The backoff timer fires on its own with paused time.
        orch.step().await;
        assert_eq!(orch.state(), &State::Listening);
        orch.step().await; // capture armed
        speech.answer("I design REST and gRPC APIs.");
        orch.step().await;
        orch.step().await;
        assert_eq!(orch.session().transcript.len(), before_call + 1);

        gates
            .remove(0)
            .send(Ok(NextQuestion {
                response: "What about versioning?".to_string(),
                should_continue: true,
                updated_context: None,
            }))
            .unwrap();
        orch.step().await;

        let session = orch.session();
        assert!(matches!(orch.state(), State::Speaking(_)));
        assert!(session.ui.error.is_none());
        assert_eq!(session.transcript.len(), before_call + 2);
        assert_eq!(session.transcript[before_call].text, "I design REST and gRPC APIs.");
        assert!(session.alternates());
    }

    /// Greets normally, then never answers a question.
    struct Stalled;

    #[async_trait]
    impl InterviewerClient for Stalled {
        async fn start_interview(&self, candidate: &CandidateInfo) -> Result<OpeningLine> {
            Ok(OpeningLine {
                greeting: format!("Hi {}", candidate.name),
                context: InterviewContext::default(),
            })
        }

        async fn generate_next_question(
            &self,
            _answer: &str,
            _context: &InterviewContext,
        ) -> Result<NextQuestion> {
            std::future::pending::<Result<NextQuestion>>().await
        }

        async fn generate_feedback(&self, _context: &InterviewContext) -> Result<Feedback> {
            Ok(feedback())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_recoverable_failures() {
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = Orchestrator::new(
            speech.clone(),
            Arc::new(Stalled),
            Arc::new(ok_sink()),
            None,
            OrchestratorConfig {
                remote_timeout: Duration::from_millis(1500),
                ..OrchestratorConfig::default()
            },
        );

        orch.start(candidate()).await.unwrap();
        orch.step().await;
        speech.finish_speaking();
        orch.step().await;
        orch.step().await;
        speech.answer("hello");
        orch.step().await;
        orch.step().await;
        assert_eq!(orch.state(), &State::Processing);

        // Paused time jumps straight to the remote timeout.
        orch.step().await;
        assert!(matches!(orch.state(), State::Backoff(_)));
        let error = orch.session().ui.error.unwrap();
        assert!(error.contains("did not respond within 1.5s"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_mid_processing_ignores_the_late_reply() {
        let (interviewer, mut gates) = GatedInterviewer::new();
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = orchestrator(speech.clone(), Arc::new(interviewer), ok_sink(), None);

        orch.start(candidate()).await.unwrap();
        orch.step().await;
        speech.finish_speaking();
        orch.step().await;
        orch.step().await;
        speech.answer("An answer");
        orch.step().await;
        orch.step().await;
        assert_eq!(orch.state(), &State::Processing);

        orch.teardown();
        let frozen = orch.session();
        assert_eq!(*speech.destroyed.lock().unwrap(), 1);

        gates
            .remove(0)
            .send(Ok(NextQuestion {
                response: "Too late".to_string(),
                should_continue: true,
                updated_context: None,
            }))
            .unwrap();
        assert!(!orch.step().await);

        assert_eq!(orch.session(), frozen);
        assert!(speech.spoken.lock().unwrap().iter().all(|s| s != "Too late"));
        assert!(orch.outcome().torn_down);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_handle_stops_a_running_loop() {
        let (interviewer, _gates) = GatedInterviewer::new();
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = orchestrator(speech.clone(), Arc::new(interviewer), ok_sink(), None);
        let handle = orch.teardown_handle();

        orch.start(candidate()).await.unwrap();
        let run = tokio::spawn(orch.run());
        tokio::task::yield_now().await;
        handle.teardown();

        let outcome = run.await.unwrap();
        assert!(outcome.torn_down);
        assert_ne!(outcome.session.phase, Phase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_does_not_block_completion() {
        let speech = Arc::new(FakeSpeech::scripted(&["My answer."]));
        let interviewer = ScriptedInterviewer::new(vec![]);
        let mut sink = MockSessionSink::new();
        sink.expect_save()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let mut orch = orchestrator(speech, Arc::new(interviewer), sink, Some(user()));
        orch.start(candidate()).await.unwrap();
        let outcome = orch.run().await;

        assert_eq!(outcome.session.phase, Phase::Completed);
        assert!(outcome.session.feedback.is_some());
        assert!(outcome.session.ui.error.is_none());
        assert_eq!(outcome.persist_error.as_deref(), Some("permission denied"));
        assert!(outcome.saved_id.is_none());
    }

    /// A store that accepts the write and never answers.
    struct HangingSink;

    #[async_trait]
    impl SessionSink for HangingSink {
        async fn save(&self, _summary: &SessionSummary) -> Result<String> {
            std::future::pending::<Result<String>>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_save_still_completes_the_session() {
        let speech = Arc::new(FakeSpeech::scripted(&["My answer."]));
        let mut orch = Orchestrator::new(
            speech,
            Arc::new(ScriptedInterviewer::new(vec![])),
            Arc::new(HangingSink),
            Some(user()),
            OrchestratorConfig::default(),
        );
        orch.start(candidate()).await.unwrap();
        let outcome = orch.run().await;

        assert_eq!(outcome.session.phase, Phase::Completed);
        assert!(outcome.session.feedback.is_some());
        assert!(outcome.session.ui.error.is_none());
        assert_eq!(
            outcome.persist_error.as_deref(),
            Some("save timed out after 10s")
        );
        assert!(outcome.saved_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_errors_keep_listening() {
        let speech = Arc::new(FakeSpeech::manual());
        let interviewer = ScriptedInterviewer::default();
        let mut orch = orchestrator(speech.clone(), Arc::new(interviewer), ok_sink(), None);

        orch.start(candidate()).await.unwrap();
        orch.step().await;
        speech.finish_speaking();
        orch.step().await;
        orch.step().await;
        let transcript = orch.session().transcript;

        let capture = speech.capture.lock().unwrap().take().unwrap();
        capture.speech_error("No speech detected");
        orch.step().await;

        assert_eq!(orch.state(), &State::Listening);
        assert!(speech.is_listening());
        assert_eq!(orch.session().transcript, transcript);
        assert_eq!(orch.session().ui.error.as_deref(), Some("No speech detected"));

        orch.dismiss_error();
        assert!(orch.session().ui.error.is_none());
    }

    #[tokio::test]
    async fn events_from_another_session_are_ignored() {
        let speech = Arc::new(FakeSpeech::manual());
        let mut orch = orchestrator(
            speech.clone(),
            Arc::new(ScriptedInterviewer::default()),
            ok_sink(),
            None,
        );
        orch.start(candidate()).await.unwrap();
        orch.step().await;
        let revision = orch.session().revision;

        let stranger = SynthesisHandle::new(SessionToken::new(999), orch.events_tx.clone());
        stranger.complete();
        orch.step().await;
        assert_eq!(orch.session().revision, revision);
        assert!(matches!(orch.state(), State::Speaking(_)));
    }

    #[tokio::test]
    async fn ui_actions_toggle_the_transcript_panel() {
        let speech = Arc::new(FakeSpeech::manual());
        let orch = orchestrator(
            speech,
            Arc::new(ScriptedInterviewer::default()),
            ok_sink(),
            None,
        );
        assert!(orch.session().ui.show_transcript);
        orch.toggle_transcript();
        assert!(!orch.session().ui.show_transcript);
    }
}
