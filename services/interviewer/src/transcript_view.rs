use interview_core::SessionOutcome;
use interview_core::session_state::{Activity, Phase, Session};
use interview_core::types::{Feedback, Speaker};

/// Turns successive session snapshots into the lines the console prints.
///
/// Only what changed since the previous snapshot is emitted.
#[derive(Debug, Default)]
pub struct TranscriptView {
    shown_turns: usize,
    last_error: Option<String>,
    last_activity: Activity,
    last_phase: Phase,
}

impl TranscriptView {
    pub fn update(&mut self, session: &Session) -> Vec<String> {
        let mut lines = vec![];

        if session.ui.show_transcript {
            for turn in session.transcript.iter().skip(self.shown_turns) {
                let who = match turn.speaker {
                    Speaker::Interviewer => "Interviewer",
                    Speaker::Candidate => "You",
                };
                lines.push(format!("{who}: {}", turn.text));
            }
        }
        self.shown_turns = session.transcript.len();

        if session.ui.error != self.last_error {
            if let Some(error) = &session.ui.error {
                lines.push(format!("[!] {error}"));
            }
            self.last_error = session.ui.error.clone();
        }

        if session.ui.activity != self.last_activity {
            match session.ui.activity {
                Activity::Listening => lines.push("(your turn, type your answer)".to_string()),
                Activity::Processing => lines.push("(thinking...)".to_string()),
                Activity::Idle | Activity::Speaking => {}
            }
            self.last_activity = session.ui.activity;
        }

        if session.phase != self.last_phase {
            if session.phase == Phase::Closing {
                lines.push("(wrapping up, preparing your feedback)".to_string());
            }
            self.last_phase = session.phase;
        }

        lines
    }
}

pub fn format_feedback(feedback: &Feedback) -> String {
    let mut out = format!("Overall score: {:.0}/100\n", feedback.overall_score);
    if !feedback.strengths.is_empty() {
        out.push_str("\nStrengths:\n");
        for s in &feedback.strengths {
            out.push_str(&format!("  + {s}\n"));
        }
    }
    if !feedback.improvements.is_empty() {
        out.push_str("\nTo improve:\n");
        for s in &feedback.improvements {
            out.push_str(&format!("  - {s}\n"));
        }
    }
    out.push('\n');
    out.push_str(&feedback.detailed_feedback);
    out
}

/// Process exit status for a finished run: non-zero when the interview ended
/// without feedback and was not cut short by the user.
pub fn exit_code(outcome: &SessionOutcome) -> i32 {
    if outcome.torn_down || outcome.session.feedback.is_some() {
        0
    } else {
        1
    }
}
