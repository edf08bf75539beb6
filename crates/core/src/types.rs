use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a turn of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Interviewer,
    Candidate,
}

impl Speaker {
    /// The speaker expected to follow this one.
    pub fn other(self) -> Self {
        match self {
            Speaker::Interviewer => Speaker::Candidate,
            Speaker::Candidate => Speaker::Interviewer,
        }
    }
}

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn interviewer(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Interviewer,
            text: text.into(),
        }
    }

    pub fn candidate(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Candidate,
            text: text.into(),
        }
    }
}

/// Final scoring produced by the interviewer once the conversation closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub overall_score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub detailed_feedback: String,
}

/// Conversation state owned by the remote interviewer.
///
/// The orchestrator only stores and forwards it. Its shape is whatever the
/// [`InterviewerClient`](crate::interviewer::InterviewerClient) implementation
/// decides to put inside.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterviewContext(Value);

impl InterviewContext {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Details collected before the interview starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInfo {
    pub name: String,
    pub role: String,
    pub is_first_time: bool,
}

impl CandidateInfo {
    pub fn new(name: impl Into<String>, role: impl Into<String>, is_first_time: bool) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            is_first_time,
        }
    }
}

/// The signed-in user, as supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
}

impl UserIdentity {
    /// Key used to tag persisted sessions: the user id, or the email when the id is blank.
    pub fn owner_key(&self) -> &str {
        if self.id.trim().is_empty() {
            &self.email
        } else {
            &self.id
        }
    }
}

/// Result of `start_interview`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningLine {
    pub greeting: String,
    pub context: InterviewContext,
}

/// Result of `generate_next_question`.
#[derive(Debug, Clone, PartialEq)]
pub struct NextQuestion {
    pub response: String,
    pub should_continue: bool,
    pub updated_context: Option<InterviewContext>,
}
