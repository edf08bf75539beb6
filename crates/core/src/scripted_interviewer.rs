use crate::interviewer::InterviewerClient;
use crate::types::{CandidateInfo, Feedback, InterviewContext, NextQuestion, OpeningLine};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An offline [`InterviewerClient`].
///
/// It makes no network calls: it walks a fixed list of questions and scores
/// the candidate on how much they said. Lets the console front-end run a full
/// interview without an API key.
pub struct ScriptedInterviewer {
    questions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptProgress {
    candidate_name: String,
    role: String,
    next_question: usize,
    answers: Vec<String>,
}

impl ScriptProgress {
    fn from_context(context: &InterviewContext) -> Result<Self> {
        serde_json::from_value(context.as_value().clone())
            .context("Interview context does not hold scripted interview progress")
    }

    fn to_context(&self) -> Result<InterviewContext> {
        Ok(InterviewContext::new(serde_json::to_value(self)?))
    }
}

impl Default for ScriptedInterviewer {
    fn default() -> Self {
        Self::new(vec![
            "What drew you to this kind of role?".to_string(),
            "Tell me about a project you are proud of and your part in it.".to_string(),
            "Describe a time you disagreed with a teammate. How did you resolve it?".to_string(),
            "How do you keep your skills current?".to_string(),
        ])
    }
}

impl ScriptedInterviewer {
    pub fn new(questions: Vec<String>) -> Self {
        Self { questions }
    }
}

#[async_trait]
impl InterviewerClient for ScriptedInterviewer {
    async fn start_interview(&self, candidate: &CandidateInfo) -> Result<OpeningLine> {
        let mut greeting = format!(
            "Hi {}, I'm Steven, and I'll be interviewing you for the {} position today.",
            candidate.name, candidate.role
        );
        if candidate.is_first_time {
            greeting.push_str(" Since this is your first interview, take your time with each answer.");
        }
        greeting.push_str(" To start, please introduce yourself.");

        let progress = ScriptProgress {
            candidate_name: candidate.name.clone(),
            role: candidate.role.clone(),
            next_question: 0,
            answers: vec![],
        };
        Ok(OpeningLine {
            greeting,
            context: progress.to_context()?,
        })
    }

    async fn generate_next_question(
        &self,
        answer: &str,
        context: &InterviewContext,
    ) -> Result<NextQuestion> {
        let mut progress = ScriptProgress::from_context(context)?;
        progress.answers.push(answer.to_string());

        let (response, should_continue) = match self.questions.get(progress.next_question) {
            Some(question) => {
                progress.next_question += 1;
                (format!("Thanks. {question}"), true)
            }
            None => (
                format!(
                    "Thank you, {}. That concludes our interview. I'll put your feedback together now.",
                    progress.candidate_name
                ),
                false,
            ),
        };

        Ok(NextQuestion {
            response,
            should_continue,
            updated_context: Some(progress.to_context()?),
        })
    }

    async fn generate_feedback(&self, context: &InterviewContext) -> Result<Feedback> {
        let progress = ScriptProgress::from_context(context)?;
        let words: Vec<usize> = progress
            .answers
            .iter()
            .map(|a| a.split_whitespace().count())
            .collect();
        let average = if words.is_empty() {
            0.0
        } else {
            words.iter().sum::<usize>() as f64 / words.len() as f64
        };
        // Roughly 40 words per answer earns full marks.
        let overall_score = (average / 40.0 * 100.0).clamp(0.0, 100.0).round();

        let mut strengths = vec![];
        let mut improvements = vec![];
        if words.iter().all(|&w| w >= 15) && !words.is_empty() {
            strengths.push("Answered every question with some depth.".to_string());
        } else {
            improvements.push("Give fuller answers with concrete examples.".to_string());
        }
        if average > 80.0 {
            improvements.push("Keep answers focused; some ran long.".to_string());
        } else {
            strengths.push("Kept answers concise.".to_string());
        }

        Ok(Feedback {
            overall_score,
            strengths,
            improvements,
            detailed_feedback: format!(
                "{}, you answered {} questions for the {} role with about {:.0} words per answer.",
                progress.candidate_name,
                words.len(),
                progress.role,
                average
            ),
        })
    }
}
