use crate::types::{
    CandidateInfo, Feedback, InterviewContext, NextQuestion, OpeningLine, Speaker, Turn,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// The interviewer is the only party that interprets the conversation
// context. Callers thread the `InterviewContext` through unchanged, so the
// orchestrator can run against the HTTP client below, the offline
// `ScriptedInterviewer`, or a mock in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterviewerClient: Send + Sync {
    /// Opening line plus the initial context. Called once per session.
    async fn start_interview(&self, candidate: &CandidateInfo) -> Result<OpeningLine>;

    async fn generate_next_question(
        &self,
        answer: &str,
        context: &InterviewContext,
    ) -> Result<NextQuestion>;

    /// Called once, after a response with `should_continue == false`.
    async fn generate_feedback(&self, context: &InterviewContext) -> Result<Feedback>;
}

/// Prompt templates for [`GeminiInterviewer`].
///
/// Placeholders are written `{name}`; unknown placeholders are left as-is so
/// literal JSON in the templates survives rendering.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub opening: String,
    pub next_question: String,
    pub feedback: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            opening: include_str!("../prompts/opening.md").to_string(),
            next_question: include_str!("../prompts/next_question.md").to_string(),
            feedback: include_str!("../prompts/feedback.md").to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in templates, overridden by any `opening`, `next_question` or
    /// `feedback` entry in `overrides`.
    pub fn with_overrides(mut overrides: HashMap<String, String>) -> Self {
        let mut prompts = Self::default();
        if let Some(p) = overrides.remove("opening") {
            prompts.opening = p;
        }
        if let Some(p) = overrides.remove("next_question") {
            prompts.next_question = p;
        }
        if let Some(p) = overrides.remove("feedback") {
            prompts.feedback = p;
        }
        for key in overrides.keys() {
            tracing::warn!("Ignoring unknown prompt template '{}'", key);
        }
        prompts
    }
}

pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// What the Gemini client keeps inside the opaque [`InterviewContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterviewNotes {
    candidate_name: String,
    role: String,
    is_first_time: bool,
    history: Vec<Turn>,
    questions_asked: u32,
    max_questions: u32,
}

impl InterviewNotes {
    fn from_context(context: &InterviewContext) -> Result<Self> {
        serde_json::from_value(context.as_value().clone())
            .context("Interview context does not hold Gemini interview notes")
    }

    fn to_context(&self) -> Result<InterviewContext> {
        Ok(InterviewContext::new(serde_json::to_value(self)?))
    }

    fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|turn| match turn.speaker {
                Speaker::Interviewer => format!("Interviewer: {}", turn.text),
                Speaker::Candidate => format!("Candidate: {}", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_out_of_questions(&self) -> bool {
        self.questions_asked >= self.max_questions
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpeningOut {
    greeting: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextOut {
    response: String,
    should_continue: bool,
}

/// Parses a JSON reply from the model, tolerating a surrounding code fence.
fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_end();
    let body = body.strip_suffix("```").unwrap_or(body).trim();
    serde_json::from_str(body).with_context(|| format!("Malformed interviewer reply: {raw}"))
}

fn sanitize_feedback(mut feedback: Feedback) -> Feedback {
    feedback.overall_score = feedback.overall_score.clamp(0.0, 100.0);
    feedback
}

/// [`InterviewerClient`] backed by the Gemini `generateContent` endpoint.
pub struct GeminiInterviewer {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    max_questions: u32,
    prompts: PromptSet,
}

impl GeminiInterviewer {
    pub fn new(api_key: SecretString, model: String, max_questions: u32, prompts: PromptSet) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            max_questions,
            prompts,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, prompt: String, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [{ "text": prompt }] }
            ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": temperature
            }
        });

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Interviewer request failed")?
            .error_for_status()
            .context("Interviewer service returned an error status")?
            .json::<GenerateContentResponse>()
            .await
            .context("Interviewer response was not valid JSON")?;

        resp.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| anyhow::anyhow!("No response from interviewer model"))
    }
}

#[async_trait]
impl InterviewerClient for GeminiInterviewer {
    async fn start_interview(&self, candidate: &CandidateInfo) -> Result<OpeningLine> {
        let first_time = if candidate.is_first_time { "yes" } else { "no" };
        let prompt = render(
            &self.prompts.opening,
            &[
                ("candidate_name", candidate.name.as_str()),
                ("role", candidate.role.as_str()),
                ("first_time", first_time),
            ],
        );

        let raw = self.generate(prompt, 0.7).await?;
        let out: OpeningOut = parse_model_json(&raw)?;

        let notes = InterviewNotes {
            candidate_name: candidate.name.clone(),
            role: candidate.role.clone(),
            is_first_time: candidate.is_first_time,
            history: vec![Turn::interviewer(out.greeting.clone())],
            questions_asked: 1,
            max_questions: self.max_questions,
        };

        Ok(OpeningLine {
            greeting: out.greeting,
            context: notes.to_context()?,
        })
    }

    async fn generate_next_question(
        &self,
        answer: &str,
        context: &InterviewContext,
    ) -> Result<NextQuestion> {
        let mut notes = InterviewNotes::from_context(context)?;
        let closing = notes.is_out_of_questions();
        let stage_instruction = if closing {
            "You have asked enough questions. Thank the candidate briefly, tell them the interview is over and that feedback is on its way. Set shouldContinue to false."
        } else {
            "Acknowledge the answer in one short sentence, then ask the next question. Prefer a follow-up if the answer was vague; otherwise move to a new topic relevant to the position. Set shouldContinue to true."
        };

        let transcript = notes.transcript();
        let questions_asked = notes.questions_asked.to_string();
        let max_questions = notes.max_questions.to_string();
        let prompt = render(
            &self.prompts.next_question,
            &[
                ("candidate_name", notes.candidate_name.as_str()),
                ("role", notes.role.as_str()),
                ("questions_asked", questions_asked.as_str()),
                ("max_questions", max_questions.as_str()),
                ("transcript", transcript.as_str()),
                ("answer", answer),
                ("stage_instruction", stage_instruction),
            ],
        );

        let raw = self.generate(prompt, 0.7).await?;
        let out: NextOut = parse_model_json(&raw)?;
        let should_continue = out.should_continue && !closing;

        notes.history.push(Turn::candidate(answer));
        notes.history.push(Turn::interviewer(out.response.clone()));
        if should_continue {
            notes.questions_asked += 1;
        }

        Ok(NextQuestion {
            response: out.response,
            should_continue,
            updated_context: Some(notes.to_context()?),
        })
    }

    async fn generate_feedback(&self, context: &InterviewContext) -> Result<Feedback> {
        let notes = InterviewNotes::from_context(context)?;
        let transcript = notes.transcript();
        let prompt = render(
            &self.prompts.feedback,
            &[
                ("candidate_name", notes.candidate_name.as_str()),
                ("role", notes.role.as_str()),
                ("transcript", transcript.as_str()),
            ],
        );

        let raw = self.generate(prompt, 0.2).await?;
        let feedback: Feedback = parse_model_json(&raw)?;
        Ok(sanitize_feedback(feedback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn notes() -> InterviewNotes {
        InterviewNotes {
            candidate_name: "Ada".to_string(),
            role: "Backend Engineer".to_string(),
            is_first_time: false,
            history: vec![
                Turn::interviewer("Hi Ada, tell me about yourself."),
                Turn::candidate("I write compilers."),
            ],
            questions_asked: 1,
            max_questions: 3,
        }
    }

    #[test]
    fn render_fills_known_placeholders_and_keeps_json() {
        let out = render(
            r#"Hello {name}. Reply as {"greeting": "..."} about {role}."#,
            &[("name", "Ada"), ("role", "SRE")],
        );
        assert_eq!(out, r#"Hello Ada. Reply as {"greeting": "..."} about SRE."#);
    }

    #[test]
    fn overrides_replace_only_named_templates() {
        let mut map = HashMap::new();
        map.insert("feedback".to_string(), "custom {transcript}".to_string());
        map.insert("unused".to_string(), "ignored".to_string());
        let prompts = PromptSet::with_overrides(map);

        assert_eq!(prompts.feedback, "custom {transcript}");
        assert_eq!(prompts.opening, PromptSet::default().opening);
    }

    #[test]
    fn model_json_may_be_fenced() {
        let plain: NextOut =
            parse_model_json(r#"{"response": "Why Rust?", "shouldContinue": true}"#).unwrap();
        assert!(plain.should_continue);

        let fenced: OpeningOut =
            parse_model_json("```json\n{\"greeting\": \"Welcome!\"}\n```").unwrap();
        assert_eq!(fenced.greeting, "Welcome!");

        assert!(parse_model_json::<NextOut>("Sure! Here is your question").is_err());
    }

    #[test]
    fn unclosed_fence_is_still_parsed() {
        let opened: OpeningOut = parse_model_json("```json\n{\"greeting\": \"Hi!\"}").unwrap();
        assert_eq!(opened.greeting, "Hi!");

        let closed_only: OpeningOut = parse_model_json("{\"greeting\": \"Hey\"}\n```").unwrap();
        assert_eq!(closed_only.greeting, "Hey");
    }

    /// Serves one HTTP exchange on a local port and hands back the raw request.
    async fn one_shot_server(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/v1beta"), handle)
    }

    fn local_interviewer(base_url: String) -> GeminiInterviewer {
        GeminiInterviewer::new(
            SecretString::from("test-key".to_string()),
            "test-model".to_string(),
            2,
            PromptSet::default(),
        )
        .with_base_url(base_url)
    }

    #[tokio::test]
    async fn opening_is_read_from_a_local_endpoint() {
        let reply = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"greeting\": \"Hello Ada\"}" }] }
            }]
        });
        let (base_url, server) = one_shot_server("200 OK", reply.to_string()).await;

        let opening = local_interviewer(base_url)
            .start_interview(&CandidateInfo::new("Ada", "Backend Engineer", false))
            .await
            .unwrap();
        assert_eq!(opening.greeting, "Hello Ada");
        let notes = InterviewNotes::from_context(&opening.context).unwrap();
        assert_eq!(notes.history, vec![Turn::interviewer("Hello Ada")]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1beta/models/test-model:generateContent"), "{request}");
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("Backend Engineer"));
    }

    #[tokio::test]
    async fn error_status_from_the_endpoint_is_an_error() {
        let (base_url, server) =
            one_shot_server("500 Internal Server Error", "{}".to_string()).await;

        let result = local_interviewer(base_url)
            .start_interview(&CandidateInfo::new("Ada", "SRE", true))
            .await;
        let error = format!("{:#}", result.unwrap_err());
        assert!(error.contains("error status"), "{error}");
        server.await.unwrap();
    }

    #[test]
    fn notes_round_trip_through_the_context() {
        let notes = notes();
        let context = notes.to_context().unwrap();
        assert_eq!(InterviewNotes::from_context(&context).unwrap(), notes);
        assert!(InterviewNotes::from_context(&InterviewContext::default()).is_err());
    }

    #[test]
    fn transcript_labels_each_speaker() {
        assert_eq!(
            notes().transcript(),
            "Interviewer: Hi Ada, tell me about yourself.\nCandidate: I write compilers."
        );
    }

    #[test]
    fn feedback_score_is_clamped() {
        let feedback = sanitize_feedback(Feedback {
            overall_score: 140.0,
            strengths: vec![],
            improvements: vec![],
            detailed_feedback: String::new(),
        });
        assert_eq!(feedback.overall_score, 100.0);
    }

    // Makes a live call to the Gemini API. Run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_live_opening_and_follow_up() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY not set");
        let interviewer = GeminiInterviewer::new(
            SecretString::from(api_key),
            "gemini-2.0-flash".to_string(),
            2,
            PromptSet::default(),
        );

        let candidate = CandidateInfo::new("Ada", "Backend Engineer", true);
        let opening = interviewer.start_interview(&candidate).await.unwrap();
        assert!(!opening.greeting.is_empty());

        let next = interviewer
            .generate_next_question("I have five years of Rust experience.", &opening.context)
            .await
            .unwrap();
        assert!(!next.response.is_empty());
        assert!(next.updated_context.is_some());
    }
}
