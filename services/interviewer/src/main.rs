use anyhow::{Context, Result};
use clap::Parser;
use interview_core::interviewer::{GeminiInterviewer, InterviewerClient, PromptSet};
use interview_core::persistence::JsonDirSink;
use interview_core::scripted_interviewer::ScriptedInterviewer;
use interview_core::session_state::StoreReader;
use interview_core::types::{CandidateInfo, UserIdentity};
use interview_core::{Orchestrator, SessionOutcome};
use interview_service::config::{Config, InterviewerProvider};
use interview_service::console_speech::ConsoleSpeech;
use interview_service::prompt_loader;
use interview_service::transcript_view::{TranscriptView, exit_code, format_feedback};
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Practice a job interview in the terminal")]
struct Cli {
    /// Your name, as the interviewer should address you
    name: String,
    /// The role you are interviewing for
    role: String,
    /// This is your first interview; the interviewer goes gently
    #[arg(long)]
    first_time: bool,
    /// Save the finished session under this user id
    #[arg(long)]
    user_id: Option<String>,
    /// Save the finished session under this email (used when no id is given)
    #[arg(long)]
    email: Option<String>,
}

impl Cli {
    fn user(&self) -> Option<UserIdentity> {
        if self.user_id.is_none() && self.email.is_none() {
            return None;
        }
        Some(UserIdentity {
            id: self.user_id.clone().unwrap_or_default(),
            email: self.email.clone().unwrap_or_default(),
            is_admin: false,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they do not interleave with the conversation.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Build the Interviewer ---
    let interviewer: Arc<dyn InterviewerClient> = match config.provider {
        InterviewerProvider::Gemini => {
            let prompts = match &config.prompts_dir {
                Some(dir) => prompt_loader::load_prompt_set(dir).context("Failed to load LLM prompts")?,
                None => PromptSet::default(),
            };
            let api_key = config
                .gemini_api_key
                .clone()
                .context("GEMINI_API_KEY must be set for gemini provider")?;
            tracing::info!("Using Gemini interviewer ({})", config.model);
            Arc::new(GeminiInterviewer::new(
                api_key,
                config.model.clone(),
                config.max_questions,
                prompts,
            ))
        }
        InterviewerProvider::Scripted => {
            tracing::info!("Using the offline scripted interviewer");
            Arc::new(ScriptedInterviewer::default())
        }
    };

    // --- 5. Wire the Orchestrator ---
    let user = args.user();
    if user.is_none() {
        tracing::info!("No --user-id or --email given; the session will not be saved");
    }
    let sink = Arc::new(JsonDirSink::new(config.sessions_dir.clone()));
    let speech = Arc::new(ConsoleSpeech::stdin(config.speech_ms_per_word));
    let mut orchestrator =
        Orchestrator::new(speech, interviewer, sink, user, config.orchestrator());

    let renderer = tokio::spawn(render(orchestrator.reader()));

    let teardown = orchestrator.teardown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, ending the interview...");
            teardown.teardown();
        }
    });

    // --- 6. Run the Interview ---
    orchestrator
        .start(CandidateInfo::new(args.name, args.role, args.first_time))
        .await
        .context("The interview could not start")?;
    let outcome = orchestrator.run().await;

    // The store is gone once `run` returns, so the renderer drains and exits.
    if let Err(e) = renderer.await {
        tracing::warn!("Transcript renderer stopped abnormally: {}", e);
    }

    report(&outcome);
    tracing::info!("Shutting down...");
    // A blocking stdin read may still be pending and would keep the runtime alive.
    std::process::exit(exit_code(&outcome))
}

async fn render(mut reader: StoreReader) {
    let mut view = TranscriptView::default();
    for line in view.update(&reader.snapshot()) {
        println!("{line}");
    }
    while let Ok(session) = reader.changed().await {
        for line in view.update(&session) {
            println!("{line}");
        }
    }
}

fn report(outcome: &SessionOutcome) {
    if outcome.torn_down {
        println!("\nInterview ended early.");
        return;
    }
    match &outcome.session.feedback {
        Some(feedback) => println!("\n{}", format_feedback(feedback)),
        None => {
            println!("\nThe interview ended without feedback.");
            if let Some(error) = &outcome.session.ui.error {
                println!("{error}");
            }
        }
    }
    if let Some(id) = &outcome.saved_id {
        println!("\nSession saved as {id}.");
    }
    if let Some(error) = &outcome.persist_error {
        println!("\nThe session could not be saved: {error}");
    }
}
