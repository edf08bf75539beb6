//! Turn-taking engine for spoken mock interviews.
//!
//! The [`orchestrator::Orchestrator`] sequences speech capture, calls to a
//! remote interviewer and speech synthesis into one conversation, writing
//! every step into a [`session_state::SessionStore`]. Decisions are made by
//! the pure [`machine::TurnMachine`], which answers each [`events::Event`]
//! with the [`machine::Command`]s the runtime should execute.

pub mod error;
pub mod events;
pub mod interviewer;
pub mod machine;
pub mod orchestrator;
pub mod persistence;
pub mod scripted_interviewer;
pub mod session_state;
pub mod speech;
pub mod types;

pub use error::InterviewError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionOutcome, TeardownHandle};
