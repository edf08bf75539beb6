pub mod config;
pub mod console_speech;
pub mod prompt_loader;
pub mod transcript_view;
