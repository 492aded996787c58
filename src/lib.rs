//! studybuddy - local AI study companion
//!
//! Pick an education level, subject and mode, ask a question, and a locally
//! running Ollama model explains the topic or writes a quiz question.

pub mod client;
pub mod config;
pub mod logging;
pub mod models;
pub mod prompt;
pub mod responder;
pub mod session;
pub mod ui;
