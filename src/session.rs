//! Session-scoped chat state
//!
//! A `Session` owns the current selection (level, subject, mode, model) and
//! the transcript for one interactive run. Nothing is written to disk; the
//! transcript ends with the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prompt::{build_prompt, EducationLevel, Mode, Subject};
use crate::responder::TurnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Append-only conversation history
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// What the sidebar currently says
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub level: EducationLevel,
    pub subject: Subject,
    pub mode: Mode,
    pub model: Option<String>,
}

impl Selection {
    pub fn input_placeholder(&self) -> String {
        format!("Ask a {} question...", self.subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please install an Ollama model first!")]
    NoModelSelected,
    #[error("A response is still being generated")]
    TurnInFlight,
    #[error(transparent)]
    Turn(#[from] TurnError),
}

/// Active chat session
#[derive(Debug)]
pub struct Session {
    id: String,
    pub selection: Selection,
    transcript: Transcript,
    awaiting_reply: bool,
}

impl Session {
    pub fn new(selection: Selection) -> Self {
        Self {
            id: generate_session_id(),
            selection,
            transcript: Transcript::default(),
            awaiting_reply: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// Record the user's question and build the prompt for it.
    ///
    /// Returns the model to ask and the templated prompt. On error nothing is
    /// recorded.
    pub fn submit(&mut self, user_text: &str) -> Result<(String, String), SessionError> {
        if self.awaiting_reply {
            return Err(SessionError::TurnInFlight);
        }
        let model = self
            .selection
            .model
            .clone()
            .ok_or(SessionError::NoModelSelected)?;

        let Selection { level, subject, mode, .. } = self.selection;
        let prompt = build_prompt(mode, level, subject, user_text);

        self.transcript.push(Message::new(Role::User, user_text));
        self.awaiting_reply = true;
        Ok((model, prompt))
    }

    /// Record the single assistant reply (answer or error text) for the open turn
    pub fn complete(&mut self, text: &str) {
        if !self.awaiting_reply {
            tracing::warn!(session = %self.id, "assistant reply without a pending question; dropped");
            return;
        }
        self.transcript.push(Message::new(Role::Assistant, text));
        self.awaiting_reply = false;
    }
}

/// Unique session ID with random suffix to prevent collisions
fn generate_session_id() -> String {
    let now = Utc::now();
    let nanos = now.timestamp_subsec_nanos();
    let pid = std::process::id();
    let suffix = (nanos ^ pid) % 10000;
    format!("{}-{:04}", now.format("%Y%m%d-%H%M%S"), suffix)
}
