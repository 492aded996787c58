//! One question/answer exchange
//!
//! `Turn` tracks a single generation from request to the final transcript
//! entry. `run_turn` drives a whole exchange against a backend for callers
//! that can simply await it (one-shot CLI, tests); the TUI feeds the same
//! `Turn` from its event loop instead.

use crate::client::{ClientError, GenerationStats, InferenceBackend, StreamEvent};
use crate::session::{Session, SessionError};

/// Overlaid on in-progress text
pub const CURSOR_GLYPH: &str = "▌";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Errored,
}

impl TurnState {
    pub fn is_active(&self) -> bool {
        matches!(self, TurnState::Requesting | TurnState::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Errored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid turn transition: {action} while {from:?}")]
pub struct TurnError {
    pub from: TurnState,
    pub action: &'static str,
}

/// Accumulates a streamed response
#[derive(Debug)]
pub struct Turn {
    state: TurnState,
    text: String,
    fragments: usize,
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

impl Turn {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            text: String::new(),
            fragments: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    fn check(&self, action: &'static str, allowed: &[TurnState]) -> Result<(), TurnError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TurnError {
                from: self.state,
                action,
            })
        }
    }

    /// Idle -> Requesting
    pub fn begin(&mut self) -> Result<(), TurnError> {
        self.check("begin", &[TurnState::Idle])?;
        self.state = TurnState::Requesting;
        Ok(())
    }

    /// Append a fragment; returns the cumulative text
    pub fn push_fragment(&mut self, fragment: &str) -> Result<&str, TurnError> {
        self.check("push_fragment", &[TurnState::Requesting, TurnState::Streaming])?;
        self.state = TurnState::Streaming;
        self.text.push_str(fragment);
        self.fragments += 1;
        Ok(&self.text)
    }

    /// Text to render right now (cursor while in progress)
    pub fn display_text(&self) -> String {
        if self.state.is_active() {
            format!("{}{}", self.text, CURSOR_GLYPH)
        } else {
            self.text.clone()
        }
    }

    /// Streaming -> Completed; returns the final text
    pub fn finish(&mut self) -> Result<String, TurnError> {
        self.check("finish", &[TurnState::Requesting, TurnState::Streaming])?;
        self.state = TurnState::Completed;
        Ok(self.text.clone())
    }

    /// Requesting/Streaming -> Errored; partial output is replaced by the message
    pub fn fail(&mut self, err: &ClientError) -> Result<String, TurnError> {
        self.check("fail", &[TurnState::Requesting, TurnState::Streaming])?;
        self.state = TurnState::Errored;
        self.text = error_message(err);
        Ok(self.text.clone())
    }
}

/// Human-readable text committed to the transcript for a failed turn
pub fn error_message(err: &ClientError) -> String {
    match err {
        ClientError::ModelNotFound { model } => format!(
            "❌ Model '{}' not found. Please install it using: `{}`",
            model,
            install_command(model)
        ),
        other => format!("❌ Error: {}", other),
    }
}

pub fn install_command(model: &str) -> String {
    format!("ollama pull {}", model)
}

/// Result of `run_turn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        text: String,
        stats: GenerationStats,
    },
    Errored {
        message: String,
        error: ClientError,
    },
}

impl TurnOutcome {
    /// The text that went into the transcript
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed { text, .. } => text,
            TurnOutcome::Errored { message, .. } => message,
        }
    }
}

/// Drive one exchange end to end.
///
/// `on_update` receives the cumulative text after every fragment. Generation
/// failures are absorbed into the transcript; only a missing model
/// selection is returned as an error, and it leaves the transcript untouched.
pub async fn run_turn<F>(
    backend: &dyn InferenceBackend,
    session: &mut Session,
    user_text: &str,
    on_update: F,
) -> Result<TurnOutcome, SessionError>
where
    F: FnMut(&str),
{
    let (model, prompt) = session.submit(user_text)?;
    tracing::info!(model = %model, chars = prompt.len(), "requesting generation");

    let mut turn = Turn::new();
    let driven = drive(backend, &mut turn, &model, &prompt, on_update).await;
    settle(session, &turn, driven)
}

async fn drive<F>(
    backend: &dyn InferenceBackend,
    turn: &mut Turn,
    model: &str,
    prompt: &str,
    mut on_update: F,
) -> Result<TurnOutcome, TurnError>
where
    F: FnMut(&str),
{
    turn.begin()?;

    let mut rx = match backend.generate(model, prompt).await {
        Ok(rx) => rx,
        Err(e) => {
            return Ok(TurnOutcome::Errored {
                message: turn.fail(&e)?,
                error: e,
            })
        }
    };

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Fragment(f) => on_update(turn.push_fragment(&f)?),
            StreamEvent::Done(stats) => {
                return Ok(TurnOutcome::Completed {
                    text: turn.finish()?,
                    stats,
                })
            }
            StreamEvent::Error(e) => {
                return Ok(TurnOutcome::Errored {
                    message: turn.fail(&e)?,
                    error: e,
                })
            }
        }
    }

    // Channel closed without a final event
    let e = ClientError::Stream("stream ended without completion".into());
    Ok(TurnOutcome::Errored {
        message: turn.fail(&e)?,
        error: e,
    })
}

/// Commit exactly one assistant message for the submitted question,
/// even when the turn itself broke down.
fn settle(
    session: &mut Session,
    turn: &Turn,
    driven: Result<TurnOutcome, TurnError>,
) -> Result<TurnOutcome, SessionError> {
    let outcome = match driven {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "turn aborted");
            session.complete(&format!("❌ Error: {}", e));
            return Err(e.into());
        }
    };

    match &outcome {
        TurnOutcome::Completed { stats, .. } => tracing::info!(
            fragments = turn.fragments(),
            completion_tokens = stats.completion_tokens,
            "generation completed"
        ),
        TurnOutcome::Errored { error, .. } => tracing::warn!(error = %error, "generation failed"),
    }

    session.complete(outcome.text());
    Ok(outcome)
}
