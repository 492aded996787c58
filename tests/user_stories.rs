//! User Story Integration Tests
//!
//! These tests trace complete user workflows with logging to verify
//! the system behaves correctly from the user's perspective.
//!
//! Each test represents a real user story:
//! - "As a student, I want to..."
//! - Tests verify the expected output/behavior
//! - Logs are captured for debugging
//!
//! The inference server is replaced by `FakeOllama`, which replays scripted
//! listings and fragment streams.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use studybuddy::client::{ClientError, GenerationStats, InferenceBackend, StreamEvent};
use studybuddy::models::{ModelCatalog, ModelListing};
use studybuddy::prompt::{build_prompt, EducationLevel, Mode, Subject, CORRECT_MARKER};
use studybuddy::responder::{run_turn, TurnOutcome, CURSOR_GLYPH};
use studybuddy::session::{Role, Selection, Session, SessionError};

/// Test helper to capture and display trace logs
struct TestTracer {
    name: String,
    logs: Vec<String>,
}

impl TestTracer {
    fn new(name: &str) -> Self {
        eprintln!("\n╔═══════════════════════════════════════════════════════════════");
        eprintln!("║ USER STORY: {}", name);
        eprintln!("╚═══════════════════════════════════════════════════════════════\n");
        Self {
            name: name.to_string(),
            logs: vec![],
        }
    }

    fn step(&mut self, description: &str) {
        let msg = format!("  → {}", description);
        eprintln!("{}", msg);
        self.logs.push(msg);
    }

    fn expect(&mut self, condition: bool, description: &str) {
        let status = if condition { "✓" } else { "✗" };
        let msg = format!("    {} {}", status, description);
        eprintln!("{}", msg);
        self.logs.push(msg);
        assert!(condition, "FAILED: {}", description);
    }

    fn done(&self) {
        eprintln!("\n  ══════════════════════════════════════════════════════");
        eprintln!("  ✓ Story completed: {}", self.name);
        eprintln!();
    }
}

// ═══════════════════════════════════════════════════════════════
// FAKE INFERENCE SERVER
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
enum Listing {
    Json(serde_json::Value),
    Down,
}

struct FakeOllama {
    listing: Mutex<Listing>,
    installed: Vec<String>,
    fragments: Vec<String>,
    fail_mid_stream: Option<String>,
    list_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeOllama {
    fn new(installed: &[&str], fragments: &[&str]) -> Self {
        Self {
            listing: Mutex::new(Listing::Json(json!({
                "models": installed.iter().map(|m| json!({"name": m, "model": m})).collect::<Vec<_>>()
            }))),
            installed: installed.iter().map(|s| s.to_string()).collect(),
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fail_mid_stream: None,
            list_calls: AtomicUsize::new(0),
            prompts: Mutex::new(vec![]),
        }
    }

    fn with_listing(self, listing: Listing) -> Self {
        *self.listing.lock().unwrap() = listing;
        self
    }
}

#[async_trait]
impl InferenceBackend for FakeOllama {
    async fn list_models(&self) -> Result<ModelListing, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match self.listing.lock().unwrap().clone() {
            Listing::Json(v) => ModelListing::from_json(v),
            Listing::Down => Err(ClientError::Transport("connection refused".into())),
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>, ClientError> {
        if !self.installed.iter().any(|m| m == model) {
            return Err(ClientError::ModelNotFound {
                model: model.to_string(),
            });
        }
        self.prompts.lock().unwrap().push(prompt.to_string());

        let (tx, rx) = mpsc::channel(16);
        let fragments = self.fragments.clone();
        let fail = self.fail_mid_stream.clone();
        tokio::spawn(async move {
            for f in fragments {
                let _ = tx.send(StreamEvent::Fragment(f)).await;
            }
            let last = match fail {
                Some(e) => StreamEvent::Error(ClientError::Transport(e)),
                None => StreamEvent::Done(GenerationStats {
                    prompt_tokens: 10,
                    completion_tokens: 2,
                    total_duration: Duration::from_millis(20),
                }),
            };
            let _ = tx.send(last).await;
        });
        Ok(rx)
    }
}

fn session_for(model: &str) -> Session {
    Session::new(Selection {
        model: Some(model.to_string()),
        ..Default::default()
    })
}

// ═══════════════════════════════════════════════════════════════
// STORY: Picking a model
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn story_model_list_same_for_every_shape() {
    let mut t = TestTracer::new("Model list is the same whatever shape the server uses");

    let shapes = vec![
        ("tags object", json!({"models": [{"model": "llama3"}, {"name": "gemma3"}, {"id": "phi3"}, {"name": "llama3"}]})),
        ("data object", json!({"data": [{"id": "llama3"}, {"id": "gemma3"}, {"id": "phi3"}]})),
        ("flat strings", json!(["llama3", "gemma3", "phi3", "gemma3"])),
    ];

    let mut results = vec![];
    for (label, shape) in shapes {
        t.step(&format!("Given the server answers with a {}", label));
        let backend = Arc::new(FakeOllama::new(&[], &[]).with_listing(Listing::Json(shape)));
        let mut catalog = ModelCatalog::new(backend, Duration::from_secs(30));
        let models = catalog.list_models().await;
        t.expect(catalog.last_error().is_none(), "Listing decoded");
        results.push(models);
    }

    t.expect(
        results.iter().all(|r| r == &results[0]),
        "All shapes yield the same list",
    );
    t.expect(
        results[0] == vec!["gemma3", "llama3", "phi3"],
        "Preferred gemma3 first, then llama3, then the rest",
    );

    t.done();
}

#[tokio::test]
async fn story_server_down_yields_empty_list() {
    let mut t = TestTracer::new("Unreachable server shows an empty model list, not a crash");

    t.step("Given Ollama is not running");
    let backend = Arc::new(FakeOllama::new(&[], &[]).with_listing(Listing::Down));
    let mut catalog = ModelCatalog::new(backend.clone(), Duration::from_secs(30));

    t.step("When the sidebar asks for models");
    let models = catalog.list_models().await;
    t.expect(models.is_empty(), "No models listed");
    t.expect(
        catalog.last_error().is_some_and(|e| e.contains("connection refused")),
        "Failure text kept for the sidebar",
    );

    t.step("When the sidebar asks again");
    catalog.list_models().await;
    t.expect(
        backend.list_calls.load(Ordering::SeqCst) == 2,
        "Failures are not cached",
    );

    t.done();
}

#[tokio::test]
async fn story_model_list_cached_until_invalidated() {
    let mut t = TestTracer::new("Model list is reused across refreshes");

    let backend = Arc::new(FakeOllama::new(&["mistral", "gemma2"], &[]));
    let mut catalog = ModelCatalog::new(backend.clone(), Duration::from_secs(300));

    t.step("When the UI refreshes three times");
    let first = catalog.list_models().await;
    catalog.list_models().await;
    catalog.list_models().await;
    t.expect(backend.list_calls.load(Ordering::SeqCst) == 1, "Only one request sent");
    t.expect(first == vec!["gemma2", "mistral"], "gemma2 outranks mistral");

    t.step("When the user forces a refresh");
    catalog.invalidate();
    catalog.list_models().await;
    t.expect(backend.list_calls.load(Ordering::SeqCst) == 2, "Refetched after invalidate");

    t.step("Given a zero TTL");
    let mut uncached = ModelCatalog::new(backend.clone(), Duration::ZERO);
    uncached.list_models().await;
    uncached.list_models().await;
    t.expect(backend.list_calls.load(Ordering::SeqCst) == 4, "Every call refetches");

    t.done();
}

// ═══════════════════════════════════════════════════════════════
// STORY: Asking questions
// ═══════════════════════════════════════════════════════════════

#[test]
fn story_prompts_follow_mode() {
    let mut t = TestTracer::new("Explanation and quiz prompts differ by mode");

    t.step("Given a high-school physics explanation request");
    let explain = build_prompt(Mode::Explain, EducationLevel::HighSchool, Subject::Physics, "gravity");
    t.expect(explain.contains("High School"), "Level present");
    t.expect(explain.contains("Physics"), "Subject present");
    t.expect(explain.contains("gravity"), "Question present");
    t.expect(!explain.contains(CORRECT_MARKER), "No quiz marker");

    t.step("Given a graduate math quiz request");
    let quiz = build_prompt(Mode::Quiz, EducationLevel::Graduate, Subject::Math, "eigenvalues");
    t.expect(quiz.contains(CORRECT_MARKER), "Correct-answer marker requested");
    t.expect(quiz.contains("eigenvalues"), "Topic present");

    t.done();
}

#[tokio::test]
async fn story_streamed_answer_lands_in_transcript() {
    let mut t = TestTracer::new("Streamed answer grows on screen and is saved once");

    let backend = FakeOllama::new(&["gemma3"], &["Hel", "lo"]);
    let mut session = session_for("gemma3");
    session.selection.subject = Subject::Physics;

    t.step("When the student asks about gravity");
    let mut emissions = vec![];
    let outcome = run_turn(&backend, &mut session, "gravity", |text| emissions.push(text.to_string()))
        .await
        .unwrap();

    t.expect(emissions == vec!["Hel", "Hello"], "Cumulative text emitted per fragment");
    t.expect(
        matches!(&outcome, TurnOutcome::Completed { text, stats } if text == "Hello" && stats.completion_tokens == 2),
        "Turn completed with stats",
    );

    let messages = session.transcript().messages();
    t.expect(messages.len() == 2, "User + assistant message");
    t.expect(messages[1].content() == "Hello", "Final answer stored");
    t.expect(!messages[1].content().contains(CURSOR_GLYPH), "No cursor in stored text");

    let prompts = backend.prompts.lock().unwrap();
    t.expect(prompts[0].contains("Physics") && prompts[0].contains("gravity"), "Templated prompt sent");

    t.done();
}

#[tokio::test]
async fn story_missing_model_gives_install_command() {
    let mut t = TestTracer::new("Unknown model explains how to install it");

    let backend = FakeOllama::new(&["gemma3"], &["fine"]);
    let mut session = session_for("qwen2:7b");

    t.step("When asking with a model that isn't installed");
    let outcome = run_turn(&backend, &mut session, "photosynthesis", |_| {}).await;
    t.expect(outcome.is_ok(), "Error does not escape the turn");

    let last = session.transcript().last().unwrap();
    t.expect(last.role() == Role::Assistant, "Reply recorded as assistant");
    t.expect(last.content().contains("ollama pull qwen2:7b"), "Install command included");

    t.step("When the student switches model and asks again");
    session.selection.model = Some("gemma3".into());
    let next = run_turn(&backend, &mut session, "photosynthesis", |_| {}).await.unwrap();
    t.expect(next.text() == "fine", "Next turn still works");

    t.done();
}

#[tokio::test]
async fn story_stream_failure_replaces_partial_answer() {
    let mut t = TestTracer::new("Connection drop mid-answer records one error reply");

    let mut backend = FakeOllama::new(&["llama3"], &["The mito", "chondria"]);
    backend.fail_mid_stream = Some("connection reset by peer".into());
    let mut session = session_for("llama3");

    let outcome = run_turn(&backend, &mut session, "cells", |_| {}).await.unwrap();
    t.expect(
        matches!(&outcome, TurnOutcome::Errored { error: ClientError::Transport(_), .. }),
        "Transport error reported",
    );

    let last = session.transcript().last().unwrap().content().to_string();
    t.expect(last.starts_with("❌ Error:"), "Generic error message");
    t.expect(last.contains("connection reset by peer"), "Failure text embedded");
    t.expect(!last.contains("mito"), "Partial output discarded");

    t.done();
}

#[tokio::test]
async fn story_no_model_selected_blocks_submit() {
    let mut t = TestTracer::new("Submitting without any installed model is refused");

    let backend = FakeOllama::new(&[], &[]);
    let mut session = Session::new(Selection::default());

    let result = run_turn(&backend, &mut session, "hello", |_| {}).await;
    t.expect(result == Err(SessionError::NoModelSelected), "Refused with install hint");
    t.expect(session.transcript().is_empty(), "Transcript untouched");

    t.done();
}

#[tokio::test]
async fn story_transcript_alternates() {
    let mut t = TestTracer::new("Transcript alternates user/assistant across turns");

    let backend = FakeOllama::new(&["gemma3"], &["ok"]);
    let mut session = session_for("gemma3");

    t.step("When five turns run, two of them against a missing model");
    for i in 0..5 {
        let model = if i % 2 == 1 { "ghost" } else { "gemma3" };
        session.selection.model = Some(model.to_string());
        run_turn(&backend, &mut session, &format!("question {}", i), |_| {})
            .await
            .unwrap();
    }

    let messages = session.transcript().messages();
    t.expect(messages.len() == 10, "2N messages");
    t.expect(
        messages.iter().enumerate().all(|(i, m)| {
            m.role() == if i % 2 == 0 { Role::User } else { Role::Assistant }
        }),
        "Roles alternate starting with user",
    );

    t.done();
}
