//! studybuddy - local AI study buddy
//!
//! USAGE:
//!   studybuddy [--model M] [--level L] [--subject S] [--mode M]   # interactive TUI
//!   studybuddy ask "<question>" [FLAGS]                            # one-shot answer
//!   studybuddy models                                              # installed models
//!   studybuddy pull <model>                                        # install via ollama
//!   studybuddy doctor                                              # check server, store, config
//!   studybuddy config set <key> <value>                            # non-interactive config

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use studybuddy::client::{InferenceBackend, OllamaClient};
use studybuddy::config::{self, Config};
use studybuddy::models::{model_hint, ModelCatalog};
use studybuddy::responder::{self, TurnOutcome};
use studybuddy::session::{Selection, Session};
use studybuddy::{logging, ui};

// ═══════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, PartialEq, Eq)]
struct SelectionArgs {
    model: Option<String>,
    level: Option<String>,
    subject: Option<String>,
    mode: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Interactive(SelectionArgs),
    Ask { question: String, selection: SelectionArgs },
    Models,
    Pull { model: String },
    Doctor,
    ConfigSet { key: String, value: String },
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(Command::Help);
    }

    match args.first().map(|s| s.as_str()) {
        Some("doctor") => return Ok(Command::Doctor),
        Some("models") => return Ok(Command::Models),
        Some("pull") => {
            let model = args.get(1).cloned().context("Usage: studybuddy pull <model>")?;
            return Ok(Command::Pull { model });
        }
        Some("config") => {
            if args.get(1).map(|s| s.as_str()) == Some("set") {
                if let (Some(key), Some(value)) = (args.get(2), args.get(3)) {
                    return Ok(Command::ConfigSet {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
            anyhow::bail!("Usage: studybuddy config set <key> <value>");
        }
        _ => {}
    }

    let (question, rest) = if args.first().map(|s| s.as_str()) == Some("ask") {
        let question = args.get(1).cloned().context("Usage: studybuddy ask \"<question>\"")?;
        (Some(question), &args[2..])
    } else {
        (None, args)
    };

    let mut selection = SelectionArgs::default();
    let mut i = 0;
    while i < rest.len() {
        let slot = match rest[i].as_str() {
            "--model" | "-m" => &mut selection.model,
            "--level" | "-l" => &mut selection.level,
            "--subject" | "-s" => &mut selection.subject,
            "--mode" => &mut selection.mode,
            "--quiz" | "-q" => {
                selection.mode = Some("quiz".into());
                i += 1;
                continue;
            }
            other => anyhow::bail!("Unknown argument: {}. See --help", other),
        };
        i += 1;
        *slot = Some(
            rest.get(i)
                .cloned()
                .with_context(|| format!("Missing value for {}", rest[i - 1]))?,
        );
        i += 1;
    }

    Ok(match question {
        Some(question) => Command::Ask { question, selection },
        None => Command::Interactive(selection),
    })
}

fn print_help() {
    println!(r#"studybuddy - Local AI Study Buddy (Ollama powered)

USAGE:
    studybuddy [FLAGS]                     # interactive tutor
    studybuddy ask "<question>" [FLAGS]    # one-shot answer on stdout
    studybuddy models                      # list installed models
    studybuddy pull <model>                # install a model via `ollama pull`
    studybuddy doctor                      # check server, model store, config
    studybuddy config set <key> <value>    # keys: host, model, level, subject, mode, models_cache_secs

FLAGS:
    -m, --model <name>      Model to use (default: best installed)
    -l, --level <level>     School | High School | Graduate | PG/PhD
    -s, --subject <name>    Math | History | Computer Science | Physics | Biology | Chemistry
        --mode <mode>       explain | quiz
    -q, --quiz              Shorthand for --mode quiz
    -h, --help              Show this help

CONFIG:
    ~/.config/studybuddy/config.json      Host, default model and preferences
    ~/.local/state/studybuddy/            Log file
    ./.ollama/models                      Model store (OLLAMA_MODELS)

ENVIRONMENT:
    OLLAMA_HOST          Ollama address (default http://127.0.0.1:11434)
    OLLAMA_MODELS        Model store; defaults to ./.ollama/models
    STUDYBUDDY_LOG       Log filter, e.g. debug or studybuddy=trace

CONTROLS (interactive mode):
    F2/F3/F4   Cycle level / subject / mode
    F5         Pick model
    F6         Refresh model list
    Tab        Switch Chat / Log
    PgUp/PgDn  Scroll
    Esc        Quit
"#);
}

// ═══════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        print_help();
        return Ok(());
    }

    // Environment is set while the process is still single-threaded
    let cwd = std::env::current_dir().context("Could not determine working directory")?;
    let store = config::prepare_model_store(&cwd)?;
    let _log_guard = logging::init(&config::state_dir()?)?;
    tracing::info!(store = %store.display(), ?command, "starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(dispatch(command, &store))
}

async fn dispatch(command: Command, store: &std::path::Path) -> Result<()> {
    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Doctor => run_doctor(store).await,
        Command::Models => run_models().await,
        Command::Pull { model } => run_pull(&model, store).await,
        Command::ConfigSet { key, value } => run_config_set(&key, &value),
        Command::Ask { question, selection } => run_ask(&question, selection).await,
        Command::Interactive(selection) => run_interactive(selection).await,
    }
}

// ═══════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════

fn connect(cfg: &Config) -> Result<Arc<OllamaClient>> {
    let host = config::resolve_host(cfg);
    let client = OllamaClient::new(&host).context("Failed to build HTTP client")?;
    Ok(Arc::new(client))
}

fn catalog_for(cfg: &Config, backend: Arc<dyn InferenceBackend>) -> ModelCatalog {
    ModelCatalog::new(backend, Duration::from_secs(cfg.models_cache_secs))
}

/// Flags override config; config overrides defaults
fn build_selection(cfg: &Config, args: &SelectionArgs) -> Result<Selection> {
    let mut selection = Selection::default();

    if let Some(level) = args.level.as_ref().or(cfg.education_level.as_ref()) {
        selection.level = level.parse()?;
    }
    if let Some(subject) = args.subject.as_ref().or(cfg.subject.as_ref()) {
        selection.subject = subject.parse()?;
    }
    if let Some(mode) = args.mode.as_ref().or(cfg.mode.as_ref()) {
        selection.mode = mode.parse()?;
    }
    selection.model = args.model.clone();

    Ok(selection)
}

/// Explicit flag wins; then the configured default if installed; then the top of the list
fn choose_model(args: &SelectionArgs, cfg: &Config, installed: &[String]) -> Option<String> {
    args.model
        .clone()
        .or_else(|| cfg.default_model.clone().filter(|m| installed.contains(m)))
        .or_else(|| installed.first().cloned())
}

async fn run_doctor(store: &std::path::Path) -> Result<()> {
    println!("studybuddy doctor\n");

    let cfg = Config::load()?;
    let config_path = config::config_path()?;
    println!("[{}] Config: {}",
        if config_path.exists() { "✓" } else { "-" },
        config_path.display()
    );
    println!("[{}] Model store: {}", if store.is_dir() { "✓" } else { "✗" }, store.display());

    let client = connect(&cfg)?;
    print!("[?] Ollama at {}: checking...", client.base_url());
    std::io::stdout().flush()?;
    match client.check_connectivity().await {
        Ok(version) => println!("\r[✓] Ollama at {}: version {}          ", client.base_url(), version),
        Err(e) => {
            println!("\r[✗] Ollama at {}: {}", client.base_url(), e);
            println!("    Make sure Ollama is running: `ollama serve`");
        }
    }

    let mut catalog = catalog_for(&cfg, client);
    let models = catalog.list_models().await;
    println!("[{}] Models: {} installed", if models.is_empty() { "✗" } else { "✓" }, models.len());
    let chosen = choose_model(&SelectionArgs::default(), &cfg, &models);
    if let Some(hint) = model_hint(chosen.as_deref(), &models, catalog.last_error().is_some()) {
        for line in hint.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

async fn run_models() -> Result<()> {
    let cfg = Config::load()?;
    let mut catalog = catalog_for(&cfg, connect(&cfg)?);
    let models = catalog.list_models().await;

    if let Some(err) = catalog.last_error() {
        eprintln!("Error connecting to Ollama: {}", err);
    }

    let chosen = choose_model(&SelectionArgs::default(), &cfg, &models);
    for m in &models {
        let mark = if Some(m) == chosen.as_ref() { "*" } else { " " };
        println!("{} {}", mark, m);
    }
    if let Some(hint) = model_hint(chosen.as_deref(), &models, catalog.last_error().is_some()) {
        println!();
        for line in hint.lines() {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn run_pull(model: &str, store: &std::path::Path) -> Result<()> {
    println!("Pulling {} into {}", model, store.display());
    let status = tokio::process::Command::new("ollama")
        .arg("pull")
        .arg(model)
        .env(config::MODELS_ENV, store)
        .status()
        .await
        .context("Failed to run `ollama` - is it installed and on PATH?")?;

    if !status.success() {
        anyhow::bail!("`{}` exited with {}", responder::install_command(model), status);
    }
    tracing::info!(model, "model pulled");
    Ok(())
}

fn run_config_set(key: &str, value: &str) -> Result<()> {
    let mut cfg = Config::load()?;
    let message = cfg.set(key, value)?;
    cfg.save()?;
    println!("{} ({})", message, config::config_path()?.display());
    Ok(())
}

async fn run_ask(question: &str, args: SelectionArgs) -> Result<()> {
    let cfg = Config::load()?;
    let client = connect(&cfg)?;
    let mut selection = build_selection(&cfg, &args)?;

    if selection.model.is_none() {
        let mut catalog = catalog_for(&cfg, client.clone());
        let installed = catalog.list_models().await;
        selection.model = choose_model(&args, &cfg, &installed);
        if selection.model.is_none() {
            if let Some(hint) = model_hint(None, &installed, catalog.last_error().is_some()) {
                for line in hint.lines() {
                    eprintln!("{}", line);
                }
            }
        }
    }

    let mut session = Session::new(selection);
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    let outcome = responder::run_turn(client.as_ref(), &mut session, question, |text| {
        let _ = write!(stdout, "{}", &text[printed..]);
        let _ = stdout.flush();
        printed = text.len();
    })
    .await?;

    match outcome {
        TurnOutcome::Completed { stats, .. } => {
            println!("\n\n[{} prompt + {} completion tokens, {:.1}s]",
                stats.prompt_tokens, stats.completion_tokens, stats.total_duration.as_secs_f64());
        }
        TurnOutcome::Errored { message, .. } => {
            if printed > 0 {
                println!();
            }
            eprintln!("{}", message);
        }
    }
    Ok(())
}

async fn run_interactive(args: SelectionArgs) -> Result<()> {
    let cfg = Config::load()?;
    let client = connect(&cfg)?;
    let selection = build_selection(&cfg, &args)?;
    let preferred = args.model.clone().or_else(|| cfg.default_model.clone());

    let backend: Arc<dyn InferenceBackend> = client;
    let mut catalog = catalog_for(&cfg, backend.clone());

    ui::run_tui(backend, &mut catalog, Session::new(selection), preferred).await
}
