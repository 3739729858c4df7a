//! CLI commands implementation

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use llm_core::{Backend, OllamaClient, OllamaStatus};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::agent::{AgentLoop, LoopState};
use crate::config::Settings;
use crate::directive;
use crate::dispatch::Dispatcher;
use crate::memory::{MemoryLog, MemoryStore};
use crate::prompt::InstructionBlock;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Ollama,
    LlamaCpp,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Ollama => Backend::Ollama,
            BackendArg::LlamaCpp => Backend::LlamaCpp,
        }
    }
}

/// Options for `autoloop run`; each overrides the settings file
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Stop after N cycles (runs until interrupted by default)
    #[arg(short = 'n', long)]
    pub cycles: Option<u64>,

    /// Model backend
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Ollama model name
    #[arg(short, long, env = "AUTOLOOP_MODEL")]
    pub model: Option<String>,

    /// GGUF model for the llama.cpp backend
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// llama.cpp binary
    #[arg(long, env = "LLAMA_CPP_BIN")]
    pub llama_bin: Option<String>,

    /// Memory log file
    #[arg(long)]
    pub memory: Option<PathBuf>,

    /// Operator base prompt appended to the built-in instructions
    #[arg(short, long)]
    pub prompt_file: Option<PathBuf>,

    /// Seconds to sleep between cycles
    #[arg(short, long)]
    pub delay: Option<u64>,

    /// Only log, don't echo cycles to the terminal
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunArgs {
    /// Fold command-line overrides into `settings`
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(backend) = self.backend {
            settings.model.backend = backend.into();
        }
        if let Some(ref model) = self.model {
            settings.model.name = model.clone();
        }
        if let Some(ref path) = self.model_path {
            settings.model.model_path = Some(path.clone());
        }
        if let Some(ref bin) = self.llama_bin {
            settings.model.llama_bin = bin.clone();
        }
        if let Some(ref memory) = self.memory {
            settings.agent.memory_path = memory.clone();
        }
        if let Some(ref prompt_file) = self.prompt_file {
            settings.agent.prompt_file = Some(prompt_file.clone());
        }
        if let Some(delay) = self.delay {
            settings.agent.delay_secs = delay;
        }
    }
}

/// Run the control loop until interrupted
pub async fn run(mut settings: Settings, args: RunArgs) -> Result<()> {
    args.apply(&mut settings);
    let verbose = !args.quiet;

    let instructions = InstructionBlock::load(settings.agent.prompt_file.as_deref())?;

    let store = MemoryStore::new(&settings.agent.memory_path);
    let memory = MemoryLog::from_text(store.load()?);

    // Streamed Ollama output is echoed by the generator as it arrives
    let streamed =
        verbose && settings.model.stream && settings.model.backend == Backend::Ollama;
    let generator = llm_core::from_config(&settings.model, streamed)?;

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let dispatcher = Dispatcher::with_default_handlers(
        settings.agent.action_context(working_dir),
        settings.agent.doc_viewer.clone(),
    );

    let mut config = settings
        .agent
        .loop_config()
        .with_max_cycles(args.cycles)
        .with_verbose(verbose);
    config.echo_model_output = !streamed;

    let mut state = LoopState::new(instructions, memory);

    if verbose {
        println!("{}autoloop{} {}", BOLD, RESET, env!("CARGO_PKG_VERSION"));
        println!("  Model:   {}", settings.model.describe());
        println!(
            "  Memory:  {} ({} entries)",
            store.path().display(),
            state.memory.entry_count()
        );
        println!("  Actions:");
        for line in dispatcher.registry().describe() {
            println!("    {}", line);
        }
        println!("{}Press Ctrl+C to stop after the current cycle{}\n", DIM, RESET);
    }

    let agent = AgentLoop::new(
        generator,
        dispatcher,
        store,
        settings.agent.composer(),
        config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Interrupt received, stopping after the current cycle");
        eprintln!("\n{}Stopping after the current cycle (Ctrl+C again to abort){}", YELLOW, RESET);
        let _ = shutdown_tx.send(true);

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, aborting");
            std::process::exit(130);
        }
    });

    agent.run(&mut state, shutdown_rx).await?;

    if verbose {
        println!(
            "\n{}Stopped after {} cycle(s); memory at {}{}",
            DIM,
            state.cycles_run,
            settings.agent.memory_path.display(),
            RESET
        );
    }

    Ok(())
}

/// Show how a piece of model output would be parsed
pub fn parse(text: &[String]) -> Result<()> {
    let input = if text.is_empty() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        text.join(" ")
    };

    print!("{}", describe_parse(&input));
    Ok(())
}

fn describe_parse(input: &str) -> String {
    let mut out = format!("Directive: {}\n", directive::parse(input).summary());

    let tokens = directive::tokenize(input);
    if tokens.len() > 1 {
        out.push_str("Markers:\n");
        for token in tokens {
            out.push_str(&format!(
                "  line {}: {} {}\n",
                token.line + 1,
                token.kind,
                token.argument
            ));
        }
    }

    out
}

/// Print the memory log
pub fn memory_show(settings: &Settings) -> Result<()> {
    let store = MemoryStore::new(&settings.agent.memory_path);
    let text = store.load()?;

    if text.is_empty() {
        println!("{}Memory is empty ({}){}", DIM, store.path().display(), RESET);
    } else {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

/// Print where the memory log lives
pub fn memory_path(settings: &Settings) -> Result<()> {
    println!("{}", settings.agent.memory_path.display());
    Ok(())
}

/// Delete the memory log
pub fn memory_clear(settings: &Settings) -> Result<()> {
    let store = MemoryStore::new(&settings.agent.memory_path);
    if store.clear()? {
        print_status(true, &format!("Removed {}", store.path().display()));
    } else {
        println!("{}No memory file at {}{}", DIM, store.path().display(), RESET);
    }
    Ok(())
}

/// Check that the configured backend can produce completions
pub async fn health(settings: &Settings) -> Result<()> {
    let model = &settings.model;
    println!("{}Backend{}: {}", BOLD, RESET, model.describe());

    match model.backend {
        Backend::Ollama => {
            let client = OllamaClient::new(model.ollama_url(), Duration::from_secs(5))?;
            println!("  Endpoint: {}", client.base_url());

            if client.status().await != OllamaStatus::Running {
                print_status(false, "Ollama is not running");
                println!("\n  Start with: {}ollama serve{}", BLUE, RESET);
                return Ok(());
            }
            print_status(true, "Ollama is running");

            let models = client.list_models().await?;
            let tagged = format!("{}:latest", model.name);
            let found = models
                .iter()
                .any(|m| m.name == model.name || m.name == tagged);
            print_status(found, &format!("Model {} available", model.name));
            if !found {
                println!("  Run: {}ollama pull {}{}", BLUE, model.name, RESET);
            }
        }
        Backend::LlamaCpp => {
            match model.model_path {
                Some(ref path) => {
                    print_status(path.exists(), &format!("Model file {}", path.display()))
                }
                None => print_status(false, "model_path is not set"),
            }

            let version = tokio::process::Command::new(&model.llama_bin)
                .arg("--version")
                .output()
                .await;
            match version {
                Ok(out) if out.status.success() => {
                    print_status(true, &format!("{} runs", model.llama_bin))
                }
                Ok(out) => print_status(
                    false,
                    &format!("{} exited with {}", model.llama_bin, out.status),
                ),
                Err(e) => print_status(false, &format!("{}: {}", model.llama_bin, e)),
            }
        }
    }

    Ok(())
}

/// Write a commented autoloop.toml into the current directory
pub fn init_config() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let path = Settings::create_default(&cwd)?;
    print_status(true, &format!("Created {}", path.display()));
    Ok(())
}
