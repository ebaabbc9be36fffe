mod config;
mod executor;
mod explainer;
mod extractor;
mod i18n;
mod model_client;
mod pipeline;
mod repl;
mod safety;
mod storage;
mod store_manager;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::{normalize_host, Config};
use executor::CommandExecutor;
use i18n::I18n;
use model_client::{ModelClient, OllamaClient};
use pipeline::Pipeline;
use repl::{PipedInput, Repl, TerminalInput};
use store_manager::{Recorder, StoreManager};

#[derive(Parser)]
#[command(name = "orbix")]
#[command(about = "Offline terminal AI assistant: describe a task, get one shell command, run it")]
#[command(version)]
struct Cli {
    /// Model used for both command generation and explanations
    #[arg(long, global = true)]
    model: Option<String>,
    /// Ollama host, e.g. http://localhost:11434
    #[arg(long, global = true)]
    host: Option<String>,
    /// Command execution timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Path to the memory database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single request without entering the interactive loop
    Ask {
        /// What you want done, in plain language
        #[arg(required = true, trailing_var_arg = true)]
        request: Vec<String>,
        /// Stream an explanation of the output afterwards
        #[arg(long, short = 'e')]
        explain: bool,
    },
    /// Show recent interactions
    History {
        /// Number of interactions to show
        #[arg(long = "limit", short = 'n')]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::new().context("failed to load ~/.orbix/config.toml")?;
    config.apply_env();
    apply_overrides(&mut config, &cli);

    let i18n = I18n::new(&config.get_effective_language());
    let store = StoreManager::open(config.database_path()).context(i18n.t("error_open_store"))?;

    let outcome = match cli.command {
        None => interactive(&config, &i18n, &store),
        Some(Commands::Ask { request, explain }) => ask(&config, &i18n, &store, &request.join(" "), explain),
        Some(Commands::History { limit }) => {
            let limit = limit.unwrap_or(config.storage.history_limit);
            store
                .recent_conversations(limit)
                .map(|items| repl::print_history(&i18n, &items))
                .map_err(Into::into)
        }
    };

    store.close().context(i18n.t("error_close_store"))?;
    outcome
}

fn init_logging() {
    // Logs go to stderr so they never mix with command output
    let filter = EnvFilter::try_from_env("ORBIX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.command_model = model.clone();
        config.model.explain_model = model.clone();
    }
    if let Some(host) = &cli.host {
        config.model.host = normalize_host(host);
    }
    if let Some(timeout) = cli.timeout {
        config.execution.timeout_secs = timeout;
    }
    if let Some(db) = &cli.db {
        config.storage.database = Some(db.clone());
    }
}

fn build_pipeline<'s>(
    config: &Config,
    i18n: &I18n,
    store: &'s StoreManager,
) -> Result<Pipeline<'s, OllamaClient, StoreManager>> {
    let backend = OllamaClient::new(&config.model.host, config.request_timeout())
        .context(i18n.t("error_model_client"))?;
    let client = ModelClient::new(backend);
    tracing::debug!(endpoint = client.backend().endpoint(), "model backend configured");
    Ok(Pipeline::new(
        client,
        CommandExecutor::new(config.execution.shell.clone(), config.execution_timeout()),
        store,
        config.command_profile(),
        config.explain_profile(),
    ))
}

// Ctrl-C never kills the process: it raises a flag that streaming and piped
// reads check. At a terminal prompt the line editor sees Ctrl-C itself.
fn install_interrupt_flag(i18n: &I18n) -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context(i18n.t("error_interrupt_handler"))?;
    Ok(flag)
}

fn interactive(config: &Config, i18n: &I18n, store: &StoreManager) -> Result<()> {
    let interrupted = install_interrupt_flag(i18n)?;
    let pipeline = build_pipeline(config, i18n, store)?;
    let repl = Repl::new(pipeline, store, i18n, config.storage.history_limit, Arc::clone(&interrupted));
    if io::stdin().is_terminal() {
        let mut input = TerminalInput::new().context(i18n.t("error_line_editor"))?;
        repl.run(&mut input)
    } else {
        repl.run(&mut PipedInput::spawn(interrupted))
    }
}

fn ask(config: &Config, i18n: &I18n, store: &StoreManager, request: &str, explain: bool) -> Result<()> {
    let interrupted = install_interrupt_flag(i18n)?;
    let pipeline = build_pipeline(config, i18n, store)?;
    if let Some(turn) = repl::run_and_render(&pipeline, i18n, request, &interrupted) {
        if explain && !interrupted.load(Ordering::SeqCst) {
            repl::explain_and_render(&pipeline, i18n, &turn, &interrupted);
        }
    }
    if interrupted.load(Ordering::SeqCst) {
        println!("{}", i18n.t("interrupted"));
    }
    Ok(())
}
