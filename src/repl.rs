use crate::i18n::I18n;
use crate::model_client::ChatBackend;
use crate::pipeline::{Pipeline, Turn, TurnError};
use crate::storage::{Conversation, Preference};
use crate::store_manager::Recorder;
use crate::executor::timed_out_message;
use anyhow::{anyhow, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// A line typed at the prompt, after the built-in commands are peeled off.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    Help,
    History,
    ShowPrefs,
    SetPref { key: String, value: String },
    GetPref { key: String },
    Usage(&'static str),
    Request(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let lowered = line.to_lowercase();
    if lowered == "exit" || lowered == "quit" {
        return Input::Exit;
    }
    match line {
        "help" => return Input::Help,
        "history" => return Input::History,
        "showprefs" => return Input::ShowPrefs,
        "setpref" => return Input::Usage("setpref_usage"),
        "getpref" => return Input::Usage("getpref_usage"),
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("setpref ") {
        return match rest.trim().split_once(' ') {
            Some((key, value)) if !value.trim().is_empty() => Input::SetPref {
                key: key.to_string(),
                value: value.trim().to_string(),
            },
            _ => Input::Usage("setpref_usage"),
        };
    }
    if let Some(rest) = line.strip_prefix("getpref ") {
        let key = rest.trim();
        return if key.is_empty() {
            Input::Usage("getpref_usage")
        } else {
            Input::GetPref { key: key.to_string() }
        };
    }
    Input::Request(line.to_string())
}

/// What one read at a prompt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Where the read-loop gets its lines from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<ReadOutcome>;
}

/// Terminal input through rustyline. Ctrl-C and Ctrl-D arrive as read errors
/// instead of signals, so a pending line can be dropped without pressing Enter.
pub struct TerminalInput {
    editor: DefaultEditor,
}

impl TerminalInput {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().map_err(|e| anyhow!("failed to start line editor: {e}"))?;
        Ok(Self { editor })
    }
}

impl LineSource for TerminalInput {
    fn read_line(&mut self, prompt: &str) -> Result<ReadOutcome> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(ReadOutcome::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(e) => Err(anyhow!("failed to read interactive input: {e}")),
        }
    }
}

// How often a piped read checks for Ctrl-C while no line has arrived.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Non-terminal stdin. Lines are read on a helper thread so that the Ctrl-C
/// flag is noticed while the prompt is still waiting.
pub struct PipedInput {
    lines: Receiver<io::Result<String>>,
    interrupted: Arc<AtomicBool>,
}

impl PipedInput {
    pub fn spawn(interrupted: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_channel(rx, interrupted)
    }

    fn from_channel(lines: Receiver<io::Result<String>>, interrupted: Arc<AtomicBool>) -> Self {
        Self { lines, interrupted }
    }
}

impl LineSource for PipedInput {
    fn read_line(&mut self, prompt: &str) -> Result<ReadOutcome> {
        print!("{prompt}");
        io::stdout().flush().ok();
        loop {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Ok(ReadOutcome::Interrupted);
            }
            match self.lines.recv_timeout(INTERRUPT_POLL) {
                Ok(line) => return Ok(ReadOutcome::Line(line?)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(ReadOutcome::Eof),
            }
        }
    }
}

pub struct Repl<'s, B, R> {
    pipeline: Pipeline<'s, B, R>,
    store: &'s R,
    i18n: &'s I18n,
    history_limit: usize,
    interrupted: Arc<AtomicBool>,
}

impl<'s, B: ChatBackend, R: Recorder> Repl<'s, B, R> {
    pub fn new(
        pipeline: Pipeline<'s, B, R>,
        store: &'s R,
        i18n: &'s I18n,
        history_limit: usize,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            store,
            i18n,
            history_limit,
            interrupted,
        }
    }

    pub fn run(&self, input: &mut impl LineSource) -> Result<()> {
        print_banner(self.i18n);
        let prompt = self.i18n.t("prompt").magenta().bold().to_string();

        loop {
            self.interrupted.store(false, Ordering::SeqCst);
            let line = match input.read_line(&prompt).context(self.i18n.t("error_read_input"))? {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted => {
                    self.report_interrupt();
                    continue;
                }
                ReadOutcome::Eof => {
                    println!();
                    println!("{}", self.i18n.t("goodbye").green().bold());
                    return Ok(());
                }
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Exit => {
                    println!("\n{}\n", self.i18n.t("goodbye").green().bold());
                    return Ok(());
                }
                Input::Help => print_help(self.i18n),
                Input::History => self.show_history(),
                Input::ShowPrefs => self.show_prefs(),
                Input::SetPref { key, value } => match self.store.set_pref(&key, &value) {
                    Ok(()) => println!("{}\n", self.i18n.t("pref_saved").green()),
                    Err(e) => println!("{}\n", e.to_string().red()),
                },
                Input::GetPref { key } => {
                    match self.store.get_pref(&key, &self.i18n.t("pref_not_set")) {
                        Ok(value) => println!("{}\n", format!("{key} = {value}").cyan()),
                        Err(e) => println!("{}\n", e.to_string().red()),
                    }
                }
                Input::Usage(key) => println!("{}\n", self.i18n.t(key).red()),
                Input::Request(request) => self.handle_request(&request, input)?,
            }
        }
    }

    fn handle_request(&self, request: &str, input: &mut impl LineSource) -> Result<()> {
        let Some(turn) = run_and_render(&self.pipeline, self.i18n, request, &self.interrupted) else {
            self.take_interrupt();
            return Ok(());
        };
        if self.take_interrupt() {
            return Ok(());
        }

        let prompt = self.i18n.t("explain_prompt").dimmed().to_string();
        match input.read_line(&prompt).context(self.i18n.t("error_read_input"))? {
            ReadOutcome::Line(choice) if choice.trim().eq_ignore_ascii_case("y") => {
                explain_and_render(&self.pipeline, self.i18n, &turn, &self.interrupted);
                self.take_interrupt();
            }
            ReadOutcome::Interrupted => self.report_interrupt(),
            // Anything else, end of input included, declines.
            ReadOutcome::Line(_) | ReadOutcome::Eof => {}
        }
        Ok(())
    }

    fn take_interrupt(&self) -> bool {
        let was = self.interrupted.swap(false, Ordering::SeqCst);
        if was {
            self.report_interrupt();
        }
        was
    }

    fn report_interrupt(&self) {
        println!("\n{}\n", self.i18n.t("interrupted").red());
    }

    fn show_history(&self) {
        match self.store.recent_conversations(self.history_limit) {
            Ok(items) => print_history(self.i18n, &items),
            Err(e) => println!("{}\n", e.to_string().red()),
        }
    }

    fn show_prefs(&self) {
        match self.store.all_prefs() {
            Ok(prefs) => print_prefs(self.i18n, &prefs),
            Err(e) => println!("{}\n", e.to_string().red()),
        }
    }
}

fn stream_to_stdout(interrupted: &AtomicBool) -> impl FnMut(&str) -> ControlFlow<()> + '_ {
    move |fragment| {
        if interrupted.load(Ordering::SeqCst) {
            return ControlFlow::Break(());
        }
        print!("{fragment}");
        io::stdout().flush().ok();
        ControlFlow::Continue(())
    }
}

/// Runs one turn, rendering the streamed command and the result. Failures are
/// reported here; `None` means the turn ended without executing anything.
pub fn run_and_render<B: ChatBackend, R: Recorder>(
    pipeline: &Pipeline<'_, B, R>,
    i18n: &I18n,
    request: &str,
    interrupted: &AtomicBool,
) -> Option<Turn> {
    print!("\n{} ", i18n.t("label_command").yellow().bold());
    io::stdout().flush().ok();
    let outcome = pipeline.run_turn(request, stream_to_stdout(interrupted));
    println!();

    match outcome {
        Ok(turn) => {
            print_turn(i18n, &turn, pipeline.executor().timeout());
            Some(turn)
        }
        Err(TurnError::UnsafeCommand { pattern, .. }) => {
            println!("{}\n", i18n.t_format("blocked_unsafe", &[pattern]).red().bold());
            None
        }
        Err(TurnError::EmptyGeneration) => {
            println!("{}\n", i18n.t("empty_generation").red());
            None
        }
        Err(TurnError::ModelUnavailable(e)) => {
            println!("{}\n", i18n.t_format("generation_failed", &[&e.to_string()]).red());
            None
        }
        // Reported by the caller, which owns the interrupt flag.
        Err(TurnError::Interrupted) => None,
    }
}

pub fn explain_and_render<B: ChatBackend, R: Recorder>(
    pipeline: &Pipeline<'_, B, R>,
    i18n: &I18n,
    turn: &Turn,
    interrupted: &AtomicBool,
) {
    print!("\n{} ", i18n.t("label_explanation").cyan().bold());
    io::stdout().flush().ok();
    match pipeline.explain(turn, stream_to_stdout(interrupted)) {
        Ok(_) => println!("\n"),
        Err(TurnError::Interrupted) => println!(),
        Err(e) => {
            warn!(error = %e, "explanation failed");
            println!("\n{}\n", i18n.t_format("explain_failed", &[&e.to_string()]).red());
        }
    }
}

pub fn print_turn(i18n: &I18n, turn: &Turn, timeout: Duration) {
    println!("\n{}", i18n.t("label_output").green().bold());
    if turn.result.failed {
        println!("{}", turn.result.output.red());
    } else {
        println!("{}", turn.result.output.trim_end_matches('\n'));
    }
    for notice in turn_notices(i18n, turn, timeout) {
        println!("{}", notice.yellow());
    }
    println!();
}

/// Warnings shown under a turn's output.
fn turn_notices(i18n: &I18n, turn: &Turn, timeout: Duration) -> Vec<String> {
    let mut notices = Vec::new();
    // With no partial output the output line already says it timed out
    if turn.result.timed_out && turn.result.output != timed_out_message(timeout) {
        notices.push(i18n.t_format("timed_out", &[&timeout.as_secs().to_string()]));
    }
    if let Some(err) = &turn.record_error {
        notices.push(i18n.t_format("record_failed", &[err]));
    }
    notices
}

pub fn print_history(i18n: &I18n, items: &[Conversation]) {
    println!("\n{}", i18n.t("recent_conversations").cyan().bold());
    if items.is_empty() {
        println!("{}", i18n.t("no_conversations").dimmed());
    }
    for item in items {
        println!(
            "{} {}  {} → {}",
            format!("#{}", item.id).dimmed(),
            item.timestamp.dimmed(),
            item.prompt.yellow(),
            item.command.green()
        );
    }
    println!();
}

pub fn print_prefs(i18n: &I18n, prefs: &[Preference]) {
    println!("\n{}", i18n.t("preferences").cyan().bold());
    if prefs.is_empty() {
        println!("{}", i18n.t("no_preferences").dimmed());
    }
    for pref in prefs {
        println!("{} = {}", pref.key, pref.value);
    }
    println!();
}

pub fn print_banner(i18n: &I18n) {
    let title = i18n.t("banner_title");
    let width = title.chars().count() + 2;
    println!("╭{}╮", "─".repeat(width));
    println!("│ {} │", title.green().bold());
    println!("╰{}╯", "─".repeat(width));
    println!("{}\n", i18n.t("banner_tagline").dimmed());
}

pub fn print_help(i18n: &I18n) {
    println!();
    println!("{}", i18n.t("help_title").bold());
    println!();
    println!("{}", i18n.t("help_section_general").cyan());
    println!("  {:<15} {}", "help", i18n.t("help_help"));
    println!("  {:<15} {}", "exit / quit", i18n.t("help_exit"));
    println!();
    println!("{}", i18n.t("help_section_memory").cyan());
    println!("  {:<15} {}", "history", i18n.t("help_history"));
    println!("  {:<15} {}", "showprefs", i18n.t("help_showprefs"));
    println!("  {:<15} {}", "setpref k v", i18n.t("help_setpref"));
    println!("  {:<15} {}", "getpref k", i18n.t("help_getpref"));
    println!();
    println!("{}", i18n.t("help_section_ai").cyan());
    println!("  {}", i18n.t("help_ai_usage"));
    for key in ["help_ai_example_1", "help_ai_example_2", "help_ai_example_3"] {
        println!("    • {}", i18n.t(key));
    }
    println!();
}
