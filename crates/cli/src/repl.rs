//! Interactive REPL built on reedline.
//!
//! One VM lives for the whole session, so globals, classes, and functions
//! defined on earlier lines stay available.

use std::borrow::Cow;

use ghost_compiler::interpret;
use ghost_vm::{GcConfig, Vm};
use nu_ansi_term::Color;
use reedline::{Prompt, PromptEditMode, PromptHistorySearch, Reedline, Signal};
use std::process::ExitCode;

struct GhostPrompt;

impl Prompt for GhostPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Borrowed("ghost> ")
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("search: ")
    }
}

pub fn run(config: GcConfig) -> ExitCode {
    println!(
        "{} {} — ctrl-d to exit",
        Color::Green.bold().paint("ghost"),
        env!("CARGO_PKG_VERSION")
    );

    let mut vm = Vm::with_config(config);
    let mut editor = Reedline::create();

    loop {
        match editor.read_line(&GhostPrompt) {
            Ok(Signal::Success(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Errors are printed and the session continues; the VM
                // resets its stacks on runtime errors by itself.
                if let Err(error) = interpret(&mut vm, &line) {
                    eprintln!("{error}");
                }
            }
            Ok(Signal::CtrlC) => continue,
            Ok(Signal::CtrlD) => break,
            Err(error) => {
                eprintln!("Input error: {error}");
                break;
            }
        }
    }
    ExitCode::SUCCESS
}
