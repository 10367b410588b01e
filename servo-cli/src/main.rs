mod completer;
mod report;
mod state;

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use clap::{ArgAction, Parser};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use servo::{Servo, ServoError};
use tracing::{debug, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use completer::ServoHelper;
use report::report_error;
use state::ReplState;

/// Exit status for scan, parse and resolution errors.
const EXIT_DATA_ERR: u8 = 65;
/// Exit status when the script file can't be read.
const EXIT_NO_INPUT: u8 = 66;
/// Exit status for a runtime fault.
const EXIT_SOFTWARE: u8 = 70;
/// Exit status when program output can't be written.
const EXIT_IO_ERR: u8 = 74;

// Deep recursion in unoptimized builds needs more than the default main thread stack.
const INTERPRETER_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Run a servo script, or start an interactive session when no script is given.
#[derive(Parser, Debug, Clone)]
#[command(name = "servo", version, about)]
struct Cli {
    /// Script to run
    script: Option<PathBuf>,

    /// Log more (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let worker = {
        let cli = cli.clone();
        thread::Builder::new()
            .name("servo".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || run(&cli))
    };

    match worker {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            error!("interpreter thread panicked");
            ExitCode::from(EXIT_SOFTWARE)
        }),
        Err(e) => {
            warn!("failed to spawn interpreter thread ({e}), running on the main thread");
            run(&cli)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> ExitCode {
    let mut servo = Servo::new();
    match &cli.script {
        Some(path) => run_file(&mut servo, path),
        None => run_repl(&mut servo),
    }
}

fn run_file(servo: &mut Servo, path: &Path) -> ExitCode {
    debug!(path = %path.display(), "running script");
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}: {}", path.display(), ServoError::from(e));
            return ExitCode::from(EXIT_NO_INPUT);
        }
    };

    let filename = path.to_string_lossy();
    let Err(errors) = servo.run(&source, std::io::stdout()) else {
        return ExitCode::SUCCESS;
    };

    for error in &errors {
        report_error(error, &source, Some(&filename), std::io::stderr());
    }

    ExitCode::from(exit_status(&errors))
}

/// A run reports either static errors or a single execution failure.
fn exit_status(errors: &[ServoError]) -> u8 {
    if errors.iter().any(|e| matches!(e, ServoError::Io(_))) {
        EXIT_IO_ERR
    } else if errors.iter().any(ServoError::is_runtime) {
        EXIT_SOFTWARE
    } else {
        EXIT_DATA_ERR
    }
}

fn run_repl(servo: &mut Servo) -> ExitCode {
    let mut rl: Editor<ServoHelper, DefaultHistory> = match Editor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not start the REPL: {e}");
            return ExitCode::FAILURE;
        }
    };
    let helper = ServoHelper::new();
    helper.set_variables(servo.variable_names());
    rl.set_helper(Some(helper));

    // Bare expressions are only echoed for a person at a terminal.
    let auto_print = std::io::stdin().is_terminal();
    let mut state = ReplState::new();

    loop {
        match rl.readline(&state.prompt()) {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);

                if state.process_line(&line) {
                    let buffer = state.take_buffer();
                    let source = if auto_print && ReplState::should_auto_print(&buffer) {
                        ReplState::wrap_for_print(&buffer)
                    } else {
                        buffer
                    };

                    if let Err(errors) = servo.run(&source, std::io::stdout()) {
                        for error in &errors {
                            report_error(error, &source, None, std::io::stderr());
                        }
                    }

                    if let Some(helper) = rl.helper() {
                        helper.set_variables(servo.variable_names());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if state.is_empty() {
                    break;
                }
                state.cancel();
                println!();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("REPL error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
