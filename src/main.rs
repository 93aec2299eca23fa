//! cellisp CLI entry point.
//!
//! With a path argument the file is parsed and evaluated; with piped stdin
//! the whole input is read as one program; on a terminal an interactive
//! REPL runs. The REPL keeps accumulating lines while the reader reports
//! the recoverable end-of-input kind, so forms may span lines.

use anyhow::{Context, Result};
use cellisp::env::{Env, EnvRef};
use cellisp::{eval, reader, stdlib};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "cellisp", about = "A small Lisp interpreter", version)]
struct Args {
    /// Script to run; reads stdin when omitted.
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();
    match args.script {
        Some(path) => run_file(&path),
        None if std::io::stdin().is_terminal() => run_repl(),
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read stdin")?;
            run_source(&source)
        }
    }
}

/// Fresh root environment with the startup library loaded.
fn new_root() -> Result<EnvRef> {
    let env = Env::root();
    stdlib::load_stdlib(&env)
        .map_err(|e| anyhow::anyhow!("startup library failed to load: {e}"))?;
    Ok(env)
}

fn run_file(path: &PathBuf) -> Result<()> {
    debug!(path = %path.display(), "running script");
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    run_source(&source)
}

fn run_source(source: &str) -> Result<()> {
    let env = new_root()?;
    let program = reader::parse_program(source).map_err(|e| anyhow::anyhow!("{e}"))?;
    eval::eval_program(&env, &program).map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

fn run_repl() -> Result<()> {
    let env = new_root()?;
    let mut rl = DefaultEditor::new().context("could not initialize line editor")?;
    // Lines accumulate here until they parse as complete forms.
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "> " } else { ".. " };
        match rl.readline(prompt) {
            Ok(line) => {
                pending.push_str(&line);
                pending.push('\n');
                let program = match reader::parse_program(&pending) {
                    Ok(program) => program,
                    Err(e) if e.is_incomplete() => continue,
                    Err(e) => {
                        eprintln!("error: {e}");
                        pending.clear();
                        continue;
                    }
                };
                let source = std::mem::take(&mut pending);
                let _ = rl.add_history_entry(source.trim());
                if program.is_nil() {
                    continue;
                }
                match eval::eval_program(&env, &program) {
                    Ok(result) => {
                        let printed = result.to_string();
                        if !printed.is_empty() {
                            println!("{printed}");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => return Err(e).context("line editor failure"),
        }
    }
    Ok(())
}
