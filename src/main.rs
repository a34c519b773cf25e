//! sassmap - compile, watch and inspect SASS/SCSS projects.

mod cli;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use cli::{Cli, Commands};
use sassmap::Session;
use sassmap::config::SassConfig;
use sassmap::logger::{set_verbose, status_error, status_success, status_warning};
use sassmap::orchestrator::{Mode, Report, Watcher};
use sassmap::selector::extract_all_selectors;
use sassmap::store::DocumentSource;
use sassmap::utils::path::normalize_path;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    set_verbose(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            sassmap::log!("error"; "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when a compile failed.
fn run(cli: &Cli) -> Result<bool> {
    if let Commands::Selectors { file, json } = &cli.command {
        print_selectors(file, *json)?;
        return Ok(true);
    }

    let config = load_config(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match &cli.command {
            Commands::Compile { files } => Ok(compile_files(config, files).await),
            Commands::Watch { dir } => watch(config, dir.as_deref()).await,
            Commands::Selectors { .. } => Ok(true),
        }
    })
}

fn load_config(path: &Path) -> Result<SassConfig> {
    let path = normalize_path(path);
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = SassConfig::load_or_default(&path, &normalize_path(&cwd))?;
    sassmap::debug!("compile"; "config: {}", path.display());
    Ok(config)
}

/// No editor is attached, so there are never unsaved buffers.
fn no_documents() -> Arc<dyn DocumentSource> {
    Arc::new(FxHashMap::<PathBuf, String>::default())
}

async fn compile_files(config: SassConfig, files: &[PathBuf]) -> bool {
    let session = Session::new(config, no_documents());
    let mut ok = true;

    for file in files {
        let file = normalize_path(file);
        match session.compile(&file).await {
            Some(Ok(result)) => {
                if let Some(warning) = &result.warning {
                    sassmap::log!("compile"; "warning: {}", warning);
                }
            }
            Some(Err(errors)) => {
                ok = false;
                for err in &errors {
                    sassmap::log!("error"; "{}", err);
                }
            }
            None => sassmap::log!("compile"; "skipped {}", file.display()),
        }
    }

    session.shutdown().await;
    ok
}

async fn watch(config: SassConfig, dir: Option<&Path>) -> Result<bool> {
    let root = match dir {
        Some(dir) => normalize_path(dir),
        None => config.root.clone(),
    };

    let session = Arc::new(Session::new(config, no_documents()));
    session.discover(&root);

    let (report_tx, mut reports) = mpsc::unbounded_channel();
    let handle = session.start(Some(report_tx));
    let watcher = Watcher::start(std::slice::from_ref(&root), handle.sender())
        .with_context(|| format!("Failed to watch {}", root.display()))?;

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to set Ctrl+C handler")?;

    sassmap::log!("watch"; "watching {} (Ctrl+C to stop)", root.display());
    let mut ok = true;
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            report = reports.recv() => match report {
                Some(report) => ok &= show_report(&report),
                None => break,
            },
        }
    }

    sassmap::log!("watch"; "shutting down...");
    drop(watcher);
    handle.shutdown().await;
    session.shutdown().await;
    Ok(ok)
}

/// Print one outcome; returns false when the compile failed.
fn show_report(report: &Report) -> bool {
    let verb = match report.mode {
        Mode::Compile => "compiled",
        Mode::Preview => "previewed",
    };
    match &report.outcome {
        Ok(css_file) => {
            status_success(&format!(
                "{verb} {} -> {}",
                report.input.display(),
                css_file.display()
            ));
            true
        }
        Err(errors) if errors.iter().all(|e| e.is_warning()) => {
            let detail: Vec<String> = errors.iter().map(ToString::to_string).collect();
            status_warning(&detail.join("\n"));
            true
        }
        Err(errors) => {
            let detail: Vec<String> = errors.iter().map(ToString::to_string).collect();
            status_error(
                &format!("failed to compile {}", report.input.display()),
                &detail.join("\n"),
            );
            false
        }
    }
}

fn print_selectors(file: &Path, json: bool) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let selectors = extract_all_selectors(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&selectors)?);
        return Ok(());
    }
    for selector in &selectors {
        println!(
            "{}:{}\t{}",
            selector.selector_start.line + 1,
            selector.selector_start.ch + 1,
            selector.selector
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sassmap::diagnostics::{CompileError, ErrorPos, Severity};

    fn report(outcome: Result<PathBuf, Vec<CompileError>>) -> Report {
        Report {
            input: PathBuf::from("/p/main.scss"),
            mode: Mode::Compile,
            outcome,
        }
    }

    #[test]
    fn test_failed_report_marks_watch_failed() {
        let error = CompileError::new("/p/_vars.scss", ErrorPos::at(1, 0), "undefined variable");
        assert!(!show_report(&report(Err(vec![error]))));
    }

    #[test]
    fn test_success_and_warnings_keep_watch_ok() {
        assert!(show_report(&report(Ok(PathBuf::from("/p/main.css")))));

        let mut warning = CompileError::new("/p/main.scss", ErrorPos::at(0, 0), "deprecated");
        warning.severity = Severity::Warning;
        assert!(show_report(&report(Err(vec![warning]))));
    }
}
