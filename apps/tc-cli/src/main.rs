use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tc_app::{AppResult, RunOptions, RunProgressEvent, RunStage, deck_service, query, run_service};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tcadctl")]
#[command(about = "tcadctl - continuation-controlled device simulation driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every command of a deck
    Run {
        /// Path to the deck (YAML or JSON)
        deck_path: PathBuf,
        /// Write the result document here after every solution
        #[arg(long)]
        solution_out: Option<PathBuf>,
        /// Number of in-process workers
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Check a deck without running it
    Validate {
        /// Path to the deck (YAML or JSON)
        deck_path: PathBuf,
    },
    /// Summarise a saved result document
    Show {
        /// Path to the result document
        solution_path: PathBuf,
        /// Print the current series of this electrode
        #[arg(long)]
        electrode: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            deck_path,
            solution_out,
            workers,
            report,
        } => cmd_run(&deck_path, solution_out, workers, report.as_deref()),
        Commands::Validate { deck_path } => cmd_validate(&deck_path),
        Commands::Show {
            solution_path,
            electrode,
        } => cmd_show(&solution_path, electrode.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            clear_progress_line();
            error!(error = %e, "run aborted");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn cmd_run(deck_path: &Path, solution_out: Option<PathBuf>, workers: usize, report: Option<&Path>) -> AppResult<()> {
    let deck = deck_service::load_deck(deck_path)?;
    println!("Running deck: {} ({} cards)", deck.name, deck.len());
    let options = RunOptions {
        solution_out,
        workers: workers.max(1),
    };

    let mut last_emit = Instant::now();
    let mut last_stage = String::new();
    let outcome = run_service::run_deck_with_progress(
        &deck,
        &options,
        Some(&mut |event| {
            let stage_key = format!("{:?}{:?}", event.stage, event.key);
            let emit_now = stage_key != last_stage || last_emit.elapsed().as_millis() >= 100;
            if emit_now {
                render_cli_progress(&event);
                last_stage = stage_key;
                last_emit = Instant::now();
            }
        }),
    )?;
    clear_progress_line();

    if outcome.report.is_degraded() {
        println!("! Run completed with degraded commands");
    } else {
        println!("✓ Run completed");
    }
    print!("{}", outcome.report.render());
    if let Some(path) = &options.solution_out {
        println!("  Solutions written to {}", path.display());
    }
    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&outcome.report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        println!("  Report written to {}", path.display());
    }
    Ok(())
}

fn cmd_validate(deck_path: &Path) -> AppResult<()> {
    println!("Validating deck: {}", deck_path.display());
    let deck = deck_service::load_deck(deck_path)?;
    let summary = deck_service::summarize_deck(&deck);
    println!("✓ Deck is valid");
    println!("  Cards: {}", summary.card_count);
    for (key, count) in &summary.keys {
        println!("    {key:<20} {count}");
    }
    println!("  Solves: {}", summary.solve_count);
    if !summary.has_mesh {
        println!("  No MESH card: commands run without a device");
    }
    for unknown in &summary.unknown {
        println!("  ignored: {unknown}");
    }
    Ok(())
}

fn cmd_show(solution_path: &Path, electrode: Option<&str>) -> AppResult<()> {
    let doc = query::load_solution(solution_path)?;
    println!("Result document: {}", solution_path.display());
    println!("  Created: {}", doc.created);
    println!("  Deck digest: {}", doc.deck_digest);
    println!("  Solutions: {}", doc.solution_count());

    for group in query::summarize_document(&doc) {
        print!(
            "\n  {} [{}] {}: {} solutions",
            group.label, group.solve_type, group.id, group.solution_count
        );
        if let Some((name, first, last)) = &group.sweep_range {
            print!(", {name} {first:.4e} .. {last:.4e}");
        }
        println!();
        if !group.electrodes.is_empty() {
            println!("    electrodes: {}", group.electrodes.join(", "));
        }
    }

    if let Some(electrode) = electrode {
        println!("\nsweep,current_{electrode}");
        for group in doc.groups() {
            for (x, i) in query::current_series(group, electrode) {
                println!("{x},{i}");
            }
        }
    }
    Ok(())
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &RunProgressEvent) {
    let spinner = ['|', '/', '-', '\\'];
    let spin_idx = ((event.elapsed_wall_s * 10.0) as usize) % spinner.len();
    let stage = match event.stage {
        RunStage::GeneratingMesh => "generating mesh",
        RunStage::BuildingSystem => "building system",
        RunStage::RunningCommand => "running",
        RunStage::Solving => "solving",
        RunStage::Refining => "refining",
        RunStage::Completed => "completed",
    };
    let mut line = format!("\r{} {}  elapsed={:.2}s", spinner[spin_idx], stage, event.elapsed_wall_s);
    if let Some(key) = &event.key {
        line.push_str(&format!("  {key}"));
    }
    if let Some(msg) = &event.message {
        line.push_str(&format!("  {msg}"));
    }
    print!("{line}");
    let _ = io::stdout().flush();
}
