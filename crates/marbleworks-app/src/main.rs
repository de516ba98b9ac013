use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use marbleworks_app::{run_headless, terminal};
use tracing::{info, warn};

/// Run a Marbleworks marble-machine program.
#[derive(Debug, Parser)]
#[command(name = "marbleworks", version)]
struct Cli {
    /// Path to the program source.
    program: PathBuf,

    /// Run without the interactive UI and print the output buffer.
    #[arg(long)]
    headless: bool,

    /// Maximum cycles to simulate in headless mode.
    #[arg(long, default_value_t = 1_000)]
    cycles: u64,

    /// Simulation steps per second in interactive mode.
    #[arg(long, default_value_t = 4.0)]
    rate: f64,

    /// Emit the headless report as JSON instead of raw output.
    #[arg(long)]
    json: bool,

    /// Run even when the program has compile diagnostics.
    #[arg(long)]
    allow_errors: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.program)
        .with_context(|| format!("reading {}", cli.program.display()))?;
    let build = marbleworks_program::build(&source)
        .with_context(|| format!("building {}", cli.program.display()))?;

    for diagnostic in &build.diagnostics {
        warn!(span = %diagnostic.span, "{}", diagnostic.message);
    }
    if !build.is_clean() && !cli.allow_errors {
        bail!(
            "program has {} compile diagnostic(s); pass --allow-errors to run anyway",
            build.diagnostics.len()
        );
    }

    let mut contraption = build.contraption;
    info!(
        width = contraption.width(),
        height = contraption.height(),
        marbles = contraption.marble_count(),
        "program loaded"
    );

    if cli.headless {
        let report = run_headless(&mut contraption, cli.cycles);
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", report.output);
        }
        info!(
            cycles = report.cycles,
            marbles = report.marbles,
            "headless run finished"
        );
        return Ok(());
    }

    let interval = Duration::from_secs_f64(1.0 / cli.rate.max(0.1));
    terminal::run_playback(&mut contraption, interval)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
