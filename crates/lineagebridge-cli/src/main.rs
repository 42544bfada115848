use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lineagebridge_condition::parse_condition;
use lineagebridge_core::{Config, Diagnostic, DialectConfig, JsonLinesSink, Report, Severity};
use lineagebridge_engine::{ExtractionRun, RunOutcome};
use lineagebridge_sql::{InferenceOptions, LineageInferencer};

mod inputs;

/// LineageBridge - dependency and lineage graphs from ETL tool exports
#[derive(Parser)]
#[command(name = "lineagebridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: lineagebridge.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every configured source's graph and emit the records
    Extract {
        /// JSON-lines file for the records (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        report: PathBuf,
    },

    /// Show the dependencies a scheduler condition expresses
    Condition {
        /// Condition text, e.g. "s(JOB_A) & f(JOB_B)"
        text: String,

        /// Job the condition belongs to
        #[arg(short, long)]
        job: Option<String>,
    },

    /// Infer lineage for one SQL text
    Lineage {
        /// SQL text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        sql: Option<String>,

        /// File holding the SQL
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Schema hint JSON files
        #[arg(long)]
        hint: Vec<PathBuf>,

        /// Table a bare query feeds
        #[arg(short, long)]
        target: Option<String>,

        /// ansi, bigquery, snowflake, postgres, mssql or oracle
        #[arg(short, long, value_parser = parse_dialect)]
        dialect: Option<DialectConfig>,
    },
}

fn parse_dialect(value: &str) -> Result<DialectConfig, String> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unknown dialect '{}'", value))
}

fn init_logging(config: &Config, verbose: bool) {
    let fallback = if verbose {
        "lineagebridge=debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new("lineagebridge.toml").exists() {
        Config::from_file(Path::new("lineagebridge.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Extract { output, report } => extract_command(config, output.as_deref(), &report, cli.verbose),
        Commands::Condition { text, job } => condition_command(&text, job.as_deref()),
        Commands::Lineage {
            sql,
            file,
            hint,
            target,
            dialect,
        } => lineage_command(&config, sql, file, &hint, target.as_deref(), dialect),
    }
}

/// Extract command - build, bridge and emit every configured source
fn extract_command(config: Config, output: Option<&Path>, report_path: &Path, verbose: bool) -> Result<()> {
    if config.sources.is_empty() {
        anyhow::bail!("no [[sources]] configured");
    }

    let inputs = inputs::source_inputs(&config)?;
    if verbose {
        for input in &inputs {
            eprintln!(
                "  {} {} ({} artifacts)",
                "Loaded".cyan(),
                input.config.instance(),
                input.artifacts.len()
            );
        }
    }

    let env = config.env.clone();
    let run = ExtractionRun::new(config);
    let outcome = run.execute(&inputs);

    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let mut sink = JsonLinesSink::new(BufWriter::new(file));
            outcome.emit(&env, &mut sink, &mut diagnostics)?;
            if verbose {
                eprintln!("{} {} records to {}", "Wrote".green(), sink.written(), path.display());
            }
        }
        None => {
            let stdout = std::io::stdout();
            let mut sink = JsonLinesSink::new(stdout.lock());
            outcome.emit(&env, &mut sink, &mut diagnostics)?;
        }
    }

    let report = outcome.report();
    report.save_to_file(report_path)?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), report_path.display());
    }

    print_run_summary(&outcome, &report);

    if outcome.all_failed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Condition command - print the edges a condition yields
fn condition_command(text: &str, job: Option<&str>) -> Result<()> {
    let condition = parse_condition(text).map_err(|e| anyhow::anyhow!("cannot parse condition: {}", e))?;
    let from = job.unwrap_or("<job>");

    let dependencies = condition.dependencies();
    if dependencies.is_empty() {
        println!("{}", "No job dependencies".yellow());
    }
    for dependency in &dependencies {
        println!("{} -> {} ({})", from, dependency.job.green(), dependency.kind);
    }

    let ignored = condition
        .predicates()
        .into_iter()
        .filter(|p| p.status.dependency_kind().is_none())
        .count();
    if ignored > 0 {
        println!("{} {} predicate(s) yield no edge", "Note:".dimmed(), ignored);
    }
    Ok(())
}

/// Lineage command - run the SQL inferencer on one text
fn lineage_command(
    config: &Config,
    sql: Option<String>,
    file: Option<PathBuf>,
    hint_files: &[PathBuf],
    target: Option<&str>,
    dialect: Option<DialectConfig>,
) -> Result<()> {
    let sql = match (sql, file) {
        (Some(sql), _) => sql,
        (None, Some(file)) => std::fs::read_to_string(&file)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file.display(), e))?,
        (None, None) => anyhow::bail!("either --sql or --file is required"),
    };

    let cwd = std::env::current_dir()?;
    let hints = inputs::load_hints(hint_files, &cwd)?;
    let options = InferenceOptions {
        dialect: dialect.unwrap_or_default(),
        preview_chars: config.preview_chars,
        ..InferenceOptions::default()
    };
    let inferencer = LineageInferencer::new(options, hints);
    let lineage = inferencer.infer(&sql, target);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &lineage)?;
    writeln!(stdout)?;

    for diag in &lineage.diagnostics {
        eprintln!("  [{}] {}: {}", severity_label(diag.severity), diag.code, diag.message);
    }
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warn => "WARN".yellow().bold(),
        Severity::Info => "INFO".cyan(),
    }
}

/// Print the run summary to stderr
///
/// Records may be going to stdout, so nothing here touches it.
fn print_run_summary(outcome: &RunOutcome, report: &Report) {
    let summary = &report.summary;
    eprintln!("\n{}", "=".repeat(60).bright_blue());
    eprintln!("{}", "Extraction Report".bold().bright_blue());
    eprintln!("{}", "=".repeat(60).bright_blue());
    eprintln!();

    eprintln!("Version: {}", report.version);
    eprintln!("Timestamp: {}", report.timestamp);
    eprintln!();

    eprintln!("{}", "Sources:".bold());
    for graph in &outcome.graphs {
        eprintln!(
            "  {} {}: {} jobs, {} datasets, {} dependencies, {} lineage edges",
            "✓".green(),
            graph.id,
            graph.jobs.len(),
            graph.datasets.len(),
            graph.dependencies.len(),
            graph.lineage.len()
        );
    }
    for failure in &outcome.failures {
        eprintln!("  {} {}: {}", "✗".red(), failure.source, failure.message.red());
    }
    if outcome.cancelled {
        eprintln!("  {}", "Run cancelled before every source was processed".yellow());
    }
    eprintln!();

    eprintln!("{}", "Summary:".bold());
    eprintln!("  Unresolved dependencies: {}", summary.unresolved_edges);
    eprintln!("  Bridges: {}", summary.bridge_edges);
    if summary.errors > 0 {
        eprintln!("  Errors:   {}", format!("{}", summary.errors).red().bold());
    } else {
        eprintln!("  Errors:   {}", format!("{}", summary.errors).green());
    }
    if summary.warnings > 0 {
        eprintln!("  Warnings: {}", format!("{}", summary.warnings).yellow());
    } else {
        eprintln!("  Warnings: {}", format!("{}", summary.warnings).green());
    }
    eprintln!("  Info:     {}", summary.info);
    eprintln!();

    if report.diagnostics.is_empty() {
        eprintln!("{}", "✓ No issues found!".green().bold());
        return;
    }
    eprintln!("{}", "Diagnostics:".bold());
    for diag in &report.diagnostics {
        eprintln!("  [{}] {}: {}", severity_label(diag.severity), diag.code, diag.message);
        if let Some(loc) = &diag.location {
            eprintln!("    at {}", loc);
        }
    }
}
