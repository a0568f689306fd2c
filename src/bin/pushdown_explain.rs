//! Replay a captured analysis input and explain the pushdown decision.
//!
//! ```text
//! pushdown_explain --input query.json [--config pushdown.toml] [--format json]
//! ```
//!
//! Exits 0 when a decision was reached (safe or not) and 1 on any error.
//! Set `RUST_LOG=pg_colocation=debug` to see the analysis steps.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use pg_colocation::{AnalysisInput, ColocationError, PushdownDecision, PushdownSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "pushdown_explain")]
#[command(version)]
#[command(about = "Explain whether a captured query can be pushed down to shards")]
struct Args {
    /// Analysis input (JSON); `-` reads standard input
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Settings file (TOML); defaults apply when omitted
    #[arg(short, long, value_name = "FILE", env = "PG_COLOCATION_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let args = Args::parse();
    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("pushdown_explain: {e} [{}]", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<String, ColocationError> {
    let settings = match &args.config {
        Some(path) => PushdownSettings::from_file(path)?,
        None => PushdownSettings::default(),
    };
    let input = AnalysisInput::from_json(&read_input(&args.input)?)?;
    let decision = input.analyze(&settings)?;

    match args.format {
        OutputFormat::Text => Ok(render_text(&decision)),
        OutputFormat::Json => serde_json::to_string_pretty(&decision)
            .map_err(|e| ColocationError::InternalError(format!("cannot encode decision: {e}"))),
    }
}

fn read_input(path: &Path) -> Result<String, ColocationError> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| ColocationError::InputError(format!("cannot read stdin: {e}")))?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .map_err(|e| ColocationError::InputError(format!("cannot read {}: {e}", path.display())))
}

fn render_text(decision: &PushdownDecision) -> String {
    let mut out = format!(
        "{}: {}",
        if decision.safe { "safe" } else { "not safe" },
        decision.reason
    );
    if let Some(class) = &decision.common_class {
        let members: Vec<String> = class.members().iter().map(|m| m.to_string()).collect();
        out.push_str(&format!("\ncommon class {}: [{}]", class.id, members.join(", ")));
    }
    out
}
