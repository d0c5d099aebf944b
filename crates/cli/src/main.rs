mod commands;
mod logging;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Ad-hoc SQL execution gateway.
#[derive(Parser)]
#[command(name = "sqlgate", version, about = "Ad-hoc SQL execution gateway")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a SQL template with parameters, without contacting an engine
    Render {
        /// SQL template with {name} placeholders
        sql: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Dry-run: render and validate a query on an engine
    Validate {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Execute a query and print its result
    Run {
        #[command(flatten)]
        query: QueryArgs,
        /// Download format to record with the execution
        #[arg(long)]
        download_format: Option<String>,
    },
}

/// Arguments shared by every command that reaches an engine.
#[derive(Args)]
pub(crate) struct QueryArgs {
    /// SQL template with {name} placeholders
    pub sql: String,
    /// Parameters as a JSON object
    #[arg(long)]
    pub params: Option<String>,
    /// Engine to dispatch to
    #[arg(long)]
    pub engine: String,
    /// Engine fixture file (JSON); may be repeated
    #[arg(long = "fixtures", required = true)]
    pub fixtures: Vec<PathBuf>,
    /// Gateway configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// User the execution is attributed to
    #[arg(long, default_value = "cli")]
    pub user: String,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet);

    let code = match cli.command {
        Commands::Render { sql, params } => {
            commands::render::cmd_render(&sql, params.as_deref(), cli.output, cli.quiet)
        }
        Commands::Validate { query } => {
            commands::execute::cmd_execute(&query, true, None, cli.output, cli.quiet)
        }
        Commands::Run {
            query,
            download_format,
        } => commands::execute::cmd_execute(&query, false, download_format, cli.output, cli.quiet),
    };
    process::exit(code);
}

/// Report an error to stderr in the selected format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}

/// Print a JSON value to stdout, pretty-printed.
pub(crate) fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("serialization error: {}", e))
    );
}
