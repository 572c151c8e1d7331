#![forbid(unsafe_code)]

mod cmd;
mod identity;
mod output;
mod sync;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vellum_core::config;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "vellum: version control for JSON design workspaces",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Act as this user (skips env and config resolution).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Hosted store URL (`sqlite://<path>` or a bare path).
    #[arg(long, global = true, value_name = "URL")]
    store: Option<String>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create a hosted workspace for this directory",
        long_about = "Create a hosted workspace from design.json (or an empty document) and mirror it into .vellum/.",
        after_help = "EXAMPLES:\n    # Start tracking the current directory\n    vl init \"Landing page\" --store sqlite://$HOME/vellum.db\n\n    # Replace an existing local mirror\n    vl init \"Landing page\" --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Editing",
        about = "Watch design.json and sync changes",
        long_about = "Poll design.json, record each settled change locally, and push it to the hosted store.",
        after_help = "EXAMPLES:\n    # Watch until interrupted\n    vl dev\n\n    # Record and push one pending change, then exit\n    vl dev --once"
    )]
    Dev(cmd::dev::DevArgs),

    #[command(
        next_help_heading = "Editing",
        about = "Step back one change",
        after_help = "EXAMPLES:\n    vl undo\n    vl undo --json"
    )]
    Undo,

    #[command(
        next_help_heading = "Editing",
        about = "Step forward one change",
        after_help = "EXAMPLES:\n    vl redo\n    vl redo --json"
    )]
    Redo,

    #[command(
        next_help_heading = "History",
        about = "List recorded events",
        long_about = "List the local event log, marking the current position.",
        after_help = "EXAMPLES:\n    # Last 10 events\n    vl history --limit 10\n\n    # Print the document as it was at position 3\n    vl history --show 3"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        next_help_heading = "History",
        about = "Bookmark the current position",
        after_help = "EXAMPLES:\n    vl checkpoint \"v1.0\""
    )]
    Checkpoint(cmd::checkpoint::CheckpointArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Fetch the hosted document",
        long_about = "Fetch the hosted document, record it locally, and rewrite design.json.",
        after_help = "EXAMPLES:\n    # Catch up after a version conflict\n    vl pull"
    )]
    Pull,

    #[command(
        next_help_heading = "Sync",
        about = "Show local and hosted versions",
        after_help = "EXAMPLES:\n    vl status\n    vl status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    vl completions bash\n\n    # Generate zsh completions\n    vl completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("VELLUM_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "vellum_core=debug,vl=debug,info"
        } else if quiet {
            "error"
        } else {
            "vellum_core=info,vl=info,warn"
        })
    });

    let format = env::var("VELLUM_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let user_config = match config::load_user_config() {
        Ok(user_config) => user_config,
        Err(err) => {
            let mode = OutputMode::resolve(cli.json, &config::UserConfig::default());
            report(mode, &err);
            return ExitCode::FAILURE;
        }
    };
    let output = OutputMode::resolve(cli.json, &user_config);

    let result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| {
            let globals = cmd::Globals {
                root,
                user: cli.user.clone(),
                store: cli.store.clone(),
                quiet: cli.quiet,
                output,
                user_config,
            };
            run(cli.command, &globals)
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(output, &err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, globals: &cmd::Globals) -> anyhow::Result<()> {
    debug!(?command, "dispatch");
    match command {
        Commands::Init(args) => cmd::init::run_init(&args, globals),
        Commands::Dev(args) => cmd::dev::run_dev(&args, globals),
        Commands::Undo => cmd::undo::run_undo(globals),
        Commands::Redo => cmd::undo::run_redo(globals),
        Commands::History(args) => cmd::history::run_history(&args, globals),
        Commands::Checkpoint(args) => cmd::checkpoint::run_checkpoint(&args, globals),
        Commands::Pull => cmd::pull::run_pull(globals),
        Commands::Status => cmd::status::run_status(globals),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

fn report(mode: OutputMode, err: &anyhow::Error) {
    if render_error(mode, &CliError::from(err)).is_err() {
        eprintln!("error: {err:#}");
    }
}
