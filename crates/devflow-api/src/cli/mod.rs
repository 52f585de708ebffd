//! CLI command definitions for the `devflow` binary.
//!
//! Uses clap derive macros for argument parsing. Global flags control the
//! data directory, output format and log verbosity.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use devflow_infra::config::DATA_DIR_ENV;
use devflow_observe::tracing_setup::LogFormat;

/// Run and schedule developer workflows.
#[derive(Parser)]
#[command(name = "devflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for engine debug logs, -vv for everything).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding config.toml and the workflows directory.
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    pub data_dir: Option<PathBuf>,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Also export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Trigger a workflow and follow it until it finishes.
    Run {
        /// Workflow id.
        workflow: String,

        /// JSON payload bound to `$trigger`.
        #[arg(long)]
        payload: Option<String>,

        /// Project directory the run operates in (defaults to the cwd).
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// List workflow definitions.
    #[command(alias = "ls")]
    List,

    /// Check a workflow YAML file without running it.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Start the trigger scheduler and the REST API server.
    Serve {
        /// Port to listen on (overrides config.toml).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides config.toml).
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_payload_and_global_flags() {
        let cli = Cli::try_parse_from([
            "devflow",
            "-vv",
            "--data-dir",
            "/tmp/flows",
            "run",
            "deploy",
            "--payload",
            r#"{"env":"prod"}"#,
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/flows")));
        match cli.command {
            Commands::Run { workflow, payload, project } => {
                assert_eq!(workflow, "deploy");
                assert_eq!(payload.as_deref(), Some(r#"{"env":"prod"}"#));
                assert!(project.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn serve_overrides_are_optional() {
        let cli = Cli::try_parse_from(["devflow", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(9000));
                assert!(host.is_none());
            }
            _ => panic!("expected serve"),
        }
        assert_eq!(cli.log_format, LogFormatArg::Pretty);
    }
}
