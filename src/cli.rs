use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Resolve the effective output format.
    /// If user specified a format, use it.
    /// Otherwise: TTY → Text, non-TTY (pipe) → Json
    pub fn resolve(user_choice: Option<OutputFormat>) -> OutputFormat {
        match user_choice {
            Some(fmt) => fmt,
            None => {
                if std::io::stdout().is_terminal() {
                    OutputFormat::Text
                } else {
                    OutputFormat::Json
                }
            }
        }
    }
}

#[derive(Parser)]
#[command(
    name = "pagewatch",
    about = "Capture application errors and requests and ship them to a collector",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/pagewatch/logs/pagewatch.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to pagewatch.yaml config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay the monitoring test page: one lifecycle error, one traced POST
    Fixture {
        /// Base URL of the application the page talks to
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        target: String,

        /// Collector endpoint (overrides the config file)
        #[arg(long)]
        collector: Option<String>,

        /// Output format (default: text for TTY, json for pipes)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show the effective configuration
    Config {
        /// Output format (default: yaml)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },
}
