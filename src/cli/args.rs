//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// courier - chat delivery with shared-backend fallback and an offline queue.
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Shared backend base URL
    #[arg(long, value_name = "URL", global = true)]
    pub shared_url: Option<String>,

    /// Routing mode for this run only (auto, shared, direct)
    #[arg(long, value_name = "MODE", global = true)]
    pub mode: Option<String>,

    /// Direct provider timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Directory holding the local store
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Treat the device as offline (sends are queued)
    #[arg(long, global = true)]
    pub offline: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message (queued when no path is available)
    Send(SendArgs),

    /// Show connectivity, mode, credentials, and queue (default command)
    Status(StatusArgs),

    /// List known providers and models
    Providers,

    /// Manage provider API keys
    #[command(subcommand)]
    Credentials(CredentialsCommand),

    /// Show or change the routing mode
    #[command(subcommand)]
    Mode(ModeCommand),

    /// Inspect or replay the offline queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Poll connectivity and drain the queue whenever it comes back
    Watch(WatchArgs),
}

/// Arguments for the `send` command.
#[derive(Args, Debug, Default)]
pub struct SendArgs {
    /// Message text (words are joined with spaces)
    #[arg(value_name = "TEXT", required = true)]
    pub text: Vec<String>,

    /// Conversation id the message belongs to
    #[arg(long, value_name = "ID", default_value = "default")]
    pub chat: String,

    /// Preferred provider
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Preferred model
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// System prompt to prepend
    #[arg(long, value_name = "PROMPT")]
    pub system: Option<String>,

    /// Print the raw response body instead of extracted text
    #[arg(long)]
    pub raw: bool,
}

/// Arguments for the `status` command.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Provider hint for the routing decision
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Model hint for the routing decision
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,
}

/// `credentials` subcommands.
#[derive(Subcommand, Debug)]
pub enum CredentialsCommand {
    /// Store an API key
    Set {
        /// Provider name
        provider: String,
        /// API key (read from stdin when omitted)
        value: Option<String>,
    },
    /// List stored keys (fingerprints only)
    List,
    /// Remove a key, or all keys with --all
    Clear {
        /// Provider name
        #[arg(required_unless_present = "all")]
        provider: Option<String>,
        /// Remove every stored key
        #[arg(long, conflicts_with = "provider")]
        all: bool,
    },
}

/// `mode` subcommands.
#[derive(Subcommand, Debug)]
pub enum ModeCommand {
    /// Show the current mode
    Show,
    /// Persist a new mode (auto, shared, direct)
    Set {
        /// Mode name
        mode: String,
    },
}

/// `queue` subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List waiting messages
    List,
    /// Replay waiting messages now
    Drain,
    /// Drop a waiting message
    Remove {
        /// Queued message id
        id: String,
    },
}

/// Arguments for the `watch` command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between connectivity polls
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub interval: u64,

    /// Stop after this many polls
    #[arg(long, value_name = "N")]
    pub max_polls: Option<u64>,

    /// URL whose answer means the device is online (default: shared health URL)
    #[arg(long, value_name = "URL")]
    pub probe_url: Option<String>,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}
