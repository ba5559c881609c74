use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use docindex::config::Similarity;

#[derive(Debug, Parser)]
#[command(
    name = "docindex",
    about = "Incremental passage retrieval over a folder of documentation"
)]
pub struct Cli {
    /// Override the XDG data directory holding the index
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Folder of documentation to index
    #[arg(long, global = true, default_value = ".")]
    pub docs: PathBuf,

    /// Search structure backing the index
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = BackendKind::Dense
    )]
    pub backend: BackendKind,

    /// Similarity used by the dense backend
    #[arg(long, global = true, value_enum)]
    pub similarity: Option<Similarity>,

    /// Token budget for a single passage
    #[arg(long, global = true)]
    pub max_tokens: Option<usize>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Dense,
    Sparse,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bring the index up to date with the documentation folder
    Sync(SyncArgs),
    /// Find the passages most relevant to a question
    Query(QueryArgs),
    /// Show index statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Show progress bars
    #[arg(long)]
    pub progress: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question
    pub text: String,

    /// Number of passages to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Print source links under this base URL instead of file paths
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docindex",
            &mut std::io::stdout(),
        );
    }
}
