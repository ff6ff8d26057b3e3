use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    chunking::{ChunkingMode, TrailingLines},
    evaluation::DEFAULT_K,
    flat_index::DEFAULT_FLUSH_EVERY,
    pipeline::DEFAULT_BATCH_SIZE,
    vector_index::BackendKind,
};

#[derive(Debug, Parser)]
#[command(
    name = "codesift",
    about = "Semantic search over a source tree",
    version
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID (Hugging Face repository)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk a source tree and add it to the index
    Index(IndexArgs),
    /// Search the index
    Search(SearchArgs),
    /// Show what the index was built with and how many records it holds
    Status(StatusArgs),
    /// Remove every record from the index
    Clear,
    /// Measure recall@k against a JSON file of questions
    Eval(EvalArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Root of the source tree
    pub path: PathBuf,

    /// How files are cut into chunks
    #[arg(long, value_enum, default_value = "char")]
    pub mode: ChunkingMode,

    /// Window size in lines or characters, or the token ceiling
    #[arg(long)]
    pub size: Option<usize>,

    /// Overlap between consecutive windows
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Chunk every file, not just known source extensions
    #[arg(long)]
    pub all_files: bool,

    /// Decode files with this encoding label before trying detection
    #[arg(long)]
    pub encoding: Option<String>,

    /// Fail on a file that does not decode instead of guessing its
    /// encoding
    #[arg(long)]
    pub no_detect_encoding: bool,

    /// Skip relative paths matching this glob (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Vector index backend (defaults to the existing index's backend)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Worker threads embedding and storing chunks
    #[arg(long)]
    pub workers: Option<usize>,

    /// Chunks read per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Flat backend: write buffered records after this many adds
    #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: usize,

    /// Line mode: also emit the shorter window that reaches end of file
    #[arg(long)]
    pub keep_trailing_lines: bool,

    /// Line and char modes: start each chunk with its file name
    #[arg(long)]
    pub filename_header: bool,

    /// Delete the existing index before indexing
    #[arg(long)]
    pub reset: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexArgs {
    pub fn trailing_lines(&self) -> TrailingLines {
        if self.keep_trailing_lines {
            TrailingLines::KeepFinal
        } else {
            TrailingLines::Drop
        }
    }
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Eval --

#[derive(Debug, Parser)]
pub struct EvalArgs {
    /// JSON file of `{"question", "files"}` cases
    pub cases: PathBuf,

    /// Chunks retrieved per question
    #[arg(short, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

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
            "codesift",
            &mut std::io::stdout(),
        );
    }
}
