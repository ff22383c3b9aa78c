use clap::{Parser, Subcommand};
use std::path::PathBuf;
use study_mcp::Result;
use study_mcp::commands::{ask, learn_paths, learn_text, list_sources, make_flashcards, serve_mcp};
use study_mcp::config::{run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "study-mcp")]
#[command(about = "A study memory for your notes, with flashcards and an MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Memorize one or more documents (text or PDF)
    Learn {
        /// Files to learn
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Memorize text under an explicit source name
    LearnText {
        /// Name the text is stored under
        #[arg(long)]
        source: String,
        /// File to read, or "-" for standard input
        input: PathBuf,
    },
    /// Retrieve the notes most relevant to a question
    Ask {
        /// The question to look up
        question: String,
    },
    /// List the documents that have been studied
    Sources,
    /// Generate an Anki-importable flashcard deck from documents
    Flashcards {
        /// Documents to turn into flashcards
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Number of cards to request per document
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=50))]
        count: u16,
        /// Where to write the deck
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Start MCP server on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Learn { paths } => {
            learn_paths(paths).await?;
        }
        Commands::LearnText { source, input } => {
            learn_text(&source, &input).await?;
        }
        Commands::Ask { question } => {
            ask(&question).await?;
        }
        Commands::Sources => {
            list_sources().await?;
        }
        Commands::Flashcards {
            paths,
            count,
            output,
        } => {
            make_flashcards(paths, usize::from(count), output).await?;
        }
        Commands::Serve => {
            serve_mcp().await?;
        }
    }

    Ok(())
}
