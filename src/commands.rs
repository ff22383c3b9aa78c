use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{LanceVectorStore, VectorStore};
use crate::embeddings::{Embedder, OllamaClient};
use crate::flashcards::{CardGenerator, generate_deck};
use crate::mcp::{McpServer, register_study_tools};
use crate::memory::{LearnOutcome, MemoryManager, SourceListing};

/// File name of the deck written when no output is given
pub const DEFAULT_DECK_FILE: &str = "flashcards.txt";

/// Components built from the configuration and shared by every command
pub struct Study {
    pub config: Config,
    pub ollama: Arc<OllamaClient>,
    pub store: Arc<LanceVectorStore>,
    pub memory: Arc<MemoryManager>,
}

impl Study {
    /// Load the configuration and open the vector store
    #[inline]
    pub async fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::from_config(config).await
    }

    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        let ollama =
            Arc::new(OllamaClient::new(&config).context("Failed to create Ollama client")?);
        let store = Arc::new(
            LanceVectorStore::new(&config)
                .await
                .context("Failed to initialize vector store")?,
        );
        let memory = Arc::new(MemoryManager::new(
            config.memory.clone(),
            Arc::clone(&ollama) as Arc<dyn Embedder>,
            Arc::clone(&store) as Arc<dyn VectorStore>,
        ));

        Ok(Self {
            config,
            ollama,
            store,
            memory,
        })
    }

    /// Where decks go when the caller does not say
    #[inline]
    pub fn default_deck_path(&self) -> Result<PathBuf> {
        Ok(self.config.get_base_dir()?.join(DEFAULT_DECK_FILE))
    }
}

/// Learn each file in turn, showing progress on a terminal
#[inline]
pub async fn learn_paths(paths: Vec<PathBuf>) -> Result<()> {
    let study = Study::open().await?;
    info!("Learning {} documents", paths.len());

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(paths.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Learning {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let report = study
        .memory
        .learn_files_with(&paths, |path, outcome| {
            bar.set_message(path.display().to_string());
            bar.inc(1);
            match outcome {
                LearnOutcome::Failed { .. } => bar.println(format!("✗ {}", outcome)),
                _ => bar.println(format!("✓ {}", outcome)),
            }
        })
        .await;
    bar.finish_and_clear();

    println!(
        "Finished. Memorized {} of {} documents.",
        report.learned, report.total
    );

    if report.is_error() {
        anyhow::bail!("No document could be learned");
    }
    Ok(())
}

/// Learn text from a file or standard input (`-`) under an explicit source name
#[inline]
pub async fn learn_text(source: &str, input: &Path) -> Result<()> {
    let text = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read standard input")?;
        buffer
    } else {
        crate::documents::read_document(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };

    let study = Study::open().await?;
    let outcome = study.memory.learn(&text, source).await;
    println!("{}", outcome);

    if outcome.is_error() {
        anyhow::bail!("Failed to learn {}", source);
    }
    Ok(())
}

/// Print the context retrieved for a question
#[inline]
pub async fn ask(question: &str) -> Result<()> {
    let study = Study::open().await?;
    let outcome = study.memory.answer(question).await;
    println!("{}", outcome);

    if outcome.is_error() {
        anyhow::bail!("Could not answer the question");
    }
    Ok(())
}

/// Print the studied sources along with store statistics
#[inline]
pub async fn list_sources() -> Result<()> {
    let study = Study::open().await?;

    let listing = study.memory.list_sources().await;
    match &listing {
        SourceListing::Sources(sources) => {
            println!("Studied files ({} total):", sources.len());
            for source in sources {
                println!("  📄 {}", source);
            }
        }
        SourceListing::Empty => {
            println!("{}", listing);
            println!("Use 'study-mcp learn <file>' to study a document.");
        }
        SourceListing::Unavailable(_) => {
            println!("{}", listing);
        }
    }

    println!();
    match study.store.count().await {
        Ok(count) => println!("Stored fragments: {}", count),
        Err(e) => println!("Stored fragments: unavailable ({})", e),
    }
    println!(
        "Store location: {} (table '{}')",
        study.config.vector_database_path()?.display(),
        study.store.table_name()
    );

    if listing.is_error() {
        anyhow::bail!("Failed to read memory");
    }
    Ok(())
}

/// Generate a flashcard deck from documents
#[inline]
pub async fn make_flashcards(
    paths: Vec<PathBuf>,
    count: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let client = OllamaClient::new(&config).context("Failed to create Ollama client")?;
    let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_DECK_FILE));

    info!(
        "Generating {} cards per document from {} documents",
        count,
        paths.len()
    );

    let report = generate_deck(&client, &paths, count, &output, &config.flashcards)
        .await
        .context("Failed to write flashcard deck")?;
    println!("{}", report);

    if report.is_error() {
        anyhow::bail!("No flashcards could be generated");
    }
    Ok(())
}

/// Start the MCP server on stdio
#[inline]
pub async fn serve_mcp() -> Result<()> {
    let study = Study::open().await?;

    // Verify Ollama before taking requests; tools still start without it
    match study.ollama.health_check() {
        Ok(()) => {
            info!(
                "✅ Ollama connected at {}:{} with model {}",
                study.config.ollama.host, study.config.ollama.port, study.config.ollama.model
            );
        }
        Err(e) => {
            warn!("⚠️  Ollama is not ready: {:#}", e);
            eprintln!("Warning: Ollama may not be ready. Learning and questions may fail.");
            eprintln!("Use 'study-mcp config' to update connection settings.");
        }
    }

    let server = McpServer::new(
        "study-mcp".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )
    .with_instructions(
        "Study memory. Use learn_file or learn_document to memorize material, \
         ask_memory to retrieve passages relevant to a question, and list_sources \
         to see what has been studied.",
    );

    register_study_tools(
        &server,
        &study.memory,
        Arc::clone(&study.ollama) as Arc<dyn CardGenerator>,
        study.config.flashcards.clone(),
        study.default_deck_path()?,
    )
    .await;

    eprintln!("✅ MCP server initialized, listening on stdio");

    let server = Arc::new(server);
    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            if let Err(e) = &result {
                error!("MCP server error: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n📴 Received interrupt signal, shutting down...");
        }
    }

    Ok(())
}
