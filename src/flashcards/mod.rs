// Flashcard generation
// Asks a language model for question/answer pairs and writes an importable deck


use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::FlashcardConfig;
use crate::documents::read_document;
use crate::{Result, StudyError};

/// Produces a completion for a prompt
#[async_trait]
pub trait CardGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// One question/answer pair, already HTML-escaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    question: Option<Value>,
    answer: Option<Value>,
}

/// An ordered collection of cards under a deck name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashcardDeck {
    pub name: String,
    pub cards: Vec<Flashcard>,
}

impl FlashcardDeck {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cards: Vec::new(),
        }
    }

    /// Render the deck as tab-separated text that Anki can import
    #[inline]
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("#separator:tab\n#html:true\n");
        out.push_str("#deck:");
        out.push_str(&tsv_field(&self.name));
        out.push('\n');

        for card in &self.cards {
            out.push_str(&tsv_field(&card.question));
            out.push('\t');
            out.push_str(&tsv_field(&card.answer));
            out.push('\n');
        }
        out
    }

    #[inline]
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(path)?;
        file.write_all(self.to_tsv().as_bytes())?;
        file.flush()?;

        info!("Wrote {} cards to {}", self.cards.len(), path.display());
        Ok(())
    }
}

/// Summary of a deck generation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckReport {
    pub output: PathBuf,
    pub cards_created: usize,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
}

impl DeckReport {
    /// True when documents failed and no card came out of the run
    #[inline]
    pub const fn is_error(&self) -> bool {
        self.cards_created == 0 && self.documents_failed > 0
    }
}

impl fmt::Display for DeckReport {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Created {} flashcards from {} documents ({} skipped, {} failed). Deck saved to {}",
            self.cards_created,
            self.documents_processed,
            self.documents_skipped,
            self.documents_failed,
            self.output.display()
        )
    }
}

/// Prompt asking for `count` exam-style cards about `text`
#[inline]
pub fn build_prompt(count: usize, text: &str) -> String {
    format!(
        "Act as a teacher. Analyze the text and write {count} flashcards for exam review.\n\
         Prioritize the key concepts.\n\
         Reply ONLY with valid JSON: an array of objects shaped like \
         {{\"question\": \"...\", \"answer\": \"...\"}}\n\
         \nTEXT:\n{text}"
    )
}

/// Extract cards from a model reply.
///
/// Accepts a bare array, an object wrapping an array, or a single card object.
/// Entries missing either field are dropped.
#[inline]
pub fn parse_cards(reply: &str) -> Result<Vec<Flashcard>> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let value: Value = serde_json::from_str(cleaned.trim())
        .map_err(|e| StudyError::Flashcards(format!("Reply is not valid JSON: {}", e)))?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            if map.contains_key("question") {
                vec![Value::Object(map)]
            } else {
                map.into_iter()
                    .find_map(|(_, v)| match v {
                        Value::Array(items) => Some(items),
                        _ => None,
                    })
                    .unwrap_or_default()
            }
        }
        _ => {
            return Err(StudyError::Flashcards(
                "Reply does not contain any cards".to_string(),
            ));
        }
    };

    let cards = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawCard>(entry).ok())
        .filter_map(|raw| {
            let question = field_text(raw.question?)?;
            let answer = field_text(raw.answer?)?;
            Some(Flashcard {
                question: html_escape::encode_safe(&question).into_owned(),
                answer: html_escape::encode_safe(&answer).into_owned(),
            })
        })
        .collect();

    Ok(cards)
}

/// Generate cards for each document in turn and write them to `output`.
///
/// A document that cannot be read or answered for is counted as failed and
/// the run continues with the next one.
#[inline]
pub async fn generate_deck(
    generator: &dyn CardGenerator,
    paths: &[PathBuf],
    count: usize,
    output: &Path,
    config: &FlashcardConfig,
) -> Result<DeckReport> {
    let mut deck = FlashcardDeck::new(config.deck_name.clone());
    let mut report = DeckReport {
        output: output.to_path_buf(),
        cards_created: 0,
        documents_processed: 0,
        documents_skipped: 0,
        documents_failed: 0,
    };
    let cooldown = Duration::from_secs(config.cooldown_seconds);

    for (i, path) in paths.iter().enumerate() {
        info!(
            "Processing document {} of {}: {}",
            i + 1,
            paths.len(),
            path.display()
        );

        match cards_for_document(generator, path, count, config).await {
            Ok(Some(cards)) => {
                info!("Created {} cards from {}", cards.len(), path.display());
                report.cards_created += cards.len();
                report.documents_processed += 1;
                deck.cards.extend(cards);
            }
            Ok(None) => {
                report.documents_skipped += 1;
            }
            Err(e) => {
                error!("Failed to create cards from {}: {}", path.display(), e);
                report.documents_failed += 1;
            }
        }

        if i + 1 < paths.len() && !cooldown.is_zero() {
            debug!("Waiting {:?} before the next document", cooldown);
            tokio::time::sleep(cooldown).await;
        }
    }

    deck.write_to(output)?;
    Ok(report)
}

/// Cards for one document, or `None` when it is too short to bother
async fn cards_for_document(
    generator: &dyn CardGenerator,
    path: &Path,
    count: usize,
    config: &FlashcardConfig,
) -> Result<Option<Vec<Flashcard>>> {
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || read_document(&owned))
        .await
        .map_err(|e| StudyError::Document(format!("Reader task failed: {}", e)))??;

    if text.trim().chars().count() < config.min_input_chars {
        warn!("Skipping {}: not enough text", path.display());
        return Ok(None);
    }

    let excerpt: String = text.chars().take(config.max_input_chars).collect();
    let reply = generator.generate(&build_prompt(count, &excerpt)).await?;
    parse_cards(&reply).map(Some)
}

fn field_text(value: Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s,
        Value::Null => return None,
        other => other.to_string(),
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn tsv_field(text: &str) -> String {
    text.replace("\r\n", "<br>")
        .replace('\n', "<br>")
        .replace(['\t', '\r'], " ")
}
