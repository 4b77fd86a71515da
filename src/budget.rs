//! Token counting and budget enforcement
//!
//! Uses tiktoken-rs BPE encodings, so counts are deterministic and
//! independent of locale. Budget enforcement treats every item as atomic:
//! an item is either returned whole or not at all.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{MemoriaError, Result};
use crate::types::{MemoryItem, ScoredMemory};

/// Supported encoding types for token counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    /// cl100k_base - GPT-4, GPT-4-turbo, text-embedding-3-*
    #[default]
    Cl100kBase,
    /// o200k_base - GPT-4o, GPT-4o-mini
    O200kBase,
}

impl TokenEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEncoding::Cl100kBase => "cl100k_base",
            TokenEncoding::O200kBase => "o200k_base",
        }
    }
}

/// Parse encoding string to TokenEncoding
pub fn parse_encoding(encoding: &str) -> Option<TokenEncoding> {
    match encoding.to_lowercase().as_str() {
        "cl100k_base" | "cl100k" => Some(TokenEncoding::Cl100kBase),
        "o200k_base" | "o200k" => Some(TokenEncoding::O200kBase),
        _ => None,
    }
}

static CL100K: OnceCell<Arc<CoreBPE>> = OnceCell::new();
static O200K: OnceCell<Arc<CoreBPE>> = OnceCell::new();

fn load_bpe(encoding: TokenEncoding) -> Result<Arc<CoreBPE>> {
    let (cell, init): (_, fn() -> anyhow::Result<CoreBPE>) = match encoding {
        TokenEncoding::Cl100kBase => (&CL100K, tiktoken_rs::cl100k_base),
        TokenEncoding::O200kBase => (&O200K, tiktoken_rs::o200k_base),
    };
    cell.get_or_try_init(|| init().map(Arc::new))
        .cloned()
        .map_err(|e| MemoriaError::Internal(format!("Failed to initialize tokenizer: {}", e)))
}

/// Anything whose size is measured by its text
pub trait Budgeted {
    fn budget_text(&self) -> &str;
}

impl Budgeted for MemoryItem {
    fn budget_text(&self) -> &str {
        &self.content
    }
}

impl Budgeted for ScoredMemory {
    fn budget_text(&self) -> &str {
        &self.item.content
    }
}

impl Budgeted for String {
    fn budget_text(&self) -> &str {
        self
    }
}

impl Budgeted for &str {
    fn budget_text(&self) -> &str {
        self
    }
}

/// Token counter bound to one BPE encoding.
///
/// Cloning is cheap; the encoder tables are loaded once per process.
#[derive(Clone)]
pub struct Tokenizer {
    encoding: TokenEncoding,
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl Tokenizer {
    pub fn new(encoding: TokenEncoding) -> Result<Self> {
        Ok(Self {
            encoding,
            bpe: load_bpe(encoding)?,
        })
    }

    /// cl100k_base tokenizer
    pub fn cl100k() -> Result<Self> {
        Self::new(TokenEncoding::Cl100kBase)
    }

    pub fn encoding(&self) -> TokenEncoding {
        self.encoding
    }

    /// Count tokens in `text`
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Keep the longest prefix of `items` whose combined token count fits
    /// within `budget_tokens`.
    ///
    /// Stops at the first item that would overflow the budget, even if a
    /// later, smaller item would fit. The flag is true whenever any item
    /// was dropped, including when nothing fits at all.
    pub fn enforce_budget<T: Budgeted>(&self, items: Vec<T>, budget_tokens: usize) -> (Vec<T>, bool) {
        let total = items.len();
        let mut used = 0usize;
        let mut kept = Vec::with_capacity(total);

        for item in items {
            let cost = self.count_tokens(item.budget_text());
            if used + cost > budget_tokens {
                break;
            }
            used += cost;
            kept.push(item);
        }

        let truncated = kept.len() < total;
        (kept, truncated)
    }
}
