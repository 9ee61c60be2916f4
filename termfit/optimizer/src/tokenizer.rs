use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::script::ScriptClass;

/// Failures raised by a segmentation backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizationError {
    /// The backend cannot handle the input's script.
    #[error("unsupported input: {0}")]
    Unsupported(String),
    /// A lexicon-driven tokenizer was built without words.
    #[error("lexicon is empty")]
    EmptyLexicon,
    /// Internal backend failure.
    #[error("tokenizer backend error: {0}")]
    Backend(String),
}

/// Morphological / sub-word segmentation capability.
pub trait Tokenizer: Send + Sync {
    /// Splits `text` into ordered sub-word units.
    fn segment(&self, text: &str) -> Result<Vec<String>, TokenizationError>;
}

/// Greedy longest-match segmentation against a fixed word list.
///
/// Characters not covered by any lexicon word are emitted as one contiguous run
/// so nothing of the input is lost.
#[derive(Debug, Clone)]
pub struct LexiconTokenizer {
    words: HashSet<String>,
    longest: usize,
}

impl LexiconTokenizer {
    /// Builds a tokenizer from an iterator of words; blank entries are skipped.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: HashSet<String> = words
            .into_iter()
            .map(|word| word.as_ref().trim().to_string())
            .filter(|word| !word.is_empty())
            .collect();
        let longest = words.iter().map(|w| w.chars().count()).max().unwrap_or(0);
        Self { words, longest }
    }

    /// Loads one word per line; lines starting with `#` are comments.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading lexicon {}", path.display()))?;
        Ok(Self::new(
            raw.lines().filter(|line| !line.trim_start().starts_with('#')),
        ))
    }

    /// Number of distinct words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the lexicon has no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn segment_chunk(&self, chunk: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = chunk.chars().collect();
        let mut unknown = String::new();
        let mut pos = 0;
        while pos < chars.len() {
            let max_len = self.longest.min(chars.len() - pos);
            let matched = (1..=max_len).rev().find_map(|len| {
                let candidate: String = chars[pos..pos + len].iter().collect();
                self.words.contains(&candidate).then_some((candidate, len))
            });
            if let Some((word, len)) = matched {
                if !unknown.is_empty() {
                    out.push(std::mem::take(&mut unknown));
                }
                out.push(word);
                pos += len;
            } else {
                unknown.push(chars[pos]);
                pos += 1;
            }
        }
        if !unknown.is_empty() {
            out.push(unknown);
        }
    }
}

impl Tokenizer for LexiconTokenizer {
    fn segment(&self, text: &str) -> Result<Vec<String>, TokenizationError> {
        if self.words.is_empty() {
            return Err(TokenizationError::EmptyLexicon);
        }
        let mut tokens = Vec::new();
        for chunk in text.split_whitespace() {
            self.segment_chunk(chunk, &mut tokens);
        }
        Ok(tokens)
    }
}

/// Splits on whitespace and wherever the script class changes, dropping
/// punctuation. Useful when no lexicon is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptRunTokenizer;

impl Tokenizer for ScriptRunTokenizer {
    fn segment(&self, text: &str) -> Result<Vec<String>, TokenizationError> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut current_class = None;
        for ch in text.chars() {
            if !ch.is_alphanumeric() {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                continue;
            }
            let class = ScriptClass::of(ch);
            if !current.is_empty() && class != current_class {
                tokens.push(std::mem::take(&mut current));
            }
            current_class = class;
            current.push(ch);
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        Ok(tokens)
    }
}
